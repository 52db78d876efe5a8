//! Directory scanning: turns a folder rule set into a stream of image files.

use std::iter;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::events::ImagePath;
use crate::folders::{path_starts_with_ci, FolderCollection, FolderRule, InclusionMode};

const SUPPORTED_EXTENSIONS: &[&str] = &["bmp", "gif", "jpg", "jpeg", "png", "tiff", "ico"];

/// Return `true` if `path` has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.iter().any(|e| *e == ext)
        })
}

/// Lazily enumerate every image reachable through `rules`, assigning gap-free
/// monotonic indices starting at `start_index`.
///
/// Unlistable folders (deleted, permission denied) are skipped silently:
/// partial availability is expected, e.g. an unplugged removable drive. The
/// walk reflects the filesystem at iteration time and is freely restartable;
/// nothing here is cached.
pub fn scan_set(rules: &FolderCollection, start_index: u64) -> impl Iterator<Item = ImagePath> {
    let excluded: Vec<PathBuf> = rules
        .excluded_paths()
        .iter()
        .map(|p| p.to_path_buf())
        .collect();
    let rule_list: Vec<FolderRule> = rules.rules().to_vec();
    let mut next_index = start_index;

    rule_list
        .into_iter()
        .flat_map(move |rule| rule_files(rule, excluded.clone()))
        .map(move |path| {
            let index = next_index;
            next_index += 1;
            let file_date = file_date(&path);
            ImagePath {
                index,
                path,
                file_date,
            }
        })
}

fn rule_files(rule: FolderRule, excluded: Vec<PathBuf>) -> Box<dyn Iterator<Item = PathBuf>> {
    match rule.mode {
        InclusionMode::Exclude => Box::new(iter::empty()),
        InclusionMode::Single => Box::new(image_files(WalkDir::new(&rule.path).max_depth(1))),
        InclusionMode::Recursive => {
            if is_excluded(&excluded, &rule.path) {
                return Box::new(iter::empty());
            }
            let walk = WalkDir::new(&rule.path);
            Box::new(
                walk.into_iter()
                    .filter_entry(move |entry| !is_excluded(&excluded, entry.path()))
                    .filter_map(Result::ok)
                    .filter(|entry| entry.file_type().is_file())
                    .map(|entry| entry.into_path())
                    .filter(|path| is_supported_image(path)),
            )
        }
    }
}

fn image_files(walk: WalkDir) -> impl Iterator<Item = PathBuf> {
    walk.into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_supported_image(path))
}

fn is_excluded(excluded: &[PathBuf], path: &Path) -> bool {
    excluded.iter().any(|root| path_starts_with_ci(path, root))
}

/// Creation timestamp of `path`, falling back to mtime on filesystems that
/// do not report creation time. A vanished file dates to the epoch.
fn file_date(path: &Path) -> DateTime<Utc> {
    let stamp = std::fs::metadata(path)
        .ok()
        .and_then(|meta| meta.created().or_else(|_| meta.modified()).ok())
        .unwrap_or(UNIX_EPOCH);
    DateTime::<Utc>::from(stamp)
}
