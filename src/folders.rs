//! Folder rule sets: which directories feed a picture set and how.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// How a configured folder contributes to a picture set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InclusionMode {
    /// Files directly in the folder, no descent.
    Single,
    /// Files in the folder and every non-excluded subdirectory.
    Recursive,
    /// Contributes nothing and prunes recursive descent from other rules.
    Exclude,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderRule {
    pub path: PathBuf,
    pub mode: InclusionMode,
}

/// Ordered set of folder rules making up one picture set.
///
/// Paths are unique under case-insensitive comparison; re-adding a known path
/// overwrites its mode without changing its position. Comparison works on the
/// path string verbatim (no canonicalization), so `/a/b` and `/a/b/` are
/// distinct entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FolderCollection {
    rules: Vec<FolderRule>,
}

impl FolderCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// One recursive rule over `path`; used by the temporary-folder detour.
    pub fn single_folder(path: impl Into<PathBuf>) -> Self {
        let mut rules = Self::new();
        rules.add(path, InclusionMode::Recursive);
        rules
    }

    pub fn add(&mut self, path: impl Into<PathBuf>, mode: InclusionMode) {
        let rule = FolderRule {
            path: path.into(),
            mode,
        };
        match self
            .rules
            .iter()
            .position(|r| paths_equal_ci(&r.path, &rule.path))
        {
            Some(at) => self.rules[at] = rule,
            None => self.rules.push(rule),
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.rules.iter().any(|r| paths_equal_ci(&r.path, path))
    }

    pub fn rules(&self) -> &[FolderRule] {
        &self.rules
    }

    /// Paths of every `Exclude` rule, in rule order.
    pub fn excluded_paths(&self) -> Vec<&Path> {
        self.rules
            .iter()
            .filter(|r| r.mode == InclusionMode::Exclude)
            .map(|r| r.path.as_path())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn paths_equal_ci(a: &Path, b: &Path) -> bool {
    a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
}

/// Case-insensitive "is `path` at or below `root`" on the string form,
/// matching how exclusion prefixes are applied during enumeration.
pub(crate) fn path_starts_with_ci(path: &Path, root: &Path) -> bool {
    path.to_string_lossy()
        .to_lowercase()
        .starts_with(&root.to_string_lossy().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_adding_a_path_overwrites_mode_in_place() {
        let mut rules = FolderCollection::new();
        rules.add("/pics/a", InclusionMode::Single);
        rules.add("/pics/b", InclusionMode::Recursive);
        rules.add("/PICS/A", InclusionMode::Exclude);

        assert_eq!(rules.len(), 2);
        assert_eq!(rules.rules()[0].mode, InclusionMode::Exclude);
        assert_eq!(rules.rules()[1].mode, InclusionMode::Recursive);
    }

    #[test]
    fn contains_is_case_insensitive() {
        let mut rules = FolderCollection::new();
        rules.add("/Pics/Holiday", InclusionMode::Single);
        assert!(rules.contains(Path::new("/pics/holiday")));
        assert!(!rules.contains(Path::new("/pics/holiday/2024")));
    }

    #[test]
    fn excluded_paths_keeps_rule_order() {
        let mut rules = FolderCollection::new();
        rules.add("/a", InclusionMode::Exclude);
        rules.add("/b", InclusionMode::Recursive);
        rules.add("/c", InclusionMode::Exclude);
        let excluded = rules.excluded_paths();
        assert_eq!(excluded, vec![Path::new("/a"), Path::new("/c")]);
    }
}
