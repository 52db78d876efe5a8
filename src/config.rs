//! YAML configuration for the slideshow engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::error::Error;
use crate::folders::FolderCollection;
use crate::order::OrderPolicy;

/// Engine configuration, read once at construction. The engine never reaches
/// for ambient global settings; it works from this snapshot and from explicit
/// update calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Configuration {
    /// Configured picture sets, each an ordered list of folder rules.
    #[serde(default)]
    pub picture_sets: Vec<FolderCollection>,

    /// Index of the active set in `picture_sets`; `None` plays nothing until
    /// a set switch arrives.
    #[serde(default)]
    pub selected_set: Option<usize>,

    #[serde(default = "Configuration::default_order")]
    pub order: OrderPolicy,

    /// Delay between slide advances.
    #[serde(with = "humantime_serde", default = "Configuration::default_slide_delay")]
    pub slide_delay: Duration,

    /// How long a cached picture list stays trustworthy before a background
    /// rebuild is scheduled.
    #[serde(
        with = "humantime_serde",
        default = "Configuration::default_cache_duration"
    )]
    pub cache_duration: Duration,

    /// Where the cache header and per-set lists live.
    #[serde(default = "Configuration::default_cache_dir")]
    pub cache_dir: PathBuf,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            picture_sets: Vec::new(),
            selected_set: None,
            order: Self::default_order(),
            slide_delay: Self::default_slide_delay(),
            cache_duration: Self::default_cache_duration(),
            cache_dir: Self::default_cache_dir(),
        }
    }
}

impl Configuration {
    fn default_order() -> OrderPolicy {
        OrderPolicy::Random
    }

    fn default_slide_delay() -> Duration {
        Duration::from_secs(10)
    }

    fn default_cache_duration() -> Duration {
        // One day; folder contents rarely churn faster on a screensaver box.
        Duration::from_secs(24 * 3600)
    }

    fn default_cache_dir() -> PathBuf {
        PathBuf::from("slide-saver-cache")
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Normalize and sanity-check the parsed configuration.
    ///
    /// Folder rules are re-added through `FolderCollection::add` so duplicate
    /// paths within a set collapse to the last-written mode, and an
    /// out-of-range selected set degrades to "nothing selected" with a
    /// warning rather than failing startup.
    pub fn validated(mut self) -> Result<Self, Error> {
        self.picture_sets = self
            .picture_sets
            .iter()
            .map(|set| {
                let mut rules = FolderCollection::new();
                for rule in set.rules() {
                    rules.add(&rule.path, rule.mode);
                }
                rules
            })
            .collect();

        if let Some(selected) = self.selected_set {
            if selected >= self.picture_sets.len() {
                warn!(
                    selected,
                    sets = self.picture_sets.len(),
                    "selected picture set out of range; ignoring"
                );
                self.selected_set = None;
            }
        }

        if self.slide_delay.is_zero() {
            self.slide_delay = Self::default_slide_delay();
        }

        Ok(self)
    }
}
