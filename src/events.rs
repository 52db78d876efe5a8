use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::random::RandomSource;

/// One discovered image. `index` is a stable ordinal assigned when the file
/// is first enumerated (monotonic, never reused); `path` only changes when
/// the user moves the current picture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePath {
    pub index: u64,
    pub path: PathBuf,
    pub file_date: DateTime<Utc>,
}

/// Slots of jitter shipped with every picture-changed event.
pub const JITTER_SLOTS: usize = 4;

/// Raw jitter draws live in `[0, JITTER_RANGE)` and are scaled on demand.
const JITTER_RANGE: u64 = 1 << 30;

/// Pushed to the presentation layer whenever the engine advances.
#[derive(Debug, Clone)]
pub struct PictureChanged {
    pub path: PathBuf,
    pub file_date: DateTime<Utc>,
    pub image: Arc<RgbaImage>,
    jitter: [u64; JITTER_SLOTS],
}

impl PictureChanged {
    pub fn new(
        path: PathBuf,
        file_date: DateTime<Utc>,
        image: Arc<RgbaImage>,
        rng: &dyn RandomSource,
    ) -> Self {
        let mut jitter = [0u64; JITTER_SLOTS];
        for slot in jitter.iter_mut() {
            *slot = rng.next_below(JITTER_RANGE as usize) as u64;
        }
        Self {
            path,
            file_date,
            image,
            jitter,
        }
    }

    /// Scale the draw held in `slot` into `[0, max_exclusive)`. Downstream
    /// collage layout uses these for per-picture placement jitter.
    pub fn jitter_in(&self, slot: usize, max_exclusive: u64) -> u64 {
        max_exclusive * self.jitter[slot] / JITTER_RANGE
    }
}

/// Engine-to-presentation notification stream. Push-only, no replay; the
/// channel closes when the engine shuts down.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    PictureChanged(PictureChanged),
    /// Fired on a set switch while the slideshow is running. No payload.
    PictureSetChanged,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::SharedRng;

    #[test]
    fn jitter_scales_into_requested_range() {
        let rng = SharedRng::seeded(11);
        let event = PictureChanged::new(
            PathBuf::from("/p/a.jpg"),
            Utc::now(),
            Arc::new(RgbaImage::new(1, 1)),
            &rng,
        );
        for slot in 0..JITTER_SLOTS {
            assert!(event.jitter_in(slot, 40) < 40);
        }
    }
}
