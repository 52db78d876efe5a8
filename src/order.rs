//! Order policies: how a discovered image list becomes a visiting order.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::events::ImagePath;
use crate::random::RandomSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderPolicy {
    Sequence,
    SortedByFilenamePerFolder,
    SortedByFilenameAllFolders,
    SortedByDatePerFolder,
    SortedByDateAllFolders,
    Random,
}

impl OrderPolicy {
    const ALL: &'static [Self] = &[
        Self::Sequence,
        Self::SortedByFilenamePerFolder,
        Self::SortedByFilenameAllFolders,
        Self::SortedByDatePerFolder,
        Self::SortedByDateAllFolders,
        Self::Random,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequence => "sequence",
            Self::SortedByFilenamePerFolder => "sorted-by-filename-per-folder",
            Self::SortedByFilenameAllFolders => "sorted-by-filename-all-folders",
            Self::SortedByDatePerFolder => "sorted-by-date-per-folder",
            Self::SortedByDateAllFolders => "sorted-by-date-all-folders",
            Self::Random => "random",
        }
    }
}

impl FromStr for OrderPolicy {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == raw)
            .ok_or_else(|| Error::UnsupportedPolicy(raw.to_string()))
    }
}

/// Produce the visiting order for `images` under `policy`, as a permutation
/// of positions into the slice.
pub fn generate(policy: OrderPolicy, images: &[ImagePath], rng: &dyn RandomSource) -> Vec<usize> {
    match policy {
        OrderPolicy::Sequence => (0..images.len()).collect(),
        OrderPolicy::SortedByFilenamePerFolder => {
            per_folder(images, |a, b| a.path.cmp(&b.path))
        }
        OrderPolicy::SortedByFilenameAllFolders => {
            let mut order: Vec<usize> = (0..images.len()).collect();
            order.sort_by(|&a, &b| images[a].path.file_name().cmp(&images[b].path.file_name()));
            order
        }
        OrderPolicy::SortedByDatePerFolder => {
            per_folder(images, |a, b| a.file_date.cmp(&b.file_date))
        }
        OrderPolicy::SortedByDateAllFolders => {
            let mut order: Vec<usize> = (0..images.len()).collect();
            order.sort_by(|&a, &b| images[a].file_date.cmp(&images[b].file_date));
            order
        }
        OrderPolicy::Random => random_order(images.len(), rng),
    }
}

/// Group positions by parent directory (groups keep first-encountered order,
/// the directory component is compared verbatim), sort each group with `cmp`,
/// and concatenate.
fn per_folder(
    images: &[ImagePath],
    cmp: impl Fn(&ImagePath, &ImagePath) -> std::cmp::Ordering,
) -> Vec<usize> {
    let mut keys: Vec<&Path> = Vec::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (pos, image) in images.iter().enumerate() {
        let key = image.path.parent().unwrap_or_else(|| Path::new(""));
        match keys.iter().position(|k| *k == key) {
            Some(at) => groups[at].push(pos),
            None => {
                keys.push(key);
                groups.push(vec![pos]);
            }
        }
    }

    let mut order = Vec::with_capacity(images.len());
    for mut group in groups {
        group.sort_by(|&a, &b| cmp(&images[a], &images[b]));
        order.extend(group);
    }
    order
}

/// Three-pass shuffle: item-by-item swaps, then repeated deck cuts, then
/// item-by-item swaps again over the cut result. The composition trades
/// uniformity for the visual scatter the slideshow wants; every pass must be
/// kept as-is so a seeded source reproduces the order exactly.
fn random_order(n: usize, rng: &dyn RandomSource) -> Vec<usize> {
    let mut seq: Vec<usize> = (0..n).collect();
    if n < 2 {
        return seq;
    }
    shuffle_item_by_item(&mut seq, rng);
    seq = shuffle_deck(seq, rng);
    shuffle_item_by_item(&mut seq, rng);
    seq
}

fn shuffle_item_by_item(seq: &mut [usize], rng: &dyn RandomSource) {
    let n = seq.len();
    for _ in 0..n {
        let pos1 = rng.next_below(n);
        let pos2 = rng.next_below(n);
        seq.swap(pos1, pos2);
    }
}

fn shuffle_deck(mut seq: Vec<usize>, rng: &dyn RandomSource) -> Vec<usize> {
    let n = seq.len();
    let mut scratch = Vec::with_capacity(n);
    for _ in 0..n {
        let pos1 = rng.next_below(n);
        let pos2 = rng.next_below(n);
        cut_once(&seq, pos1, pos2, &mut scratch);
        std::mem::swap(&mut seq, &mut scratch);
    }
    seq
}

/// One deck cut. The array splits into three chunks at `min(p1,p2)` and
/// `max(p1,p2)`; `p1 < p2` swaps the first two chunks, otherwise the outer
/// chunks swap around a fixed middle.
fn cut_once(source: &[usize], pos1: usize, pos2: usize, out: &mut Vec<usize>) {
    let first = pos1.min(pos2);
    let second = pos1.max(pos2);
    let (head, rest) = source.split_at(first);
    let (middle, tail) = rest.split_at(second - first);

    out.clear();
    if pos1 < pos2 {
        out.extend_from_slice(middle);
        out.extend_from_slice(head);
        out.extend_from_slice(tail);
    } else {
        out.extend_from_slice(tail);
        out.extend_from_slice(middle);
        out.extend_from_slice(head);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::SharedRng;
    use chrono::{TimeZone, Utc};
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct ScriptedRng(Mutex<VecDeque<usize>>);

    impl ScriptedRng {
        fn new(draws: &[usize]) -> Self {
            Self(Mutex::new(draws.iter().copied().collect()))
        }
    }

    impl RandomSource for ScriptedRng {
        fn next_below(&self, max_exclusive: usize) -> usize {
            let draw = self
                .0
                .lock()
                .unwrap()
                .pop_front()
                .expect("rng script exhausted");
            draw % max_exclusive
        }
    }

    fn image(index: u64, path: &str, secs: i64) -> ImagePath {
        ImagePath {
            index,
            path: PathBuf::from(path),
            file_date: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn policy_round_trips_through_names() {
        for policy in OrderPolicy::ALL {
            assert_eq!(*policy, policy.as_str().parse().unwrap());
        }
        assert!(matches!(
            "shiniest-first".parse::<OrderPolicy>(),
            Err(Error::UnsupportedPolicy(_))
        ));
    }

    #[test]
    fn sequence_is_identity() {
        let images = vec![image(0, "/a/x.jpg", 3), image(1, "/a/y.jpg", 1)];
        let rng = SharedRng::seeded(0);
        assert_eq!(generate(OrderPolicy::Sequence, &images, &rng), vec![0, 1]);
    }

    #[test]
    fn per_folder_groups_keep_first_encountered_order() {
        // Discovered A, A, B; within A sorted by full path.
        let images = vec![
            image(0, "/A/b.jpg", 0),
            image(1, "/A/a.jpg", 0),
            image(2, "/B/c.jpg", 0),
        ];
        let rng = SharedRng::seeded(0);
        let order = generate(OrderPolicy::SortedByFilenamePerFolder, &images, &rng);
        assert_eq!(order, vec![1, 0, 2]);
    }

    #[test]
    fn all_folders_sorts_by_file_name_component() {
        let images = vec![
            image(0, "/z/alpha.jpg", 0),
            image(1, "/a/zulu.jpg", 0),
            image(2, "/m/mike.jpg", 0),
        ];
        let rng = SharedRng::seeded(0);
        let order = generate(OrderPolicy::SortedByFilenameAllFolders, &images, &rng);
        assert_eq!(order, vec![0, 2, 1]);
    }

    #[test]
    fn date_per_folder_orders_within_groups() {
        let images = vec![
            image(0, "/A/new.jpg", 20),
            image(1, "/A/old.jpg", 10),
            image(2, "/B/mid.jpg", 15),
        ];
        let rng = SharedRng::seeded(0);
        let order = generate(OrderPolicy::SortedByDatePerFolder, &images, &rng);
        assert_eq!(order, vec![1, 0, 2]);
    }

    #[test]
    fn cut_swaps_first_two_chunks_when_p1_below_p2() {
        let mut out = Vec::new();
        cut_once(&[0, 1, 2, 3, 4], 1, 3, &mut out);
        assert_eq!(out, vec![1, 2, 0, 3, 4]);
    }

    #[test]
    fn cut_swaps_outer_chunks_when_p1_at_or_above_p2() {
        let mut out = Vec::new();
        cut_once(&[0, 1, 2, 3, 4], 3, 1, &mut out);
        assert_eq!(out, vec![3, 4, 1, 2, 0]);

        cut_once(&[0, 1, 2, 3, 4], 2, 2, &mut out);
        assert_eq!(out, vec![2, 3, 4, 0, 1]);
    }

    #[test]
    fn deck_pass_feeds_each_cut_into_the_next() {
        // Five iterations over five items: (1,3), (3,1), then three identity
        // cuts at (0,0).
        let rng = ScriptedRng::new(&[1, 3, 3, 1, 0, 0, 0, 0, 0, 0]);
        let seq = shuffle_deck(vec![0, 1, 2, 3, 4], &rng);
        // After (1,3): [1,2,0,3,4]; after (3,1): [3,4,2,0,1].
        assert_eq!(seq, vec![3, 4, 2, 0, 1]);
    }

    #[test]
    fn random_order_is_a_permutation() {
        for n in [0usize, 1, 2, 7, 64] {
            let images: Vec<ImagePath> = (0..n)
                .map(|i| image(i as u64, &format!("/p/{i}.jpg"), 0))
                .collect();
            let rng = SharedRng::seeded(99);
            let mut order = generate(OrderPolicy::Random, &images, &rng);
            order.sort_unstable();
            assert_eq!(order, (0..n).collect::<Vec<_>>());
        }
    }

    #[test]
    fn random_order_is_deterministic_under_a_seed() {
        let images: Vec<ImagePath> = (0..32)
            .map(|i| image(i as u64, &format!("/p/{i}.jpg"), 0))
            .collect();
        let first = generate(OrderPolicy::Random, &images, &SharedRng::seeded(5));
        let second = generate(OrderPolicy::Random, &images, &SharedRng::seeded(5));
        assert_eq!(first, second);
    }
}
