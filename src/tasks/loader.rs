//! Background enumeration: streams newly discovered images to the engine in
//! timed batches, or rebuilds a complete list in one shot.

use std::time::Duration;

use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::events::ImagePath;
use crate::folders::FolderCollection;
use crate::scan;

/// When discovery batches reach the engine: the first soon after start so the
/// show begins promptly, the rest on a slower cadence.
#[derive(Debug, Clone, Copy)]
pub struct BatchCadence {
    pub first: Duration,
    pub every: Duration,
}

impl Default for BatchCadence {
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            every: Duration::from_secs(5),
        }
    }
}

/// One delivery from a background enumeration.
#[derive(Debug)]
pub struct LoaderBatch {
    /// Engine generation this batch belongs to; the engine drops batches
    /// from a disposed loader.
    pub generation: u64,
    pub images: Vec<ImagePath>,
    /// Set on the last delivery, once the walk is exhausted.
    pub complete: bool,
    /// Full-reload result: replaces the working list instead of extending it.
    pub replace: bool,
}

/// Start a streaming build: walk `rules` off-thread and deliver discoveries
/// in batches on `cadence` until exhausted or cancelled.
pub fn spawn_streaming(
    rules: FolderCollection,
    start_index: u64,
    generation: u64,
    cadence: BatchCadence,
    to_engine: Sender<LoaderBatch>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_streaming(
        rules,
        start_index,
        generation,
        cadence,
        to_engine,
        cancel,
    ))
}

async fn run_streaming(
    rules: FolderCollection,
    start_index: u64,
    generation: u64,
    cadence: BatchCadence,
    to_engine: Sender<LoaderBatch>,
    cancel: CancellationToken,
) {
    let (found_tx, mut found_rx) = tokio::sync::mpsc::channel::<ImagePath>(256);
    let walker_cancel = cancel.clone();
    let walker = tokio::task::spawn_blocking(move || {
        for image in scan::scan_set(&rules, start_index) {
            if walker_cancel.is_cancelled() {
                return;
            }
            if found_tx.blocking_send(image).is_err() {
                return;
            }
        }
    });

    let mut pending: Vec<ImagePath> = Vec::new();
    let mut delivered = 0usize;
    let mut ticks = interval_at(Instant::now() + cadence.first, cadence.every);

    loop {
        tokio::select! {
            // Disposal must win over a ready batch so a cancelled loader
            // never delivers.
            biased;
            _ = cancel.cancelled() => {
                debug!(generation, "streaming load cancelled");
                break;
            }
            found = found_rx.recv() => match found {
                Some(image) => pending.push(image),
                None => {
                    // Walk exhausted: final delivery carries the tail and the
                    // completion flag, even when the tail is empty.
                    delivered += pending.len();
                    let batch = LoaderBatch {
                        generation,
                        images: std::mem::take(&mut pending),
                        complete: true,
                        replace: false,
                    };
                    let _ = to_engine.send(batch).await;
                    info!(generation, total = delivered, "streaming load complete");
                    break;
                }
            },
            _ = ticks.tick() => {
                if !pending.is_empty() {
                    delivered += pending.len();
                    debug!(generation, count = pending.len(), "delivering discovery batch");
                    let batch = LoaderBatch {
                        generation,
                        images: std::mem::take(&mut pending),
                        complete: false,
                        replace: false,
                    };
                    if to_engine.send(batch).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    let _ = walker.await;
}

/// Full reload: enumerate to completion off-thread and deliver one replacing
/// batch, committed atomically by the engine. No incremental deliveries.
pub fn spawn_full_reload(
    rules: FolderCollection,
    generation: u64,
    to_engine: Sender<LoaderBatch>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let walked =
            tokio::task::spawn_blocking(move || scan::scan_set(&rules, 0).collect::<Vec<_>>())
                .await;
        let images = walked.unwrap_or_default();
        if cancel.is_cancelled() {
            debug!(generation, "full reload cancelled; discarding result");
            return;
        }
        info!(generation, count = images.len(), "full reload complete");
        let _ = to_engine
            .send(LoaderBatch {
                generation,
                images,
                complete: true,
                replace: true,
            })
            .await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::folders::InclusionMode;
    use std::fs;
    use tempfile::tempdir;

    fn fast_cadence() -> BatchCadence {
        BatchCadence {
            first: Duration::from_millis(20),
            every: Duration::from_millis(20),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn streaming_delivers_everything_and_flags_completion() {
        let tmp = tempdir().unwrap();
        for name in ["a.jpg", "b.png", "c.gif"] {
            fs::write(tmp.path().join(name), b"x").unwrap();
        }
        let mut rules = FolderCollection::new();
        rules.add(tmp.path(), InclusionMode::Single);

        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let handle = spawn_streaming(rules, 0, 7, fast_cadence(), tx, CancellationToken::new());

        let mut total = 0;
        loop {
            let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for batch")
                .expect("loader closed channel early");
            assert_eq!(batch.generation, 7);
            assert!(!batch.replace);
            total += batch.images.len();
            if batch.complete {
                break;
            }
        }
        assert_eq!(total, 3);
        handle.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn full_reload_delivers_one_replacing_batch() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("a.jpg"), b"x").unwrap();
        let mut rules = FolderCollection::new();
        rules.add(tmp.path(), InclusionMode::Single);

        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        spawn_full_reload(rules, 3, tx, CancellationToken::new())
            .await
            .unwrap();

        let batch = rx.recv().await.unwrap();
        assert!(batch.replace);
        assert!(batch.complete);
        assert_eq!(batch.images.len(), 1);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelled_loader_stops_delivering() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("a.jpg"), b"x").unwrap();
        let mut rules = FolderCollection::new();
        rules.add(tmp.path(), InclusionMode::Single);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        spawn_streaming(rules, 0, 1, fast_cadence(), tx, cancel)
            .await
            .unwrap();
        assert!(rx.recv().await.is_none());
    }
}
