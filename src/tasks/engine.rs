//! The picture cursor/engine: a single actor task that owns the working list
//! and cursor, serializes every state transition, and keeps the show running
//! past missing, corrupt, or deleted files.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use image::RgbaImage;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::PictureSetCache;
use crate::config::Configuration;
use crate::decode::ImageDecoder;
use crate::events::{EngineEvent, ImagePath, PictureChanged};
use crate::folders::FolderCollection;
use crate::order::{self, OrderPolicy};
use crate::random::RandomSource;
use crate::tasks::loader::{self, BatchCadence, LoaderBatch};

/// Cursor advances dirty the cache header constantly; writes are coalesced
/// onto this tick.
const HEADER_FLUSH_INTERVAL: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub sets: Vec<FolderCollection>,
    pub selected: Option<usize>,
    pub policy: OrderPolicy,
    pub slide_delay: Duration,
    pub cadence: BatchCadence,
}

impl From<&Configuration> for EngineOptions {
    fn from(cfg: &Configuration) -> Self {
        Self {
            sets: cfg.picture_sets.clone(),
            selected: cfg.selected_set,
            policy: cfg.order,
            slide_delay: cfg.slide_delay,
            cadence: BatchCadence::default(),
        }
    }
}

enum Command {
    Start,
    Stop,
    Pause,
    Resume,
    SwitchToSet(usize),
    RestorePosition(usize),
    DeleteCurrent(oneshot::Sender<bool>),
    MoveCurrentTo(PathBuf, oneshot::Sender<bool>),
    CurrentPicture(oneshot::Sender<Option<Arc<RgbaImage>>>),
    CurrentPictureFile(oneshot::Sender<Option<PathBuf>>),
    PictureIndex(oneshot::Sender<usize>),
    IsPaused(oneshot::Sender<bool>),
}

/// Clonable command surface of a running engine. Every call crosses the
/// channel into the actor, which is the only context allowed to touch the
/// working list or cursor.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
}

impl EngineHandle {
    pub async fn start(&self) {
        let _ = self.commands.send(Command::Start).await;
    }

    pub async fn stop(&self) {
        let _ = self.commands.send(Command::Stop).await;
    }

    pub async fn pause(&self) {
        let _ = self.commands.send(Command::Pause).await;
    }

    pub async fn resume(&self) {
        let _ = self.commands.send(Command::Resume).await;
    }

    pub async fn switch_to_set(&self, set: usize) {
        let _ = self.commands.send(Command::SwitchToSet(set)).await;
    }

    /// Skip forward `n` positions to resume a previous session. Ignored for
    /// the random policy, where a stored position is meaningless.
    pub async fn restore_position(&self, n: usize) {
        let _ = self.commands.send(Command::RestorePosition(n)).await;
    }

    /// Delete the current picture from disk. Returns `false` when the
    /// physical delete failed; the list entry is removed either way.
    pub async fn delete_current_picture(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::DeleteCurrent(tx)).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn move_current_picture_to(&self, target: PathBuf) -> bool {
        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::MoveCurrentTo(target, tx))
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn current_picture(&self) -> Option<Arc<RgbaImage>> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::CurrentPicture(tx)).await.ok()?;
        rx.await.ok().flatten()
    }

    pub async fn current_picture_file(&self) -> Option<PathBuf> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::CurrentPictureFile(tx))
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Position within the current ordered list.
    pub async fn picture_index(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::PictureIndex(tx)).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub async fn is_paused(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::IsPaused(tx)).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }
}

/// Spawn an engine actor. Events are pushed to `events` (no replay; the
/// channel closes on shutdown); `cancel` stops the actor and everything it
/// spawned, flushing the cache header on the way out.
pub fn spawn(
    options: EngineOptions,
    cache: PictureSetCache,
    decoder: Arc<dyn ImageDecoder>,
    rng: Arc<dyn RandomSource>,
    events: mpsc::Sender<EngineEvent>,
    cancel: CancellationToken,
) -> (EngineHandle, JoinHandle<Result<()>>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (batch_tx, batch_rx) = mpsc::channel(8);
    let engine = Engine {
        sets: options.sets,
        selected: None,
        initial_set: options.selected,
        policy: options.policy,
        slide_delay: options.slide_delay,
        cadence: options.cadence,
        cache,
        decoder,
        rng,
        events,
        list: Vec::new(),
        cursor: 0,
        current: None,
        current_image: None,
        freshness: None,
        pause_nesting: 0,
        running: false,
        timer_deadline: None,
        generation: 0,
        shutdown: cancel.clone(),
        loader_cancel: cancel.child_token(),
        reload_in_flight: false,
        initial_load: false,
        loading_complete: false,
        batch_tx,
    };
    let task = tokio::spawn(engine.run(cmd_rx, batch_rx, cancel));
    (EngineHandle { commands: cmd_tx }, task)
}

struct Engine {
    sets: Vec<FolderCollection>,
    selected: Option<usize>,
    initial_set: Option<usize>,
    policy: OrderPolicy,
    slide_delay: Duration,
    cadence: BatchCadence,
    cache: PictureSetCache,
    decoder: Arc<dyn ImageDecoder>,
    rng: Arc<dyn RandomSource>,
    events: mpsc::Sender<EngineEvent>,

    /// Working list, kept in visiting order; `cursor` points at the next
    /// entry to show. `cursor == list.len()` means exhausted.
    list: Vec<ImagePath>,
    cursor: usize,
    current: Option<ImagePath>,
    current_image: Option<Arc<RgbaImage>>,
    /// Mirror of the cache header's freshness stamp for the active set.
    freshness: Option<DateTime<Utc>>,

    pause_nesting: u32,
    running: bool,
    timer_deadline: Option<Instant>,

    /// Bumped on every set activation; loader batches carrying an older
    /// generation belong to a disposed loader and are dropped.
    generation: u64,
    shutdown: CancellationToken,
    loader_cancel: CancellationToken,
    reload_in_flight: bool,
    initial_load: bool,
    loading_complete: bool,
    batch_tx: mpsc::Sender<LoaderBatch>,
}

impl Engine {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut batches: mpsc::Receiver<LoaderBatch>,
        cancel: CancellationToken,
    ) -> Result<()> {
        if let Some(set) = self.initial_set {
            self.activate_set(set)?;
        }

        let mut flush_ticks = tokio::time::interval(HEADER_FLUSH_INTERVAL);
        flush_ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let deadline = self.timer_deadline;
            let slide_tick = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe = commands.recv() => match maybe {
                    Some(command) => self.handle_command(command).await?,
                    None => break,
                },
                Some(batch) = batches.recv() => self.apply_batch(batch).await?,
                _ = slide_tick => self.advance().await?,
                _ = flush_ticks.tick() => {
                    if let Err(err) = self.cache.flush() {
                        warn!(%err, "cache header flush failed");
                    }
                }
            }
        }

        self.loader_cancel.cancel();
        // Pending cursor updates must land before exit.
        self.cache.flush()?;
        Ok(())
    }

    async fn handle_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Start => self.do_start().await?,
            Command::Stop => self.do_stop(),
            Command::Pause => {
                if self.pause_nesting == 0 {
                    self.halt_timer();
                }
                self.pause_nesting += 1;
            }
            Command::Resume => {
                if self.pause_nesting == 0 {
                    // Nesting never goes negative; an unmatched resume is
                    // a caller bug worth logging, not a crash.
                    warn!("resume without matching pause ignored");
                } else {
                    self.pause_nesting -= 1;
                    if self.pause_nesting == 0 {
                        self.do_start().await?;
                    }
                }
            }
            Command::SwitchToSet(set) => {
                if set >= self.sets.len() {
                    // Out-of-range switch is a silent no-op.
                    debug!(set, "switch to unconfigured set ignored");
                    return Ok(());
                }
                self.activate_set(set)?;
                if self.running {
                    let _ = self.events.send(EngineEvent::PictureSetChanged).await;
                    self.advance().await?;
                }
            }
            Command::RestorePosition(n) => self.restore_position(n),
            Command::DeleteCurrent(reply) => {
                let _ = reply.send(self.delete_current());
            }
            Command::MoveCurrentTo(target, reply) => {
                let _ = reply.send(self.move_current_to(target));
            }
            Command::CurrentPicture(reply) => {
                let _ = reply.send(self.current_image.clone());
            }
            Command::CurrentPictureFile(reply) => {
                let _ = reply.send(self.current.as_ref().map(|i| i.path.clone()));
            }
            Command::PictureIndex(reply) => {
                let _ = reply.send(self.cursor);
            }
            Command::IsPaused(reply) => {
                let _ = reply.send(!self.running && self.pause_nesting > 0);
            }
        }
        Ok(())
    }

    async fn do_start(&mut self) -> Result<()> {
        self.running = true;
        self.pause_nesting = 0;
        self.advance().await
    }

    fn do_stop(&mut self) {
        // Leave nesting at one so a single resume restarts the show.
        self.pause_nesting = 1;
        self.halt_timer();
    }

    fn halt_timer(&mut self) {
        self.running = false;
        self.timer_deadline = None;
    }

    /// Reset working state for `set` and source its list: cache fast path
    /// when an entry exists (kicking a rebuild if stale), streaming cold
    /// path otherwise. The in-flight loader, if any, is disposed first.
    fn activate_set(&mut self, set: usize) -> Result<()> {
        self.generation += 1;
        self.loader_cancel.cancel();
        self.loader_cancel = self.shutdown.child_token();

        self.list.clear();
        self.cursor = 0;
        self.current = None;
        self.current_image = None;
        self.freshness = None;
        self.reload_in_flight = false;
        self.initial_load = false;
        self.loading_complete = false;
        self.selected = Some(set);

        let cached = match self.cache.load(set) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(set, %err, "cache load failed; rebuilding from disk");
                None
            }
        };
        match cached {
            Some(entry) => {
                info!(set, count = entry.images.len(), "picture set loaded from cache");
                let stale = self.cache.is_stale(&entry, self.policy);
                self.cursor = entry.cursor.min(entry.images.len());
                self.freshness = entry.timestamp;
                self.list = entry.images;
                self.loading_complete = true;
                if stale {
                    self.spawn_reload();
                }
            }
            None => {
                info!(set, "no usable cache; streaming initial build");
                self.initial_load = true;
                loader::spawn_streaming(
                    self.sets[set].clone(),
                    0,
                    self.generation,
                    self.cadence,
                    self.batch_tx.clone(),
                    self.loader_cancel.clone(),
                );
            }
        }
        Ok(())
    }

    fn spawn_reload(&mut self) {
        if self.reload_in_flight {
            return;
        }
        let Some(set) = self.selected else {
            return;
        };
        self.reload_in_flight = true;
        info!(set, "scheduling background rebuild of stale picture set");
        loader::spawn_full_reload(
            self.sets[set].clone(),
            self.generation,
            self.batch_tx.clone(),
            self.loader_cancel.clone(),
        );
    }

    async fn apply_batch(&mut self, batch: LoaderBatch) -> Result<()> {
        if batch.generation != self.generation {
            debug!(
                batch = batch.generation,
                current = self.generation,
                "dropping batch from disposed loader"
            );
            return Ok(());
        }
        let Some(set) = self.selected else {
            return Ok(());
        };

        if batch.replace {
            self.list = batch.images;
            self.apply_order();
            self.cursor = 0;
            self.freshness = Some(Utc::now());
            self.loading_complete = true;
            self.reload_in_flight = false;
            self.cache
                .save(set, &self.list, self.policy, self.cursor, self.freshness)?;
            return Ok(());
        }

        let was_empty = self.list.is_empty();
        if !batch.images.is_empty() || batch.complete {
            self.list.extend(batch.images);
            self.apply_order();
            // A provisional entry carries the never-fresh sentinel so a
            // reader cannot mistake an in-progress build for a complete one.
            self.freshness = batch.complete.then(Utc::now);
            self.cache
                .save(set, &self.list, self.policy, self.cursor, self.freshness)?;
        }
        if batch.complete {
            self.loading_complete = true;
        }
        if was_empty && !self.list.is_empty() && self.initial_load {
            self.initial_load = false;
            if self.running {
                self.advance().await?;
            }
        }
        Ok(())
    }

    /// Re-run the order generator over the whole working list, keeping the
    /// list itself in visiting order.
    fn apply_order(&mut self) {
        let permutation = order::generate(self.policy, &self.list, self.rng.as_ref());
        self.list = permutation
            .into_iter()
            .map(|pos| self.list[pos].clone())
            .collect();
    }

    /// Advance to the next displayable picture, dropping entries that no
    /// longer decode. Bounded: every failure shrinks the list, and an empty
    /// list stops the timer instead of spinning.
    async fn advance(&mut self) -> Result<()> {
        self.timer_deadline = self
            .running
            .then(|| Instant::now() + self.slide_delay);
        let Some(set) = self.selected else {
            return Ok(());
        };

        loop {
            if self.list.is_empty() {
                self.timer_deadline = None;
                return Ok(());
            }
            if self.cursor >= self.list.len() {
                self.cursor = 0;
                if self.loading_complete && !self.cache.is_fresh(self.freshness) {
                    self.spawn_reload();
                }
                if self.policy == OrderPolicy::Random {
                    // A wrapped random order reshuffles in place.
                    self.apply_order();
                    self.cache
                        .save(set, &self.list, self.policy, self.cursor, self.freshness)?;
                }
            }

            let entry = self.list[self.cursor].clone();
            let decoder = Arc::clone(&self.decoder);
            let target = entry.path.clone();
            let decoded = tokio::task::spawn_blocking(move || decoder.decode(&target)).await?;
            match decoded {
                Ok(image) => {
                    self.cursor += 1;
                    self.cache.update_cursor(set, self.cursor);
                    let image = Arc::new(image);
                    self.current = Some(entry.clone());
                    self.current_image = Some(Arc::clone(&image));
                    let event =
                        PictureChanged::new(entry.path, entry.file_date, image, self.rng.as_ref());
                    let _ = self.events.send(EngineEvent::PictureChanged(event)).await;
                    return Ok(());
                }
                Err(err) if err.drops_entry() => {
                    warn!(path = %entry.path.display(), %err, "dropping unreadable picture");
                    self.list.remove(self.cursor);
                    self.freshness = None;
                    self.cache
                        .save(set, &self.list, self.policy, self.cursor, None)?;
                }
                // Unexpected I/O failures propagate; only the known-benign
                // classes are skipped.
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn restore_position(&mut self, n: usize) {
        if self.policy == OrderPolicy::Random {
            return;
        }
        let remaining = self.list.len().saturating_sub(self.cursor);
        if remaining < n {
            self.apply_order();
            self.cursor = 0;
        } else {
            self.cursor += n;
        }
        if let Some(set) = self.selected {
            self.cache.update_cursor(set, self.cursor);
        }
    }

    fn delete_current(&mut self) -> bool {
        let Some(current) = self.current.clone() else {
            // No picture to act on; the command trivially succeeds.
            return true;
        };
        let removed = match std::fs::remove_file(&current.path) {
            Ok(()) => {
                debug!(path = %current.path.display(), "deleted current picture");
                true
            }
            Err(err) => {
                warn!(path = %current.path.display(), %err, "delete failed; dropping list entry anyway");
                false
            }
        };
        // Optimistic removal: the entry leaves the working list even when
        // the physical delete failed.
        if let Some(pos) = self.list.iter().position(|i| i.index == current.index) {
            self.list.remove(pos);
            if pos < self.cursor {
                self.cursor -= 1;
            }
            self.freshness = None;
            if let Some(set) = self.selected {
                if let Err(err) =
                    self.cache
                        .save(set, &self.list, self.policy, self.cursor, None)
                {
                    warn!(%err, "cache save after delete failed");
                }
            }
        }
        removed
    }

    fn move_current_to(&mut self, target: PathBuf) -> bool {
        let Some(current) = self.current.clone() else {
            return true;
        };
        match std::fs::rename(&current.path, &target) {
            Ok(()) => {
                debug!(
                    from = %current.path.display(),
                    to = %target.display(),
                    "moved current picture"
                );
                if let Some(pos) = self.list.iter().position(|i| i.index == current.index) {
                    self.list[pos].path = target.clone();
                }
                if let Some(cur) = &mut self.current {
                    cur.path = target;
                }
                if let Some(set) = self.selected {
                    if let Err(err) = self.cache.save(
                        set,
                        &self.list,
                        self.policy,
                        self.cursor,
                        self.freshness,
                    ) {
                        warn!(%err, "cache save after move failed");
                    }
                }
                true
            }
            Err(err) => {
                warn!(target = %target.display(), %err, "move failed");
                false
            }
        }
    }
}
