//! Temporary single-folder detour: "show only this folder" layered over the
//! main engine. The detour is a full engine instance of its own, scoped to
//! one recursive rule and an ephemeral cache; the main engine sits paused
//! underneath until the detour is reverted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::PictureSetCache;
use crate::decode::ImageDecoder;
use crate::events::EngineEvent;
use crate::folders::FolderCollection;
use crate::order::OrderPolicy;
use crate::random::RandomSource;
use crate::tasks::engine::{self, EngineHandle, EngineOptions};
use crate::tasks::loader::BatchCadence;

struct ActiveDetour {
    handle: EngineHandle,
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
}

/// Routes commands to either the main engine or, while a detour is active,
/// to a transient engine built over the current picture's folder. Queries
/// about set identity stay with the main engine.
pub struct TemporarySource {
    main: EngineHandle,
    policy: OrderPolicy,
    slide_delay: Duration,
    cache_duration: Duration,
    decoder: Arc<dyn ImageDecoder>,
    rng: Arc<dyn RandomSource>,
    events: mpsc::Sender<EngineEvent>,
    shutdown: CancellationToken,
    detour: Option<ActiveDetour>,
}

impl TemporarySource {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        main: EngineHandle,
        policy: OrderPolicy,
        slide_delay: Duration,
        cache_duration: Duration,
        decoder: Arc<dyn ImageDecoder>,
        rng: Arc<dyn RandomSource>,
        events: mpsc::Sender<EngineEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            main,
            policy,
            slide_delay,
            cache_duration,
            decoder,
            rng,
            events,
            shutdown,
            detour: None,
        }
    }

    pub fn is_detoured(&self) -> bool {
        self.detour.is_some()
    }

    /// The engine currently receiving playback commands.
    pub fn active(&self) -> &EngineHandle {
        match &self.detour {
            Some(detour) => &detour.handle,
            None => &self.main,
        }
    }

    pub fn main(&self) -> &EngineHandle {
        &self.main
    }

    /// Pause the main engine and start a detour over the folder holding the
    /// current picture. Returns `false` when there is no current picture to
    /// anchor the detour; an already active detour is left in place.
    pub async fn switch_to_current_folder(&mut self) -> bool {
        if self.detour.is_some() {
            debug!("detour already active; ignoring");
            return true;
        }
        let Some(current) = self.main.current_picture_file().await else {
            debug!("no current picture; cannot detour");
            return false;
        };
        let Some(folder) = current.parent().map(|p| p.to_path_buf()) else {
            return false;
        };

        self.main.pause().await;

        let options = EngineOptions {
            sets: vec![FolderCollection::single_folder(&folder)],
            selected: Some(0),
            policy: self.policy,
            slide_delay: self.slide_delay,
            cadence: BatchCadence::default(),
        };
        let cancel = self.shutdown.child_token();
        let (handle, task) = engine::spawn(
            options,
            PictureSetCache::ephemeral(self.cache_duration),
            Arc::clone(&self.decoder),
            Arc::clone(&self.rng),
            self.events.clone(),
            cancel.clone(),
        );
        handle.start().await;

        info!(folder = %folder.display(), "detoured into current picture's folder");
        self.detour = Some(ActiveDetour {
            handle,
            cancel,
            task,
        });
        true
    }

    /// Dispose the detour engine and resume the main set. A no-op when no
    /// detour is active.
    pub async fn revert_to_main_set(&mut self) {
        let Some(detour) = self.detour.take() else {
            return;
        };
        detour.cancel.cancel();
        match detour.task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, "detour engine exited with error"),
            Err(err) => warn!(%err, "detour engine panicked"),
        }
        info!("reverted to main picture set");
        self.main.resume().await;
    }

    pub async fn start(&self) {
        self.active().start().await;
    }

    pub async fn stop(&self) {
        self.active().stop().await;
    }

    pub async fn pause(&self) {
        self.active().pause().await;
    }

    pub async fn resume(&self) {
        self.active().resume().await;
    }

    /// Switching sets always reverts an active detour first; the detour has
    /// no sets of its own to switch between.
    pub async fn switch_to_set(&mut self, set: usize) {
        self.revert_to_main_set().await;
        self.main.switch_to_set(set).await;
    }

    pub async fn delete_current_picture(&self) -> bool {
        self.active().delete_current_picture().await
    }

    pub async fn move_current_picture_to(&self, target: std::path::PathBuf) -> bool {
        self.active().move_current_picture_to(target).await
    }

    pub async fn current_picture_file(&self) -> Option<std::path::PathBuf> {
        self.active().current_picture_file().await
    }

    /// Position within the main set's order, regardless of any detour.
    pub async fn picture_index(&self) -> usize {
        self.main.picture_index().await
    }

    pub async fn is_paused(&self) -> bool {
        self.active().is_paused().await
    }
}
