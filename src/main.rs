//! Binary entrypoint: headless front end over the slideshow engine.
//!
//! Subscribes to engine events and logs them; rendering is someone else's
//! job. Ctrl-c cancels the pipeline and the engine flushes its cache header
//! on the way out.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use slide_saver::config::Configuration;
use slide_saver::decode::StreamDecoder;
use slide_saver::events::EngineEvent;
use slide_saver::random::{RandomSource, SharedRng};
use slide_saver::tasks::engine::{self, EngineOptions};
use slide_saver::{cache::PictureSetCache, order, scan};

#[derive(Debug, Parser)]
#[command(name = "slide-saver", version, about = "picture-set slideshow engine")]
struct Args {
    /// Path to YAML config
    #[arg(value_name = "CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Deterministic RNG seed for shuffling (applies to dry-run and live modes)
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,

    /// Print the first N entries of the generated order without starting playback
    #[arg(long = "dry-run", value_name = "ENTRIES")]
    dry_run: Option<usize>,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("slide_saver={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let cfg = Configuration::from_yaml_file(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?
        .validated()
        .context("invalid configuration values")?;
    info!("loaded configuration from {}", args.config.display());

    let rng: Arc<dyn RandomSource> = match args.seed {
        Some(seed) => Arc::new(SharedRng::seeded(seed)),
        None => Arc::new(SharedRng::from_entropy()),
    };

    if let Some(entries) = args.dry_run {
        return run_dry_run(&cfg, entries, rng.as_ref());
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    let cache = PictureSetCache::open(&cfg.cache_dir, cfg.cache_duration)
        .with_context(|| format!("opening cache at {}", cfg.cache_dir.display()))?;

    let (event_tx, mut event_rx) = mpsc::channel::<EngineEvent>(16);
    let (handle, engine_task) = engine::spawn(
        EngineOptions::from(&cfg),
        cache,
        Arc::new(StreamDecoder),
        rng,
        event_tx,
        cancel.clone(),
    );
    handle.start().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = event_rx.recv() => match event {
                Some(EngineEvent::PictureChanged(change)) => {
                    let (width, height) = change.image.dimensions();
                    info!(
                        path = %change.path.display(),
                        width,
                        height,
                        "picture changed"
                    );
                }
                Some(EngineEvent::PictureSetChanged) => info!("picture set changed"),
                None => break,
            },
        }
    }

    cancel.cancel();
    engine_task.await.context("engine task panicked")??;
    Ok(())
}

/// Enumerate the selected set synchronously and print the head of the order
/// that playback would follow.
fn run_dry_run(cfg: &Configuration, entries: usize, rng: &dyn RandomSource) -> Result<()> {
    let Some(set) = cfg.selected_set.or(if cfg.picture_sets.is_empty() {
        None
    } else {
        Some(0)
    }) else {
        bail!("no picture sets configured");
    };

    let images: Vec<_> = scan::scan_set(&cfg.picture_sets[set], 0).collect();
    info!(set, count = images.len(), policy = %cfg.order.as_str(), "dry run");
    let visiting = order::generate(cfg.order, &images, rng);
    for (slot, position) in visiting.into_iter().take(entries).enumerate() {
        println!("{slot:4}  {}", images[position].path.display());
    }
    Ok(())
}
