mod connection;
mod control;
mod error;
mod media;
mod pipeline;
mod reload;
mod status;
mod timers;
mod worker;

#[cfg(test)]
mod testutil;

use std::path::PathBuf;
use std::sync::mpsc;

use anyhow::Context;
use cbnp_proto::artwork::{ArtworkNormalizer, HttpArtworkFetcher};
use cbnp_proto::config::Config;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use control::{ControlEvent, ControlLoop};
use media::OsaScriptSource;
use pipeline::UpdatePipeline;
use reload::ConfigWatcher;
use worker::{ConnectionPort, Operation, Worker};

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// File log (no ANSI) plus stderr.  `RUST_LOG` overrides the default filter.
fn init_logging() -> anyhow::Result<PathBuf> {
    let log_path = cbnp_proto::platform::log_path();
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,cbnp=debug")),
        )
        .init();

    Ok(log_path)
}

fn main() -> anyhow::Result<()> {
    let log_path = init_logging()?;
    eprintln!("cbnp: logging to {}", log_path.display());
    info!("Log file: {:?}", log_path);

    let mut config = Config::load()?;
    config.apply_overrides(env_lookup);
    info!("Config loaded from: {:?}", Config::config_path());
    info!(
        "Relaying {} to {} every {}s",
        config.polling.media_player.app_name(),
        config.publisher.endpoint,
        config.polling.interval_secs
    );

    let worker = Worker::spawn(config.connect_timeout(), config.request_timeout())?;
    let state = worker
        .handoff()
        .request(Operation::Probe, config.request_timeout())
        .context("connection worker did not start")?;
    info!("Worker ready ({:?})", state);

    let normalizer = ArtworkNormalizer::with_default_path(
        config.artwork.default_path.as_deref(),
        Box::new(HttpArtworkFetcher::new()?),
        config.artwork_fetch_timeout(),
    );
    let pipeline = UpdatePipeline::new(
        config,
        Box::new(OsaScriptSource::new()),
        normalizer,
        worker.handoff(),
    );

    // Ctrl-C / SIGTERM and stdin commands funnel into the control loop
    let (event_tx, event_rx) = mpsc::channel();
    let signal_tx = event_tx.clone();
    ctrlc::set_handler(move || {
        let _ = signal_tx.send(ControlEvent::Shutdown);
    })?;
    // Enter (or "update") polls now, "quit" stops
    control::spawn_command_reader(std::io::BufReader::new(std::io::stdin()), event_tx)?;

    let watcher = ConfigWatcher::new(Config::config_path(), env_lookup);
    info!("Watching {:?} for changes", watcher.path());
    let mut control = ControlLoop::new(pipeline, event_rx).with_watcher(watcher);
    control.run();

    let grace = control.pipeline().config().request_timeout();
    worker.shutdown(grace);
    info!("Shutdown complete");
    Ok(())
}
