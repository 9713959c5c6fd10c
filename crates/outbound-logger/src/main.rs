mod app;
mod args;
mod config;
mod core;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use app::AppState;
use config::Config;
use crate::core::{
    NoteStore, Recorder, SinkSet, run_note_pruner, run_record_writer,
    run_tcp_server,
};
use outbound_helpers::{logging, shutdown};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const NOTE_PRUNE_EVERY: Duration = Duration::from_secs(300);

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    logging::init_logging(
        "outbound_logger=info,tokio=warn",
        "OUTBOUND_LOG",
        "outbound-logger",
    );

    let config = Config::load().context("failed to load configuration")?;

    info!(
        "outbound logger starting: listen={}, stdout={}, file={}, file_sync={}, stop_bounce={}",
        config.listen,
        config.stdout,
        config.file.enabled,
        config.file.sync,
        config.stop_bounce
    );

    let sinks = SinkSet::from_config(&config).await?;
    if sinks.is_empty() {
        warn!("no sinks enabled: records are produced but not persisted");
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown::listen_shutdown(shutdown.clone()));

    let (records_tx, records_rx) = mpsc::unbounded_channel();
    let flush_every =
        sinks.needs_periodic_flush().then_some(config.file.flush_interval);
    let writer_task =
        tokio::spawn(run_record_writer(sinks, records_rx, flush_every));

    let notes = NoteStore::shared(config.note_ttl);
    tokio::spawn(run_note_pruner(
        notes.clone(),
        NOTE_PRUNE_EVERY,
        shutdown.clone(),
    ));

    let state = AppState {
        recorder: Arc::new(Recorder::new(records_tx, notes, config.stop_bounce)),
        shutdown: shutdown.clone(),
        max_payload_bytes: config.max_payload_bytes,
    };

    // Consumes the last state handle; the writer stops once every
    // connection task has answered its frame and dropped the recorder.
    let server_result = run_tcp_server(&config.listen, state).await;
    if server_result.is_err() {
        shutdown.cancel();
    }

    let written = writer_task.await.context("record writer join failed")?;
    info!("outbound logger stopped: records_written={written}");

    server_result
}
