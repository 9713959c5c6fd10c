use std::time::Duration;

use outbound_core::EventRecord;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use super::sink::SinkSet;

const LOGGER_NAME: &str = "outbound_logger";

pub type RecordSender = mpsc::UnboundedSender<EventRecord>;
pub type RecordReceiver = mpsc::UnboundedReceiver<EventRecord>;

/// One output line: the record plus the logger envelope.
#[derive(Serialize)]
struct LogLine<'a> {
    name: &'static str,
    logged_at: String,
    #[serde(flatten)]
    record: &'a EventRecord,
}

/// Runs the single writer that owns every sink.
///
/// All hook handlers feed this task through one unbounded channel, so lines
/// from concurrent attempts never interleave. The task is not tied to the
/// shutdown token: it runs until every [`RecordSender`] is dropped, so a
/// record queued by a handler still finishing its frame is never lost. The
/// sinks are flushed before returning the number of records at least one
/// sink accepted.
pub async fn run_record_writer(
    mut sinks: SinkSet,
    mut records_rx: RecordReceiver,
    flush_every: Option<Duration>,
) -> u64 {
    let mut written = 0_u64;
    let mut flush_tick =
        interval(flush_every.unwrap_or(Duration::from_secs(3600)));
    flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "record writer started: sinks={}, flush_every={}",
        sink_list(&sinks),
        flush_every
            .map(|every| format!("{}ms", every.as_millis()))
            .unwrap_or_else(|| "per-record".to_string())
    );

    loop {
        tokio::select! {
            maybe_record = records_rx.recv() => {
                let Some(record) = maybe_record else {
                    break;
                };
                if write_record(&mut sinks, &record).await {
                    written += 1;
                }
            }
            _ = flush_tick.tick(), if flush_every.is_some() => {
                flush_sinks(&mut sinks).await;
            }
        }
    }

    flush_sinks(&mut sinks).await;

    info!("record writer stopped: written={written}");
    written
}

/// Returns whether at least one sink took the line.
async fn write_record(
    sinks: &mut SinkSet,
    record: &EventRecord,
) -> bool {
    let line = match encode_line(record) {
        Ok(line) => line,
        Err(err) => {
            warn!(
                "failed to serialize event record: job_id={}, error={}",
                record.job_id, err
            );
            return false;
        }
    };

    let errors = sinks.write_line(&line).await;
    let accepted = errors.len() < sinks.len();
    for err in errors {
        warn!(
            "event record not persisted: job_id={}, type={}, error={}",
            record.job_id,
            record.kind().as_str(),
            err
        );
    }

    debug!(
        "event record handled: job_id={}, type={}, persisted={}",
        record.job_id,
        record.kind().as_str(),
        accepted
    );
    accepted
}

async fn flush_sinks(sinks: &mut SinkSet) {
    for err in sinks.flush().await {
        warn!("sink flush failed: error={err}");
    }
}

fn encode_line(record: &EventRecord) -> serde_json::Result<Vec<u8>> {
    let logged_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();

    serde_json::to_vec(&LogLine { name: LOGGER_NAME, logged_at, record })
}

fn sink_list(sinks: &SinkSet) -> String {
    if sinks.is_empty() {
        "none".to_string()
    } else {
        sinks.names().join(",")
    }
}
