use outbound_core::{DeliveryAttempt, OutcomeKind, normalize};
use outbound_proto::{Hook, Verdict};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::notes::SharedNotes;
use super::writer::RecordSender;

/// Body of a `queue_outbound` hook: the header block to keep as a note
/// for the job's later delivery hooks.
#[derive(Debug, Clone, Deserialize)]
pub struct QueuedMessage {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub headers: Option<String>,
}

/// Observer behind every host hook.
///
/// Never fails the host: whatever happens to a payload, the host gets a
/// verdict back. Records are handed to the writer task; nothing here
/// touches a sink.
pub struct Recorder {
    records_tx: RecordSender,
    notes: SharedNotes,
    stop_bounce: bool,
}

impl Recorder {
    pub fn new(
        records_tx: RecordSender,
        notes: SharedNotes,
        stop_bounce: bool,
    ) -> Self {
        Self { records_tx, notes, stop_bounce }
    }

    /// Decodes a hook frame body and dispatches it.
    pub async fn on_hook(
        &self,
        hook: Hook,
        body: &[u8],
    ) -> Verdict {
        match hook {
            Hook::Heartbeat => {
                debug!("heartbeat hook received");
                Verdict::Continue
            }
            Hook::QueueOutbound => {
                match serde_json::from_slice::<QueuedMessage>(body) {
                    Ok(message) => self.on_queue_outbound(message).await,
                    Err(err) => {
                        warn!("invalid queue_outbound payload: error={err}");
                        Verdict::Continue
                    }
                }
            }
            Hook::Delivered | Hook::Deferred | Hook::Bounce => {
                let attempt =
                    match serde_json::from_slice::<DeliveryAttempt>(body) {
                        Ok(attempt) => attempt,
                        Err(err) => {
                            warn!(
                                "invalid delivery attempt payload: hook={}, error={}",
                                hook.as_str(),
                                err
                            );
                            return Verdict::Continue;
                        }
                    };

                if expected_outcome(hook) != Some(attempt.kind()) {
                    warn!(
                        "hook and outcome disagree, attempt ignored: hook={}, outcome={}, job_id={}",
                        hook.as_str(),
                        attempt.kind().as_str(),
                        attempt.job_id.as_deref().unwrap_or("-")
                    );
                    return Verdict::Continue;
                }

                self.on_attempt(attempt).await
            }
        }
    }

    /// Keeps the message headers as a note for the job's later attempts.
    pub async fn on_queue_outbound(&self, message: QueuedMessage) -> Verdict {
        let job_id = message
            .job_id
            .map(|job_id| job_id.trim().to_string())
            .filter(|job_id| !job_id.is_empty());

        match (job_id, message.headers) {
            (Some(job_id), Some(headers)) => {
                debug!("header note stored: job_id={job_id}");
                self.notes.lock().await.insert(job_id, headers);
            }
            (None, _) => warn!("queue_outbound without job reference, note skipped"),
            (Some(job_id), None) => {
                debug!("queue_outbound without headers: job_id={job_id}");
            }
        }

        Verdict::Continue
    }

    /// Normalizes one attempt, queues its record and answers the host.
    pub async fn on_attempt(&self, mut attempt: DeliveryAttempt) -> Verdict {
        if attempt.headers.is_none() {
            if let Some(job_id) = attempt.job_id.as_deref().map(str::trim) {
                attempt.headers = self.notes.lock().await.get(job_id);
            }
        }

        let kind = attempt.kind();
        match normalize(&attempt) {
            Ok(record) => {
                info!(
                    "{} record added: job_id={}, recipient={}, subject={}",
                    kind.as_str(),
                    record.job_id,
                    record.recipient,
                    record.subject
                );
                if let Err(err) = self.records_tx.send(record) {
                    warn!(
                        "record writer unavailable, record dropped: job_id={}",
                        err.0.job_id
                    );
                }
            }
            Err(reason) => {
                warn!(
                    "delivery attempt skipped: reason={}, outcome={}, recipient={}",
                    reason.code(),
                    kind.as_str(),
                    attempt.recipient
                );
                return Verdict::Continue;
            }
        }

        self.verdict_for(kind)
    }

    fn verdict_for(&self, kind: OutcomeKind) -> Verdict {
        if kind == OutcomeKind::Bounced && self.stop_bounce {
            Verdict::StopBounce
        } else {
            Verdict::Continue
        }
    }
}

fn expected_outcome(hook: Hook) -> Option<OutcomeKind> {
    match hook {
        Hook::Delivered => Some(OutcomeKind::Delivered),
        Hook::Deferred => Some(OutcomeKind::Deferred),
        Hook::Bounce => Some(OutcomeKind::Bounced),
        Hook::QueueOutbound | Hook::Heartbeat => None,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use outbound_core::{EventRecord, RecordDetails};
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::core::notes::NoteStore;
    use crate::core::writer::RecordReceiver;

    fn recorder(stop_bounce: bool) -> (Recorder, RecordReceiver) {
        let (records_tx, records_rx) = mpsc::unbounded_channel();
        let notes = NoteStore::shared(Duration::from_secs(60));
        (Recorder::new(records_tx, notes, stop_bounce), records_rx)
    }

    fn body(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    fn bounce_body(job_id: &str) -> Vec<u8> {
        body(json!({
            "outcome": "bounced",
            "job_id": job_id,
            "sender": "<a@b.com>",
            "recipient": "<c@d.com>",
            "diagnostic": {"code": 550, "message": "no such user"}
        }))
    }

    fn next_record(rx: &mut RecordReceiver) -> EventRecord {
        rx.try_recv().expect("a record should be queued")
    }

    #[tokio::test]
    async fn delivered_hook_queues_record_and_continues() {
        let (recorder, mut rx) = recorder(true);
        let verdict = recorder
            .on_hook(
                Hook::Delivered,
                &body(json!({
                    "outcome": "delivered",
                    "job_id": "J1",
                    "queued_at": 1_700_000_000_000_i64,
                    "sender": "<a@b.com>",
                    "recipient": "<c@d.com>",
                    "transport": {
                        "host": "mx1",
                        "ip": "1.2.3.4",
                        "response": "250 OK",
                        "delay": "1.2",
                        "port": "25"
                    }
                })),
            )
            .await;

        assert_eq!(verdict, Verdict::Continue);
        let record = next_record(&mut rx);
        assert_eq!(record.job_id, "J1");
        assert_eq!(record.from, "a@b.com");
        assert_eq!(record.recipient, "c@d.com");
        assert_eq!(record.subject, "unknown");
        let RecordDetails::Delivered(fields) = record.details else {
            panic!("expected delivered record");
        };
        assert_eq!(fields.smtp_host, "mx1");
        assert_eq!(fields.smtp_response, "250 OK");
    }

    #[tokio::test]
    async fn bounce_with_stop_enabled_signals_stop() {
        let (recorder, mut rx) = recorder(true);
        let verdict = recorder.on_hook(Hook::Bounce, &bounce_body("J2")).await;

        assert_eq!(verdict, Verdict::StopBounce);
        let record = next_record(&mut rx);
        let RecordDetails::Bounced(fields) = record.details else {
            panic!("expected bounced record");
        };
        assert_eq!(fields.undelivered_reason, "550 - no such user");
        assert_eq!(fields.status_code, "550");
    }

    #[tokio::test]
    async fn bounce_with_stop_disabled_continues() {
        let (recorder, mut rx) = recorder(false);
        let verdict = recorder.on_hook(Hook::Bounce, &bounce_body("J3")).await;

        assert_eq!(verdict, Verdict::Continue);
        assert_eq!(next_record(&mut rx).job_id, "J3");
    }

    #[tokio::test]
    async fn missing_job_emits_nothing_and_continues() {
        let (recorder, mut rx) = recorder(true);
        let verdict = recorder
            .on_hook(
                Hook::Bounce,
                &body(json!({"outcome": "bounced", "recipient": "<c@d.com>"})),
            )
            .await;

        assert_eq!(verdict, Verdict::Continue);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_or_mismatched_payloads_continue() {
        let (recorder, mut rx) = recorder(true);

        assert_eq!(
            recorder.on_hook(Hook::Deferred, b"not json").await,
            Verdict::Continue
        );
        assert_eq!(
            recorder.on_hook(Hook::Deferred, &bounce_body("J4")).await,
            Verdict::Continue
        );
        assert_eq!(
            recorder.on_hook(Hook::QueueOutbound, b"[]").await,
            Verdict::Continue
        );
        assert_eq!(
            recorder.on_hook(Hook::Heartbeat, b"").await,
            Verdict::Continue
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn queue_time_note_supplies_subject() {
        let (recorder, mut rx) = recorder(false);

        recorder
            .on_hook(
                Hook::QueueOutbound,
                &body(json!({
                    "job_id": "J5",
                    "headers": "From: a@b.com\r\nSubject: Invoice 42\r\n\r\n"
                })),
            )
            .await;

        recorder
            .on_hook(
                Hook::Deferred,
                &body(json!({
                    "outcome": "deferred",
                    "job_id": "J5",
                    "recipient": "<c@d.com>",
                    "delay": 60,
                    "notes": {"subject": "fallback"}
                })),
            )
            .await;

        let record = next_record(&mut rx);
        assert_eq!(record.subject, "Invoice 42");
        let RecordDetails::Deferred(fields) = record.details else {
            panic!("expected deferred record");
        };
        assert_eq!(fields.delay, 60);
        assert_eq!(fields.failure.undelivered_reason, "unknown error");
    }

    #[tokio::test]
    async fn loosely_typed_delay_and_queue_time_still_yield_a_record() {
        let (recorder, mut rx) = recorder(false);
        let verdict = recorder
            .on_hook(
                Hook::Deferred,
                &body(json!({
                    "outcome": "deferred",
                    "job_id": "J7",
                    "queued_at": 1_700_000_000_000.0_f64,
                    "recipient": "<c@d.com>",
                    "delay": 1.5
                })),
            )
            .await;
        assert_eq!(verdict, Verdict::Continue);

        let record = next_record(&mut rx);
        assert_eq!(record.queue_time, "2023-11-14T22:13:20Z");
        let RecordDetails::Deferred(fields) = record.details else {
            panic!("expected deferred record");
        };
        assert_eq!(fields.delay, 1);

        recorder
            .on_hook(
                Hook::Deferred,
                &body(json!({
                    "outcome": "deferred",
                    "job_id": "J8",
                    "queued_at": {"x": 1},
                    "delay": "300"
                })),
            )
            .await;
        let record = next_record(&mut rx);
        assert_eq!(record.queue_time, "unknown");
        let RecordDetails::Deferred(fields) = record.details else {
            panic!("expected deferred record");
        };
        assert_eq!(fields.delay, 300);
    }

    #[tokio::test]
    async fn dropped_writer_does_not_change_verdict() {
        let (recorder, rx) = recorder(true);
        drop(rx);

        let verdict = recorder.on_hook(Hook::Bounce, &bounce_body("J6")).await;
        assert_eq!(verdict, Verdict::StopBounce);
    }
}
