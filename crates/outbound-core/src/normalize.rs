use std::sync::OnceLock;

use mail_parser::MessageParser;
use thiserror::Error;

use crate::attempt::{DeliveryAttempt, Diagnostic, Outcome, OutcomeKind, TransportInfo};
use crate::record::{
    DeferredFields, DeliveredFields, EventRecord, FailureFields, RecordDetails,
};
use crate::timestamp::normalize_queue_time;

pub const UNKNOWN_SUBJECT: &str = "unknown";
pub const UNKNOWN_ERROR: &str = "unknown error";
pub const UNKNOWN_QUEUE_TIME: &str = "unknown";

/// Why an attempt produced no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("delivery attempt carries no job reference")]
    MissingJob,
}

impl SkipReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingJob => "MISSING_JOB",
        }
    }
}

/// Classifies one delivery attempt and flattens it into an [`EventRecord`].
///
/// Pure: the same attempt always yields the same record. Missing optional
/// data degrades to sentinel values (`"unknown"`, `"unknown error"`, empty
/// strings); the only way to get no record is a missing job reference.
pub fn normalize(attempt: &DeliveryAttempt) -> Result<EventRecord, SkipReason> {
    let job_id =
        present(attempt.job_id.as_deref()).ok_or(SkipReason::MissingJob)?;

    let details = match &attempt.outcome {
        Outcome::Delivered { transport } => {
            RecordDetails::Delivered(delivered_fields(transport))
        }
        Outcome::Deferred { diagnostic, delay } => {
            RecordDetails::Deferred(DeferredFields {
                failure: failure_fields(diagnostic, OutcomeKind::Deferred),
                delay: *delay,
            })
        }
        Outcome::Bounced { diagnostic } => RecordDetails::Bounced(
            failure_fields(diagnostic, OutcomeKind::Bounced),
        ),
    };

    let queue_time = attempt
        .queued_at
        .as_ref()
        .and_then(normalize_queue_time)
        .unwrap_or_else(|| UNKNOWN_QUEUE_TIME.to_string());

    Ok(EventRecord {
        job_id: job_id.to_string(),
        queue_time,
        recipient: unwrap_address(&attempt.recipient).to_string(),
        from: unwrap_address(&attempt.sender).to_string(),
        subject: resolve_subject(
            attempt.headers.as_deref(),
            attempt.notes.subject.as_deref(),
        ),
        details,
    })
}

/// Strips one leading `<` and one trailing `>` from an envelope address.
/// Anything without delimiters comes back unchanged (minus surrounding
/// whitespace).
pub fn unwrap_address(address: &str) -> &str {
    let trimmed = address.trim();
    let inner = trimmed.strip_prefix('<').unwrap_or(trimmed);
    inner.strip_suffix('>').unwrap_or(inner)
}

/// Subject precedence: decoded `Subject` header, then the note fallback,
/// then `"unknown"`.
pub fn resolve_subject(
    headers: Option<&str>,
    note: Option<&str>,
) -> String {
    first_present([headers.and_then(decoded_subject), note.map(str::to_string)])
        .unwrap_or_else(|| UNKNOWN_SUBJECT.to_string())
}

/// Reason precedence: explicit reason, then `code - message`, then the raw
/// SMTP response, then `"unknown error"`.
pub fn resolve_undelivered_reason(diagnostic: &Diagnostic) -> String {
    let code_message = match (
        present(diagnostic.code.as_deref()),
        present(diagnostic.message.as_deref()),
    ) {
        (Some(code), Some(message)) => Some(format!("{code} - {message}")),
        _ => None
    };

    first_present([
        diagnostic.reason.clone(),
        code_message,
        diagnostic.response.clone(),
    ])
    .unwrap_or_else(|| UNKNOWN_ERROR.to_string())
}

/// Returns the first candidate that is set and not blank, untouched.
pub fn first_present<I>(candidates: I) -> Option<String>
where
    I: IntoIterator<Item = Option<String>>,
{
    candidates
        .into_iter()
        .flatten()
        .find(|candidate| !candidate.trim().is_empty())
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn or_empty(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn delivered_fields(transport: &TransportInfo) -> DeliveredFields {
    DeliveredFields {
        smtp_host: or_empty(&transport.host),
        smtp_ip: or_empty(&transport.ip),
        smtp_response: or_empty(&transport.response),
        delay: or_empty(&transport.delay),
        port: or_empty(&transport.port),
        mode: or_empty(&transport.mode),
        ok_recipients: or_empty(&transport.ok_recipients),
        secured: or_empty(&transport.secured),
    }
}

fn failure_fields(
    diagnostic: &Diagnostic,
    kind: OutcomeKind,
) -> FailureFields {
    let status_code =
        first_present([diagnostic.status.clone(), diagnostic.code.clone()])
            .unwrap_or_else(|| default_status_code(kind).to_string());
    let action = first_present([diagnostic.action.clone()])
        .unwrap_or_else(|| default_action(kind).to_string());

    FailureFields {
        status_code,
        smtp_response: or_empty(&diagnostic.response),
        action,
        undelivered_reason: resolve_undelivered_reason(diagnostic),
    }
}

fn default_status_code(kind: OutcomeKind) -> &'static str {
    match kind {
        OutcomeKind::Delivered => "2.0.0",
        OutcomeKind::Deferred => "4.0.0",
        OutcomeKind::Bounced => "5.0.0",
    }
}

fn default_action(kind: OutcomeKind) -> &'static str {
    match kind {
        OutcomeKind::Delivered => "delivered",
        OutcomeKind::Deferred => "delayed",
        OutcomeKind::Bounced => "failed",
    }
}

fn decoded_subject(raw_headers: &str) -> Option<String> {
    // The parser only sees a header once its line is terminated.
    let mut block = raw_headers.trim_end_matches(['\r', '\n']).to_string();
    block.push_str("\r\n\r\n");

    let message = header_parser().parse(block.as_bytes())?;
    message.subject().map(ToOwned::to_owned)
}

fn header_parser() -> &'static MessageParser {
    static PARSER: OnceLock<MessageParser> = OnceLock::new();
    PARSER.get_or_init(MessageParser::default)
}
