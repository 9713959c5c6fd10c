use serde::Serialize;

use crate::attempt::OutcomeKind;

/// Flat, immutable log record produced for one delivery attempt.
///
/// Serializes as a single JSON object: the common fields below plus the
/// outcome-specific fields of [`RecordDetails`], tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub job_id: String,
    pub queue_time: String,
    pub recipient: String,
    pub from: String,
    pub subject: String,
    #[serde(flatten)]
    pub details: RecordDetails,
}

impl EventRecord {
    pub fn kind(&self) -> OutcomeKind {
        match self.details {
            RecordDetails::Delivered(_) => OutcomeKind::Delivered,
            RecordDetails::Deferred(_) => OutcomeKind::Deferred,
            RecordDetails::Bounced(_) => OutcomeKind::Bounced,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RecordDetails {
    Delivered(DeliveredFields),
    Deferred(DeferredFields),
    Bounced(FailureFields),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveredFields {
    pub smtp_host: String,
    pub smtp_ip: String,
    pub smtp_response: String,
    pub delay: String,
    pub port: String,
    pub mode: String,
    pub ok_recipients: String,
    pub secured: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureFields {
    pub status_code: String,
    pub smtp_response: String,
    pub action: String,
    pub undelivered_reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeferredFields {
    #[serde(flatten)]
    pub failure: FailureFields,
    pub delay: u64,
}
