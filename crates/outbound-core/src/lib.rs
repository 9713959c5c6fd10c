mod attempt;
mod normalize;
mod record;
mod timestamp;

pub use attempt::{
    AttemptNotes, DeliveryAttempt, Diagnostic, Outcome, OutcomeKind,
    QueueTime, TransportInfo,
};
pub use normalize::{
    SkipReason, UNKNOWN_ERROR, UNKNOWN_QUEUE_TIME, UNKNOWN_SUBJECT,
    first_present, normalize, resolve_subject, resolve_undelivered_reason,
    unwrap_address,
};
pub use record::{
    DeferredFields, DeliveredFields, EventRecord, FailureFields, RecordDetails,
};
pub use timestamp::normalize_queue_time;
