use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::{OffsetDateTime, UtcOffset};

use crate::attempt::QueueTime;

const NANOS_PER_MILLI: i128 = 1_000_000;

/// Renders a host-reported queue time as RFC 3339 in UTC.
///
/// Returns `None` when the value is not a representation we recognize, or
/// falls outside the range RFC 3339 can express.
pub fn normalize_queue_time(value: &QueueTime) -> Option<String> {
    let instant = match value {
        QueueTime::UnixMillis(millis) => from_unix_millis(*millis)?,
        QueueTime::Text(text) => parse_text(text.trim())?,
    };

    instant.to_offset(UtcOffset::UTC).format(&Rfc3339).ok()
}

fn from_unix_millis(millis: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(
        i128::from(millis) * NANOS_PER_MILLI,
    )
    .ok()
}

fn parse_text(text: &str) -> Option<OffsetDateTime> {
    if text.is_empty() {
        return None;
    }

    // Some hosts stringify the epoch value.
    if let Ok(millis) = text.parse::<i64>() {
        return from_unix_millis(millis);
    }

    OffsetDateTime::parse(text, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(text, &Rfc2822))
        .ok()
}
