use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// One try by the host to deliver a single outbound message to a single
/// recipient, as reported at the delivered/deferred/bounce hook points.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeliveryAttempt {
    #[serde(default)]
    pub job_id: Option<String>,
    /// Anything that is neither a number nor text decodes as `None` and
    /// renders as `"unknown"`; it never rejects the attempt.
    #[serde(default, deserialize_with = "deserialize_queue_time")]
    pub queued_at: Option<QueueTime>,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub recipient: String,
    /// Raw header block of the message, when the host (or the queue-time
    /// note) supplies one.
    #[serde(default)]
    pub headers: Option<String>,
    #[serde(default)]
    pub notes: AttemptNotes,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl DeliveryAttempt {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            job_id: None,
            queued_at: None,
            sender: String::new(),
            recipient: String::new(),
            headers: None,
            notes: AttemptNotes::default(),
            outcome,
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        self.outcome.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum Outcome {
    Delivered {
        #[serde(default)]
        transport: TransportInfo,
    },
    Deferred {
        #[serde(default)]
        diagnostic: Diagnostic,
        /// Whole seconds since the previous attempt.
        #[serde(default, deserialize_with = "deserialize_delay_secs")]
        delay: u64,
    },
    Bounced {
        #[serde(default)]
        diagnostic: Diagnostic,
    },
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Delivered { .. } => OutcomeKind::Delivered,
            Self::Deferred { .. } => OutcomeKind::Deferred,
            Self::Bounced { .. } => OutcomeKind::Bounced,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Delivered,
    Deferred,
    Bounced,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Deferred => "deferred",
            Self::Bounced => "bounced",
        }
    }
}

/// Queue entry time as the host reports it: unix milliseconds, or text in
/// RFC 3339 / RFC 2822 form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum QueueTime {
    UnixMillis(i64),
    Text(String),
}

impl QueueTime {
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().and_then(float_to_i64))
                .map(Self::UnixMillis),
            Value::String(text) => Some(Self::Text(text)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AttemptNotes {
    /// Subject captured outside the header block (raw or already decoded).
    #[serde(default)]
    pub subject: Option<String>,
}

/// Accepting server details for a delivered attempt.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TransportInfo {
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub host: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub ip: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub response: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub delay: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub port: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub mode: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub ok_recipients: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub secured: Option<String>,
}

/// DSN details attached to deferred and bounced attempts.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Diagnostic {
    /// Enhanced status code, e.g. `5.1.1`.
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub status: Option<String>,
    /// SMTP reply code, e.g. `550`.
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub code: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub message: Option<String>,
    /// Raw SMTP response line.
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub response: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub action: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub reason: Option<String>,
}

/// Hosts send ports, delays and flags as numbers or booleans as often as
/// strings; everything is kept as text so the record never carries nulls.
fn deserialize_lenient_string<'de, D>(
    deserializer: D,
) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(render_value))
}

fn deserialize_queue_time<'de, D>(
    deserializer: D,
) -> Result<Option<QueueTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(QueueTime::from_value))
}

/// Integers, floats (truncated) and numeric strings; negative or
/// unparseable values become 0.
fn deserialize_delay_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(delay_secs).unwrap_or(0))
}

fn delay_secs(value: Value) -> Option<u64> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().and_then(float_to_u64)),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<u64>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().and_then(float_to_u64))
        }
        _ => None,
    }
}

fn float_to_u64(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 0.0 && value < u64::MAX as f64)
        .then(|| value.trunc() as u64)
}

fn float_to_i64(value: f64) -> Option<i64> {
    (value.is_finite() && value.abs() < i64::MAX as f64)
        .then(|| value.trunc() as i64)
}

fn render_value(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(render_value)
                .collect::<Vec<_>>()
                .join(","),
        ),
        other => Some(other.to_string()),
    }
}
