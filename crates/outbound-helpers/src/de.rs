use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

/// Accepts a YAML boolean or an ini-style flag string
/// (`true/false`, `yes/no`, `on/off`, `1/0`).
pub fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawFlag {
        Bool(bool),
        Number(u64),
        Text(String),
    }

    match RawFlag::deserialize(deserializer)? {
        RawFlag::Bool(flag) => Ok(flag),
        RawFlag::Number(0) => Ok(false),
        RawFlag::Number(1) => Ok(true),
        RawFlag::Number(other) => {
            Err(D::Error::custom(format!("invalid flag value: {other}")))
        }
        RawFlag::Text(value) => parse_flag(&value).ok_or_else(|| {
            D::Error::custom(format!("invalid flag value: {value}"))
        }),
    }
}

pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Accepts plain seconds or a humantime string (`500ms`, `24h`).
pub fn deserialize_duration<'de, D>(
    deserializer: D,
) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Seconds(u64),
        Text(String),
    }

    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
        RawDuration::Text(value) => {
            humantime::parse_duration(value.trim()).map_err(D::Error::custom)
        }
    }
}
