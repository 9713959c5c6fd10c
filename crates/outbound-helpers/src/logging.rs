use std::env;
use std::io::{self, IsTerminal};

use tracing_subscriber::EnvFilter;
#[cfg(target_os = "linux")]
use tracing_subscriber::layer::SubscriberExt;
#[cfg(target_os = "linux")]
use tracing_subscriber::util::SubscriberInitExt;

/// Overrides where diagnostics go: `journald`, `stderr` or `auto`.
pub const LOG_TARGET_ENV: &str = "OUTBOUND_LOG_TARGET";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Journald,
    Stderr,
}

impl LogTarget {
    /// `None` means "decide from the environment".
    pub fn parse(value: &str) -> Option<Option<Self>> {
        match value.trim().to_ascii_lowercase().as_str() {
            "journald" | "journal" => Some(Some(Self::Journald)),
            "stderr" | "console" => Some(Some(Self::Stderr)),
            "" | "auto" => Some(None),
            _ => None,
        }
    }

    fn detect() -> Self {
        let requested = env::var(LOG_TARGET_ENV)
            .ok()
            .and_then(|value| Self::parse(&value))
            .flatten();

        requested.unwrap_or(if is_running_under_systemd() {
            Self::Journald
        } else {
            Self::Stderr
        })
    }
}

/// Installs the global diagnostics subscriber.
///
/// Diagnostics never go to stdout: stdout may be one of the event sinks, and
/// every line there must be an event record.
pub fn init_logging(
    default_filter: &str,
    env_key: &str,
    service_name: &str,
) {
    let env_filter = build_env_filter(default_filter, env_key);

    if LogTarget::detect() == LogTarget::Journald {
        #[cfg(target_os = "linux")]
        match tracing_journald::layer() {
            Ok(layer) => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer.with_syslog_identifier(service_name.to_string()))
                    .init();
                return;
            }
            Err(err) => {
                eprintln!(
                    "{service_name}: journald unavailable, logging to stderr: {err}"
                );
            }
        }

        #[cfg(not(target_os = "linux"))]
        eprintln!("{service_name}: journald unsupported here, logging to stderr");
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .init();
}

fn build_env_filter(
    default_filter: &str,
    env_key: &str,
) -> EnvFilter {
    EnvFilter::try_from_env(env_key)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_filter))
}

fn is_running_under_systemd() -> bool {
    cfg!(target_os = "linux")
        && (env::var_os("JOURNAL_STREAM").is_some()
            || env::var_os("INVOCATION_ID").is_some())
}
