use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::process::ExitCode;
use std::time::Duration;

use outbound_proto::{
    Header, Hook, Verdict, encode_header_json, read_verdict_sync,
    write_frame_sync,
};

const EX_TEMPFAIL: u8 = 75;
const EX_USAGE: u8 = 64;
const MAX_BODY_BYTES: usize = 1024 * 1024;
const DEFAULT_SERVER: &str = "127.0.0.1:2148";
const USAGE: &str = "usage: outbound-hook --hook queue_outbound|delivered|deferred|bounce|heartbeat [--server host:port] [--source name] [--timeout-secs 5]";

type Result<T> = std::result::Result<T, HookError>;

fn main() -> ExitCode {
    match run() {
        Ok(verdict) => {
            println!("{}", verdict.as_str());
            ExitCode::SUCCESS
        }
        Err(err) => {
            let code = match err {
                HookError::Usage(_) => EX_USAGE,
                HookError::Runtime(_) => EX_TEMPFAIL,
            };
            eprintln!("outbound-hook error: {err}");
            ExitCode::from(code)
        }
    }
}

fn run() -> Result<Verdict> {
    let cli = Cli::parse(std::env::args().skip(1))?;
    run_with_cli(cli, &mut io::stdin())
}

fn run_with_cli<R: Read>(
    cli: Cli,
    stdin: &mut R,
) -> Result<Verdict> {
    let body = read_body(stdin, MAX_BODY_BYTES)?;
    let header_bytes = build_header_bytes(&cli)?;
    let timeout = Duration::from_secs(cli.timeout_secs);
    let addr = resolve_socket_addr(&cli.server)?;
    send_frame_and_wait_verdict(addr, timeout, &header_bytes, &body)
}

fn read_body<R: Read>(
    reader: &mut R,
    max_body_bytes: usize,
) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    reader
        .take((max_body_bytes as u64) + 1)
        .read_to_end(&mut body)
        .map_err(|err| runtime_err("failed to read hook payload from stdin", err))?;
    if body.len() > max_body_bytes {
        return Err(HookError::Runtime(format!(
            "hook payload too large: max {max_body_bytes} bytes"
        )));
    }
    Ok(body)
}

fn build_header_bytes(cli: &Cli) -> Result<Vec<u8>> {
    let header = Header { hook: cli.hook, source: cli.source.clone() };
    encode_header_json(&header)
        .map_err(|err| runtime_err("failed to serialize header", err))
}

fn send_frame_and_wait_verdict(
    addr: SocketAddr,
    timeout: Duration,
    header_bytes: &[u8],
    body: &[u8],
) -> Result<Verdict> {
    let mut stream =
        TcpStream::connect_timeout(&addr, timeout).map_err(|err| {
            runtime_err(format!("failed to connect to {addr}"), err)
        })?;
    stream.set_nodelay(true).ok();

    stream
        .set_write_timeout(Some(timeout))
        .map_err(|err| runtime_err("failed to set write timeout", err))?;

    stream
        .set_read_timeout(Some(timeout))
        .map_err(|err| runtime_err("failed to set read timeout", err))?;

    write_frame_sync(&mut stream, header_bytes, body)
        .map_err(|err| runtime_err("failed to send frame", err))?;
    stream.flush().ok();

    read_verdict_sync(&mut stream)
        .map_err(|err| runtime_err("invalid/missing verdict from server", err))
}

fn resolve_socket_addr(server: &str) -> Result<SocketAddr> {
    server
        .to_socket_addrs()
        .map_err(|err| {
            runtime_err(format!("failed to resolve server address: {server}"), err)
        })?
        .next()
        .ok_or_else(|| {
            HookError::Runtime(format!("no address resolved for server: {server}"))
        })
}

#[derive(Debug)]
struct Cli {
    hook: Hook,
    server: String,
    source: Option<String>,
    timeout_secs: u64,
}

impl Cli {
    fn parse<I>(mut args: I) -> Result<Self>
    where
        I: Iterator<Item = String>,
    {
        let mut hook = None;
        let mut server = None;
        let mut source = None;
        let mut timeout_secs = 5_u64;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--hook" => {
                    let raw = required_value(&mut args, "--hook")?;
                    hook = Some(Hook::parse(&raw).ok_or_else(|| {
                        HookError::Usage(format!("unknown hook: {raw}"))
                    })?);
                }
                "--server" => server = Some(required_value(&mut args, "--server")?),
                "--source" => source = Some(required_value(&mut args, "--source")?),
                "--timeout-secs" => {
                    let raw = required_value(&mut args, "--timeout-secs")?;
                    timeout_secs = raw
                        .parse::<u64>()
                        .ok()
                        .filter(|secs| *secs > 0)
                        .ok_or_else(|| {
                            HookError::Usage(
                                "--timeout-secs must be a positive integer"
                                    .to_string(),
                            )
                        })?;
                }
                "-h" | "--help" => return Err(HookError::Usage(USAGE.to_string())),
                _ => {
                    return Err(HookError::Usage(format!(
                        "unknown argument: {arg}"
                    )));
                }
            }
        }

        Ok(Self {
            hook: hook.ok_or_else(|| {
                HookError::Usage("missing required argument --hook".to_string())
            })?,
            server: server
                .or_else(|| non_empty_env("OUTBOUND_LOGGER_SERVER"))
                .unwrap_or_else(|| DEFAULT_SERVER.to_string()),
            source,
            timeout_secs,
        })
    }
}

fn required_value<I>(
    args: &mut I,
    flag: &str,
) -> Result<String>
where
    I: Iterator<Item = String>,
{
    args.next()
        .ok_or_else(|| HookError::Usage(format!("missing value for {flag}")))
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
    })
}

#[derive(Debug)]
enum HookError {
    Usage(String),
    Runtime(String),
}

impl fmt::Display for HookError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            HookError::Usage(msg) => write!(f, "{msg}"),
            HookError::Runtime(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for HookError {}

fn runtime_err(
    context: impl Into<String>,
    err: impl fmt::Display,
) -> HookError {
    HookError::Runtime(format!("{}: {err}", context.into()))
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};
    use std::net::TcpListener;
    use std::thread;

    use outbound_proto::{
        REPLY_CONTINUE, REPLY_STOP, decode_header_json, read_frame_sync,
    };

    use super::*;

    fn args(values: &[&str]) -> std::vec::IntoIter<String> {
        values
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    fn cli_for(addr: SocketAddr) -> Cli {
        Cli {
            hook: Hook::Bounce,
            server: addr.to_string(),
            source: Some("mx-out-1".to_string()),
            timeout_secs: 2,
        }
    }

    #[test]
    fn cli_parse_success() {
        let cli = Cli::parse(args(&[
            "--hook",
            "deferred",
            "--server",
            "10.0.0.5:2148",
            "--source",
            "mx-out-1",
            "--timeout-secs",
            "3",
        ]))
        .expect("parse should succeed");

        assert_eq!(cli.hook, Hook::Deferred);
        assert_eq!(cli.server, "10.0.0.5:2148");
        assert_eq!(cli.source.as_deref(), Some("mx-out-1"));
        assert_eq!(cli.timeout_secs, 3);
    }

    #[test]
    fn cli_parse_rejects_unknown_hook_and_missing_hook() {
        match Cli::parse(args(&["--hook", "rcpt"])) {
            Err(HookError::Usage(msg)) => assert!(msg.contains("unknown hook: rcpt")),
            other => panic!("expected usage error, got {other:?}"),
        }

        match Cli::parse(args(&["--server", "127.0.0.1:1"])) {
            Err(HookError::Usage(msg)) => {
                assert!(msg.contains("missing required argument --hook"));
            }
            other => panic!("expected usage error, got {other:?}"),
        }

        match Cli::parse(args(&["--hook", "bounce", "--timeout-secs", "0"])) {
            Err(HookError::Usage(msg)) => assert!(msg.contains("positive integer")),
            other => panic!("expected usage error, got {other:?}"),
        }
    }

    #[test]
    fn read_body_respects_limit() {
        let mut input = Cursor::new(b"012345".to_vec());
        match read_body(&mut input, 5) {
            Err(HookError::Runtime(msg)) => {
                assert!(msg.contains("hook payload too large: max 5 bytes"));
            }
            other => panic!("expected runtime error, got {other:?}"),
        }
    }

    #[test]
    fn forwards_payload_and_returns_stop_verdict() {
        let Some(listener) = bind_local_listener_or_skip() else {
            return;
        };
        let addr = listener.local_addr().expect("local addr");
        let payload = br#"{"outcome":"bounced","job_id":"J1"}"#.to_vec();
        let expected = payload.clone();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let (header, body) =
                read_frame_sync(&mut stream, 1024, 1024).expect("frame");
            let decoded = decode_header_json(&header).expect("decode header");
            assert_eq!(decoded.hook, Hook::Bounce);
            assert_eq!(decoded.source.as_deref(), Some("mx-out-1"));
            assert_eq!(body, expected);
            stream.write_all(REPLY_STOP).expect("reply write");
        });

        let verdict = run_with_cli(cli_for(addr), &mut Cursor::new(payload))
            .expect("hook run should succeed");
        assert_eq!(verdict, Verdict::StopBounce);
        handle.join().expect("server thread join");
    }

    #[test]
    fn continue_verdict_is_reported() {
        let Some(listener) = bind_local_listener_or_skip() else {
            return;
        };
        let addr = listener.local_addr().expect("local addr");

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let _ = read_frame_sync(&mut stream, 1024, 1024).expect("frame");
            stream.write_all(REPLY_CONTINUE).expect("reply write");
        });

        let verdict = run_with_cli(cli_for(addr), &mut Cursor::new(b"{}".to_vec()))
            .expect("hook run should succeed");
        assert_eq!(verdict, Verdict::Continue);
        handle.join().expect("server thread join");
    }

    #[test]
    fn fails_when_verdict_is_missing() {
        let Some(listener) = bind_local_listener_or_skip() else {
            return;
        };
        let addr = listener.local_addr().expect("local addr");

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let _ = read_frame_sync(&mut stream, 1024, 1024).expect("frame");
        });

        match run_with_cli(cli_for(addr), &mut Cursor::new(b"{}".to_vec())) {
            Err(HookError::Runtime(msg)) => {
                assert!(msg.contains("invalid/missing verdict from server"));
            }
            other => panic!("expected runtime error, got {other:?}"),
        }
        handle.join().expect("server thread join");
    }

    fn bind_local_listener_or_skip() -> Option<TcpListener> {
        match TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => Some(listener),
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                eprintln!("skipping network test: {err}");
                None
            }
            Err(err) => panic!("bind test listener failed: {err}"),
        }
    }
}
