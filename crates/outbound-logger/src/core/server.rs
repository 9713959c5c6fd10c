use std::io::ErrorKind;

use anyhow::{Context, Result};
use outbound_proto::{
    ProtoError, Verdict, decode_header_json, read_frame_async,
    write_verdict_async,
};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::app::AppState;

const MAX_HEADER_LEN: u32 = 16 * 1024;

/// Binds the hook listener and serves until shutdown.
pub async fn run_tcp_server(
    listen: &str,
    state: AppState,
) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind hook listener on {listen}"))?;

    info!("hook server listening: listen={listen}");
    serve(listener, state).await
}

/// Accept loop; one task per host connection.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                info!("hook server stopping");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted.context("tcp accept failed")?;
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_client(stream, state).await {
                        warn!(
                            "hook connection failed: peer={}, error={}",
                            peer,
                            err
                        );
                    }
                });
            }
        }
    }

    Ok(())
}

/// Answers every frame on the connection with a verdict until the host
/// closes it or shutdown begins. A frame already being handled finishes
/// first; no new frame is read after cancellation.
async fn handle_client(
    mut stream: TcpStream,
    state: AppState,
) -> Result<()> {
    loop {
        let frame = tokio::select! {
            _ = state.shutdown.cancelled() => {
                debug!("hook connection closed for shutdown");
                return Ok(());
            }
            frame = read_frame_async(
                &mut stream,
                MAX_HEADER_LEN,
                state.max_payload_bytes,
            ) => frame,
        };

        let (header_bytes, body) = match frame {
            Ok(frame) => frame,
            Err(ProtoError::Io(err)) if err.kind() == ErrorKind::UnexpectedEof => {
                return Ok(());
            }
            Err(err) => return Err(err).context("failed to read hook frame"),
        };

        let verdict = match decode_header_json(&header_bytes) {
            Ok(header) => {
                let verdict = state.recorder.on_hook(header.hook, &body).await;
                debug!(
                    "hook answered: hook={}, source={}, bytes={}, verdict={}",
                    header.hook.as_str(),
                    header.source.as_deref().unwrap_or("-"),
                    body.len(),
                    verdict.as_str()
                );
                verdict
            }
            Err(err) => {
                warn!(
                    "undecodable hook header, answering continue: bytes={}, error={}",
                    body.len(),
                    err
                );
                Verdict::Continue
            }
        };

        write_verdict_async(&mut stream, verdict)
            .await
            .context("failed to write verdict")?;
    }
}
