use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Cancels `token` on the first SIGTERM or SIGINT.
///
/// Cancellation is the only shutdown path: listeners stop accepting hooks
/// and the record writer drains what is already queued before exiting.
pub async fn listen_shutdown(token: CancellationToken) {
    tokio::select! {
        _ = token.cancelled() => return,
        signal = wait_for_signal() => {
            warn!("shutdown signal received: {signal}");
        }
    }

    token.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt()))
        {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(err), _) | (_, Err(err)) => {
                warn!("failed to install unix signal handlers: error={err}");
                return wait_for_ctrl_c().await;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() -> &'static str {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: error={err}");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
