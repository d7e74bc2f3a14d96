use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Grace window between the shutdown signal and the hard process exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Waits for SIGTERM/SIGINT, cancels the token, and arms the hard-exit
/// timer. Graceful unwind must finish inside [`SHUTDOWN_GRACE`] or the
/// process exits unconditionally.
pub async fn listen_shutdown(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                warn!("failed to install SIGTERM handler: error={err}");
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("shutdown signal received: SIGINT");
                    cancel_with_deadline(&token);
                }
                return;
            }
        };

        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(stream) => stream,
            Err(err) => {
                warn!("failed to install SIGINT handler: error={err}");
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("shutdown signal received: SIGINT");
                    cancel_with_deadline(&token);
                }
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => warn!("shutdown signal received: SIGTERM"),
            _ = sigint.recv() => warn!("shutdown signal received: SIGINT"),
        }

        cancel_with_deadline(&token);
        return;
    }

    #[cfg(not(unix))]
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("shutdown signal received: SIGINT");
        cancel_with_deadline(&token);
    }
}

fn cancel_with_deadline(token: &CancellationToken) {
    token.cancel();
    tokio::spawn(async {
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        warn!(
            "graceful shutdown did not finish within {}s, exiting",
            SHUTDOWN_GRACE.as_secs()
        );
        std::process::exit(1);
    });
}
