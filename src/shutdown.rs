//! Interrupt handling for a sync run.
//!
//! The first Ctrl+C (or SIGTERM on Unix) cancels the run's
//! [`CancellationToken`]: no further albums or items are scheduled, items
//! already streaming are settled, and the run reports itself interrupted.
//! Any later signal aborts the process immediately.

use anyhow::Context;
use tokio_util::sync::CancellationToken;

/// Conventional exit status for a process ended by SIGINT.
pub const ABORT_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalResponse {
    /// Stop scheduling work and let in-flight items finish.
    Drain,
    /// Exit now. Unfinished `.part` files are left behind and ignored.
    Abort,
}

/// How to react to the `nth` interrupt of the run, counting from 1.
pub fn response_to(nth: u32) -> SignalResponse {
    if nth <= 1 {
        SignalResponse::Drain
    } else {
        SignalResponse::Abort
    }
}

/// The interrupt sources a run listens to.
struct Signals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl Signals {
    fn register() -> anyhow::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let terminate =
                signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
            Ok(Self { terminate })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Wait for the next interrupt. `false` once no more can be received.
    async fn next(&mut self) -> bool {
        #[cfg(unix)]
        {
            tokio::select! {
                res = tokio::signal::ctrl_c() => res.is_ok(),
                got = self.terminate.recv() => got.is_some(),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.is_ok()
        }
    }
}

/// Start listening for interrupts. The returned token is cancelled on the
/// first one.
pub(crate) fn install_signal_handler() -> anyhow::Result<CancellationToken> {
    let mut signals = Signals::register()?;
    let token = CancellationToken::new();
    let run = token.clone();

    tokio::spawn(async move {
        let mut received = 0u32;
        while signals.next().await {
            received += 1;
            match response_to(received) {
                SignalResponse::Drain => {
                    tracing::info!(
                        "Interrupted: finishing items already in progress, then stopping"
                    );
                    tracing::info!(
                        "Re-run the same command to fetch the rest; interrupt again to quit now"
                    );
                    run.cancel();
                }
                SignalResponse::Abort => {
                    tracing::warn!(
                        "Quitting immediately; unfinished .part files are skipped and fetched again next run"
                    );
                    std::process::exit(ABORT_EXIT_CODE);
                }
            }
        }
        tracing::warn!("Stopped listening for interrupts");
    });

    Ok(token)
}
