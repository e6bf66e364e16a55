use anyhow::{Context, Result};
use log::info;
use tokio::select;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Turns the usual termination signals into a [CancellationToken] that long-running
/// loops poll cooperatively.
pub struct SignalHandler {
    tok: CancellationToken,
    sigterm: Signal,
    sigint: Signal,
    sighup: Signal,
}

/// Installs the handlers right away, so that failing to do so is a startup error and
/// signals arriving before [SignalHandler::wait_for_signal] are not lost.
/// Needs to be called within a Tokio runtime.
pub fn new() -> Result<SignalHandler> {
    Ok(SignalHandler {
        tok: CancellationToken::new(),
        sigterm: signal(SignalKind::terminate()).context("installing SIGTERM handler")?,
        sigint: signal(SignalKind::interrupt()).context("installing SIGINT handler")?,
        sighup: signal(SignalKind::hangup()).context("installing SIGHUP handler")?,
    })
}

impl SignalHandler {
    pub fn subscribe_stop(&self) -> CancellationToken {
        self.tok.clone()
    }

    /// Waits for SIGTERM, SIGINT or SIGHUP, or for someone else to cancel the token.
    pub async fn wait_for_signal(mut self) {
        select! {
            _ = self.sigterm.recv() => info!("Terminated; stopping..."),
            _ = self.sigint.recv() => info!("Interrupted; stopping..."),
            _ = self.sighup.recv() => info!("Hangup received; stopping..."), // used by tmux apparently
            _ = self.tok.cancelled() => {},
        }
        self.tok.cancel();
    }
}
