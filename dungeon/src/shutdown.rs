//! Process-wide cancellation
//!
//! Each process owns one [`ShutdownToken`]. It is tripped by a local
//! interrupt (SIGINT/SIGTERM), which for workers is also how the dungeon's
//! `ShutdownRequested` broadcast arrives. It is distinct from the shared
//! `running` flag, which is the cross-process liveness signal.

use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{debug, info};

/// Cooperative cancellation flag checked at every loop head and wait
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown; idempotent
    pub fn trigger(&self) {
        if !self.tx.send_replace(true) {
            debug!("ShutdownToken::trigger: shutdown requested");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once shutdown has been requested
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as self, so wait_for cannot fail here.
        let _ = rx.wait_for(|&requested| requested).await;
    }
}

/// Trip `token` on SIGINT or SIGTERM
///
/// The handlers are installed before this returns, so from then on an
/// interrupt no longer terminates the process outright.
pub fn install_handlers(token: ShutdownToken) -> Result<(), std::io::Error> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => info!("SIGINT received"),
            _ = sigterm.recv() => info!("SIGTERM received"),
        }
        token.trigger();
    });
    Ok(())
}
