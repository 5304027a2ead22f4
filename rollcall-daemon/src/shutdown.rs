//! Graceful shutdown coordination.

use tokio_util::sync::CancellationToken;

/// Shutdown signal that can be cloned and awaited.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    /// Wait for the shutdown signal.
    pub async fn recv(&self) {
        self.token.cancelled().await;
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token that fires together with this signal.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Shutdown coordinator that can send shutdown signals.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Get a signal receiver.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            token: self.token.clone(),
        }
    }

    /// Trigger shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Trigger shutdown on Ctrl-C.
    pub fn trigger_on_ctrl_c(&self) {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                result = tokio::signal::ctrl_c() => {
                    match result {
                        Ok(()) => tracing::info!("Received Ctrl-C, shutting down"),
                        Err(e) => tracing::error!(error = %e, "Cannot listen for Ctrl-C, shutting down"),
                    }
                    token.cancel();
                }
            }
        });
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
