//! OS signal handling.
//!
//! # Responsibilities
//! - SIGTERM/SIGINT → graceful shutdown
//! - SIGHUP → reload the configuration file
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A handler that fails to register never fires; the daemon keeps running

/// Resolve once Ctrl-C or (on unix) SIGTERM is received.
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

/// Stream of configuration reload requests (SIGHUP on unix).
pub struct ReloadSignal {
    #[cfg(unix)]
    inner: Option<tokio::signal::unix::Signal>,
}

impl ReloadSignal {
    pub fn new() -> Self {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let inner = match signal(SignalKind::hangup()) {
                Ok(stream) => Some(stream),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to listen for SIGHUP");
                    None
                }
            };
            Self { inner }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    /// Wait for the next reload request.
    pub async fn recv(&mut self) {
        #[cfg(unix)]
        if let Some(stream) = self.inner.as_mut() {
            if stream.recv().await.is_some() {
                return;
            }
            self.inner = None;
        }
        std::future::pending::<()>().await
    }
}

impl Default for ReloadSignal {
    fn default() -> Self {
        Self::new()
    }
}
