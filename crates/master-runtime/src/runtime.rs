//! # Master Runtime
//!
//! Owns the container, the background handlers and the listener.
//!
//! ## Startup Sequence
//!
//! 1. Bind the listener
//! 2. Subscribe the event archive to the bus
//! 3. Start the sweep and cache cleaner handlers
//! 4. Accept minion connections
//!
//! ## Shutdown Sequence
//!
//! 1. Signal shutdown to every task and connection
//! 2. Wait (bounded) for the tasks to stop

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use shared_bus::EventFilter;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::container::{ConfigError, MasterContainer};
use crate::handlers::{CacheCleaner, ConnectionHandler, EventReturnHandler, SweepHandler};

/// Runtime startup failures.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Invalid listen address.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The listener could not be bound.
    #[error("Cannot listen on {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        source: std::io::Error,
    },
}

/// Time granted to background tasks after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// The running master.
pub struct MasterRuntime {
    container: Arc<MasterContainer>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl MasterRuntime {
    /// Wrap an opened container. Nothing runs until [`start`](Self::start).
    pub fn new(container: MasterContainer) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            container: Arc::new(container),
            shutdown_tx,
            shutdown_rx,
            tasks: Vec::new(),
        }
    }

    /// Shared handle to the subsystems.
    #[must_use]
    pub fn container(&self) -> Arc<MasterContainer> {
        Arc::clone(&self.container)
    }

    /// Handler for one connection that stops with this runtime.
    #[must_use]
    pub fn connection_handler(&self) -> ConnectionHandler {
        ConnectionHandler::new(self.container(), self.shutdown_rx.clone())
    }

    /// Start the background handlers, bind the configured address and
    /// accept connections.
    ///
    /// Returns the bound address.
    ///
    /// # Errors
    ///
    /// Fails if the address is invalid or cannot be bound.
    pub async fn start(&mut self) -> Result<SocketAddr, RuntimeError> {
        info!("===========================================");
        info!("  Fleet Master v{}", env!("CARGO_PKG_VERSION"));
        info!("===========================================");

        let addr = self.container.config.listen_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RuntimeError::Bind { addr, source })?;
        let local = listener
            .local_addr()
            .map_err(|source| RuntimeError::Bind { addr, source })?;

        self.start_handlers();
        self.serve(listener);

        info!("Listening for minions on {}", local);
        info!("Base Dir: {:?}", self.container.config.storage.base_dir);
        Ok(local)
    }

    /// Start the sweep, cache cleaner and event archive handlers.
    pub fn start_handlers(&mut self) {
        if self.container.config.jobs.event_return {
            let subscription = self.container.events.subscribe(EventFilter::all());
            let handler = EventReturnHandler::new(self.container(), subscription);
            self.spawn("event-return", handler.run());
        }

        let sweep = SweepHandler::new(self.container());
        self.spawn("sweep", sweep.run());

        let cleaner = CacheCleaner::new(self.container());
        self.spawn("cache-cleaner", cleaner.run());
    }

    /// Accept connections from `listener` until shutdown.
    pub fn serve(&mut self, listener: TcpListener) {
        let container = self.container();
        let shutdown = self.shutdown_rx.clone();
        self.spawn("accept", accept_loop(listener, container, shutdown));
    }

    /// Signal shutdown and wait for the background tasks.
    pub async fn shutdown(self) {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.shutdown_tx.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }

        for task in self.tasks {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                warn!("Background task did not stop in time");
            }
        }

        info!("Shutdown complete");
    }

    fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.shutdown_rx.clone();
        self.tasks.push(tokio::spawn(async move {
            tokio::select! {
                _ = task => {}
                _ = shutdown.changed() => {
                    debug!(task = name, "Shutdown signal received");
                }
            }
        }));
    }
}

async fn accept_loop(
    listener: TcpListener,
    container: Arc<MasterContainer>,
    shutdown: watch::Receiver<bool>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(peer = %peer, error = %e, "Could not disable Nagle");
                }
                let handler = ConnectionHandler::new(Arc::clone(&container), shutdown.clone());
                tokio::spawn(async move {
                    let peer = peer.to_string();
                    handler.serve(stream, &peer).await;
                });
            }
            Err(e) => {
                warn!(error = %e, "Accept failed");
                // e.g. fd exhaustion
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}
