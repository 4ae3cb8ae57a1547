//! aesdsocket server implementation

pub mod daemon;
pub mod signals;
pub mod storage;
pub mod tcp;
pub mod timestamp;

use crate::config::ServerConfig;
use crate::{AesdError, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

pub use signals::TerminationSignals;
pub use storage::SharedLog;
pub use tcp::TcpAcceptor;
pub use timestamp::TimestampProducer;

/// Everything a server component needs, handed to each one explicitly.
///
/// Cloning is cheap: all clones share the same config, log and running token.
#[derive(Debug, Clone)]
pub struct ServerContext {
    config: Arc<ServerConfig>,
    log: Arc<SharedLog>,
    running: CancellationToken,
}

impl ServerContext {
    /// Bundle the shared pieces of a running server
    pub fn new(config: Arc<ServerConfig>, log: Arc<SharedLog>, running: CancellationToken) -> Self {
        Self {
            config,
            log,
            running,
        }
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The shared log
    pub fn log(&self) -> &SharedLog {
        &self.log
    }

    /// Token cancelled once shutdown begins
    pub fn running(&self) -> &CancellationToken {
        &self.running
    }

    /// False once shutdown has begun
    pub fn is_running(&self) -> bool {
        !self.running.is_cancelled()
    }
}

/// Main aesdsocket server that coordinates all components
pub struct LogServer {
    config: Arc<ServerConfig>,
    listener: TcpListener,
    log: Arc<SharedLog>,
    running: CancellationToken,
}

impl LogServer {
    /// Bind the configured address and create the shared log
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let addr = config.listen_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AesdError::Setup(format!("Failed to bind {}: {}", addr, e)))?;

        Self::with_listener(config, listener).await
    }

    /// Adopt a listener bound before the runtime existed (daemon mode binds
    /// first and forks second)
    pub async fn from_std(config: ServerConfig, listener: std::net::TcpListener) -> Result<Self> {
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)
            .map_err(|e| AesdError::Setup(format!("Failed to register listener: {}", e)))?;

        Self::with_listener(config, listener).await
    }

    async fn with_listener(config: ServerConfig, listener: TcpListener) -> Result<Self> {
        config.validate()?;
        let log = SharedLog::create(&config.storage.log_path)
            .await
            .map_err(|e| {
                AesdError::Setup(format!(
                    "Failed to create {}: {}",
                    config.storage.log_path.display(),
                    e
                ))
            })?;

        Ok(Self {
            config: Arc::new(config),
            listener,
            log: Arc::new(log),
            running: CancellationToken::new(),
        })
    }

    /// Address the listener actually bound, useful with port 0
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Token that stops the server when cancelled from anywhere
    pub fn shutdown_token(&self) -> CancellationToken {
        self.running.clone()
    }

    /// Handle to the shared log
    pub fn log(&self) -> Arc<SharedLog> {
        Arc::clone(&self.log)
    }

    /// Serve until `shutdown` resolves or the shutdown token is cancelled,
    /// then tear everything down exactly once.
    ///
    /// Teardown order: stop accepting (the listener is closed), stop the
    /// timestamp producer, join every connection handler, remove the log.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let ctx = ServerContext::new(self.config, self.log, self.running.clone());
        let handlers = TaskTracker::new();

        let acceptor = tokio::spawn(TcpAcceptor::new(self.listener, ctx.clone(), handlers.clone()).run());
        let producer = tokio::spawn(TimestampProducer::new(ctx.clone()).run());

        tokio::select! {
            _ = shutdown => info!("Shutdown triggered"),
            _ = self.running.cancelled() => info!("Shutdown requested"),
        }

        Self::shut_down(ctx, handlers, acceptor, producer).await
    }

    async fn shut_down(
        ctx: ServerContext,
        handlers: TaskTracker,
        acceptor: JoinHandle<u64>,
        producer: JoinHandle<u64>,
    ) -> Result<()> {
        ctx.running().cancel();

        match acceptor.await {
            Ok(accepted) => debug!(accepted, "Acceptor stopped"),
            Err(e) => error!("Acceptor task failed: {}", e),
        }
        match producer.await {
            Ok(written) => debug!(written, "Timestamp producer stopped"),
            Err(e) => error!("Timestamp producer task failed: {}", e),
        }

        handlers.close();
        info!(active = handlers.len(), "Waiting for connection handlers");
        handlers.wait().await;

        let bytes = ctx.log().len().await;
        info!(bytes, "All handlers finished");
        ctx.log().remove().await?;
        info!(path = %ctx.log().path().display(), "Shared log removed, shutdown complete");
        Ok(())
    }
}
