//! TCP acceptor and per-connection handlers

use crate::server::ServerContext;
use crate::types::{completes_record, RECORD_TERMINATOR};
use crate::Result;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Pause after a failed accept so persistent errors (EMFILE) don't spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept loop that spawns one handler per connection
pub struct TcpAcceptor {
    listener: TcpListener,
    ctx: ServerContext,
    handlers: TaskTracker,
}

impl TcpAcceptor {
    /// Create an acceptor; spawned handlers are tracked by `handlers`
    pub fn new(listener: TcpListener, ctx: ServerContext, handlers: TaskTracker) -> Self {
        Self {
            listener,
            ctx,
            handlers,
        }
    }

    /// Accept connections until shutdown begins, then close the listener.
    ///
    /// Returns the number of connections accepted.
    pub async fn run(self) -> u64 {
        let mut accepted = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = self.ctx.running().cancelled() => break,
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            accepted += 1;
                            self.spawn_handler(stream, peer);
                        }
                        Err(e) => {
                            if !self.ctx.is_running() {
                                break;
                            }
                            warn!("Accept failed: {}", e);
                            if !pause_after_accept_error(self.ctx.running(), ACCEPT_BACKOFF).await {
                                break;
                            }
                        }
                    }
                }
            }
        }

        drop(self.listener);
        info!(accepted, "Listener closed");
        accepted
    }

    fn spawn_handler(&self, stream: TcpStream, peer: SocketAddr) {
        let span = info_span!("connection", conn_id = %Uuid::new_v4(), %peer);
        let ctx = self.ctx.clone();

        self.handlers.spawn(
            async move {
                if let Err(e) = handle_connection(stream, peer, ctx).await {
                    warn!("Connection error: {}", e);
                }
            }
            .instrument(span),
        );
    }
}

/// Sleep for `backoff` unless shutdown begins first; false means stop accepting
async fn pause_after_accept_error(running: &CancellationToken, backoff: Duration) -> bool {
    tokio::select! {
        biased;
        _ = running.cancelled() => false,
        _ = tokio::time::sleep(backoff) => true,
    }
}

/// Own one client connection until it closes, errors or shutdown begins.
///
/// Every received chunk goes into the shared log as-is. A chunk holding a
/// record terminator additionally triggers a readback of the whole log to
/// this client.
pub async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: ServerContext,
) -> Result<()> {
    info!("Accepted connection from {}", peer.ip());

    let result = serve(&mut stream, &ctx).await;

    // Peer may already be gone
    let _ = stream.shutdown().await;
    info!("Closed connection from {}", peer.ip());
    result
}

async fn serve(stream: &mut TcpStream, ctx: &ServerContext) -> Result<()> {
    let mut buffer = BytesMut::with_capacity(ctx.config().server.buffer_size);
    let idle_timeout = ctx.config().idle_timeout();
    // Bytes received since the last terminator
    let mut partial = 0usize;

    loop {
        buffer.clear();
        let received = tokio::select! {
            biased;
            _ = ctx.running().cancelled() => {
                debug!("Shutdown in progress, dropping connection");
                break;
            }
            result = receive(stream, &mut buffer, idle_timeout) => result?,
        };

        let n = match received {
            Some(0) => break,
            Some(n) => n,
            None => {
                info!("Connection idle for too long");
                break;
            }
        };

        let chunk = &buffer[..n];
        ctx.log().append(chunk).await?;

        if completes_record(chunk) {
            let content = ctx.log().read_all().await?;
            stream.write_all(&content).await?;
            partial = chunk
                .iter()
                .rposition(|b| *b == RECORD_TERMINATOR)
                .map_or(0, |last| n - last - 1);
            debug!(sent = content.len(), "Log sent back to client");
        } else {
            partial += n;
        }
    }

    if partial > 0 {
        debug!(partial, "Connection ended inside an unterminated record");
    }
    Ok(())
}

/// One receive call; `None` means the idle timeout elapsed first
async fn receive(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    idle_timeout: Option<Duration>,
) -> std::io::Result<Option<usize>> {
    match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, stream.read_buf(buffer)).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        },
        None => stream.read_buf(buffer).await.map(Some),
    }
}
