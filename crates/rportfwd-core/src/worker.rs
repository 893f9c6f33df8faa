//! Relay worker: one acceptor task per listener of a forward.
//!
//! Each acceptor services its connections strictly one at a time. All of a
//! forward's acceptors share one cancellation token, checked while waiting
//! for a connection and while relaying one, so shutdown interrupts blocked
//! accepts, connects and reads.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::RelayConfig;
use crate::descriptor::ForwardDescriptor;
use crate::error::Error;
use crate::listener::BoundListener;
use crate::relay;
use crate::stats::ForwardStats;

/// Pause after a failed accept so a persistent error (e.g. fd exhaustion)
/// does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Handle to a forward's running acceptor tasks.
#[derive(Debug)]
pub struct RelayWorker {
    token: CancellationToken,
    acceptors: Vec<JoinHandle<()>>,
}

impl RelayWorker {
    /// Spawn one acceptor per listener.
    pub fn spawn(
        descriptor: &ForwardDescriptor,
        listeners: &[BoundListener],
        config: Arc<RelayConfig>,
        stats: Arc<ForwardStats>,
    ) -> Self {
        let token = CancellationToken::new();
        let target = descriptor.target();

        let acceptors = listeners
            .iter()
            .map(|listener| {
                tokio::spawn(run_acceptor(
                    listener.handle(),
                    listener.local_addr(),
                    target,
                    Arc::clone(&config),
                    Arc::clone(&stats),
                    token.clone(),
                ))
            })
            .collect();

        Self { token, acceptors }
    }

    /// A worker with no acceptors.
    #[cfg(test)]
    pub(crate) fn idle() -> Self {
        Self {
            token: CancellationToken::new(),
            acceptors: Vec::new(),
        }
    }

    /// Whether shutdown has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal cancellation and wait for every acceptor to exit.
    pub async fn shutdown(self) {
        self.token.cancel();

        for result in join_all(self.acceptors).await {
            if let Err(e) = result {
                if e.is_panic() {
                    error!(error = %e, "Acceptor task panicked");
                }
            }
        }
    }
}

async fn run_acceptor(
    listener: Arc<TcpListener>,
    local_addr: SocketAddr,
    target: SocketAddr,
    config: Arc<RelayConfig>,
    stats: Arc<ForwardStats>,
    token: CancellationToken,
) {
    debug!(addr = %local_addr, target = %target, "Acceptor started");

    loop {
        let accepted = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(addr = %local_addr, error = %e, "Failed to accept connection");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                }
                continue;
            }
        };

        debug!(addr = %local_addr, peer = %peer, "Accepted connection");

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(peer = %peer, "Relay interrupted by shutdown");
                break;
            }
            result = relay::serve_connection(stream, peer, target, &config, &stats) => {
                if let Err(e) = result {
                    log_relay_error(&e, peer, target);
                }
            }
        }
    }

    debug!(addr = %local_addr, "Acceptor stopped");
}

fn log_relay_error(e: &Error, peer: SocketAddr, target: SocketAddr) {
    if e.is_transient() {
        debug!(peer = %peer, target = %target, error = %e, "Relay failed");
    } else {
        error!(peer = %peer, target = %target, error = %e, "Relay failed unexpectedly");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::create_listeners;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    async fn spawn_echo() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                if let Ok(n) = stream.read(&mut buf).await {
                    let _ = stream.write_all(&buf[..n]).await;
                }
            }
        });
        addr
    }

    fn start(target: SocketAddr) -> (RelayWorker, Vec<BoundListener>, SocketAddr) {
        let listeners = create_listeners(&[IpAddr::V4(Ipv4Addr::LOCALHOST)], 0, 10).unwrap();
        let addr = listeners[0].local_addr();
        let descriptor = ForwardDescriptor::new(
            vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
            addr.port(),
            target.ip(),
            target.port(),
        );
        let worker = RelayWorker::spawn(
            &descriptor,
            &listeners,
            Arc::new(RelayConfig::default()),
            Arc::new(ForwardStats::new()),
        );
        (worker, listeners, addr)
    }

    #[tokio::test]
    async fn serves_connections_in_sequence() {
        let target = spawn_echo().await;
        let (worker, listeners, addr) = start(target);

        for msg in [b"first".as_slice(), b"second".as_slice()] {
            let mut client = TcpStream::connect(addr).await.unwrap();
            client.write_all(msg).await.unwrap();
            let mut reply = Vec::new();
            client.read_to_end(&mut reply).await.unwrap();
            assert_eq!(reply, msg);
        }

        worker.shutdown().await;
        listeners.into_iter().for_each(BoundListener::close);
    }

    #[tokio::test]
    async fn shutdown_interrupts_a_stalled_relay() {
        // Target accepts but never answers, so the relay blocks on its read.
        let stalled = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = stalled.local_addr().unwrap();
        let (worker, listeners, addr) = start(target);

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"anyone?").await.unwrap();
        let (_held, _) = stalled.accept().await.unwrap();

        assert!(!worker.is_cancelled());
        timeout(Duration::from_secs(5), worker.shutdown())
            .await
            .expect("worker did not stop");

        let mut reply = Vec::new();
        let _ = client.read_to_end(&mut reply).await;
        assert!(reply.is_empty());

        listeners.into_iter().for_each(BoundListener::close);
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
