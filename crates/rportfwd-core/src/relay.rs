//! Per-connection relay to the forward target.
//!
//! The default [`RelayMode::SingleExchange`] relays one request and one
//! reply per accepted connection: at most `inbound_buffer` bytes from a
//! single client read go to the target, and at most `outbound_buffer` bytes
//! from a single target read come back. Anything else the client sends on the
//! same connection is not relayed. [`RelayMode::Stream`] copies both ways
//! until either side closes.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::{RelayConfig, RelayMode};
use crate::error::{Error, Result};
use crate::stats::ForwardStats;

const STREAM_BUFFER_SIZE: usize = 8192;

/// Byte counts for one relayed connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transfer {
    /// Bytes delivered to the target.
    pub sent: u64,
    /// Bytes delivered back to the client.
    pub received: u64,
}

/// Open an outbound connection, optionally bounded by `timeout`.
pub async fn connect_target(target: SocketAddr, timeout: Option<Duration>) -> Result<TcpStream> {
    let connect = TcpStream::connect(target);
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, connect)
            .await
            .map_err(|_| Error::Timeout)?,
        None => connect.await,
    };
    result.map_err(|source| Error::Connect { target, source })
}

/// Relay one accepted client connection according to `config.mode`.
pub async fn serve_connection(
    mut client: TcpStream,
    peer: SocketAddr,
    target: SocketAddr,
    config: &RelayConfig,
    stats: &ForwardStats,
) -> Result<Transfer> {
    stats.add_connection();

    let transfer = match config.mode {
        RelayMode::SingleExchange => exchange_once(&mut client, target, config, stats).await?,
        RelayMode::Stream => match connect_target(target, config.connect_timeout()).await {
            Ok(upstream) => relay_stream(client, upstream).await,
            Err(e) => {
                stats.add_connect_failure();
                return Err(e);
            }
        },
    };

    stats.add_bytes(transfer.sent, transfer.received);
    debug!(
        peer = %peer,
        target = %target,
        sent = transfer.sent,
        received = transfer.received,
        "Relay complete"
    );

    Ok(transfer)
}

/// Single request/response exchange.
///
/// A failed connect is not an error here: the client gets an empty reply.
/// The client connection is closed by the caller dropping it.
pub async fn exchange_once(
    client: &mut TcpStream,
    target: SocketAddr,
    config: &RelayConfig,
    stats: &ForwardStats,
) -> Result<Transfer> {
    let mut request = vec![0u8; config.inbound_buffer];
    let n = client.read(&mut request).await?;
    request.truncate(n);

    let mut transfer = Transfer::default();
    let response = match connect_target(target, config.connect_timeout()).await {
        Ok(mut upstream) => {
            upstream.write_all(&request).await?;
            transfer.sent = request.len() as u64;

            let mut response = vec![0u8; config.outbound_buffer];
            let m = upstream.read(&mut response).await?;
            response.truncate(m);
            response
        }
        Err(e) => {
            stats.add_connect_failure();
            debug!(target = %target, error = %e, "Target unreachable, replying empty");
            Vec::new()
        }
    };

    client.write_all(&response).await?;
    transfer.received = response.len() as u64;

    Ok(transfer)
}

/// Relay data between two TCP streams until both directions finish.
pub async fn relay_stream(client: TcpStream, target: TcpStream) -> Transfer {
    let (mut client_read, mut client_write) = client.into_split();
    let (mut target_read, mut target_write) = target.into_split();

    let client_to_target = async {
        let mut buf = [0u8; STREAM_BUFFER_SIZE];
        let mut total: u64 = 0;

        loop {
            match client_read.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if target_write.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                    total += n as u64;
                }
                Err(_) => break,
            }
        }

        let _ = target_write.shutdown().await;
        total
    };

    let target_to_client = async {
        let mut buf = [0u8; STREAM_BUFFER_SIZE];
        let mut total: u64 = 0;

        loop {
            match target_read.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if client_write.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                    total += n as u64;
                }
                Err(_) => break,
            }
        }

        let _ = client_write.shutdown().await;
        total
    };

    let (sent, received) = tokio::join!(client_to_target, target_to_client);
    Transfer { sent, received }
}
