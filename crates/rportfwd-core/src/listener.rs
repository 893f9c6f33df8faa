//! Listening socket setup.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket};
use tracing::debug;

use crate::error::{Error, Result};

/// An open listening socket for one (bind address, bind port) pair.
#[derive(Debug)]
pub struct BoundListener {
    local_addr: SocketAddr,
    inner: Arc<TcpListener>,
}

impl BoundListener {
    /// Address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle for the acceptor task serving this listener.
    pub(crate) fn handle(&self) -> Arc<TcpListener> {
        Arc::clone(&self.inner)
    }

    /// Close the socket.
    ///
    /// Acceptor tasks must have exited first; the socket is released when the
    /// last handle drops.
    pub fn close(self) {
        let holders = Arc::strong_count(&self.inner);
        if holders > 1 {
            debug!(addr = %self.local_addr, holders, "Listener still referenced at close");
        } else {
            debug!(addr = %self.local_addr, "Listener closed");
        }
    }
}

/// Bind and listen on every address for `port`.
///
/// All-or-nothing: on the first failure every listener opened by this call
/// is dropped, closing it, before the error is returned.
pub fn create_listeners(
    addresses: &[IpAddr],
    port: u16,
    backlog: u32,
) -> Result<Vec<BoundListener>> {
    let mut listeners = Vec::with_capacity(addresses.len());

    for &ip in addresses {
        let addr = SocketAddr::new(ip, port);
        let listener = listen(addr, backlog).map_err(|source| Error::Bind { addr, source })?;
        let local_addr = listener.local_addr().unwrap_or(addr);

        debug!(addr = %local_addr, backlog, "Listening");
        listeners.push(BoundListener {
            local_addr,
            inner: Arc::new(listener),
        });
    }

    Ok(listeners)
}

fn listen(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };

    // Lets a stopped forward's port be reused while old connections sit in
    // TIME_WAIT. Windows semantics differ (it allows double binds).
    #[cfg(not(windows))]
    socket.set_reuseaddr(true)?;

    socket.bind(addr)?;
    socket.listen(backlog)
}
