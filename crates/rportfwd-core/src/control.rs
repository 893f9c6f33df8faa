//! Start / stop / list control surface.

use std::sync::Arc;

use tracing::info;

use crate::config::RelayConfig;
use crate::descriptor::{
    parse_port, resolve_forward_address, ForwardDescriptor, ForwardInfo, ForwardRequest,
};
use crate::error::{Error, Result};
use crate::listener::create_listeners;
use crate::registry::{ForwardEntry, Registry};
use crate::stats::{ForwardStats, StatsSnapshot};
use crate::worker::RelayWorker;

/// Manages the set of active reverse port forwards.
#[derive(Debug, Clone)]
pub struct PortForwarder {
    registry: Registry,
    config: Arc<RelayConfig>,
}

impl PortForwarder {
    /// Create a forwarder with an empty registry.
    pub fn new(config: RelayConfig) -> Self {
        Self::with_registry(config, Registry::new())
    }

    /// Create a forwarder on top of an existing registry.
    pub fn with_registry(config: RelayConfig, registry: Registry) -> Self {
        Self {
            registry,
            config: Arc::new(config),
        }
    }

    /// Relay settings shared by every forward.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Start forwarding `bind_port` to `forward_address:forward_port`.
    pub async fn start(
        &self,
        bind_port: &str,
        forward_address: &str,
        forward_port: &str,
    ) -> Result<ForwardInfo> {
        let request = ForwardRequest::parse(bind_port, forward_address, forward_port)?;
        self.start_request(request).await
    }

    /// Start a forward from an already parsed request.
    pub async fn start_request(&self, request: ForwardRequest) -> Result<ForwardInfo> {
        if request.bind_port == 0 || request.forward_port == 0 {
            return Err(Error::InvalidPort("0".into()));
        }

        let forward_address = resolve_forward_address(&request.forward_address).await?;

        if self.registry.is_bound(request.bind_port).await {
            return Err(Error::AlreadyBound(request.bind_port));
        }

        let listeners = create_listeners(
            &self.config.bind_addresses,
            request.bind_port,
            self.config.backlog,
        )?;
        if listeners.is_empty() {
            return Err(Error::NoListeners(request.bind_port));
        }

        let descriptor = Arc::new(ForwardDescriptor::new(
            self.config.bind_addresses.clone(),
            request.bind_port,
            forward_address,
            request.forward_port,
        ));
        let stats = Arc::new(ForwardStats::new());
        let worker = RelayWorker::spawn(
            &descriptor,
            &listeners,
            Arc::clone(&self.config),
            Arc::clone(&stats),
        );

        let entry = ForwardEntry {
            descriptor: Arc::clone(&descriptor),
            listeners,
            worker,
            stats,
        };
        if let Err((e, rejected)) = self.registry.register(entry).await {
            rejected.shutdown().await;
            return Err(e);
        }

        let info = descriptor.info();
        info!(
            bind = %info.bind_addresses,
            bind_port = info.bind_port,
            target = %descriptor.target(),
            "Forward started"
        );
        Ok(info)
    }

    /// Stop the forward on `bind_port`.
    pub async fn stop(&self, bind_port: &str) -> Result<()> {
        if self.registry.is_empty().await {
            return Err(Error::NoForwards);
        }

        let bind_port = parse_port(bind_port)?;
        let entry = self.registry.unregister(bind_port).await?;
        entry.shutdown().await;

        info!(bind_port, "Forward stopped");
        Ok(())
    }

    /// Stop every forward. Returns how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let entries = self.registry.drain().await;
        let count = entries.len();

        for entry in entries {
            let bind_port = entry.descriptor.bind_port();
            entry.shutdown().await;
            info!(bind_port, "Forward stopped");
        }

        count
    }

    /// Active forwards, ordered by bind port.
    pub async fn list(&self) -> Vec<ForwardInfo> {
        self.registry
            .snapshot()
            .await
            .iter()
            .map(|descriptor| descriptor.info())
            .collect()
    }

    /// Traffic counters for the forward on `bind_port`.
    pub async fn stats(&self, bind_port: u16) -> Option<StatsSnapshot> {
        self.registry
            .stats(bind_port)
            .await
            .map(|stats| stats.snapshot())
    }
}

impl Default for PortForwarder {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}
