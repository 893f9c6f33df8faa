//! # rportfwd Core
//!
//! Reverse port-forwarding relay engine.
//! Listens on local ports and relays each accepted connection to a
//! configured forward target.

pub mod config;
pub mod control;
pub mod descriptor;
pub mod error;
pub mod listener;
pub mod registry;
pub mod relay;
pub mod stats;
pub mod worker;

pub use config::{Config, ForwardConfig, LoggingConfig, RelayConfig, RelayMode};
pub use control::PortForwarder;
pub use descriptor::{ForwardDescriptor, ForwardInfo, ForwardRequest};
pub use error::{Error, Result};
pub use listener::BoundListener;
pub use registry::Registry;
pub use stats::{ForwardStats, StatsSnapshot};
pub use worker::RelayWorker;
