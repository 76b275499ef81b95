pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
mod rate;
mod state;

pub use client::ClusterClient;
pub use config::{ClientConfig, SessionFile};
pub use error::{ClientErr, Result};
pub use metrics::ClientMetrics;
pub use rate::ControlRate;
pub use state::{ClusterCommands, ClusterState};
