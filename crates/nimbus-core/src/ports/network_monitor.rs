//! Network-status observer port (driven/secondary port)
//!
//! The bandwidth allocator is a consumer of network-condition changes, not
//! a producer: the host platform pushes [`NetworkStatus`] updates through
//! this port whenever the active interface, reachability, or metering
//! changes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

// ============================================================================
// NetworkType / NetworkStatus
// ============================================================================

/// Active network interface class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    Wifi,
    Ethernet,
    Cellular,
    Other,
    Unknown,
}

/// One observed network condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    /// Interface class currently carrying traffic
    pub network_type: NetworkType,
    /// Whether any route to the remote exists at all
    pub reachable: bool,
    /// Whether the connection is flagged expensive/metered by the OS
    pub metered: bool,
}

impl NetworkStatus {
    /// A fully reachable, unmetered connection of the given type
    pub fn reachable(network_type: NetworkType) -> Self {
        Self {
            network_type,
            reachable: true,
            metered: false,
        }
    }

    /// No connectivity at all
    pub fn offline() -> Self {
        Self {
            network_type: NetworkType::Unknown,
            reachable: false,
            metered: false,
        }
    }
}

// ============================================================================
// INetworkMonitor
// ============================================================================

/// Port trait for subscribing to network-condition changes
///
/// `subscribe` hands back a channel receiver; the monitor pushes a status
/// on every observed change and an initial status on subscription. The
/// channel closes when the monitor shuts down.
#[async_trait]
pub trait INetworkMonitor: Send + Sync {
    /// Current condition, queried on demand
    async fn current(&self) -> NetworkStatus;

    /// Subscribes to future condition changes
    async fn subscribe(&self) -> mpsc::Receiver<NetworkStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let s = NetworkStatus::reachable(NetworkType::Wifi);
        assert!(s.reachable);
        assert!(!s.metered);

        let off = NetworkStatus::offline();
        assert!(!off.reachable);
    }
}
