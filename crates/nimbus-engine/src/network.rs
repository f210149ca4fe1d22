//! Network reachability monitor
//!
//! An HTTP client cannot see interface classes or OS metering flags, so
//! this adapter reduces the port to what it can actually observe: whether
//! the file service answers. It probes the transport's root folder on an
//! interval and publishes a status on every reachability flip. A platform
//! monitor with richer signals can replace it behind the same port.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use nimbus_core::domain::{RemotePath, SyncError};
use nimbus_core::ports::{ICloudTransport, INetworkMonitor, NetworkStatus, NetworkType};

/// Subscriber channel depth; a slow consumer only misses intermediate
/// flips, never the latest one it will eventually read
const SUBSCRIBER_BUFFER: usize = 16;

/// Reachability monitor driven by probing the cloud transport
pub struct ProbeNetworkMonitor {
    // Optimistic until the first probe answers
    state: StdMutex<NetworkStatus>,
    subscribers: StdMutex<Vec<mpsc::Sender<NetworkStatus>>>,
    cancel: CancellationToken,
}

impl ProbeNetworkMonitor {
    /// Spawns the probe loop and returns the monitor handle
    pub fn spawn(transport: Arc<dyn ICloudTransport>, interval: Duration) -> Arc<Self> {
        let monitor = Arc::new(Self {
            state: StdMutex::new(NetworkStatus::reachable(NetworkType::Unknown)),
            subscribers: StdMutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        });
        let runner = monitor.clone();
        tokio::spawn(async move { runner.run(transport, interval).await });
        monitor
    }

    /// Stops the probe loop; subscriber channels close afterwards
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Publishes an observed condition to every subscriber
    ///
    /// A status equal to the current one is suppressed, so subscribers
    /// only wake on actual changes.
    pub fn publish(&self, status: NetworkStatus) {
        let changed = {
            let mut state = self.state.lock().expect("state lock poisoned");
            let changed = *state != status;
            *state = status;
            changed
        };
        if !changed {
            return;
        }
        info!(
            reachable = status.reachable,
            metered = status.metered,
            "Network status changed"
        );
        let mut subscribers = self.subscribers.lock().expect("subscribers lock poisoned");
        subscribers.retain(|tx| !tx.is_closed());
        for tx in subscribers.iter() {
            let _ = tx.try_send(status);
        }
    }

    async fn run(self: Arc<Self>, transport: Arc<dyn ICloudTransport>, interval: Duration) {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = timer.tick() => {
                    let result = transport.get_folder_info(&RemotePath::root()).await;
                    self.publish(status_from_probe(result.err().as_ref()));
                }
            }
        }

        // Dropping the senders closes every subscription
        self.subscribers
            .lock()
            .expect("subscribers lock poisoned")
            .clear();
        debug!("Network probe stopped");
    }
}

#[async_trait]
impl INetworkMonitor for ProbeNetworkMonitor {
    async fn current(&self) -> NetworkStatus {
        *self.state.lock().expect("state lock poisoned")
    }

    async fn subscribe(&self) -> mpsc::Receiver<NetworkStatus> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let current = *self.state.lock().expect("state lock poisoned");
        let _ = tx.try_send(current);
        self.subscribers
            .lock()
            .expect("subscribers lock poisoned")
            .push(tx);
        rx
    }
}

/// Reduces a probe outcome to a reachability status
///
/// Only transport-level failures mean the link is down; any HTTP answer,
/// an error status included, proves the service was reached.
fn status_from_probe(err: Option<&anyhow::Error>) -> NetworkStatus {
    match err {
        Some(e)
            if matches!(
                e.downcast_ref::<SyncError>(),
                Some(SyncError::NetworkUnavailable | SyncError::ConnectionTimeout)
            ) =>
        {
            NetworkStatus::offline()
        }
        _ => NetworkStatus::reachable(NetworkType::Unknown),
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod classification_tests {
        use super::*;

        #[test]
        fn test_transport_failures_mean_offline() {
            let unavailable = anyhow::Error::new(SyncError::NetworkUnavailable);
            assert!(!status_from_probe(Some(&unavailable)).reachable);

            let timeout = anyhow::anyhow!("request").context(SyncError::ConnectionTimeout);
            assert!(!status_from_probe(Some(&timeout)).reachable);
        }

        #[test]
        fn test_service_answers_mean_reachable() {
            assert!(status_from_probe(None).reachable);

            // A 5xx is a reached, unhappy service, not a dead link
            let server = anyhow::Error::new(SyncError::ServerError(503));
            assert!(status_from_probe(Some(&server)).reachable);

            let denied = anyhow::Error::new(SyncError::PermissionDenied("token".into()));
            assert!(status_from_probe(Some(&denied)).reachable);
        }
    }

    mod publish_tests {
        use super::*;

        fn monitor() -> ProbeNetworkMonitor {
            ProbeNetworkMonitor {
                state: StdMutex::new(NetworkStatus::reachable(NetworkType::Unknown)),
                subscribers: StdMutex::new(Vec::new()),
                cancel: CancellationToken::new(),
            }
        }

        #[tokio::test]
        async fn test_subscribe_delivers_initial_status() {
            let monitor = monitor();
            let mut rx = monitor.subscribe().await;
            let initial = rx.try_recv().expect("initial status");
            assert!(initial.reachable);
        }

        #[tokio::test]
        async fn test_flips_reach_subscribers_and_repeats_are_suppressed() {
            let monitor = monitor();
            let mut rx = monitor.subscribe().await;
            let _ = rx.try_recv();

            monitor.publish(NetworkStatus::offline());
            monitor.publish(NetworkStatus::offline());
            monitor.publish(NetworkStatus::reachable(NetworkType::Unknown));

            assert!(!rx.try_recv().unwrap().reachable);
            assert!(rx.try_recv().unwrap().reachable);
            assert!(rx.try_recv().is_err());

            assert!(monitor.current().await.reachable);
        }
    }
}
