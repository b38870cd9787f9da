//! Network Monitoring Implementations

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus},
};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Default endpoint used for reachability checks.
const DEFAULT_PROBE_ADDR: &str = "8.8.8.8:53";

/// Desktop network monitor implementation
///
/// Reports connectivity by opening a TCP connection to a reachable endpoint
/// with a short timeout. Platform APIs (netlink, SystemConfiguration, Network
/// List Manager) would be more precise but the core only needs a boolean.
pub struct DesktopNetworkMonitor {
    probe_addr: String,
    probe_timeout: Duration,
    poll_interval: Duration,
}

impl DesktopNetworkMonitor {
    /// Create a new network monitor
    pub fn new() -> Self {
        Self {
            probe_addr: DEFAULT_PROBE_ADDR.to_string(),
            probe_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
        }
    }

    /// Probe a different `host:port` (e.g. the remote store's API host).
    pub fn with_probe_addr(mut self, addr: impl Into<String>) -> Self {
        self.probe_addr = addr.into();
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn check_connectivity(&self) -> NetworkStatus {
        match tokio::time::timeout(
            self.probe_timeout,
            tokio::net::TcpStream::connect(self.probe_addr.as_str()),
        )
        .await
        {
            Ok(Ok(_)) => NetworkStatus::Connected,
            Ok(Err(_)) => NetworkStatus::Disconnected,
            Err(_) => NetworkStatus::Disconnected,
        }
    }

    fn clone_settings(&self) -> Self {
        Self {
            probe_addr: self.probe_addr.clone(),
            probe_timeout: self.probe_timeout,
            poll_interval: self.poll_interval,
        }
    }
}

impl Default for DesktopNetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkMonitor for DesktopNetworkMonitor {
    async fn get_network_info(&self) -> Result<NetworkInfo> {
        let status = self.check_connectivity().await;
        debug!(status = ?status, probe = %self.probe_addr, "Network probe completed");

        Ok(match status {
            NetworkStatus::Connected => NetworkInfo::online(),
            _ => NetworkInfo::offline(),
        })
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>> {
        Ok(Box::new(PollingChangeStream {
            monitor: self.clone_settings(),
            last_status: None,
        }))
    }
}

/// Change stream that polls the probe and yields only transitions.
struct PollingChangeStream {
    monitor: DesktopNetworkMonitor,
    last_status: Option<NetworkStatus>,
}

#[async_trait]
impl NetworkChangeStream for PollingChangeStream {
    async fn next(&mut self) -> Option<NetworkInfo> {
        loop {
            tokio::time::sleep(self.monitor.poll_interval).await;

            if let Ok(info) = self.monitor.get_network_info().await {
                if self.last_status != Some(info.status) {
                    self.last_status = Some(info.status);
                    return Some(info);
                }
            }
        }
    }
}

/// Host-driven network monitor.
///
/// Mobile hosts already receive reachability callbacks from the OS; they
/// forward them through [`ManualNetworkMonitor::set_online`] instead of
/// letting the core probe. Also used by tests to script connectivity.
pub struct ManualNetworkMonitor {
    sender: watch::Sender<NetworkInfo>,
}

impl ManualNetworkMonitor {
    pub fn new(online: bool) -> Self {
        let initial = if online {
            NetworkInfo::online()
        } else {
            NetworkInfo::offline()
        };
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    /// Publish a new connectivity state; subscribers are woken only when it
    /// differs from the previous one.
    pub fn set_online(&self, online: bool) {
        let info = if online {
            NetworkInfo::online()
        } else {
            NetworkInfo::offline()
        };
        self.set_info(info);
    }

    pub fn set_info(&self, info: NetworkInfo) {
        self.sender.send_if_modified(|current| {
            if *current == info {
                false
            } else {
                *current = info;
                true
            }
        });
    }
}

#[async_trait]
impl NetworkMonitor for ManualNetworkMonitor {
    async fn get_network_info(&self) -> Result<NetworkInfo> {
        Ok(self.sender.borrow().clone())
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>> {
        Ok(Box::new(WatchChangeStream {
            receiver: self.sender.subscribe(),
        }))
    }
}

struct WatchChangeStream {
    receiver: watch::Receiver<NetworkInfo>,
}

#[async_trait]
impl NetworkChangeStream for WatchChangeStream {
    async fn next(&mut self) -> Option<NetworkInfo> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }
}
