//! The BLE capability the client consumes.
//!
//! The client never talks to a radio stack directly. It is handed an
//! `Arc<dyn BleAdapter>` at construction time; [`crate::btle::BtleplugAdapter`]
//! drives real hardware and [`crate::mock::MockAdapter`] is a scriptable
//! in-memory stand-in.
//!
//! Every stream-like capability (adapter state, advertisements, notifications,
//! unsolicited disconnects) is delivered as a `tokio::sync::mpsc::Receiver`.
//! Dropping the receiver unsubscribes.

use async_trait::async_trait;
use log::warn;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::AdapterError;
use crate::types::{AdapterState, DiscoveredDevice};

/// One advertisement report from an active scan, or the error that ended it.
pub type ScanReport = Result<DiscoveredDevice, AdapterError>;

/// An established link to a peripheral.
///
/// Opaque to the client; adapters map it back to their native peripheral
/// object through `device_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    pub device_id: String,
}

impl ConnectionHandle {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }
}

/// A GATT characteristic as reported by service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDescriptor {
    pub uuid: String,
}

/// A GATT service and its characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub uuid: String,
    pub characteristics: Vec<CharacteristicDescriptor>,
}

/// Producer for a service list that must be invoked to materialize it.
pub type ServiceProducer =
    Box<dyn FnOnce() -> Result<Vec<ServiceDescriptor>, AdapterError> + Send>;

/// The shape in which an adapter hands back the discovered topology.
///
/// Some stacks return the populated list directly; others return something
/// that has to be called to produce it. [`ServiceCollection::normalize`]
/// reduces both to a plain `Vec` so the session never branches on shape.
pub enum ServiceCollection {
    Populated(Vec<ServiceDescriptor>),
    Deferred(ServiceProducer),
    Absent,
}

impl ServiceCollection {
    /// Collapse to an ordered list of services.
    ///
    /// A producer that fails yields an empty list (logged), which the caller
    /// reports as `NoServicesFound`.
    pub fn normalize(self) -> Vec<ServiceDescriptor> {
        match self {
            ServiceCollection::Populated(services) => services,
            ServiceCollection::Deferred(produce) => match produce() {
                Ok(services) => services,
                Err(e) => {
                    warn!("Service producer failed: {e}");
                    Vec::new()
                }
            },
            ServiceCollection::Absent => Vec::new(),
        }
    }
}

impl std::fmt::Debug for ServiceCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceCollection::Populated(s) => f.debug_tuple("Populated").field(s).finish(),
            ServiceCollection::Deferred(_) => f.write_str("Deferred(..)"),
            ServiceCollection::Absent => f.write_str("Absent"),
        }
    }
}

/// Receive from an optional subscription.
///
/// Pends forever while `rx` is `None`. A closed channel yields `None` once and
/// resets `rx`, so a `select!` loop stops polling it.
pub(crate) async fn recv_or_pending<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    let Some(inner) = rx.as_mut() else {
        return std::future::pending().await;
    };
    let value = inner.recv().await;
    if value.is_none() {
        *rx = None;
    }
    value
}

/// Abstract BLE central capability.
///
/// Implementations must be cheap to share: the client holds one
/// `Arc<dyn BleAdapter>` for the whole process and clones it into background
/// tasks.
#[async_trait]
pub trait BleAdapter: Send + Sync {
    /// Subscribe to power-state changes. The current state is delivered
    /// immediately, then every change.
    async fn state_updates(&self) -> Result<mpsc::Receiver<AdapterState>, AdapterError>;

    /// Begin scanning. Duplicate advertisements for the same device are
    /// reported; the receiver closes when the scan ends.
    async fn start_scan(&self) -> Result<mpsc::Receiver<ScanReport>, AdapterError>;

    async fn stop_scan(&self) -> Result<(), AdapterError>;

    async fn connect(&self, device_id: &str) -> Result<ConnectionHandle, AdapterError>;

    async fn discover_topology(
        &self,
        link: &ConnectionHandle,
    ) -> Result<ServiceCollection, AdapterError>;

    /// Enable notifications on a characteristic. Each received value arrives
    /// as one `Vec<u8>`; the receiver closes when the link goes away.
    async fn subscribe(
        &self,
        link: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<mpsc::Receiver<Vec<u8>>, AdapterError>;

    /// Write with response.
    async fn write(
        &self,
        link: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        bytes: &[u8],
    ) -> Result<(), AdapterError>;

    async fn disconnect(&self, link: &ConnectionHandle) -> Result<(), AdapterError>;

    /// Device ids whose link dropped without being asked to.
    async fn disconnections(&self) -> Result<mpsc::Receiver<String>, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hr_service() -> ServiceDescriptor {
        ServiceDescriptor {
            uuid: "0000180d-0000-1000-8000-00805f9b34fb".into(),
            characteristics: vec![CharacteristicDescriptor {
                uuid: "00002a37-0000-1000-8000-00805f9b34fb".into(),
            }],
        }
    }

    #[test]
    fn test_normalize_populated() {
        let services = ServiceCollection::Populated(vec![hr_service()]).normalize();
        assert_eq!(services, vec![hr_service()]);
    }

    #[test]
    fn test_normalize_deferred() {
        let collection = ServiceCollection::Deferred(Box::new(|| Ok(vec![hr_service()])));
        assert_eq!(collection.normalize(), vec![hr_service()]);
    }

    #[test]
    fn test_normalize_failing_producer_and_absent_are_empty() {
        let failing = ServiceCollection::Deferred(Box::new(|| Err(AdapterError::new("boom"))));
        assert!(failing.normalize().is_empty());
        assert!(ServiceCollection::Absent.normalize().is_empty());
    }
}
