//! In-memory [`BleAdapter`] for tests and the TUI `--simulate` mode.
//!
//! Every capability succeeds by default against a device exposing the Heart
//! Rate service. Failures, delays, advertisements, notifications and link
//! drops are injected through the control methods; every call the client
//! makes is recorded for inspection.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::adapter::{
    BleAdapter, CharacteristicDescriptor, ConnectionHandle, ScanReport, ServiceCollection,
    ServiceDescriptor,
};
use crate::error::AdapterError;
use crate::protocol::{HEART_RATE_MEASUREMENT, HEART_RATE_SERVICE};
use crate::types::{AdapterState, DiscoveredDevice};

const CHANNEL_CAPACITY: usize = 256;

/// How the mock answers `discover_topology`.
#[derive(Debug, Clone)]
pub enum MockTopology {
    /// Already-populated service list.
    Services(Vec<ServiceDescriptor>),
    /// Same list, handed back behind a producer closure.
    Deferred(Vec<ServiceDescriptor>),
    /// No collection at all.
    Absent,
    /// Discovery itself fails.
    Error(String),
}

/// Topology of a standard heart-rate sensor, with identifiers upper-cased the
/// way some platforms report them.
pub fn heart_rate_topology() -> Vec<ServiceDescriptor> {
    vec![
        ServiceDescriptor {
            uuid: "00001800-0000-1000-8000-00805F9B34FB".into(),
            characteristics: vec![CharacteristicDescriptor {
                uuid: "00002A00-0000-1000-8000-00805F9B34FB".into(),
            }],
        },
        ServiceDescriptor {
            uuid: HEART_RATE_SERVICE.to_string().to_uppercase(),
            characteristics: vec![CharacteristicDescriptor {
                uuid: HEART_RATE_MEASUREMENT.to_string().to_uppercase(),
            }],
        },
    ]
}

#[derive(Default)]
struct Failures {
    scan_start: Option<String>,
    connect: Option<String>,
    subscribe: Option<String>,
    write: Option<String>,
    disconnect: Option<String>,
}

struct Inner {
    state: AdapterState,
    state_subscribers: Vec<mpsc::Sender<AdapterState>>,
    disconnect_subscribers: Vec<mpsc::Sender<String>>,
    scan: Option<mpsc::Sender<ScanReport>>,
    topology: MockTopology,
    failures: Failures,
    connect_delay: Option<Duration>,
    write_delay: Option<Duration>,
    connected: HashSet<String>,
    notifiers: HashMap<String, mpsc::Sender<Vec<u8>>>,
    writes: Vec<(String, Vec<u8>)>,
    disconnect_calls: Vec<String>,
    stop_scan_calls: usize,
}

/// Scriptable adapter. Clones share state.
#[derive(Clone)]
pub struct MockAdapter {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapter {
    /// Powered-on adapter whose devices all expose the Heart Rate service.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: AdapterState::PoweredOn,
                state_subscribers: Vec::new(),
                disconnect_subscribers: Vec::new(),
                scan: None,
                topology: MockTopology::Services(heart_rate_topology()),
                failures: Failures::default(),
                connect_delay: None,
                write_delay: None,
                connected: HashSet::new(),
                notifiers: HashMap::new(),
                writes: Vec::new(),
                disconnect_calls: Vec::new(),
                stop_scan_calls: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Poisoning is ignored.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Scripting ─────────────────────────────────────────────────────────────

    /// Change the power state and notify subscribers.
    pub fn set_state(&self, state: AdapterState) {
        let mut inner = self.lock();
        inner.state = state;
        inner
            .state_subscribers
            .retain(|tx| tx.try_send(state).is_ok());
        if !state.is_powered_on() {
            inner.scan = None;
        }
    }

    /// Report an advertisement to the running scan. Returns `false` when no
    /// scan is running.
    pub fn advertise(&self, device: DiscoveredDevice) -> bool {
        let inner = self.lock();
        inner
            .scan
            .as_ref()
            .is_some_and(|tx| tx.try_send(Ok(device)).is_ok())
    }

    /// Report a scan error to the running scan.
    pub fn fail_scan(&self, reason: &str) -> bool {
        let inner = self.lock();
        inner
            .scan
            .as_ref()
            .is_some_and(|tx| tx.try_send(Err(AdapterError::new(reason))).is_ok())
    }

    /// Push a notification value to a connected, subscribed device.
    pub fn notify(&self, device_id: &str, value: &[u8]) -> bool {
        let inner = self.lock();
        inner
            .notifiers
            .get(device_id)
            .is_some_and(|tx| tx.try_send(value.to_vec()).is_ok())
    }

    /// Drop a link from the peripheral side.
    pub fn drop_link(&self, device_id: &str) {
        let mut inner = self.lock();
        inner.connected.remove(device_id);
        inner.notifiers.remove(device_id);
        let id = device_id.to_string();
        inner
            .disconnect_subscribers
            .retain(|tx| tx.try_send(id.clone()).is_ok());
    }

    pub fn set_topology(&self, topology: MockTopology) {
        self.lock().topology = topology;
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.lock().connect_delay = Some(delay);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.lock().write_delay = Some(delay);
    }

    pub fn fail_scan_start(&self, reason: &str) {
        self.lock().failures.scan_start = Some(reason.into());
    }

    pub fn fail_connect(&self, reason: &str) {
        self.lock().failures.connect = Some(reason.into());
    }

    pub fn fail_subscribe(&self, reason: &str) {
        self.lock().failures.subscribe = Some(reason.into());
    }

    pub fn fail_write(&self, reason: &str) {
        self.lock().failures.write = Some(reason.into());
    }

    pub fn fail_disconnect(&self, reason: &str) {
        self.lock().failures.disconnect = Some(reason.into());
    }

    // ── Inspection ────────────────────────────────────────────────────────────

    pub fn is_scanning(&self) -> bool {
        self.lock().scan.is_some()
    }

    pub fn is_connected(&self, device_id: &str) -> bool {
        self.lock().connected.contains(device_id)
    }

    /// Ids of devices with notifications enabled.
    pub fn streaming_devices(&self) -> Vec<String> {
        self.lock().notifiers.keys().cloned().collect()
    }

    pub fn writes(&self) -> Vec<(String, Vec<u8>)> {
        self.lock().writes.clone()
    }

    pub fn disconnect_calls(&self) -> Vec<String> {
        self.lock().disconnect_calls.clone()
    }

    pub fn stop_scan_calls(&self) -> usize {
        self.lock().stop_scan_calls
    }

    /// Live adapter-state and disconnect subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.state_subscribers.retain(|tx| !tx.is_closed());
        inner.disconnect_subscribers.retain(|tx| !tx.is_closed());
        inner.state_subscribers.len() + inner.disconnect_subscribers.len()
    }
}

fn fail(reason: &Option<String>) -> Result<(), AdapterError> {
    match reason {
        Some(r) => Err(AdapterError::new(r.clone())),
        None => Ok(()),
    }
}

#[async_trait]
impl BleAdapter for MockAdapter {
    async fn state_updates(&self) -> Result<mpsc::Receiver<AdapterState>, AdapterError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut inner = self.lock();
        let _ = tx.try_send(inner.state);
        inner.state_subscribers.push(tx);
        Ok(rx)
    }

    async fn start_scan(&self) -> Result<mpsc::Receiver<ScanReport>, AdapterError> {
        let mut inner = self.lock();
        fail(&inner.failures.scan_start)?;
        if !inner.state.is_powered_on() {
            return Err(AdapterError::new("adapter is not powered on"));
        }
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        inner.scan = Some(tx);
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<(), AdapterError> {
        let mut inner = self.lock();
        inner.stop_scan_calls += 1;
        inner.scan = None;
        Ok(())
    }

    async fn connect(&self, device_id: &str) -> Result<ConnectionHandle, AdapterError> {
        let delay = self.lock().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.lock();
        fail(&inner.failures.connect)?;
        inner.connected.insert(device_id.to_string());
        Ok(ConnectionHandle::new(device_id))
    }

    async fn discover_topology(
        &self,
        link: &ConnectionHandle,
    ) -> Result<ServiceCollection, AdapterError> {
        let inner = self.lock();
        if !inner.connected.contains(&link.device_id) {
            return Err(AdapterError::new("not connected"));
        }
        match inner.topology.clone() {
            MockTopology::Services(services) => Ok(ServiceCollection::Populated(services)),
            MockTopology::Deferred(services) => {
                Ok(ServiceCollection::Deferred(Box::new(move || Ok(services))))
            }
            MockTopology::Absent => Ok(ServiceCollection::Absent),
            MockTopology::Error(reason) => Err(AdapterError::new(reason)),
        }
    }

    async fn subscribe(
        &self,
        link: &ConnectionHandle,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<mpsc::Receiver<Vec<u8>>, AdapterError> {
        let mut inner = self.lock();
        fail(&inner.failures.subscribe)?;
        if !inner.connected.contains(&link.device_id) {
            return Err(AdapterError::new("not connected"));
        }
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        inner.notifiers.insert(link.device_id.clone(), tx);
        Ok(rx)
    }

    async fn write(
        &self,
        link: &ConnectionHandle,
        _service: Uuid,
        _characteristic: Uuid,
        bytes: &[u8],
    ) -> Result<(), AdapterError> {
        let delay = self.lock().write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.lock();
        fail(&inner.failures.write)?;
        if !inner.connected.contains(&link.device_id) {
            return Err(AdapterError::new("not connected"));
        }
        inner.writes.push((link.device_id.clone(), bytes.to_vec()));
        Ok(())
    }

    async fn disconnect(&self, link: &ConnectionHandle) -> Result<(), AdapterError> {
        let mut inner = self.lock();
        inner.disconnect_calls.push(link.device_id.clone());
        inner.connected.remove(&link.device_id);
        inner.notifiers.remove(&link.device_id);
        fail(&inner.failures.disconnect)
    }

    async fn disconnections(&self) -> Result<mpsc::Receiver<String>, AdapterError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.lock().disconnect_subscribers.push(tx);
        Ok(rx)
    }
}
