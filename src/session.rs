//! Connection Session: per-device lifecycle state machine.
//!
//! A session is created in [`ConnectionState::Connecting`] and ends in
//! [`ConnectionState::Disconnected`], at which point its owner drops it.
//! Establishment (connect → discover → subscribe) runs in a background task
//! that reports each step over the session's lifecycle channel. Notification
//! values and write completions arrive on their own channels. The owner
//! consumes all of them through [`ConnectionSession::next_event`] from a single
//! loop, so transitions are totally ordered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::adapter::{recv_or_pending, BleAdapter, ConnectionHandle, ServiceDescriptor};
use crate::error::PulseError;
use crate::protocol::{encode_command, matches_uuid};
use crate::types::{ConnectionState, DiscoveredDevice};

// ── Transition table ──────────────────────────────────────────────────────────

/// Inputs that drive the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    ConnectSucceeded,
    ConnectFailed,
    TopologyResolved,
    TopologyMissing,
    SubscribeSucceeded,
    SubscribeFailed,
    DecodeFailed,
    UnsolicitedDisconnect,
    DisconnectRequested,
    DisconnectCompleted,
    AdapterLost,
}

/// Next state for `trigger` in `from`, or `None` if the trigger does not
/// apply there and must be ignored.
pub fn next_state(from: ConnectionState, trigger: Trigger) -> Option<ConnectionState> {
    use ConnectionState::*;
    use Trigger::*;

    match (from, trigger) {
        (Disconnected, _) => None,
        (_, AdapterLost) => Some(Disconnected),

        (Connecting, ConnectSucceeded) => Some(DiscoveringTopology),
        (Connecting, ConnectFailed) => Some(Disconnected),

        (DiscoveringTopology, TopologyResolved) => Some(Subscribing),
        (DiscoveringTopology, TopologyMissing) => Some(Disconnected),
        // Topology errors from the adapter end the attempt like a failed connect.
        (DiscoveringTopology, ConnectFailed) => Some(Disconnected),

        (Subscribing, SubscribeSucceeded) => Some(Streaming),
        (Subscribing, SubscribeFailed) => Some(Disconnected),

        (Streaming, DecodeFailed) => Some(Streaming),
        (Streaming, DisconnectRequested) => Some(Disconnecting),

        // Cancelling an attempt in flight is an immediate, optimistic teardown.
        (Connecting | DiscoveringTopology | Subscribing, DisconnectRequested) => {
            Some(Disconnected)
        }
        (Connecting | DiscoveringTopology | Subscribing | Streaming, UnsolicitedDisconnect) => {
            Some(Disconnected)
        }

        (Disconnecting, DisconnectCompleted) => Some(Disconnected),

        _ => None,
    }
}

// ── Topology resolution ───────────────────────────────────────────────────────

/// Locate the target characteristic in a normalized service list.
///
/// First match wins for both the service and the characteristic; identifiers
/// compare case-insensitively.
pub fn resolve_target(
    services: &[ServiceDescriptor],
    service: &Uuid,
    characteristic: &Uuid,
) -> Result<(), PulseError> {
    if services.is_empty() {
        return Err(PulseError::NoServicesFound);
    }
    let found = services
        .iter()
        .find(|s| matches_uuid(&s.uuid, service))
        .ok_or_else(|| PulseError::ServiceNotFound(service.to_string()))?;

    found
        .characteristics
        .iter()
        .find(|c| matches_uuid(&c.uuid, characteristic))
        .map(|_| ())
        .ok_or_else(|| PulseError::CharacteristicNotFound(characteristic.to_string()))
}

// ── Establishment ─────────────────────────────────────────────────────────────

/// Progress reported by the establishment task.
#[derive(Debug)]
pub enum Lifecycle {
    Connected(ConnectionHandle),
    TopologyResolved,
    Subscribed(mpsc::Receiver<Vec<u8>>),
    /// The attempt failed; the connection has already been released.
    Failed(PulseError),
}

impl Lifecycle {
    pub fn trigger(&self) -> Trigger {
        match self {
            Lifecycle::Connected(_) => Trigger::ConnectSucceeded,
            Lifecycle::TopologyResolved => Trigger::TopologyResolved,
            Lifecycle::Subscribed(_) => Trigger::SubscribeSucceeded,
            Lifecycle::Failed(e) => match e {
                PulseError::NoServicesFound
                | PulseError::ServiceNotFound(_)
                | PulseError::CharacteristicNotFound(_) => Trigger::TopologyMissing,
                PulseError::SubscribeFailed(_) => Trigger::SubscribeFailed,
                _ => Trigger::ConnectFailed,
            },
        }
    }
}

/// Parameters for one establishment attempt.
#[derive(Debug, Clone)]
pub struct Target {
    pub device_id: String,
    pub service: Uuid,
    pub characteristic: Uuid,
    pub connect_timeout: Duration,
}

pub(crate) async fn release(adapter: &dyn BleAdapter, link: &ConnectionHandle) {
    if let Err(e) = adapter.disconnect(link).await {
        warn!("Releasing {} failed: {e}", link.device_id);
    }
}

/// Connect, resolve the target, and subscribe, reporting each step on `tx`.
///
/// Failures release the connection before being reported. If the receiver is
/// gone before the link is handed over, the session was torn down mid-attempt
/// and the task releases the link itself; after hand-over the owner is
/// responsible for it.
pub async fn establish(
    adapter: Arc<dyn BleAdapter>,
    target: Target,
    tx: mpsc::Sender<Lifecycle>,
) {
    let Target {
        device_id,
        service,
        characteristic,
        connect_timeout,
    } = target;

    let link = match tokio::time::timeout(connect_timeout, adapter.connect(&device_id)).await {
        Ok(Ok(link)) => link,
        Ok(Err(e)) => {
            // Some stacks leave a half-open link behind a failed connect.
            release(adapter.as_ref(), &ConnectionHandle::new(device_id.as_str())).await;
            let _ = tx.send(Lifecycle::Failed(PulseError::ConnectFailed(e.to_string()))).await;
            return;
        }
        Err(_) => {
            release(adapter.as_ref(), &ConnectionHandle::new(device_id.as_str())).await;
            let reason = format!("timed out after {} s", connect_timeout.as_secs());
            let _ = tx.send(Lifecycle::Failed(PulseError::ConnectFailed(reason))).await;
            return;
        }
    };
    info!("Connected to {device_id}");

    if tx.send(Lifecycle::Connected(link.clone())).await.is_err() {
        debug!("Session for {device_id} gone before connect completed; releasing");
        release(adapter.as_ref(), &link).await;
        return;
    }

    let services = match adapter.discover_topology(&link).await {
        Ok(collection) => collection.normalize(),
        Err(e) => {
            release(adapter.as_ref(), &link).await;
            let reason = format!("service discovery failed: {e}");
            let _ = tx.send(Lifecycle::Failed(PulseError::ConnectFailed(reason))).await;
            return;
        }
    };
    debug!("{device_id}: {} service(s) discovered", services.len());

    if let Err(e) = resolve_target(&services, &service, &characteristic) {
        release(adapter.as_ref(), &link).await;
        let _ = tx.send(Lifecycle::Failed(e)).await;
        return;
    }
    if tx.send(Lifecycle::TopologyResolved).await.is_err() {
        release(adapter.as_ref(), &link).await;
        return;
    }

    match adapter.subscribe(&link, service, characteristic).await {
        Ok(notifications) => {
            info!("{device_id}: notifications enabled on {characteristic}");
            if tx.send(Lifecycle::Subscribed(notifications)).await.is_err() {
                release(adapter.as_ref(), &link).await;
            }
        }
        Err(e) => {
            release(adapter.as_ref(), &link).await;
            let _ = tx
                .send(Lifecycle::Failed(PulseError::SubscribeFailed(e.to_string())))
                .await;
        }
    }
}

// ── Writes ────────────────────────────────────────────────────────────────────

/// Completion of one queued write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub text: String,
    pub result: Result<(), PulseError>,
}

struct WriteJob {
    link: ConnectionHandle,
    text: String,
    reply: oneshot::Sender<Result<(), PulseError>>,
}

/// Drain queued writes one at a time, in submission order.
///
/// Jobs still queued once `writable` drops are answered with `NotConnected`
/// and never reach the adapter.
async fn run_writer(
    adapter: Arc<dyn BleAdapter>,
    service: Uuid,
    characteristic: Uuid,
    writable: Arc<AtomicBool>,
    mut jobs: mpsc::UnboundedReceiver<WriteJob>,
    outcomes: mpsc::UnboundedSender<WriteOutcome>,
) {
    while let Some(WriteJob { link, text, reply }) = jobs.recv().await {
        if !writable.load(Ordering::Acquire) {
            debug!("Dropping queued write {text:?}: session no longer writable");
            let _ = reply.send(Err(PulseError::NotConnected));
            continue;
        }
        let payload = encode_command(&text);
        let result = adapter
            .write(&link, service, characteristic, &payload)
            .await
            .map_err(|e| PulseError::WriteFailed(e.to_string()));
        let _ = outcomes.send(WriteOutcome {
            text,
            result: result.clone(),
        });
        let _ = reply.send(result);
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Something the session's background work produced.
#[derive(Debug)]
pub enum SessionEvent {
    /// Establishment progress; `None` once the establishment task is done.
    Lifecycle(Option<Lifecycle>),
    /// A notification value; `None` when the stream ended.
    Notification(Option<Vec<u8>>),
    Write(WriteOutcome),
}

/// The single active connection.
pub struct ConnectionSession {
    device: DiscoveredDevice,
    state: ConnectionState,
    link: Option<ConnectionHandle>,
    lifecycle: Option<mpsc::Receiver<Lifecycle>>,
    notifications: Option<mpsc::Receiver<Vec<u8>>>,
    establishment: Option<JoinHandle<()>>,
    writable: Arc<AtomicBool>,
    writes: mpsc::UnboundedSender<WriteJob>,
    write_outcomes: mpsc::UnboundedReceiver<WriteOutcome>,
}

impl ConnectionSession {
    /// Create a session in `Connecting` and spawn its establishment task and
    /// write queue.
    pub fn start(
        adapter: Arc<dyn BleAdapter>,
        device: DiscoveredDevice,
        service: Uuid,
        characteristic: Uuid,
        connect_timeout: Duration,
    ) -> Self {
        let (lifecycle_tx, lifecycle_rx) = mpsc::channel(8);
        let target = Target {
            device_id: device.id.clone(),
            service,
            characteristic,
            connect_timeout,
        };
        let establishment = tokio::spawn(establish(Arc::clone(&adapter), target, lifecycle_tx));

        let writable = Arc::new(AtomicBool::new(false));
        let (writes, jobs) = mpsc::unbounded_channel();
        let (outcomes, write_outcomes) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(
            adapter,
            service,
            characteristic,
            Arc::clone(&writable),
            jobs,
            outcomes,
        ));

        Self {
            device,
            state: ConnectionState::Connecting,
            link: None,
            lifecycle: Some(lifecycle_rx),
            notifications: None,
            establishment: Some(establishment),
            writable,
            writes,
            write_outcomes,
        }
    }

    pub fn device(&self) -> &DiscoveredDevice {
        &self.device
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn link(&self) -> Option<&ConnectionHandle> {
        self.link.as_ref()
    }

    /// Apply a trigger. Returns the new state, or `None` if ignored.
    pub fn apply(&mut self, trigger: Trigger) -> Option<ConnectionState> {
        let next = next_state(self.state, trigger)?;
        if next != self.state {
            debug!("{}: {:?} → {:?} ({trigger:?})", self.device.id, self.state, next);
        }
        self.state = next;
        self.writable.store(next.accepts_writes(), Ordering::Release);
        if next == ConnectionState::Disconnected {
            self.lifecycle = None;
            self.notifications = None;
        }
        Some(next)
    }

    /// Absorb the payload of a lifecycle message after its trigger applied.
    pub fn absorb(&mut self, message: Lifecycle) {
        match message {
            Lifecycle::Connected(link) => self.link = Some(link),
            Lifecycle::Subscribed(rx) => {
                // Establishment is over.
                self.lifecycle = None;
                self.notifications = Some(rx);
            }
            Lifecycle::TopologyResolved | Lifecycle::Failed(_) => {}
        }
    }

    /// The establishment task, if it has not finished yet.
    ///
    /// A session torn down mid-attempt leaves this task running until its
    /// pending adapter call returns; it may still release the device then.
    pub fn take_establishment(&mut self) -> Option<JoinHandle<()>> {
        self.establishment.take().filter(|task| !task.is_finished())
    }

    /// Give up the link for release, leaving the session without one.
    pub fn take_link(&mut self) -> Option<ConnectionHandle> {
        self.link.take()
    }

    /// Queue a command for the target characteristic.
    ///
    /// Writes go out strictly one at a time in the order they were queued.
    /// `reply` receives the outcome, or `NotConnected` straight away when the
    /// session is not in a writable state.
    pub fn queue_write(&self, text: String, reply: oneshot::Sender<Result<(), PulseError>>) {
        let link = match &self.link {
            Some(link) if self.state.accepts_writes() => link.clone(),
            _ => {
                let _ = reply.send(Err(PulseError::NotConnected));
                return;
            }
        };
        if let Err(mpsc::error::SendError(job)) = self.writes.send(WriteJob { link, text, reply }) {
            let _ = job.reply.send(Err(PulseError::NotConnected));
        }
    }

    /// Wait for the next piece of background progress.
    pub async fn next_event(&mut self) -> SessionEvent {
        tokio::select! {
            biased;
            message = recv_or_pending(&mut self.lifecycle) => SessionEvent::Lifecycle(message),
            Some(outcome) = self.write_outcomes.recv() => SessionEvent::Write(outcome),
            value = recv_or_pending(&mut self.notifications) => SessionEvent::Notification(value),
        }
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.writable.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::CharacteristicDescriptor;
    use crate::mock::{heart_rate_topology, MockAdapter, MockTopology};
    use crate::protocol::{HEART_RATE_MEASUREMENT, HEART_RATE_SERVICE};
    use crate::types::ConnectionState::*;

    #[test]
    fn test_transition_table() {
        assert_eq!(next_state(Connecting, Trigger::ConnectSucceeded), Some(DiscoveringTopology));
        assert_eq!(next_state(Connecting, Trigger::ConnectFailed), Some(Disconnected));
        assert_eq!(next_state(DiscoveringTopology, Trigger::TopologyResolved), Some(Subscribing));
        assert_eq!(next_state(DiscoveringTopology, Trigger::TopologyMissing), Some(Disconnected));
        assert_eq!(next_state(Subscribing, Trigger::SubscribeSucceeded), Some(Streaming));
        assert_eq!(next_state(Subscribing, Trigger::SubscribeFailed), Some(Disconnected));
        assert_eq!(next_state(Streaming, Trigger::DecodeFailed), Some(Streaming));
        assert_eq!(next_state(Streaming, Trigger::UnsolicitedDisconnect), Some(Disconnected));
        assert_eq!(next_state(Streaming, Trigger::DisconnectRequested), Some(Disconnecting));
        assert_eq!(next_state(Disconnecting, Trigger::DisconnectCompleted), Some(Disconnected));
    }

    #[test]
    fn test_adapter_loss_from_every_live_state() {
        for s in [Connecting, DiscoveringTopology, Subscribing, Streaming, Disconnecting] {
            assert_eq!(next_state(s, Trigger::AdapterLost), Some(Disconnected));
        }
        assert_eq!(next_state(Disconnected, Trigger::AdapterLost), None);
    }

    #[test]
    fn test_ignored_triggers() {
        assert_eq!(next_state(Disconnecting, Trigger::UnsolicitedDisconnect), None);
        assert_eq!(next_state(Disconnecting, Trigger::DisconnectRequested), None);
        assert_eq!(next_state(Connecting, Trigger::DecodeFailed), None);
        assert_eq!(next_state(Streaming, Trigger::ConnectSucceeded), None);
    }

    #[test]
    fn test_resolve_target() {
        let services = heart_rate_topology();
        assert_eq!(
            resolve_target(&services, &HEART_RATE_SERVICE, &HEART_RATE_MEASUREMENT),
            Ok(())
        );
        assert_eq!(
            resolve_target(&[], &HEART_RATE_SERVICE, &HEART_RATE_MEASUREMENT),
            Err(PulseError::NoServicesFound)
        );
        assert!(matches!(
            resolve_target(&services[..1], &HEART_RATE_SERVICE, &HEART_RATE_MEASUREMENT),
            Err(PulseError::ServiceNotFound(_))
        ));

        let no_chars = vec![ServiceDescriptor {
            uuid: HEART_RATE_SERVICE.to_string(),
            characteristics: vec![],
        }];
        assert!(matches!(
            resolve_target(&no_chars, &HEART_RATE_SERVICE, &HEART_RATE_MEASUREMENT),
            Err(PulseError::CharacteristicNotFound(_))
        ));

        let wrong_char = vec![ServiceDescriptor {
            uuid: HEART_RATE_SERVICE.to_string(),
            characteristics: vec![CharacteristicDescriptor {
                uuid: "00002a38-0000-1000-8000-00805f9b34fb".into(),
            }],
        }];
        assert!(matches!(
            resolve_target(&wrong_char, &HEART_RATE_SERVICE, &HEART_RATE_MEASUREMENT),
            Err(PulseError::CharacteristicNotFound(_))
        ));
    }

    fn target() -> Target {
        Target {
            device_id: "hr-1".into(),
            service: HEART_RATE_SERVICE,
            characteristic: HEART_RATE_MEASUREMENT,
            connect_timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn test_establish_reports_every_step() {
        let adapter = MockAdapter::new();
        adapter.set_topology(MockTopology::Deferred(heart_rate_topology()));
        let (tx, mut rx) = mpsc::channel(8);
        establish(Arc::new(adapter.clone()), target(), tx).await;

        assert!(matches!(rx.recv().await, Some(Lifecycle::Connected(_))));
        assert!(matches!(rx.recv().await, Some(Lifecycle::TopologyResolved)));
        assert!(matches!(rx.recv().await, Some(Lifecycle::Subscribed(_))));
        assert!(adapter.is_connected("hr-1"));
    }

    #[tokio::test]
    async fn test_missing_service_releases_before_reporting() {
        let adapter = MockAdapter::new();
        adapter.set_topology(MockTopology::Services(heart_rate_topology()[..1].to_vec()));
        let (tx, mut rx) = mpsc::channel(8);
        establish(Arc::new(adapter.clone()), target(), tx).await;

        assert!(matches!(rx.recv().await, Some(Lifecycle::Connected(_))));
        let failed = rx.recv().await.unwrap();
        assert_eq!(failed.trigger(), Trigger::TopologyMissing);
        assert!(!adapter.is_connected("hr-1"));
        assert_eq!(adapter.disconnect_calls(), vec!["hr-1".to_string()]);
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let adapter = MockAdapter::new();
        adapter.set_connect_delay(Duration::from_secs(5));
        let mut t = target();
        t.connect_timeout = Duration::from_millis(20);
        let (tx, mut rx) = mpsc::channel(8);
        establish(Arc::new(adapter), t, tx).await;

        match rx.recv().await {
            Some(Lifecycle::Failed(PulseError::ConnectFailed(reason))) => {
                assert!(reason.contains("timed out"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dropped_session_releases_link() {
        let adapter = MockAdapter::new();
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        establish(Arc::new(adapter.clone()), target(), tx).await;
        assert!(!adapter.is_connected("hr-1"));
        assert_eq!(adapter.disconnect_calls(), vec!["hr-1".to_string()]);
    }

    async fn streaming_session(adapter: &MockAdapter) -> ConnectionSession {
        let device = DiscoveredDevice {
            id: "hr-1".into(),
            name: Some("Polar H10".into()),
            rssi: Some(-60),
        };
        let mut session = ConnectionSession::start(
            Arc::new(adapter.clone()),
            device,
            HEART_RATE_SERVICE,
            HEART_RATE_MEASUREMENT,
            Duration::from_secs(2),
        );
        while session.state() != Streaming {
            match session.next_event().await {
                SessionEvent::Lifecycle(Some(message)) => {
                    session.apply(message.trigger()).unwrap();
                    session.absorb(message);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        session
    }

    #[tokio::test]
    async fn test_session_reaches_streaming_and_receives_values() {
        let adapter = MockAdapter::new();
        let mut session = streaming_session(&adapter).await;
        assert_eq!(session.link(), Some(&ConnectionHandle::new("hr-1")));

        assert!(adapter.notify("hr-1", &[0x00, 72]));
        match session.next_event().await {
            SessionEvent::Notification(Some(value)) => assert_eq!(value, vec![0x00, 72]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_queued_writes_rejected_after_disconnect_request() {
        let adapter = MockAdapter::new();
        adapter.set_write_delay(Duration::from_millis(30));
        let mut session = streaming_session(&adapter).await;

        let (first_tx, first) = oneshot::channel();
        let (second_tx, second) = oneshot::channel();
        session.queue_write("one".into(), first_tx);
        session.queue_write("two".into(), second_tx);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(session.apply(Trigger::DisconnectRequested), Some(Disconnecting));

        assert_eq!(first.await.unwrap(), Ok(()));
        assert_eq!(second.await.unwrap(), Err(PulseError::NotConnected));
        let sent: Vec<Vec<u8>> = adapter.writes().into_iter().map(|(_, b)| b).collect();
        assert_eq!(sent, vec![b"one".to_vec()]);
    }

    #[tokio::test]
    async fn test_dropped_session_rejects_queued_writes() {
        let adapter = MockAdapter::new();
        adapter.set_write_delay(Duration::from_millis(30));
        let session = streaming_session(&adapter).await;

        let (first_tx, first) = oneshot::channel();
        let (second_tx, second) = oneshot::channel();
        session.queue_write("one".into(), first_tx);
        session.queue_write("two".into(), second_tx);
        tokio::time::sleep(Duration::from_millis(5)).await;
        drop(session);

        assert_eq!(first.await.unwrap(), Ok(()));
        assert_eq!(second.await.unwrap(), Err(PulseError::NotConnected));
        assert_eq!(adapter.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_establishment_outlives_cancelled_session() {
        let adapter = MockAdapter::new();
        adapter.set_connect_delay(Duration::from_millis(50));
        let device = DiscoveredDevice {
            id: "hr-1".into(),
            name: None,
            rssi: None,
        };
        let mut session = ConnectionSession::start(
            Arc::new(adapter.clone()),
            device,
            HEART_RATE_SERVICE,
            HEART_RATE_MEASUREMENT,
            Duration::from_secs(2),
        );
        assert_eq!(session.apply(Trigger::DisconnectRequested), Some(Disconnected));
        let task = session.take_establishment().expect("attempt still running");
        drop(session);

        task.await.unwrap();
        assert!(!adapter.is_connected("hr-1"));
        assert_eq!(adapter.disconnect_calls(), vec!["hr-1".to_string()]);
    }

    #[tokio::test]
    async fn test_writes_complete_in_queue_order() {
        let adapter = MockAdapter::new();
        adapter.set_write_delay(Duration::from_millis(5));
        let mut session = streaming_session(&adapter).await;

        let mut replies = Vec::new();
        for text in ["one", "two", "three"] {
            let (tx, rx) = oneshot::channel();
            session.queue_write(text.to_string(), tx);
            replies.push(rx);
        }
        for rx in replies {
            assert_eq!(rx.await.unwrap(), Ok(()));
        }

        let sent: Vec<Vec<u8>> = adapter.writes().into_iter().map(|(_, b)| b).collect();
        assert_eq!(sent, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);

        for expected in ["one", "two", "three"] {
            match session.next_event().await {
                SessionEvent::Write(outcome) => {
                    assert_eq!(outcome.text, expected);
                    assert_eq!(outcome.result, Ok(()));
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_write_before_streaming_is_rejected() {
        let adapter = MockAdapter::new();
        adapter.set_connect_delay(Duration::from_millis(200));
        let session = ConnectionSession::start(
            Arc::new(adapter.clone()),
            DiscoveredDevice {
                id: "hr-1".into(),
                name: None,
                rssi: None,
            },
            HEART_RATE_SERVICE,
            HEART_RATE_MEASUREMENT,
            Duration::from_secs(2),
        );
        let (tx, rx) = oneshot::channel();
        session.queue_write("hello".into(), tx);
        assert_eq!(rx.await.unwrap(), Err(PulseError::NotConnected));
        assert!(adapter.writes().is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_is_reported() {
        let adapter = MockAdapter::new();
        let session = streaming_session(&adapter).await;
        adapter.fail_write("gatt error 0x03");

        let (tx, rx) = oneshot::channel();
        session.queue_write("hello".into(), tx);
        assert_eq!(
            rx.await.unwrap(),
            Err(PulseError::WriteFailed("gatt error 0x03".into()))
        );
    }
}
