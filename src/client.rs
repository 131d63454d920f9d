//! The heart-rate client: one event loop that owns every piece of mutable
//! state.
//!
//! [`HeartRateClient`] is a cheap handle. All work happens in a dispatcher
//! task that `select!`s over adapter power changes, scan reports, the scan
//! deadline, session progress, unsolicited disconnects and user commands.
//! Because there is exactly one consumer, every state transition is totally
//! ordered and no locks guard the scanner, the session or the buffer.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::adapter::{recv_or_pending, BleAdapter, ScanReport};
use crate::buffer::SampleBuffer;
use crate::error::{AdapterError, PulseError};
use crate::monitor::{AdapterMonitor, PowerTransition};
use crate::parse::decode_measurement;
use crate::protocol::{CONNECT_TIMEOUT, HEART_RATE_MEASUREMENT, HEART_RATE_SERVICE, SCAN_DURATION};
use crate::scanner::{Discovery, Scanner};
use crate::session::{
    release, ConnectionSession, Lifecycle, SessionEvent, Trigger, WriteOutcome,
};
use crate::types::{
    AdapterState, ClientEvent, ConnectionState, DiscoveredDevice, ScanStop, Snapshot,
};

const EVENT_CAPACITY: usize = 256;
const COMMAND_CAPACITY: usize = 32;

// ── ClientConfig ──────────────────────────────────────────────────────────────

/// Configuration for [`HeartRateClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service that must be present on the peripheral.
    /// Default: Heart Rate (`0x180D`).
    pub service: Uuid,
    /// Characteristic to subscribe to and write commands on.
    /// Default: Heart Rate Measurement (`0x2A37`).
    pub characteristic: Uuid,
    /// How long a scan runs before stopping on its own. Default: 10 s.
    pub scan_duration: Duration,
    /// Upper bound on the link-establishment step. Default: 10 s.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service: HEART_RATE_SERVICE,
            characteristic: HEART_RATE_MEASUREMENT,
            scan_duration: SCAN_DURATION,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

type Reply<T> = oneshot::Sender<T>;

enum Command {
    StartScan(Reply<Result<(), PulseError>>),
    StopScan(Reply<()>),
    Connect(String, Reply<Result<(), PulseError>>),
    Disconnect(Reply<Result<(), PulseError>>),
    Send(String, Reply<Result<(), PulseError>>),
    Shutdown(Reply<()>),
}

/// Completion of work the dispatcher handed to a background task.
enum Internal {
    DisconnectFinished {
        device_id: String,
        result: Result<(), AdapterError>,
    },
    /// Background work left behind by a finished session is done with the
    /// device.
    Settled { device_id: String },
}

// ── HeartRateClient ───────────────────────────────────────────────────────────

/// Handle to a running client.
///
/// Every method is a request to the dispatcher task. Once the task has ended
/// (after [`shutdown`](HeartRateClient::shutdown) or if it panicked) requests
/// fail with [`PulseError::Closed`].
pub struct HeartRateClient {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Snapshot>,
    adapter_state: watch::Receiver<AdapterState>,
    task: JoinHandle<()>,
}

impl HeartRateClient {
    /// Subscribe to the adapter and start the dispatcher.
    ///
    /// Returns the handle and the event stream. Events are delivered on a
    /// bounded channel; if the application stops reading, further events are
    /// dropped and the [`Snapshot`] stays authoritative.
    pub async fn start(
        adapter: Arc<dyn BleAdapter>,
        config: ClientConfig,
    ) -> Result<(Self, mpsc::Receiver<ClientEvent>), PulseError> {
        let mut adapter_states = adapter.state_updates().await.map_err(|e| {
            error!("Could not subscribe to adapter state: {e}");
            PulseError::AdapterUnavailable
        })?;
        let disconnections = match adapter.disconnections().await {
            Ok(rx) => Some(rx),
            Err(e) => {
                warn!("Could not subscribe to disconnect events: {e}");
                None
            }
        };

        let mut monitor = AdapterMonitor::new();
        // The adapter reports its current state on subscription; take it now
        // so that commands issued right after `start` see it.
        if let Ok(state) = adapter_states.try_recv() {
            monitor.observe(state);
        }
        let adapter_state = monitor.subscribe();

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());

        let dispatcher = Dispatcher {
            scanner: Scanner::new(config.scan_duration),
            adapter,
            config,
            monitor,
            session: None,
            settling: HashMap::new(),
            buffer: SampleBuffer::new(),
            commands: commands_rx,
            adapter_states: Some(adapter_states),
            disconnections,
            internal_tx,
            internal_rx,
            events: events_tx,
            snapshot: snapshot_tx,
        };
        dispatcher.publish();
        let task = tokio::spawn(dispatcher.run());

        Ok((
            Self {
                commands: commands_tx,
                snapshot: snapshot_rx,
                adapter_state,
                task,
            },
            events_rx,
        ))
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, PulseError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| PulseError::Closed)?;
        rx.await.map_err(|_| PulseError::Closed)
    }

    /// Start a fresh scan, replacing any scan in progress.
    pub async fn start_scan(&self) -> Result<(), PulseError> {
        self.request(Command::StartScan).await?
    }

    /// Stop scanning. A no-op when no scan is running.
    pub async fn stop_scan(&self) -> Result<(), PulseError> {
        self.request(Command::StopScan).await
    }

    /// Open a session to a device found by the current or last scan.
    ///
    /// Returns once the session exists in `Connecting`; progress is reported
    /// through [`ClientEvent::ConnectionState`]. Fails with
    /// [`PulseError::SessionActive`] if a session is already open.
    pub async fn connect(&self, device_id: &str) -> Result<(), PulseError> {
        let id = device_id.to_string();
        self.request(|tx| Command::Connect(id, tx)).await?
    }

    /// Close the active session.
    pub async fn disconnect(&self) -> Result<(), PulseError> {
        self.request(Command::Disconnect).await?
    }

    /// Write `text` to the target characteristic and wait for the
    /// acknowledgement. Concurrent calls are written one at a time, in order.
    pub async fn send_command(&self, text: &str) -> Result<(), PulseError> {
        let text = text.to_string();
        self.request(|tx| Command::Send(text, tx)).await?
    }

    /// Latest view of devices, connection, heatmap and log.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Change notifications for [`snapshot`](HeartRateClient::snapshot).
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    /// Adapter power state; the current value is visible immediately.
    pub fn adapter_state(&self) -> watch::Receiver<AdapterState> {
        self.adapter_state.clone()
    }

    /// Stop scanning, release any connection, drop every adapter
    /// subscription and end the dispatcher.
    pub async fn shutdown(self) {
        if self.request(Command::Shutdown).await.is_err() {
            debug!("Dispatcher already stopped");
        }
        if let Err(e) = self.task.await {
            warn!("Dispatcher task ended abnormally: {e}");
        }
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

/// Everything the loop can wake up for.
enum Wake {
    Command(Option<Command>),
    AdapterState(Option<AdapterState>),
    Disconnection(Option<String>),
    ScanReport(Option<ScanReport>),
    ScanDeadline,
    Session(SessionEvent),
    Internal(Internal),
}

struct Dispatcher {
    adapter: Arc<dyn BleAdapter>,
    config: ClientConfig,
    monitor: AdapterMonitor,
    scanner: Scanner,
    session: Option<ConnectionSession>,
    /// Devices with releases or abandoned attempts still in flight.
    settling: HashMap<String, usize>,
    buffer: SampleBuffer,
    commands: mpsc::Receiver<Command>,
    adapter_states: Option<mpsc::Receiver<AdapterState>>,
    disconnections: Option<mpsc::Receiver<String>>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    events: mpsc::Sender<ClientEvent>,
    snapshot: watch::Sender<Snapshot>,
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_session_event(session: &mut Option<ConnectionSession>) -> SessionEvent {
    match session {
        Some(session) => session.next_event().await,
        None => std::future::pending().await,
    }
}


impl Dispatcher {
    async fn run(mut self) {
        info!("Heart-rate client started");
        loop {
            let deadline = self.scanner.deadline();
            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                state = recv_or_pending(&mut self.adapter_states) => Wake::AdapterState(state),
                id = recv_or_pending(&mut self.disconnections) => Wake::Disconnection(id),
                Some(internal) = self.internal_rx.recv() => Wake::Internal(internal),
                report = self.scanner.next_report() => Wake::ScanReport(report),
                _ = sleep_until(deadline) => Wake::ScanDeadline,
                event = next_session_event(&mut self.session) => Wake::Session(event),
            };

            match wake {
                Wake::Command(None) => {
                    debug!("All client handles dropped");
                    self.teardown().await;
                    break;
                }
                Wake::Command(Some(Command::Shutdown(reply))) => {
                    self.teardown().await;
                    let _ = reply.send(());
                    break;
                }
                Wake::Command(Some(command)) => self.on_command(command).await,
                Wake::AdapterState(Some(state)) => self.on_adapter_state(state).await,
                Wake::AdapterState(None) => warn!("Adapter state stream ended"),
                Wake::Disconnection(Some(id)) => self.on_disconnection(&id),
                Wake::Disconnection(None) => warn!("Disconnect event stream ended"),
                Wake::ScanReport(report) => self.on_scan_report(report).await,
                Wake::ScanDeadline => self.on_scan_deadline().await,
                Wake::Session(event) => self.on_session_event(event),
                Wake::Internal(internal) => self.on_internal(internal),
            }
            self.publish();
        }
        self.publish();
        info!("Heart-rate client stopped");
    }

    fn publish(&self) {
        let snapshot = Snapshot {
            adapter_state: self.monitor.current(),
            scanning: self.scanner.is_active(),
            devices: self.scanner.devices().to_vec(),
            connection: self
                .session
                .as_ref()
                .map(|s| (s.device().clone(), s.state())),
            heatmap: self.buffer.heatmap().copied().collect(),
            log: self.buffer.log().map(str::to_owned).collect(),
        };
        self.snapshot.send_replace(snapshot);
    }

    fn emit(&self, event: ClientEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                debug!("Event channel full; dropping {event:?}")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Record a terminal error: one log line and one notification.
    fn fail(&mut self, err: PulseError, line: String) {
        warn!("{line}");
        self.buffer.push_log(line);
        self.emit(ClientEvent::Error(err));
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::StartScan(reply) => {
                let result = self.start_scan().await;
                let _ = reply.send(result);
            }
            Command::StopScan(reply) => {
                if self.scanner.stop(self.adapter.as_ref()).await {
                    self.buffer.push_log("Scan stopped.");
                    self.emit(ClientEvent::ScanStopped(ScanStop::Requested));
                }
                let _ = reply.send(());
            }
            Command::Connect(device_id, reply) => {
                let result = self.connect(&device_id).await;
                if let Err(e) = &result {
                    warn!("Connect to {device_id} rejected: {e}");
                }
                let _ = reply.send(result);
            }
            Command::Disconnect(reply) => {
                let _ = reply.send(self.disconnect());
            }
            Command::Send(text, reply) => match &self.session {
                Some(session) => session.queue_write(text, reply),
                None => {
                    let _ = reply.send(Err(PulseError::NotConnected));
                }
            },
            // Handled by the loop.
            Command::Shutdown(_) => {}
        }
    }

    async fn start_scan(&mut self) -> Result<(), PulseError> {
        let state = self.monitor.current();
        match self.scanner.start(self.adapter.as_ref(), state).await {
            Ok(()) => {
                self.buffer.push_log("Starting scan...");
                Ok(())
            }
            Err(PulseError::ScanFailed(reason)) => {
                let line = format!("Scan error: {reason}");
                let err = PulseError::ScanFailed(reason);
                self.fail(err.clone(), line);
                Err(err)
            }
            Err(e) => Err(e),
        }
    }

    async fn connect(&mut self, device_id: &str) -> Result<(), PulseError> {
        if self.session.is_some() || self.settling.contains_key(device_id) {
            return Err(PulseError::SessionActive);
        }
        if !self.monitor.current().is_powered_on() {
            return Err(PulseError::AdapterUnavailable);
        }
        let device = self
            .scanner
            .device(device_id)
            .cloned()
            .ok_or_else(|| PulseError::UnknownDevice(device_id.to_string()))?;

        if self.scanner.stop(self.adapter.as_ref()).await {
            self.buffer.push_log("Scan stopped.");
            self.emit(ClientEvent::ScanStopped(ScanStop::Requested));
        }

        self.buffer.push_log("Attempting to connect...");
        info!("Connecting to {} ({})", device.label(), device.id);
        self.session = Some(ConnectionSession::start(
            Arc::clone(&self.adapter),
            device,
            self.config.service,
            self.config.characteristic,
            self.config.connect_timeout,
        ));
        self.emit(ClientEvent::ConnectionState(ConnectionState::Connecting));
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), PulseError> {
        let Some(session) = self.session.as_mut() else {
            return Err(PulseError::NotConnected);
        };
        match session.apply(Trigger::DisconnectRequested) {
            Some(ConnectionState::Disconnecting) => {
                let device_id = session.device().id.clone();
                let link = session.link().cloned();
                let adapter = Arc::clone(&self.adapter);
                let done = self.internal_tx.clone();
                tokio::spawn(async move {
                    let result = match link {
                        Some(link) => adapter.disconnect(&link).await,
                        None => Ok(()),
                    };
                    let _ = done.send(Internal::DisconnectFinished { device_id, result });
                });
                self.emit(ClientEvent::ConnectionState(ConnectionState::Disconnecting));
            }
            Some(_) => {
                // Cancelled mid-establishment.
                if let Some(session) = self.session.take() {
                    let label = session.device().label().to_string();
                    self.finish_session(session, true);
                    self.buffer.push_log(format!("Disconnected from device {label}"));
                }
            }
            None => debug!("Disconnect already in progress"),
        }
        Ok(())
    }

    /// Drop a session that reached `Disconnected`.
    fn finish_session(&mut self, mut session: ConnectionSession, release_link: bool) {
        let device_id = session.device().id.clone();
        if let Some(link) = session.take_link() {
            if release_link {
                let adapter = Arc::clone(&self.adapter);
                self.settle(device_id.clone(), async move {
                    release(adapter.as_ref(), &link).await
                });
            }
        }
        if let Some(attempt) = session.take_establishment() {
            debug!("{device_id}: connect attempt still running after teardown");
            self.settle(device_id, async move {
                let _ = attempt.await;
            });
        }
        self.buffer.clear_heatmap();
        info!("Session with {} closed", session.device().id);
        self.emit(ClientEvent::ConnectionState(ConnectionState::Disconnected));
    }

    // ── Adapter ──────────────────────────────────────────────────────────────

    async fn on_adapter_state(&mut self, state: AdapterState) {
        match self.monitor.observe(state) {
            PowerTransition::Unchanged => return,
            PowerTransition::Lost => {
                self.emit(ClientEvent::AdapterState(state));
                self.on_adapter_lost(state).await;
                return;
            }
            PowerTransition::PoweredOn | PowerTransition::Changed => {}
        }
        self.buffer.push_log(format!("Bluetooth {state}"));
        self.emit(ClientEvent::AdapterState(state));
    }

    async fn on_adapter_lost(&mut self, state: AdapterState) {
        let scan_stopped = self.scanner.stop(self.adapter.as_ref()).await;
        self.scanner.clear_devices();
        if scan_stopped {
            self.emit(ClientEvent::ScanStopped(ScanStop::AdapterLost));
        }

        let mut session_lost = false;
        if let Some(mut session) = self.session.take() {
            session.apply(Trigger::AdapterLost);
            self.finish_session(session, true);
            session_lost = true;
        }

        let line = format!("Bluetooth {state}");
        if scan_stopped || session_lost {
            self.fail(PulseError::AdapterUnavailable, line);
        } else {
            self.buffer.push_log(line);
        }
    }

    fn on_disconnection(&mut self, device_id: &str) {
        match &self.session {
            Some(session) if session.device().id == device_id => self.on_link_lost(),
            _ => debug!("Ignoring disconnect of {device_id}"),
        }
    }

    /// The link went away without being asked to.
    fn on_link_lost(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.apply(Trigger::UnsolicitedDisconnect).is_none() {
            return;
        }
        if let Some(session) = self.session.take() {
            let label = session.device().label().to_string();
            self.finish_session(session, true);
            self.fail(
                PulseError::UnexpectedDisconnect(label.clone()),
                format!("Device disconnected: {label}"),
            );
        }
    }

    // ── Scanning ─────────────────────────────────────────────────────────────

    async fn on_scan_report(&mut self, report: Option<ScanReport>) {
        match report {
            Some(Ok(device)) => {
                if self.scanner.record(device.clone()) == Some(Discovery::New) {
                    self.buffer.push_log(discovered_line(&device));
                    self.emit(ClientEvent::DeviceDiscovered(device));
                }
            }
            Some(Err(e)) => {
                self.scanner.stop(self.adapter.as_ref()).await;
                self.emit(ClientEvent::ScanStopped(ScanStop::Failed));
                self.fail(PulseError::ScanFailed(e.to_string()), format!("Scan error: {e}"));
            }
            None => {}
        }
    }

    async fn on_scan_deadline(&mut self) {
        if self.scanner.stop(self.adapter.as_ref()).await {
            self.buffer.push_log("Scan completed.");
            self.emit(ClientEvent::ScanStopped(ScanStop::Timeout));
        }
    }

    // ── Session ──────────────────────────────────────────────────────────────

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Lifecycle(message) => self.on_lifecycle(message),
            SessionEvent::Notification(Some(value)) => self.on_notification(&value),
            SessionEvent::Notification(None) => {
                info!("Notification stream ended");
                self.on_link_lost();
            }
            SessionEvent::Write(outcome) => self.on_write(outcome),
        }
    }

    fn on_lifecycle(&mut self, message: Option<Lifecycle>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let message = match message {
            Some(message) => message,
            // The establishment task ended without reporting an outcome.
            None if matches!(
                session.state(),
                ConnectionState::Connecting
                    | ConnectionState::DiscoveringTopology
                    | ConnectionState::Subscribing
            ) =>
            {
                Lifecycle::Failed(PulseError::ConnectFailed("connection attempt aborted".into()))
            }
            None => return,
        };

        let Some(state) = session.apply(message.trigger()) else {
            debug!("Ignoring {message:?} in state {}", session.state());
            return;
        };
        let label = session.device().label().to_string();

        match message {
            Lifecycle::Failed(err) => {
                // The establishment task has already released the link.
                if let Some(session) = self.session.take() {
                    self.finish_session(session, false);
                }
                self.fail(err.clone(), format!("Connection error: {err}"));
                return;
            }
            Lifecycle::Connected(link) => {
                session.absorb(Lifecycle::Connected(link));
                self.buffer.push_log(format!("Connected to: {label}"));
            }
            other => session.absorb(other),
        }
        self.emit(ClientEvent::ConnectionState(state));
    }

    fn on_notification(&mut self, value: &[u8]) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.state() != ConnectionState::Streaming {
            return;
        }
        match decode_measurement(value) {
            Ok(sample) => {
                self.buffer.push_sample(&sample);
                self.buffer
                    .push_log(format!("Received HR: {} bpm", sample.heart_rate));
                self.emit(ClientEvent::Sample(sample));
            }
            Err(e) => {
                session.apply(Trigger::DecodeFailed);
                warn!("Dropping notification {value:02x?}: {e}");
                self.buffer.push_log(format!("Parse Error: {e}"));
                self.emit(ClientEvent::Error(e));
            }
        }
    }

    fn on_write(&mut self, outcome: WriteOutcome) {
        match outcome.result {
            Ok(()) => {
                self.buffer.push_log(format!("Data sent: {:?}", outcome.text));
                self.emit(ClientEvent::CommandSent(outcome.text));
            }
            Err(e) => {
                let line = format!("Error sending data: {e}");
                self.fail(e, line);
            }
        }
    }

    fn on_internal(&mut self, internal: Internal) {
        match internal {
            Internal::DisconnectFinished { device_id, result } => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if session.device().id != device_id
                    || session.apply(Trigger::DisconnectCompleted).is_none()
                {
                    return;
                }
                if let Some(session) = self.session.take() {
                    let label = session.device().label().to_string();
                    self.finish_session(session, false);
                    match result {
                        Ok(()) => self.buffer.push_log(format!("Disconnected from device {label}")),
                        Err(e) => {
                            warn!("Disconnect from {label} reported an error: {e}");
                            self.buffer.push_log(format!("Disconnect error: {e}"));
                        }
                    }
                }
            }
            Internal::Settled { device_id } => {
                if let Some(pending) = self.settling.get_mut(&device_id) {
                    *pending -= 1;
                    if *pending == 0 {
                        self.settling.remove(&device_id);
                        debug!("{device_id}: background release finished");
                    }
                }
            }
        }
    }

    /// Run `work` in the background and refuse new connections to `device_id`
    /// until it completes.
    fn settle(&mut self, device_id: String, work: impl Future<Output = ()> + Send + 'static) {
        *self.settling.entry(device_id.clone()).or_default() += 1;
        let done = self.internal_tx.clone();
        tokio::spawn(async move {
            work.await;
            let _ = done.send(Internal::Settled { device_id });
        });
    }

    /// Stop everything and unsubscribe from the adapter.
    async fn teardown(&mut self) {
        self.scanner.stop(self.adapter.as_ref()).await;
        if let Some(mut session) = self.session.take() {
            if let Some(link) = session.take_link() {
                release(self.adapter.as_ref(), &link).await;
            }
        }
        self.adapter_states = None;
        self.disconnections = None;
    }
}

fn discovered_line(device: &DiscoveredDevice) -> String {
    let rssi = device
        .rssi
        .map_or_else(|| "N/A".to_string(), |r| r.to_string());
    format!("Discovered: {} (RSSI: {rssi})", device.label())
}
