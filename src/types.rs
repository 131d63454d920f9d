use std::fmt;

use crate::error::PulseError;
use crate::protocol::HEATMAP_COLUMNS;

/// Power / availability state of the BLE adapter.
///
/// Only [`AdapterState::PoweredOn`] permits scanning or connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterState {
    #[default]
    Unknown,
    PoweredOff,
    PoweredOn,
    Unauthorized,
}

impl AdapterState {
    pub fn is_powered_on(self) -> bool {
        self == AdapterState::PoweredOn
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdapterState::Unknown => "state unknown",
            AdapterState::PoweredOff => "powered off",
            AdapterState::PoweredOn => "powered on",
            AdapterState::Unauthorized => "unauthorized",
        };
        f.write_str(s)
    }
}

/// A peripheral seen advertising during the current scan.
///
/// Identity is `id`; re-discovery updates `rssi` (and `name`, if the new
/// advertisement carries one) without duplicating the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Platform BLE identifier.
    /// • macOS / Windows: a UUID string
    /// • Linux: a Bluetooth MAC address (`AA:BB:CC:DD:EE:FF`)
    pub id: String,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Received signal strength in dBm from the most recent advertisement.
    pub rssi: Option<i16>,
}

impl DiscoveredDevice {
    /// Advertised name, falling back to the identifier.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Lifecycle state of a [`crate::session::ConnectionSession`].
///
/// ```text
/// Connecting ─▶ DiscoveringTopology ─▶ Subscribing ─▶ Streaming ─▶ Disconnecting
///     │                 │                    │             │              │
///     └─────────────────┴────────────────────┴─────────────┴──────────────┴─▶ Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    DiscoveringTopology,
    Subscribing,
    Streaming,
    Disconnecting,
    Disconnected,
}

impl ConnectionState {
    /// `true` while the session holds an established link that accepts writes.
    pub fn accepts_writes(self) -> bool {
        matches!(self, ConnectionState::Subscribing | ConnectionState::Streaming)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::DiscoveringTopology => "discovering services",
            ConnectionState::Subscribing => "subscribing",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// One heatmap row derived from a heart-rate value.
///
/// Signed because the derivation subtracts from the raw value.
pub type HeatmapRow = [i32; HEATMAP_COLUMNS];

/// A decoded heart-rate measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// Beats per minute.
    pub heart_rate: u16,
    /// Visualization row, see [`crate::parse::derive_row`].
    pub row: HeatmapRow,
}

/// Why a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStop {
    Timeout,
    Requested,
    AdapterLost,
    Failed,
}

/// Notifications emitted by [`crate::client::HeartRateClient`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The adapter changed power / availability state.
    AdapterState(AdapterState),
    /// A device was seen for the first time in the current scan.
    DeviceDiscovered(DiscoveredDevice),
    /// The active scan ended.
    ScanStopped(ScanStop),
    /// The connection session moved to a new state.
    ConnectionState(ConnectionState),
    /// A measurement was decoded and appended to the sample buffer.
    Sample(Sample),
    /// A command write completed.
    CommandSent(String),
    /// A failure the user should see. Each terminal error is reported once.
    Error(PulseError),
}

/// Read-only view of the client, refreshed after every handled event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub adapter_state: AdapterState,
    pub scanning: bool,
    /// Discovered devices in first-seen order.
    pub devices: Vec<DiscoveredDevice>,
    /// The device of the current session and its state.
    pub connection: Option<(DiscoveredDevice, ConnectionState)>,
    /// Heatmap rows, oldest first.
    pub heatmap: Vec<HeatmapRow>,
    /// Log lines, most recent first.
    pub log: Vec<String>,
}
