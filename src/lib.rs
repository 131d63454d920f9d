//! # pulse-rs
//!
//! Async Rust library and terminal UI for streaming heart-rate measurements
//! from Bluetooth Low Energy sensors exposing the standard
//! [Heart Rate service](https://www.bluetooth.com/specifications/specs/heart-rate-service-1-0/)
//! (`0x180D`, measurement characteristic `0x2A37`).
//!
//! ## What it does
//!
//! * tracks the adapter's power state and tears everything down when it
//!   goes away
//! * runs time-boxed scans that collect each nearby peripheral once
//! * connects to one device, checks it exposes the target characteristic,
//!   and subscribes to notifications
//! * decodes every measurement into a beats-per-minute value plus a derived
//!   five-cell heatmap row, keeping the last five rows and twenty log lines
//! * writes text commands back to the characteristic, one at a time
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use pulse_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let adapter = Arc::new(BtleplugAdapter::new().await?);
//!     let (client, mut events) = HeartRateClient::start(adapter, ClientConfig::default()).await?;
//!     client.start_scan().await?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             ClientEvent::DeviceDiscovered(d) => {
//!                 client.connect(&d.id).await?;
//!             }
//!             ClientEvent::Sample(s) => println!("{} bpm", s.heart_rate),
//!             ClientEvent::Error(e) => eprintln!("{e}"),
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Using as a library dependency
//!
//! ```toml
//! [dependencies]
//! # Full build (includes the ratatui TUI feature):
//! pulse-rs = "0.0.1"
//!
//! # Library only, skips ratatui / crossterm compilation:
//! pulse-rs = { version = "0.0.1", default-features = false }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the most commonly needed types |
//! | [`client`] | [`client::HeartRateClient`], the event loop that owns all state |
//! | [`adapter`] | The [`adapter::BleAdapter`] capability the client is built on |
//! | [`btle`] | `btleplug` implementation of that capability |
//! | [`mock`] | Scriptable in-memory adapter for tests and simulation |
//! | [`monitor`] | Adapter power-state tracking |
//! | [`scanner`] | Time-boxed, de-duplicating device discovery |
//! | [`session`] | Per-connection state machine and establishment |
//! | [`buffer`] | Bounded heatmap rows and log lines |
//! | [`parse`] | Heart Rate Measurement decoding |
//! | [`protocol`] | GATT UUIDs, limits and wire-format helpers |
//! | [`types`] | Events and data types produced by the client |
//! | [`error`] | [`error::PulseError`] and [`error::AdapterError`] |

pub mod adapter;
pub mod btle;
pub mod buffer;
pub mod client;
pub mod error;
pub mod mock;
pub mod monitor;
pub mod parse;
pub mod protocol;
pub mod scanner;
pub mod session;
pub mod types;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports for downstream crates.
///
/// ```no_run
/// use std::sync::Arc;
/// use pulse_rs::prelude::*;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let (client, _events) =
///     HeartRateClient::start(Arc::new(MockAdapter::new()), ClientConfig::default()).await?;
/// client.start_scan().await?;
/// println!("{:?}", client.snapshot().devices);
/// # Ok(())
/// # }
/// ```
pub mod prelude {
    // ── Client ────────────────────────────────────────────────────────────────
    pub use crate::client::{ClientConfig, HeartRateClient};

    // ── Adapters ──────────────────────────────────────────────────────────────
    pub use crate::adapter::BleAdapter;
    pub use crate::btle::BtleplugAdapter;
    pub use crate::mock::MockAdapter;

    // ── Events and data types ─────────────────────────────────────────────────
    pub use crate::error::PulseError;
    pub use crate::types::{
        AdapterState, ClientEvent, ConnectionState, DiscoveredDevice, HeatmapRow, Sample,
        ScanStop, Snapshot,
    };

    // ── Protocol constants ────────────────────────────────────────────────────
    pub use crate::protocol::{HEART_RATE_MEASUREMENT, HEART_RATE_SERVICE};
}
