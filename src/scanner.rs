//! Scanner: time-boxed device discovery with de-duplication.

use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::adapter::{recv_or_pending, BleAdapter, ScanReport};
use crate::error::PulseError;
use crate::types::{AdapterState, DiscoveredDevice};

/// Result of recording one advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    /// First sighting of this id in the current scan.
    New,
    /// Known id; signal strength refreshed.
    Updated,
}

/// Owns the scan lifecycle and the discovered-device set.
///
/// The scanner does not run a timer task of its own. It exposes a
/// [`deadline`](Scanner::deadline) that the owning event loop waits on, so
/// stopping the scan (or dropping the scanner) disarms the timeout with no
/// background work left behind.
#[derive(Debug)]
pub struct Scanner {
    active: bool,
    duration: Duration,
    deadline: Option<Instant>,
    reports: Option<mpsc::Receiver<ScanReport>>,
    /// First-seen order.
    devices: Vec<DiscoveredDevice>,
}

impl Scanner {
    pub fn new(duration: Duration) -> Self {
        Self {
            active: false,
            duration,
            deadline: None,
            reports: None,
            devices: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn devices(&self) -> &[DiscoveredDevice] {
        &self.devices
    }

    pub fn device(&self, id: &str) -> Option<&DiscoveredDevice> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// When the running scan times out, if one is running.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Start a fresh scan.
    ///
    /// Fails with [`PulseError::AdapterUnavailable`] unless the adapter is
    /// powered on. A scan already in progress is stopped and restarted. The
    /// discovered-device set is cleared either way.
    pub async fn start(
        &mut self,
        adapter: &dyn BleAdapter,
        state: AdapterState,
    ) -> Result<(), PulseError> {
        if !state.is_powered_on() {
            return Err(PulseError::AdapterUnavailable);
        }
        if self.active {
            self.stop(adapter).await;
        }
        self.devices.clear();

        let reports = adapter
            .start_scan()
            .await
            .map_err(|e| PulseError::ScanFailed(e.to_string()))?;

        self.reports = Some(reports);
        self.active = true;
        self.deadline = Some(Instant::now() + self.duration);
        info!("Scan started ({} s)", self.duration.as_secs());
        Ok(())
    }

    /// Stop scanning. Safe to call at any time.
    ///
    /// Returns `true` if a scan was running. The active flag is cleared before
    /// the adapter is asked to stop, so a failing adapter call still leaves
    /// the scanner idle.
    pub async fn stop(&mut self, adapter: &dyn BleAdapter) -> bool {
        let was_active = std::mem::replace(&mut self.active, false);
        self.deadline = None;
        self.reports = None;
        if was_active {
            if let Err(e) = adapter.stop_scan().await {
                warn!("stop_scan failed: {e}");
            }
            info!("Scan stopped; {} device(s) known", self.devices.len());
        }
        was_active
    }

    /// Forget every discovered device.
    pub fn clear_devices(&mut self) {
        self.devices.clear();
    }

    /// Merge one advertisement into the device set.
    ///
    /// Returns `None` when no scan is active.
    pub fn record(&mut self, device: DiscoveredDevice) -> Option<Discovery> {
        if !self.active {
            return None;
        }
        match self.devices.iter_mut().find(|d| d.id == device.id) {
            Some(known) => {
                known.rssi = device.rssi;
                if device.name.is_some() {
                    known.name = device.name;
                }
                Some(Discovery::Updated)
            }
            None => {
                debug!("Discovered {} ({:?})", device.id, device.name);
                self.devices.push(device);
                Some(Discovery::New)
            }
        }
    }

    /// Wait for the next advertisement report.
    ///
    /// Never resolves while no scan is running. A report stream closed by the
    /// adapter yields `None` once; the scan itself stays active until its
    /// deadline or an explicit stop.
    pub async fn next_report(&mut self) -> Option<ScanReport> {
        let report = recv_or_pending(&mut self.reports).await;
        if report.is_none() {
            debug!("Adapter closed the scan report stream");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAdapter;

    fn device(id: &str, rssi: i16) -> DiscoveredDevice {
        DiscoveredDevice {
            id: id.into(),
            name: Some("Polar H10".into()),
            rssi: Some(rssi),
        }
    }

    #[tokio::test]
    async fn test_start_requires_powered_on() {
        let adapter = MockAdapter::new();
        let mut scanner = Scanner::new(Duration::from_secs(10));
        let err = scanner
            .start(&adapter, AdapterState::PoweredOff)
            .await
            .unwrap_err();
        assert_eq!(err, PulseError::AdapterUnavailable);
        assert!(!scanner.is_active());
    }

    #[tokio::test]
    async fn test_duplicates_update_rssi_only() {
        let adapter = MockAdapter::new();
        let mut scanner = Scanner::new(Duration::from_secs(10));
        scanner.start(&adapter, AdapterState::PoweredOn).await.unwrap();

        assert_eq!(scanner.record(device("a", -70)), Some(Discovery::New));
        assert_eq!(scanner.record(device("a", -52)), Some(Discovery::Updated));
        assert_eq!(scanner.devices().len(), 1);
        assert_eq!(scanner.devices()[0].rssi, Some(-52));
    }

    #[tokio::test]
    async fn test_restart_resets_devices_and_stop_is_idempotent() {
        let adapter = MockAdapter::new();
        let mut scanner = Scanner::new(Duration::from_secs(10));
        scanner.start(&adapter, AdapterState::PoweredOn).await.unwrap();
        scanner.record(device("a", -70));
        assert!(scanner.deadline().is_some());

        scanner.start(&adapter, AdapterState::PoweredOn).await.unwrap();
        assert!(scanner.devices().is_empty());

        assert!(scanner.stop(&adapter).await);
        assert!(!scanner.stop(&adapter).await);
        assert!(!scanner.is_active());
        assert!(scanner.deadline().is_none());
        assert_eq!(scanner.record(device("b", -60)), None);
    }

    #[tokio::test]
    async fn test_adapter_scan_error_surfaces_as_scan_failed() {
        let adapter = MockAdapter::new();
        adapter.fail_scan_start("radio busy");
        let mut scanner = Scanner::new(Duration::from_secs(10));
        let err = scanner
            .start(&adapter, AdapterState::PoweredOn)
            .await
            .unwrap_err();
        assert_eq!(err, PulseError::ScanFailed("radio busy".into()));
        assert!(!scanner.is_active());
    }
}
