//! Adapter Monitor: tracks the adapter's power state and publishes it.

use log::info;
use tokio::sync::watch;

use crate::types::AdapterState;

/// What an observed state change means for scanning and sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerTransition {
    /// Same state as before.
    Unchanged,
    /// Entered `PoweredOn`.
    PoweredOn,
    /// Left `PoweredOn`: the scan and any session must be torn down.
    Lost,
    /// Moved between two non-powered states.
    Changed,
}

/// Holds the authoritative [`AdapterState`] and fans it out.
///
/// The state is driven only by adapter events; the monitor never retries or
/// polls. Subscribers see the current value on subscription and every value
/// after that. A subscriber that falls behind observes the latest state.
#[derive(Debug)]
pub struct AdapterMonitor {
    tx: watch::Sender<AdapterState>,
}

impl Default for AdapterMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterMonitor {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AdapterState::Unknown);
        Self { tx }
    }

    pub fn current(&self) -> AdapterState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<AdapterState> {
        self.tx.subscribe()
    }

    /// Record a state reported by the adapter.
    pub fn observe(&mut self, state: AdapterState) -> PowerTransition {
        let previous = self.tx.send_replace(state);
        if previous == state {
            return PowerTransition::Unchanged;
        }
        info!("Adapter state: {previous:?} → {state:?}");
        match (previous.is_powered_on(), state.is_powered_on()) {
            (false, true) => PowerTransition::PoweredOn,
            (true, false) => PowerTransition::Lost,
            _ => PowerTransition::Changed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let mut m = AdapterMonitor::new();
        assert_eq!(m.observe(AdapterState::Unknown), PowerTransition::Unchanged);
        assert_eq!(m.observe(AdapterState::PoweredOn), PowerTransition::PoweredOn);
        assert_eq!(m.observe(AdapterState::PoweredOn), PowerTransition::Unchanged);
        assert_eq!(m.observe(AdapterState::PoweredOff), PowerTransition::Lost);
        assert_eq!(m.observe(AdapterState::Unauthorized), PowerTransition::Changed);
        assert_eq!(m.current(), AdapterState::Unauthorized);
    }

    #[tokio::test]
    async fn test_subscriber_sees_current_then_changes() {
        let mut m = AdapterMonitor::new();
        m.observe(AdapterState::PoweredOn);

        let mut rx = m.subscribe();
        assert_eq!(*rx.borrow_and_update(), AdapterState::PoweredOn);

        m.observe(AdapterState::PoweredOff);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), AdapterState::PoweredOff);
    }
}
