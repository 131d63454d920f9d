//! [`BleAdapter`] backed by the host Bluetooth stack through `btleplug`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::adapter::{
    BleAdapter, CharacteristicDescriptor, ConnectionHandle, ScanReport, ServiceCollection,
    ServiceDescriptor,
};
use crate::error::AdapterError;
use crate::types::{AdapterState, DiscoveredDevice};

const CHANNEL_CAPACITY: usize = 256;

fn map_state(state: CentralState) -> AdapterState {
    match state {
        CentralState::PoweredOn => AdapterState::PoweredOn,
        CentralState::PoweredOff => AdapterState::PoweredOff,
        CentralState::Unknown => AdapterState::Unknown,
    }
}

/// The first adapter reported by the platform manager.
pub struct BtleplugAdapter {
    adapter: Adapter,
    /// Peripherals seen while scanning, keyed by their platform id string.
    /// • macOS / Windows: a UUID string
    /// • Linux: a Bluetooth MAC address (`AA:BB:CC:DD:EE:FF`)
    peripherals: Arc<Mutex<HashMap<String, Peripheral>>>,
}

impl BtleplugAdapter {
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        match adapter.adapter_info().await {
            Ok(info) => info!("Using Bluetooth adapter {info}"),
            Err(e) => debug!("adapter_info() failed: {e}"),
        }
        Ok(Self {
            adapter,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn known(&self) -> MutexGuard<'_, HashMap<String, Peripheral>> {
        self.peripherals.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn peripheral(&self, device_id: &str) -> Result<Peripheral, AdapterError> {
        if let Some(p) = self.known().get(device_id).cloned() {
            return Ok(p);
        }
        // Not seen by our own scan; the platform cache may still know it.
        for p in self.adapter.peripherals().await? {
            if p.id().to_string() == device_id {
                self.known().insert(device_id.to_string(), p.clone());
                return Ok(p);
            }
        }
        Err(AdapterError::new(format!("unknown peripheral {device_id}")))
    }

    fn characteristic(
        &self,
        peripheral: &Peripheral,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Characteristic, AdapterError> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
            .ok_or_else(|| AdapterError::new(format!("characteristic {characteristic} not found")))
    }
}

#[async_trait]
impl BleAdapter for BtleplugAdapter {
    async fn state_updates(&self) -> Result<mpsc::Receiver<AdapterState>, AdapterError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut events = self.adapter.events().await?;

        let initial = match self.adapter.adapter_state().await {
            Ok(state) => map_state(state),
            Err(e) => {
                warn!("adapter_state() error: {e}");
                AdapterState::Unknown
            }
        };
        let _ = tx.try_send(initial);

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = tx.closed() => break,
                    event = events.next() => event,
                };
                match event {
                    Some(CentralEvent::StateUpdate(state)) => {
                        if tx.send(map_state(state)).await.is_err() {
                            break;
                        }
                    }
                    Some(_) => {}
                    None => break,
                }
            }
            debug!("Adapter state watcher stopped");
        });
        Ok(rx)
    }

    async fn start_scan(&self) -> Result<mpsc::Receiver<ScanReport>, AdapterError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        let adapter = self.adapter.clone();
        let known = Arc::clone(&self.peripherals);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = tx.closed() => break,
                    event = events.next() => event,
                };
                let id = match event {
                    Some(CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) => id,
                    Some(_) => continue,
                    None => {
                        let _ = tx
                            .send(Err(AdapterError::new("adapter event stream ended")))
                            .await;
                        break;
                    }
                };
                let peripheral = match adapter.peripheral(&id).await {
                    Ok(p) => p,
                    Err(e) => {
                        debug!("Scan: peripheral {id:?} vanished: {e}");
                        continue;
                    }
                };
                let props = peripheral.properties().await.ok().flatten();
                let device = DiscoveredDevice {
                    id: id.to_string(),
                    name: props.as_ref().and_then(|p| p.local_name.clone()),
                    rssi: props.and_then(|p| p.rssi),
                };
                known
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(device.id.clone(), peripheral);
                if tx.send(Ok(device)).await.is_err() {
                    break;
                }
            }
            debug!("Scan forwarder stopped");
        });
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<(), AdapterError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, device_id: &str) -> Result<ConnectionHandle, AdapterError> {
        let peripheral = self.peripheral(device_id).await?;
        peripheral.connect().await?;
        Ok(ConnectionHandle::new(device_id))
    }

    async fn discover_topology(
        &self,
        link: &ConnectionHandle,
    ) -> Result<ServiceCollection, AdapterError> {
        let peripheral = self.peripheral(&link.device_id).await?;

        // BlueZ signals connection completion before the remote GATT cache is
        // populated; discovering too early returns an empty set.
        #[cfg(target_os = "linux")]
        tokio::time::sleep(Duration::from_millis(600)).await;

        tokio::time::timeout(Duration::from_secs(15), peripheral.discover_services())
            .await
            .map_err(|_| AdapterError::new("discover_services() timed out after 15 s"))??;

        let services = peripheral
            .services()
            .into_iter()
            .map(|s| ServiceDescriptor {
                uuid: s.uuid.to_string(),
                characteristics: s
                    .characteristics
                    .into_iter()
                    .map(|c| CharacteristicDescriptor {
                        uuid: c.uuid.to_string(),
                    })
                    .collect(),
            })
            .collect();
        Ok(ServiceCollection::Populated(services))
    }

    async fn subscribe(
        &self,
        link: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<mpsc::Receiver<Vec<u8>>, AdapterError> {
        let peripheral = self.peripheral(&link.device_id).await?;
        let target = self.characteristic(&peripheral, service, characteristic)?;
        peripheral.subscribe(&target).await?;
        let mut notifications = peripheral.notifications().await?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let device_id = link.device_id.clone();
        tokio::spawn(async move {
            loop {
                let notification = tokio::select! {
                    _ = tx.closed() => break,
                    n = notifications.next() => n,
                };
                match notification {
                    Some(n) if n.uuid == characteristic => {
                        if tx.send(n.value).await.is_err() {
                            break;
                        }
                    }
                    Some(n) => debug!("Ignoring notification from {}", n.uuid),
                    None => break,
                }
            }
            info!("{device_id}: notification stream ended");
        });
        Ok(rx)
    }

    async fn write(
        &self,
        link: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        bytes: &[u8],
    ) -> Result<(), AdapterError> {
        let peripheral = self.peripheral(&link.device_id).await?;
        let target = self.characteristic(&peripheral, service, characteristic)?;
        peripheral.write(&target, bytes, WriteType::WithResponse).await?;
        Ok(())
    }

    async fn disconnect(&self, link: &ConnectionHandle) -> Result<(), AdapterError> {
        let peripheral = self.peripheral(&link.device_id).await?;
        peripheral.disconnect().await?;
        Ok(())
    }

    async fn disconnections(&self) -> Result<mpsc::Receiver<String>, AdapterError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut events = self.adapter.events().await?;
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = tx.closed() => break,
                    event = events.next() => event,
                };
                match event {
                    Some(CentralEvent::DeviceDisconnected(id)) => {
                        info!("Disconnect watcher: device {id:?} disconnected.");
                        if tx.send(id.to_string()).await.is_err() {
                            break;
                        }
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_state() {
        assert_eq!(map_state(CentralState::PoweredOn), AdapterState::PoweredOn);
        assert_eq!(map_state(CentralState::PoweredOff), AdapterState::PoweredOff);
        assert_eq!(map_state(CentralState::Unknown), AdapterState::Unknown);
    }
}
