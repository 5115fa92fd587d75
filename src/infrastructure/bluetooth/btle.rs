//! btleplug Radio Adapter
//!
//! Real [`RadioAdapter`] on top of the host Bluetooth stack. Each request is
//! run as its own tokio task and reports back only through the adapter-event
//! queue, so the session never blocks on the radio.

use crate::domain::adapter::{AdapterEvent, DiscoveredCharacteristic, RadioAdapter};
use crate::domain::error::AdapterError;
use crate::domain::models::{Advertisement, PeripheralId};
use btleplug::api::{
    BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

impl From<btleplug::Error> for AdapterError {
    fn from(e: btleplug::Error) -> Self {
        AdapterError::Backend(e.to_string())
    }
}

/// Platform objects behind the identifiers the session works with
#[derive(Default)]
struct LinkState {
    peripherals: HashMap<PeripheralId, Peripheral>,
    connected: Option<(PeripheralId, Peripheral)>,
    characteristics: HashMap<Uuid, Vec<Characteristic>>,
    notification_pump: Option<JoinHandle<()>>,
}

impl LinkState {
    fn reset_link(&mut self) {
        self.connected = None;
        self.characteristics.clear();
        if let Some(pump) = self.notification_pump.take() {
            pump.abort();
        }
    }

    fn characteristic(&self, uuid: &Uuid) -> Option<Characteristic> {
        self.characteristics
            .values()
            .flatten()
            .find(|c| c.uuid == *uuid)
            .cloned()
    }
}

fn lock(state: &Mutex<LinkState>) -> Result<MutexGuard<'_, LinkState>, AdapterError> {
    state.lock().map_err(|_| AdapterError::LockPoisoned)
}

/// Session identifier for a platform peripheral: the Bluetooth address where
/// the platform exposes one, the platform id otherwise
fn peripheral_id(peripheral: &Peripheral) -> PeripheralId {
    let address = peripheral.address();
    if address == BDAddr::default() {
        PeripheralId::new(format!("{:?}", peripheral.id()))
    } else {
        PeripheralId::new(address.to_string())
    }
}

/// Radio adapter backed by btleplug
pub struct BtleAdapter {
    adapter: Adapter,
    runtime: Handle,
    events: mpsc::UnboundedSender<AdapterEvent>,
    state: Arc<Mutex<LinkState>>,
    tasks: Vec<JoinHandle<()>>,
}

impl BtleAdapter {
    /// Open the host radio and start forwarding its events
    pub async fn init(
        adapter_index: usize,
        events: mpsc::UnboundedSender<AdapterEvent>,
    ) -> Result<Self, AdapterError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .nth(adapter_index)
            .ok_or(AdapterError::NoAdapter)?;

        match adapter.adapter_info().await {
            Ok(info) => info!("Using bluetooth adapter: {}", info),
            Err(e) => warn!("Could not query adapter info: {}", e),
        }

        let mut this = Self {
            adapter,
            runtime: Handle::current(),
            events,
            state: Arc::new(Mutex::new(LinkState::default())),
            tasks: Vec::new(),
        };
        this.spawn_central_pump().await?;
        Ok(this)
    }

    /// Forward discovery and disconnection events from the central
    async fn spawn_central_pump(&mut self) -> Result<(), AdapterError> {
        let mut central_events = self.adapter.events().await?;
        let adapter = self.adapter.clone();
        let sender = self.events.clone();
        let state = self.state.clone();

        self.spawn(async move {
            while let Some(event) = central_events.next().await {
                match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        let peripheral = match adapter.peripheral(&id).await {
                            Ok(p) => p,
                            Err(e) => {
                                debug!("Peripheral lookup failed: {}", e);
                                continue;
                            }
                        };
                        let properties = match peripheral.properties().await {
                            Ok(Some(props)) => props,
                            Ok(None) => continue,
                            Err(e) => {
                                debug!("Could not read advertisement: {}", e);
                                continue;
                            }
                        };

                        let pid = peripheral_id(&peripheral);
                        if let Ok(mut link) = lock(&state) {
                            link.peripherals.insert(pid.clone(), peripheral);
                        }

                        let mut adv = Advertisement::new(pid, properties.local_name, properties.rssi);
                        adv.manufacturer_data = properties.manufacturer_data;
                        let _ = sender.send(AdapterEvent::AdvertisementReceived(adv));
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        let pid = match lock(&state) {
                            Ok(mut link) => {
                                let pid = link
                                    .peripherals
                                    .iter()
                                    .find(|(_, p)| p.id() == id)
                                    .map(|(pid, _)| pid.clone());
                                let was_linked = matches!(
                                    (&link.connected, &pid),
                                    (Some((linked, _)), Some(candidate)) if linked == candidate
                                );
                                if was_linked {
                                    link.reset_link();
                                }
                                pid
                            }
                            Err(_) => None,
                        };
                        if let Some(peripheral) = pid {
                            let _ = sender.send(AdapterEvent::Disconnected {
                                peripheral,
                                error: None,
                            });
                        }
                    }
                    other => trace!("Central event: {:?}", other),
                }
            }
            warn!("Central event stream ended");
        });
        Ok(())
    }

    fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.retain(|task| !task.is_finished());
        self.tasks.push(self.runtime.spawn(future));
    }

    fn known_peripheral(&self, id: &PeripheralId) -> Result<Peripheral, AdapterError> {
        lock(&self.state)?
            .peripherals
            .get(id)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownPeripheral(id.clone()))
    }

    fn connected_characteristic(
        &self,
        uuid: &Uuid,
    ) -> Result<(Peripheral, Characteristic), AdapterError> {
        let link = lock(&self.state)?;
        let (_, peripheral) = link.connected.clone().ok_or(AdapterError::NotConnected)?;
        let characteristic = link
            .characteristic(uuid)
            .ok_or(AdapterError::UnknownCharacteristic(*uuid))?;
        Ok((peripheral, characteristic))
    }
}

impl RadioAdapter for BtleAdapter {
    fn start_scan(&mut self) -> Result<(), AdapterError> {
        let adapter = self.adapter.clone();
        let sender = self.events.clone();
        self.spawn(async move {
            match adapter.start_scan(ScanFilter::default()).await {
                Ok(()) => {
                    let _ = sender.send(AdapterEvent::ScanStarted);
                }
                Err(e) => {
                    error!("Failed to start scan: {}", e);
                    let _ = sender.send(AdapterEvent::ScanFailed {
                        error: e.to_string(),
                    });
                }
            }
        });
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), AdapterError> {
        let adapter = self.adapter.clone();
        let sender = self.events.clone();
        self.spawn(async move {
            match adapter.stop_scan().await {
                Ok(()) => {
                    let _ = sender.send(AdapterEvent::ScanStopped);
                }
                Err(e) => error!("Failed to stop scan: {}", e),
            }
        });
        Ok(())
    }

    fn connect(&mut self, id: &PeripheralId) -> Result<(), AdapterError> {
        let peripheral = self.known_peripheral(id)?;
        let id = id.clone();
        let sender = self.events.clone();
        let state = self.state.clone();

        self.spawn(async move {
            if let Err(e) = peripheral.connect().await {
                let _ = sender.send(AdapterEvent::ConnectionFailed {
                    peripheral: id,
                    error: e.to_string(),
                });
                return;
            }

            // Notifications for every subscribed characteristic arrive on one stream
            let pump = match peripheral.notifications().await {
                Ok(mut notifications) => {
                    let sender = sender.clone();
                    Some(tokio::spawn(async move {
                        while let Some(notification) = notifications.next().await {
                            let _ = sender.send(AdapterEvent::CharacteristicValueUpdated {
                                characteristic: notification.uuid,
                                bytes: notification.value,
                            });
                        }
                    }))
                }
                Err(e) => {
                    warn!("Notification stream unavailable: {}", e);
                    None
                }
            };

            match lock(&state) {
                Ok(mut link) => {
                    link.reset_link();
                    link.connected = Some((id.clone(), peripheral));
                    link.notification_pump = pump;
                }
                Err(e) => {
                    error!("{}", e);
                    return;
                }
            }
            let _ = sender.send(AdapterEvent::Connected(id));
        });
        Ok(())
    }

    fn disconnect(&mut self, id: &PeripheralId) -> Result<(), AdapterError> {
        let peripheral = self.known_peripheral(id)?;
        {
            let mut link = lock(&self.state)?;
            if matches!(&link.connected, Some((linked, _)) if linked == id) {
                link.reset_link();
            }
        }

        self.spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                warn!("Disconnect failed: {}", e);
            }
        });
        Ok(())
    }

    fn discover_services(&mut self, id: &PeripheralId) -> Result<(), AdapterError> {
        let peripheral = {
            let link = lock(&self.state)?;
            match &link.connected {
                Some((linked, peripheral)) if linked == id => peripheral.clone(),
                _ => return Err(AdapterError::NotConnected),
            }
        };
        let id = id.clone();
        let sender = self.events.clone();
        let state = self.state.clone();

        self.spawn(async move {
            if let Err(e) = peripheral.discover_services().await {
                // Without services the link is useless; let the session recover
                let _ = sender.send(AdapterEvent::ConnectionFailed {
                    peripheral: id,
                    error: format!("service discovery failed: {}", e),
                });
                return;
            }

            let services = peripheral.services();
            let uuids: Vec<Uuid> = services.iter().map(|s| s.uuid).collect();
            match lock(&state) {
                Ok(mut link) => {
                    link.characteristics = services
                        .into_iter()
                        .map(|s| (s.uuid, s.characteristics.into_iter().collect()))
                        .collect();
                }
                Err(e) => {
                    error!("{}", e);
                    return;
                }
            }

            let _ = sender.send(AdapterEvent::ServicesDiscovered {
                peripheral: id,
                services: uuids,
            });
        });
        Ok(())
    }

    /// btleplug enumerates characteristics together with services, so this
    /// answers from the cache filled by [`Self::discover_services`]
    fn discover_characteristics(&mut self, service: &Uuid) -> Result<(), AdapterError> {
        let characteristics = lock(&self.state)?
            .characteristics
            .get(service)
            .map(|chars| {
                chars
                    .iter()
                    .map(|c| DiscoveredCharacteristic {
                        uuid: c.uuid,
                        properties: u16::from(c.properties.bits()),
                    })
                    .collect::<Vec<_>>()
            })
            .ok_or(AdapterError::UnknownService(*service))?;

        let _ = self.events.send(AdapterEvent::CharacteristicsDiscovered {
            service: *service,
            characteristics,
        });
        Ok(())
    }

    fn read_value(&mut self, uuid: &Uuid) -> Result<(), AdapterError> {
        let (peripheral, characteristic) = self.connected_characteristic(uuid)?;
        let sender = self.events.clone();

        self.spawn(async move {
            let event = match peripheral.read(&characteristic).await {
                Ok(bytes) => AdapterEvent::CharacteristicValueUpdated {
                    characteristic: characteristic.uuid,
                    bytes,
                },
                Err(e) => AdapterEvent::ReadFailed {
                    characteristic: characteristic.uuid,
                    error: e.to_string(),
                },
            };
            let _ = sender.send(event);
        });
        Ok(())
    }

    fn set_notify(&mut self, uuid: &Uuid, enabled: bool) -> Result<(), AdapterError> {
        let (peripheral, characteristic) = self.connected_characteristic(uuid)?;

        self.spawn(async move {
            let result = if enabled {
                peripheral.subscribe(&characteristic).await
            } else {
                peripheral.unsubscribe(&characteristic).await
            };
            match result {
                Ok(()) => debug!(
                    "Notifications {} for {}",
                    if enabled { "enabled" } else { "disabled" },
                    characteristic.uuid
                ),
                Err(e) => warn!(
                    "Could not change notifications for {}: {}",
                    characteristic.uuid, e
                ),
            }
        });
        Ok(())
    }

    fn write_value(
        &mut self,
        uuid: &Uuid,
        bytes: &[u8],
        require_ack: bool,
    ) -> Result<(), AdapterError> {
        let (peripheral, characteristic) = self.connected_characteristic(uuid)?;
        let sender = self.events.clone();
        let bytes = bytes.to_vec();
        let write_type = if require_ack {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        self.spawn(async move {
            let error = peripheral
                .write(&characteristic, &bytes, write_type)
                .await
                .err()
                .map(|e| e.to_string());
            let _ = sender.send(AdapterEvent::WriteCompleted {
                characteristic: characteristic.uuid,
                error,
            });
        });
        Ok(())
    }

    fn shutdown(&mut self) {
        info!("Shutting down bluetooth adapter");
        if let Ok(mut link) = lock(&self.state) {
            link.reset_link();
            link.peripherals.clear();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for BtleAdapter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
