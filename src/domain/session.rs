//! GATT Session State Machine
//!
//! Drives one peripheral at a time through
//! `Idle → Scanning → PeripheralSelected → ServicesDiscovered →
//! CharacteristicsDiscovered → Disconnected → Scanning`.
//!
//! The session is not internally concurrent. Every call must come from the
//! same execution context; see [`crate::infrastructure::bluetooth::service`]
//! for the runner that serializes adapter events onto one task.

use crate::domain::adapter::{AdapterEvent, DiscoveredCharacteristic, RadioAdapter};
use crate::domain::capabilities::{Capability, CapabilitySet};
use crate::domain::error::SessionError;
use crate::domain::models::{
    Advertisement, Characteristic, ConnectionState, Peripheral, PeripheralId, Phase, Service,
    SessionEvent,
};
use crate::domain::protocol;
use crate::domain::settings::SessionConfig;
use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Receiver of session notifications (usually the presentation layer)
pub trait SessionEventSink {
    fn on_event(&mut self, event: SessionEvent);
}

impl SessionEventSink for mpsc::UnboundedSender<SessionEvent> {
    fn on_event(&mut self, event: SessionEvent) {
        // A closed receiver just means nobody is rendering any more
        let _ = self.send(event);
    }
}

impl SessionEventSink for Vec<SessionEvent> {
    fn on_event(&mut self, event: SessionEvent) {
        self.push(event);
    }
}

/// GATT request queued until characteristic discovery has finished
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingAction {
    Notify(Uuid),
    Read(Uuid),
    Write {
        characteristic: Uuid,
        bytes: Vec<u8>,
        require_ack: bool,
    },
}

type SessionResult<T = ()> = Result<T, SessionError>;

pub struct Session<A: RadioAdapter, S: SessionEventSink> {
    adapter: A,
    sink: S,
    config: SessionConfig,
    phase: Phase,
    /// Discovered peripherals, in sighting order
    peripherals: Vec<Peripheral>,
    active: Option<PeripheralId>,
    services: HashMap<PeripheralId, Vec<Service>>,
    characteristics: HashMap<Uuid, Vec<Characteristic>>,
    outstanding_discoveries: usize,
    pending: VecDeque<PendingAction>,
}

impl<A: RadioAdapter, S: SessionEventSink> Session<A, S> {
    pub fn new(adapter: A, sink: S, config: SessionConfig) -> Self {
        Self {
            adapter,
            sink,
            config,
            phase: Phase::Idle,
            peripherals: Vec::new(),
            active: None,
            services: HashMap::new(),
            characteristics: HashMap::new(),
            outstanding_discoveries: 0,
            pending: VecDeque::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Peripherals discovered during the current scan
    pub fn peripherals(&self) -> &[Peripheral] {
        &self.peripherals
    }

    pub fn active_peripheral(&self) -> Option<&Peripheral> {
        let active = self.active.as_ref()?;
        self.peripherals.iter().find(|p| &p.id == active)
    }

    /// Services of the active peripheral
    pub fn services(&self) -> &[Service] {
        self.active
            .as_ref()
            .and_then(|id| self.services.get(id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn characteristics(&self, service: &Uuid) -> &[Characteristic] {
        self.characteristics
            .get(service)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn characteristic(&self, uuid: &Uuid) -> Option<&Characteristic> {
        self.characteristics
            .values()
            .flat_map(|chars| chars.iter())
            .find(|c| c.uuid == *uuid)
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    // ------------------------------------------------------------------
    // Front-end operations
    // ------------------------------------------------------------------

    /// Start listening for advertisements. Valid from `Idle` or `Disconnected`.
    pub fn start_scan(&mut self) -> SessionResult {
        self.expect_phase("start_scan", &[Phase::Idle, Phase::Disconnected])?;

        self.peripherals.clear();
        self.adapter.start_scan()?;
        info!(
            "Scanning for peripherals matching {:?}",
            self.config.target_name_fragment
        );
        self.set_phase(Phase::Scanning);
        Ok(())
    }

    /// Stop scanning and connect to a discovered peripheral
    pub fn select_peripheral(&mut self, id: &PeripheralId) -> SessionResult {
        self.expect_phase("select_peripheral", &[Phase::Scanning])?;

        let index = self
            .peripherals
            .iter()
            .position(|p| &p.id == id)
            .ok_or_else(|| SessionError::UnknownPeripheral(id.clone()))?;

        self.adapter.stop_scan()?;
        if let Err(e) = self.adapter.connect(id) {
            // Keep the session usable: resume listening
            if let Err(scan_err) = self.adapter.start_scan() {
                warn!("Could not resume scanning: {}", scan_err);
            }
            return Err(e.into());
        }

        info!("Connecting to {} ({})", self.peripherals[index].name, id);
        self.peripherals[index].state = ConnectionState::Connecting;
        self.active = Some(id.clone());
        self.set_phase(Phase::PeripheralSelected);
        Ok(())
    }

    /// Drop the connection or scan and return to `Idle`
    pub fn cancel(&mut self) -> SessionResult {
        if self.phase == Phase::Idle {
            return Err(self.unexpected("cancel"));
        }

        if self.phase == Phase::Scanning {
            if let Err(e) = self.adapter.stop_scan() {
                warn!("Failed to stop scan: {}", e);
            }
        }

        if self.phase.is_connected() {
            if let Some(id) = self.active.clone() {
                if let Err(e) = self.adapter.disconnect(&id) {
                    warn!("Failed to disconnect {}: {}", id, e);
                }
            }
        }

        self.clear_connection();
        self.peripherals.clear();
        info!("Session cancelled");
        self.set_phase(Phase::Idle);
        Ok(())
    }

    /// Explicitly read a discovered characteristic
    pub fn read_characteristic(&mut self, uuid: &Uuid) -> SessionResult {
        self.expect_phase("read_characteristic", &[Phase::CharacteristicsDiscovered])?;

        let capabilities = self.capabilities_of(uuid)?;
        if !capabilities.can_read() {
            return Err(SessionError::CapabilityDenied {
                characteristic: *uuid,
                capability: Capability::Read,
            });
        }

        self.adapter.read_value(uuid)?;
        Ok(())
    }

    /// Write to a discovered characteristic.
    /// Acknowledged writes are used whenever the characteristic supports them.
    pub fn write_characteristic(&mut self, uuid: &Uuid, bytes: &[u8]) -> SessionResult {
        self.expect_phase("write_characteristic", &[Phase::CharacteristicsDiscovered])?;

        let capabilities = self.capabilities_of(uuid)?;
        if !capabilities.can_write() {
            return Err(SessionError::CapabilityDenied {
                characteristic: *uuid,
                capability: Capability::Write,
            });
        }

        self.issue(PendingAction::Write {
            characteristic: *uuid,
            bytes: bytes.to_vec(),
            require_ack: capabilities.contains(Capability::Write),
        })
    }

    /// Ask the band to start a heart-rate measurement
    pub fn measure_heart_rate(&mut self) -> SessionResult {
        let command = protocol::start_heart_rate_command();
        info!("Requesting heart-rate measurement");
        self.write_characteristic(&protocol::HEART_RATE_CONTROL_POINT_UUID, &command)
    }

    /// Cancel any activity and release the adapter
    pub fn shutdown(&mut self) {
        if self.phase != Phase::Idle {
            let _ = self.cancel();
        }
        self.adapter.shutdown();
    }

    // ------------------------------------------------------------------
    // Adapter events
    // ------------------------------------------------------------------

    /// Apply one adapter event. Events that do not fit the current phase are
    /// logged and discarded; nothing here is fatal.
    pub fn handle(&mut self, event: AdapterEvent) {
        let quiet = matches!(event, AdapterEvent::AdvertisementReceived(_));

        let result = match event {
            AdapterEvent::ScanStarted => {
                debug!("Radio reports scan started");
                Ok(())
            }
            AdapterEvent::ScanStopped => {
                debug!("Radio reports scan stopped");
                Ok(())
            }
            AdapterEvent::ScanFailed { error } => self.on_scan_failed(error),
            AdapterEvent::AdvertisementReceived(adv) => self.on_advertisement(adv),
            AdapterEvent::Connected(id) => self.on_connected(&id),
            AdapterEvent::ConnectionFailed { peripheral, error } => {
                self.on_connection_failed(&peripheral, error)
            }
            AdapterEvent::Disconnected { peripheral, error } => {
                self.on_disconnected(&peripheral, error)
            }
            AdapterEvent::ServicesDiscovered {
                peripheral,
                services,
            } => self.on_services_discovered(&peripheral, services),
            AdapterEvent::CharacteristicsDiscovered {
                service,
                characteristics,
            } => self.on_characteristics_discovered(&service, characteristics),
            AdapterEvent::CharacteristicValueUpdated {
                characteristic,
                bytes,
            } => self.on_characteristic_value_updated(&characteristic, &bytes),
            AdapterEvent::ReadFailed {
                characteristic,
                error,
            } => self.on_read_failed(&characteristic, error),
            AdapterEvent::WriteCompleted {
                characteristic,
                error,
            } => self.on_write_completed(&characteristic, error),
        };

        if let Err(e) = result {
            if quiet {
                debug!("Discarding advertisement: {}", e);
            } else {
                warn!("Discarding adapter event: {}", e);
            }
        }
    }

    /// Record a matching peripheral. Repeated sightings are ignored.
    pub fn on_advertisement(&mut self, adv: Advertisement) -> SessionResult {
        self.expect_phase("advertisement", &[Phase::Scanning])?;

        let id = adv.peripheral_id.clone();
        if self.peripherals.iter().any(|p| p.id == id) {
            return Ok(());
        }

        let name = adv.display_name();
        if !name.contains(&self.config.target_name_fragment) {
            trace!("Ignoring {} ({})", name, id);
            return Ok(());
        }

        info!("Discovered {} ({}) rssi={:?}", name, id, adv.rssi);
        for (company, data) in &adv.manufacturer_data {
            trace!("Manufacturer data {:04X}: {:02X?}", company, data);
        }
        let peripheral = Peripheral {
            id,
            name,
            rssi: adv.rssi,
            state: ConnectionState::Discovered,
        };
        self.peripherals.push(peripheral.clone());
        self.sink
            .on_event(SessionEvent::PeripheralDiscovered { peripheral });
        Ok(())
    }

    /// Radio stopped listening on its own. Scanning can be restarted from
    /// `Disconnected`.
    pub fn on_scan_failed(&mut self, error: String) -> SessionResult {
        self.expect_phase("scan_failed", &[Phase::Scanning])?;

        warn!("Scan failed: {}", error);
        self.report_failure("scan", error);
        self.peripherals.clear();
        self.set_phase(Phase::Disconnected);
        Ok(())
    }

    /// A link to anything but the selected peripheral (for example one that
    /// completed after `cancel`) is torn down again
    pub fn on_connected(&mut self, id: &PeripheralId) -> SessionResult {
        if self.active.as_ref() != Some(id) {
            info!("Dropping stray connection to {}", id);
            if let Err(e) = self.adapter.disconnect(id) {
                warn!("Failed to disconnect {}: {}", id, e);
            }
            return Ok(());
        }
        self.expect_phase("connected", &[Phase::PeripheralSelected])?;

        if let Some(peripheral) = self.peripherals.iter_mut().find(|p| &p.id == id) {
            if peripheral.state == ConnectionState::Connected {
                debug!("Duplicate connection event for {}", id);
                return Ok(());
            }
            peripheral.state = ConnectionState::Connected;
        }

        info!("Connected to {}", id);
        self.sink.on_event(SessionEvent::Connected {
            peripheral: id.clone(),
        });

        if let Err(e) = self.adapter.discover_services(id) {
            self.report_failure("discover services", e.to_string());
        }
        Ok(())
    }

    /// Connection attempt failed: recover the same way as a disconnect
    pub fn on_connection_failed(&mut self, id: &PeripheralId, error: String) -> SessionResult {
        self.expect_phase("connection_failed", &[Phase::PeripheralSelected])?;
        self.expect_active(id)?;

        warn!("Connection to {} failed: {}", id, error);
        self.report_failure("connect", error);
        // The link may be half up (services failed after connecting)
        if let Err(e) = self.adapter.disconnect(id) {
            warn!("Failed to disconnect {}: {}", id, e);
        }
        self.recover();
        Ok(())
    }

    pub fn on_disconnected(&mut self, id: &PeripheralId, error: Option<String>) -> SessionResult {
        if !self.phase.is_connected() {
            return Err(self.unexpected("disconnected"));
        }
        self.expect_active(id)?;

        match &error {
            Some(e) => warn!("Disconnected from {}: {}", id, e),
            None => info!("Disconnected from {}", id),
        }
        self.sink.on_event(SessionEvent::Disconnected {
            peripheral: id.clone(),
            error,
        });
        self.recover();
        Ok(())
    }

    pub fn on_services_discovered(
        &mut self,
        id: &PeripheralId,
        services: Vec<Uuid>,
    ) -> SessionResult {
        self.expect_phase("services_discovered", &[Phase::PeripheralSelected])?;
        self.expect_active(id)?;

        let mut recorded: Vec<Service> = Vec::with_capacity(services.len());
        for uuid in services {
            if recorded.iter().any(|s| s.uuid == uuid) {
                continue;
            }
            debug!("Service: {}", uuid);
            recorded.push(Service {
                uuid,
                enumerated: false,
            });
        }

        info!("Found {} services", recorded.len());
        let uuids: Vec<Uuid> = recorded.iter().map(|s| s.uuid).collect();
        self.services.insert(id.clone(), recorded);
        self.sink.on_event(SessionEvent::ServicesDiscovered {
            services: uuids.clone(),
        });
        self.set_phase(Phase::ServicesDiscovered);

        self.outstanding_discoveries = 0;
        for uuid in &uuids {
            match self.adapter.discover_characteristics(uuid) {
                Ok(()) => self.outstanding_discoveries += 1,
                Err(e) => {
                    self.report_failure(&format!("discover characteristics of {}", uuid), e.to_string())
                }
            }
        }

        if self.outstanding_discoveries == 0 {
            self.finish_discovery();
        }
        Ok(())
    }

    pub fn on_characteristics_discovered(
        &mut self,
        service: &Uuid,
        discovered: Vec<DiscoveredCharacteristic>,
    ) -> SessionResult {
        self.expect_phase("characteristics_discovered", &[Phase::ServicesDiscovered])?;

        let id = self
            .active
            .clone()
            .ok_or_else(|| self.unexpected("characteristics_discovered"))?;
        let entry = self
            .services
            .get_mut(&id)
            .and_then(|services| services.iter_mut().find(|s| s.uuid == *service))
            .ok_or(SessionError::UnknownService(*service))?;
        if entry.enumerated {
            return Err(SessionError::UnexpectedState {
                operation: "characteristics_discovered (repeat)",
                phase: self.phase,
            });
        }
        entry.enumerated = true;

        let mut characteristics = Vec::with_capacity(discovered.len());
        for d in discovered {
            let capabilities = CapabilitySet::from_bits(d.properties);
            debug!("Characteristic: {} {}", d.uuid, capabilities);
            self.sink.on_event(SessionEvent::CharacteristicDiscovered {
                service: *service,
                characteristic: d.uuid,
                capabilities,
            });
            self.plan_discovery_actions(d.uuid, capabilities);
            characteristics.push(Characteristic::new(*service, d.uuid, capabilities));
        }
        self.characteristics.insert(*service, characteristics);

        self.outstanding_discoveries = self.outstanding_discoveries.saturating_sub(1);
        if self.outstanding_discoveries == 0 {
            self.finish_discovery();
        }
        Ok(())
    }

    pub fn on_characteristic_value_updated(&mut self, uuid: &Uuid, bytes: &[u8]) -> SessionResult {
        self.expect_phase("value_updated", &[Phase::CharacteristicsDiscovered])?;

        if bytes.is_empty() {
            warn!("Empty value for {}", uuid);
            return Ok(());
        }

        let characteristic = self
            .characteristics
            .values_mut()
            .flat_map(|chars| chars.iter_mut())
            .find(|c| c.uuid == *uuid)
            .ok_or(SessionError::UnknownCharacteristic(*uuid))?;
        characteristic.value = Some(bytes.to_vec());
        trace!("Value for {}: {:02X?}", uuid, bytes);

        match protocol::decode(uuid, bytes) {
            Ok(value) => {
                let role = protocol::profile(uuid).map(|p| p.role);
                debug!("Decoded {:?}: {}", role, value);
                self.sink.on_event(SessionEvent::ValueDecoded {
                    characteristic: *uuid,
                    role,
                    value,
                });
            }
            Err(e) => warn!("Discarding value for {}: {}", uuid, e),
        }
        Ok(())
    }

    pub fn on_read_failed(&mut self, uuid: &Uuid, error: String) -> SessionResult {
        self.expect_phase("read_failed", &[Phase::CharacteristicsDiscovered])?;
        warn!("Read of {} failed: {}", uuid, error);
        self.report_failure(&format!("read {}", uuid), error);
        Ok(())
    }

    /// On success the characteristic is read back; errors are reported, never retried
    pub fn on_write_completed(&mut self, uuid: &Uuid, error: Option<String>) -> SessionResult {
        self.expect_phase("write_completed", &[Phase::CharacteristicsDiscovered])?;

        let characteristic = self
            .characteristics
            .values_mut()
            .flat_map(|chars| chars.iter_mut())
            .find(|c| c.uuid == *uuid)
            .ok_or(SessionError::UnknownCharacteristic(*uuid))?;
        characteristic.write_in_flight = false;
        let capabilities = characteristic.capabilities;

        if let Some(error) = error {
            warn!("Write to {} failed: {}", uuid, error);
            self.sink.on_event(SessionEvent::WriteFailed {
                characteristic: *uuid,
                error,
            });
            return Ok(());
        }

        if capabilities.can_read() {
            debug!("Write to {} acknowledged, reading back", uuid);
            self.issue(PendingAction::Read(*uuid))?;
        } else {
            debug!("Write to {} acknowledged", uuid);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn plan_discovery_actions(&mut self, uuid: Uuid, capabilities: CapabilitySet) {
        let profile = protocol::profile(&uuid);

        if let Some(payload) = profile.and_then(|p| p.write_on_discovery) {
            if capabilities.can_write() {
                self.pending.push_back(PendingAction::Write {
                    characteristic: uuid,
                    bytes: payload.to_vec(),
                    require_ack: capabilities.contains(Capability::Write),
                });
            } else {
                warn!("{} is not writable, skipping discovery write", uuid);
            }
            // Read back happens after the write completes
            return;
        }

        if self.config.auto_notify.contains(&uuid) {
            if capabilities.can_subscribe() {
                self.pending.push_back(PendingAction::Notify(uuid));
            } else {
                warn!("{} does not support notifications", uuid);
            }
        }

        let listed = self.config.auto_read.contains(&uuid);
        if listed || self.config.read_all_readable {
            if capabilities.can_read() {
                self.pending.push_back(PendingAction::Read(uuid));
            } else if listed {
                warn!("{} is not readable, skipping auto-read", uuid);
            }
        }
    }

    fn finish_discovery(&mut self) {
        self.set_phase(Phase::CharacteristicsDiscovered);

        while let Some(action) = self.pending.pop_front() {
            if let Err(e) = self.issue(action) {
                warn!("{}", e);
            }
        }
    }

    fn issue(&mut self, action: PendingAction) -> SessionResult {
        let result = match &action {
            PendingAction::Notify(uuid) => {
                debug!("Enabling notifications on {}", uuid);
                self.adapter.set_notify(uuid, true)
            }
            PendingAction::Read(uuid) => {
                debug!("Reading {}", uuid);
                self.adapter.read_value(uuid)
            }
            PendingAction::Write {
                characteristic,
                bytes,
                require_ack,
            } => {
                debug!("Writing {:02X?} to {}", bytes, characteristic);
                if let Some(c) = self
                    .characteristics
                    .values_mut()
                    .flat_map(|chars| chars.iter_mut())
                    .find(|c| c.uuid == *characteristic)
                {
                    c.write_in_flight = true;
                }
                self.adapter.write_value(characteristic, bytes, *require_ack)
            }
        };

        if let Err(e) = result {
            self.report_failure(&format!("{:?}", action), e.to_string());
            return Err(e.into());
        }
        Ok(())
    }

    /// Drop all connection state, then rescan straight away
    fn recover(&mut self) {
        self.clear_connection();
        self.peripherals.clear();
        self.set_phase(Phase::Disconnected);

        if let Err(e) = self.start_scan() {
            self.report_failure("rescan", e.to_string());
        }
    }

    fn clear_connection(&mut self) {
        self.active = None;
        self.services.clear();
        self.characteristics.clear();
        self.outstanding_discoveries = 0;
        self.pending.clear();
    }

    fn capabilities_of(&self, uuid: &Uuid) -> SessionResult<CapabilitySet> {
        self.characteristic(uuid)
            .map(|c| c.capabilities)
            .ok_or(SessionError::UnknownCharacteristic(*uuid))
    }

    fn set_phase(&mut self, to: Phase) {
        let from = self.phase;
        if from == to {
            return;
        }
        info!("Session phase: {:?} -> {:?}", from, to);
        self.phase = to;
        self.sink.on_event(SessionEvent::PhaseChanged { from, to });
    }

    fn report_failure(&mut self, operation: &str, error: String) {
        self.sink.on_event(SessionEvent::OperationFailed {
            operation: operation.to_string(),
            error,
        });
    }

    fn expect_phase(&self, operation: &'static str, allowed: &[Phase]) -> SessionResult {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(self.unexpected(operation))
        }
    }

    fn expect_active(&self, id: &PeripheralId) -> SessionResult {
        match &self.active {
            Some(active) if active == id => Ok(()),
            _ => Err(SessionError::UnknownPeripheral(id.clone())),
        }
    }

    fn unexpected(&self, operation: &'static str) -> SessionError {
        SessionError::UnexpectedState {
            operation,
            phase: self.phase,
        }
    }
}
