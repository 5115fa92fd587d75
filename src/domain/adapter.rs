//! Radio Adapter Port
//!
//! Requests flow out of the session through [`RadioAdapter`]; their outcomes
//! flow back in as [`AdapterEvent`]s, in whatever order the radio produces them.

use crate::domain::error::AdapterError;
use crate::domain::models::{Advertisement, PeripheralId};
use uuid::Uuid;

/// Outward GATT requests. Every call only *requests* the operation; the
/// result arrives later as an [`AdapterEvent`].
pub trait RadioAdapter {
    fn start_scan(&mut self) -> Result<(), AdapterError>;
    fn stop_scan(&mut self) -> Result<(), AdapterError>;
    fn connect(&mut self, peripheral: &PeripheralId) -> Result<(), AdapterError>;
    fn disconnect(&mut self, peripheral: &PeripheralId) -> Result<(), AdapterError>;
    fn discover_services(&mut self, peripheral: &PeripheralId) -> Result<(), AdapterError>;
    fn discover_characteristics(&mut self, service: &Uuid) -> Result<(), AdapterError>;
    fn read_value(&mut self, characteristic: &Uuid) -> Result<(), AdapterError>;
    fn set_notify(&mut self, characteristic: &Uuid, enabled: bool) -> Result<(), AdapterError>;
    fn write_value(
        &mut self,
        characteristic: &Uuid,
        bytes: &[u8],
        require_ack: bool,
    ) -> Result<(), AdapterError>;

    /// Release the radio. No events are delivered afterwards.
    fn shutdown(&mut self) {}
}

/// Characteristic as reported by discovery: UUID and raw property bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub properties: u16,
}

/// Event delivered by the radio adapter
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    ScanStarted,
    ScanStopped,
    /// The radio could not start listening for advertisements
    ScanFailed {
        error: String,
    },
    AdvertisementReceived(Advertisement),
    Connected(PeripheralId),
    ConnectionFailed {
        peripheral: PeripheralId,
        error: String,
    },
    Disconnected {
        peripheral: PeripheralId,
        error: Option<String>,
    },
    ServicesDiscovered {
        peripheral: PeripheralId,
        services: Vec<Uuid>,
    },
    CharacteristicsDiscovered {
        service: Uuid,
        characteristics: Vec<DiscoveredCharacteristic>,
    },
    CharacteristicValueUpdated {
        characteristic: Uuid,
        bytes: Vec<u8>,
    },
    ReadFailed {
        characteristic: Uuid,
        error: String,
    },
    WriteCompleted {
        characteristic: Uuid,
        error: Option<String>,
    },
}
