use crate::domain::capabilities::CapabilitySet;
use crate::domain::codec::BandTime;
use crate::domain::protocol::CharacteristicRole;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Stable identifier of a remote peripheral (platform UUID or address)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PeripheralId(String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    Scanning,
    PeripheralSelected,
    ServicesDiscovered,
    CharacteristicsDiscovered,
    Disconnected,
}

impl Phase {
    /// Phases in which a peripheral link exists or is being established
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            Self::PeripheralSelected | Self::ServicesDiscovered | Self::CharacteristicsDiscovered
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Discovered,
    Connecting,
    Connected,
}

/// A peripheral seen while scanning
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Peripheral {
    pub id: PeripheralId,
    pub name: String,
    pub rssi: Option<i16>,
    pub state: ConnectionState,
}

/// One advertisement sighting. Only used for filtering, never retained.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub peripheral_id: PeripheralId,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
}

impl Advertisement {
    pub fn new(peripheral_id: PeripheralId, local_name: Option<String>, rssi: Option<i16>) -> Self {
        Self {
            peripheral_id,
            local_name,
            rssi,
            manufacturer_data: HashMap::new(),
        }
    }

    /// Advertised local name, falling back to the peripheral identifier
    pub fn display_name(&self) -> String {
        match &self.local_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => self.peripheral_id.to_string(),
        }
    }
}

/// A GATT service on the connected peripheral
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Service {
    pub uuid: Uuid,
    /// Characteristic discovery has completed for this service
    pub enumerated: bool,
}

/// A GATT characteristic on the connected peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub service: Uuid,
    pub capabilities: CapabilitySet,
    /// Latest raw value from a read or a notification
    pub value: Option<Vec<u8>>,
    pub write_in_flight: bool,
}

impl Characteristic {
    pub fn new(service: Uuid, uuid: Uuid, capabilities: CapabilitySet) -> Self {
        Self {
            uuid,
            service,
            capabilities,
            value: None,
            write_in_flight: false,
        }
    }
}

/// Semantic value decoded from a characteristic payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum DecodedValue {
    Steps(u32),
    Battery(u8),
    Time(BandTime),
    HeartRate(u16),
    DeviceId(u32),
    DeviceName(String),
    /// Characteristic without a known decoder
    Raw(Vec<u8>),
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Steps(steps) => write!(f, "{} steps", steps),
            Self::Battery(level) => write!(f, "{}% charged", level),
            Self::Time(time) => write!(f, "{}", time),
            Self::HeartRate(bpm) => write!(f, "{} bpm", bpm),
            Self::DeviceId(id) => write!(f, "device id {}", id),
            Self::DeviceName(name) => f.write_str(name),
            Self::Raw(bytes) => write!(f, "{:02X?}", bytes),
        }
    }
}

/// Notification delivered to the session event sink
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SessionEvent {
    PhaseChanged {
        from: Phase,
        to: Phase,
    },
    PeripheralDiscovered {
        peripheral: Peripheral,
    },
    Connected {
        peripheral: PeripheralId,
    },
    ServicesDiscovered {
        services: Vec<Uuid>,
    },
    CharacteristicDiscovered {
        service: Uuid,
        characteristic: Uuid,
        capabilities: CapabilitySet,
    },
    ValueDecoded {
        characteristic: Uuid,
        role: Option<CharacteristicRole>,
        value: DecodedValue,
    },
    WriteFailed {
        characteristic: Uuid,
        error: String,
    },
    OperationFailed {
        operation: String,
        error: String,
    },
    Disconnected {
        peripheral: PeripheralId,
        error: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_fallback() {
        let id = PeripheralId::new("C8:0F:10:AA:BB:CC");
        let named = Advertisement::new(id.clone(), Some("MI Band 2".to_string()), Some(-60));
        assert_eq!(named.display_name(), "MI Band 2");

        let unnamed = Advertisement::new(id.clone(), Some(String::new()), None);
        assert_eq!(unnamed.display_name(), "C8:0F:10:AA:BB:CC");
    }

    #[test]
    fn test_connected_phases() {
        assert!(!Phase::Idle.is_connected());
        assert!(!Phase::Scanning.is_connected());
        assert!(Phase::PeripheralSelected.is_connected());
        assert!(Phase::CharacteristicsDiscovered.is_connected());
        assert!(!Phase::Disconnected.is_connected());
    }

    #[test]
    fn test_event_json_shape() {
        let event = SessionEvent::ValueDecoded {
            characteristic: Uuid::nil(),
            role: None,
            value: DecodedValue::HeartRate(72),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "valueDecoded");
        assert_eq!(json["value"]["kind"], "heartRate");
        assert_eq!(json["value"]["value"], 72);
    }
}
