use crate::domain::capabilities::Capability;
use crate::domain::models::{PeripheralId, Phase};
use thiserror::Error;
use uuid::Uuid;

/// Failure to decode a characteristic value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("malformed {field} payload: expected at least {expected} bytes, got {actual}")]
    MalformedPayload {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("malformed {field} payload: {reason}")]
    InvalidText { field: &'static str, reason: String },
}

/// Failure reported by the radio adapter when a request is issued
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("bluetooth backend error: {0}")]
    Backend(String),
    #[error("no bluetooth adapter found")]
    NoAdapter,
    #[error("peripheral {0} is not known to the adapter")]
    UnknownPeripheral(PeripheralId),
    #[error("service {0} is not known to the adapter")]
    UnknownService(Uuid),
    #[error("characteristic {0} is not known to the adapter")]
    UnknownCharacteristic(Uuid),
    #[error("no peripheral is connected")]
    NotConnected,
    #[error("adapter state lock poisoned")]
    LockPoisoned,
}

/// Rejection of a session operation
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{operation} is not valid while {phase:?}")]
    UnexpectedState {
        operation: &'static str,
        phase: Phase,
    },
    #[error("unknown peripheral {0}")]
    UnknownPeripheral(PeripheralId),
    #[error("unknown service {0}")]
    UnknownService(Uuid),
    #[error("unknown characteristic {0}")]
    UnknownCharacteristic(Uuid),
    #[error("characteristic {characteristic} does not support {capability}")]
    CapabilityDenied {
        characteristic: Uuid,
        capability: Capability,
    },
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}
