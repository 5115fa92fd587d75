//! Characteristic Capabilities
//!
//! Maps the GATT characteristic property bitmask onto named capabilities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single declared characteristic property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    Broadcast,
    Read,
    WriteWithoutResponse,
    Write,
    Notify,
    Indicate,
    AuthenticatedSignedWrites,
    ExtendedProperties,
    NotifyEncryptionRequired,
    IndicateEncryptionRequired,
}

impl Capability {
    /// Every capability, in bit order
    pub const ALL: [Capability; 10] = [
        Self::Broadcast,
        Self::Read,
        Self::WriteWithoutResponse,
        Self::Write,
        Self::Notify,
        Self::Indicate,
        Self::AuthenticatedSignedWrites,
        Self::ExtendedProperties,
        Self::NotifyEncryptionRequired,
        Self::IndicateEncryptionRequired,
    ];

    /// Property bit for this capability
    pub fn bit(&self) -> u16 {
        match self {
            Self::Broadcast => 0x0001,
            Self::Read => 0x0002,
            Self::WriteWithoutResponse => 0x0004,
            Self::Write => 0x0008,
            Self::Notify => 0x0010,
            Self::Indicate => 0x0020,
            Self::AuthenticatedSignedWrites => 0x0040,
            Self::ExtendedProperties => 0x0080,
            Self::NotifyEncryptionRequired => 0x0100,
            Self::IndicateEncryptionRequired => 0x0200,
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Broadcast => "Broadcast",
            Self::Read => "Read",
            Self::WriteWithoutResponse => "Write Without Response",
            Self::Write => "Write",
            Self::Notify => "Notify",
            Self::Indicate => "Indicate",
            Self::AuthenticatedSignedWrites => "Authenticated Signed Writes",
            Self::ExtendedProperties => "Extended Properties",
            Self::NotifyEncryptionRequired => "Notify Encryption Required",
            Self::IndicateEncryptionRequired => "Indicate Encryption Required",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Immutable set of capabilities decoded from a property bitmask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CapabilitySet(u16);

impl CapabilitySet {
    /// Decode a property bitmask. Unknown bits are dropped.
    pub fn from_bits(bits: u16) -> Self {
        let known = Capability::ALL.iter().fold(0, |mask, c| mask | c.bit());
        Self(bits & known)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Capabilities present in this set, in bit order
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL
            .iter()
            .copied()
            .filter(move |c| self.contains(*c))
    }

    pub fn can_read(&self) -> bool {
        self.contains(Capability::Read)
    }

    /// Either acknowledged or unacknowledged writes are allowed
    pub fn can_write(&self) -> bool {
        self.contains(Capability::Write) || self.contains(Capability::WriteWithoutResponse)
    }

    /// Either notifications or indications are allowed
    pub fn can_subscribe(&self) -> bool {
        self.contains(Capability::Notify) || self.contains(Capability::Indicate)
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().fold(0, |mask, c| mask | c.bit()))
    }
}

impl Serialize for CapabilitySet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<&str> = self.iter().map(|c| c.label()).collect();
        write!(f, "[{}]", labels.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_notify_mask() {
        let set = CapabilitySet::from_bits(0x02 | 0x10);
        let caps: Vec<Capability> = set.iter().collect();
        assert_eq!(caps, vec![Capability::Read, Capability::Notify]);
        assert!(set.can_read());
        assert!(set.can_subscribe());
        assert!(!set.can_write());
    }

    #[test]
    fn test_every_bit_is_independent() {
        for capability in Capability::ALL {
            let set = CapabilitySet::from_bits(capability.bit());
            assert_eq!(set.iter().collect::<Vec<_>>(), vec![capability]);
        }
        assert_eq!(CapabilitySet::from_bits(0x03FF).iter().count(), 10);
    }

    #[test]
    fn test_unknown_bits_are_ignored() {
        let set = CapabilitySet::from_bits(0xFC00);
        assert!(set.is_empty());
        assert_eq!(set.to_string(), "[]");
    }

    #[test]
    fn test_labels() {
        let set: CapabilitySet = [Capability::WriteWithoutResponse, Capability::Indicate]
            .into_iter()
            .collect();
        assert_eq!(set.to_string(), "[Write Without Response, Indicate]");
        assert_eq!(set.bits(), 0x24);
    }
}
