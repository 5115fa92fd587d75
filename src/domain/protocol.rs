//! Fitness Band Protocol
//!
//! Fixed table of the services and characteristics the band exposes, the
//! decoder for each characteristic value, and what the session does with a
//! characteristic once it has been discovered.

use crate::domain::codec::{self, HEART_RATE_START_OPCODE};
use crate::domain::error::CodecError;
use crate::domain::models::DecodedValue;
use serde::Serialize;
use uuid::Uuid;

/// Bluetooth SIG base UUID (`00000000-0000-1000-8000-00805F9B34FB`)
pub const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit assigned number onto the Bluetooth base UUID
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Heart Rate service
pub const HEART_RATE_SERVICE_UUID: Uuid = uuid_from_u16(0x180D);
/// Vendor service carrying steps, battery and device info
pub const BAND_SERVICE_UUID: Uuid = uuid_from_u16(0xFEE0);

pub const CURRENT_TIME_UUID: Uuid = uuid_from_u16(0x2A2B);
pub const HEART_RATE_MEASUREMENT_UUID: Uuid = uuid_from_u16(0x2A37);
pub const HEART_RATE_CONTROL_POINT_UUID: Uuid = uuid_from_u16(0x2A39);
pub const DEVICE_INFO_UUID: Uuid = uuid_from_u16(0xFF01);
pub const DEVICE_NAME_UUID: Uuid = uuid_from_u16(0xFF02);
pub const STEPS_UUID: Uuid = uuid_from_u16(0xFF06);
pub const BATTERY_UUID: Uuid = uuid_from_u16(0xFF0C);
pub const PAIRING_TEST_UUID: Uuid = uuid_from_u16(0xFF0D);
/// Vendor authentication characteristic
pub const VENDOR_AUTH_UUID: Uuid = Uuid::from_u128(0x00000004_0000_3512_2118_0009af100700);

/// Payload written to the pairing/test characteristic when it is discovered
pub const PAIRING_TEST_PAYLOAD: &[u8] = &[0x01];

/// Arguments of the "start heart-rate measurement" control-point command
pub const HEART_RATE_START_ARGS: &[u8] = &[0x01, 0x01];

/// Semantic role of a known characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CharacteristicRole {
    BatteryLevel,
    StepCount,
    DeviceInfo,
    DeviceName,
    CurrentTime,
    HeartRateMeasurement,
    HeartRateControlPoint,
    PairingTest,
    VendorAuth,
}

pub type Decoder = fn(&[u8]) -> Result<DecodedValue, CodecError>;

/// Protocol table entry for one characteristic
#[derive(Debug)]
pub struct CharacteristicProfile {
    pub uuid: Uuid,
    pub role: CharacteristicRole,
    pub decoder: Option<Decoder>,
    /// Default member of the auto-read set
    pub read_on_discovery: bool,
    /// Default member of the auto-notify set
    pub notify_on_discovery: bool,
    /// Payload written as soon as the characteristic is discovered
    pub write_on_discovery: Option<&'static [u8]>,
}

fn steps(bytes: &[u8]) -> Result<DecodedValue, CodecError> {
    codec::decode_steps(bytes).map(DecodedValue::Steps)
}

fn battery(bytes: &[u8]) -> Result<DecodedValue, CodecError> {
    codec::decode_battery(bytes).map(DecodedValue::Battery)
}

fn time(bytes: &[u8]) -> Result<DecodedValue, CodecError> {
    codec::decode_time(bytes).map(DecodedValue::Time)
}

fn heart_rate(bytes: &[u8]) -> Result<DecodedValue, CodecError> {
    codec::decode_heart_rate(bytes).map(DecodedValue::HeartRate)
}

fn device_id(bytes: &[u8]) -> Result<DecodedValue, CodecError> {
    codec::decode_device_id(bytes).map(DecodedValue::DeviceId)
}

fn device_name(bytes: &[u8]) -> Result<DecodedValue, CodecError> {
    codec::decode_device_name(bytes).map(DecodedValue::DeviceName)
}

pub static PROFILES: &[CharacteristicProfile] = &[
    CharacteristicProfile {
        uuid: BATTERY_UUID,
        role: CharacteristicRole::BatteryLevel,
        decoder: Some(battery),
        read_on_discovery: false,
        notify_on_discovery: false,
        write_on_discovery: None,
    },
    CharacteristicProfile {
        uuid: STEPS_UUID,
        role: CharacteristicRole::StepCount,
        decoder: Some(steps),
        read_on_discovery: false,
        notify_on_discovery: false,
        write_on_discovery: None,
    },
    CharacteristicProfile {
        uuid: DEVICE_INFO_UUID,
        role: CharacteristicRole::DeviceInfo,
        decoder: Some(device_id),
        read_on_discovery: false,
        notify_on_discovery: false,
        write_on_discovery: None,
    },
    CharacteristicProfile {
        uuid: DEVICE_NAME_UUID,
        role: CharacteristicRole::DeviceName,
        decoder: Some(device_name),
        read_on_discovery: false,
        notify_on_discovery: false,
        write_on_discovery: None,
    },
    CharacteristicProfile {
        uuid: CURRENT_TIME_UUID,
        role: CharacteristicRole::CurrentTime,
        decoder: Some(time),
        read_on_discovery: true,
        notify_on_discovery: false,
        write_on_discovery: None,
    },
    CharacteristicProfile {
        uuid: HEART_RATE_MEASUREMENT_UUID,
        role: CharacteristicRole::HeartRateMeasurement,
        decoder: Some(heart_rate),
        read_on_discovery: true,
        notify_on_discovery: true,
        write_on_discovery: None,
    },
    CharacteristicProfile {
        uuid: HEART_RATE_CONTROL_POINT_UUID,
        role: CharacteristicRole::HeartRateControlPoint,
        decoder: None,
        read_on_discovery: true,
        notify_on_discovery: false,
        write_on_discovery: None,
    },
    CharacteristicProfile {
        uuid: PAIRING_TEST_UUID,
        role: CharacteristicRole::PairingTest,
        decoder: None,
        read_on_discovery: false,
        notify_on_discovery: false,
        write_on_discovery: Some(PAIRING_TEST_PAYLOAD),
    },
    CharacteristicProfile {
        uuid: VENDOR_AUTH_UUID,
        role: CharacteristicRole::VendorAuth,
        decoder: None,
        read_on_discovery: true,
        notify_on_discovery: false,
        write_on_discovery: None,
    },
];

/// Look up the protocol entry for a characteristic
pub fn profile(uuid: &Uuid) -> Option<&'static CharacteristicProfile> {
    PROFILES.iter().find(|p| p.uuid == *uuid)
}

/// Decode a characteristic value through the protocol table.
/// Characteristics without a decoder yield the raw bytes.
pub fn decode(uuid: &Uuid, bytes: &[u8]) -> Result<DecodedValue, CodecError> {
    match profile(uuid).and_then(|p| p.decoder) {
        Some(decoder) => decoder(bytes),
        None => Ok(DecodedValue::Raw(bytes.to_vec())),
    }
}

pub fn default_auto_read() -> Vec<Uuid> {
    PROFILES
        .iter()
        .filter(|p| p.read_on_discovery)
        .map(|p| p.uuid)
        .collect()
}

pub fn default_auto_notify() -> Vec<Uuid> {
    PROFILES
        .iter()
        .filter(|p| p.notify_on_discovery)
        .map(|p| p.uuid)
        .collect()
}

/// Control-point payload that starts a heart-rate measurement
pub fn start_heart_rate_command() -> Vec<u8> {
    codec::encode_command(HEART_RATE_START_OPCODE, HEART_RATE_START_ARGS)
}

/// Parse a UUID in full form or as a 16-bit short form (`2A37`, `0x2A37`)
pub fn parse_uuid(uuid_str: &str) -> Result<Uuid, uuid::Error> {
    let trimmed = uuid_str.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if hex.len() == 4 {
        if let Ok(short) = u16::from_str_radix(hex, 16) {
            return Ok(uuid_from_u16(short));
        }
    }
    Uuid::parse_str(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_uuid_expansion() {
        assert_eq!(
            HEART_RATE_MEASUREMENT_UUID.to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            VENDOR_AUTH_UUID.to_string(),
            "00000004-0000-3512-2118-0009af100700"
        );
    }

    #[test]
    fn test_parse_uuid() {
        assert_eq!(parse_uuid("2A37").unwrap(), HEART_RATE_MEASUREMENT_UUID);
        assert_eq!(parse_uuid("0xff0c").unwrap(), BATTERY_UUID);
        assert_eq!(
            parse_uuid("00000004-0000-3512-2118-0009AF100700").unwrap(),
            VENDOR_AUTH_UUID
        );
        assert!(parse_uuid("not-a-uuid").is_err());
    }

    #[test]
    fn test_table_is_unique() {
        for (i, a) in PROFILES.iter().enumerate() {
            for b in &PROFILES[i + 1..] {
                assert_ne!(a.uuid, b.uuid);
                assert_ne!(a.role, b.role);
            }
        }
    }

    #[test]
    fn test_decode_dispatch() {
        assert_eq!(
            decode(&STEPS_UUID, &[0xE8, 0x03, 0x00, 0x00]).unwrap(),
            DecodedValue::Steps(1000)
        );
        assert_eq!(
            decode(&HEART_RATE_MEASUREMENT_UUID, &[0x00, 0x48]).unwrap(),
            DecodedValue::HeartRate(72)
        );
        assert_eq!(
            decode(&HEART_RATE_CONTROL_POINT_UUID, &[0x15]).unwrap(),
            DecodedValue::Raw(vec![0x15])
        );
        assert!(decode(&CURRENT_TIME_UUID, &[0xE3]).is_err());
    }

    #[test]
    fn test_default_sets() {
        let read = default_auto_read();
        assert!(read.contains(&CURRENT_TIME_UUID));
        assert!(read.contains(&VENDOR_AUTH_UUID));
        assert!(!read.contains(&PAIRING_TEST_UUID));
        assert_eq!(default_auto_notify(), vec![HEART_RATE_MEASUREMENT_UUID]);
    }

    #[test]
    fn test_start_heart_rate_command() {
        assert_eq!(start_heart_rate_command(), vec![0x15, 0x01, 0x01]);
    }
}
