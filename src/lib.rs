//! GATT session manager for a BLE fitness band.
//!
//! Scans for the band, connects, walks its services and characteristics, and
//! decodes steps, battery, time, heart rate and device info into typed values.
//! The radio is reached through the [`RadioAdapter`] port; [`BtleAdapter`] is
//! the btleplug implementation.

pub mod domain;
pub mod infrastructure;

pub use domain::adapter::{AdapterEvent, RadioAdapter};
pub use domain::models::{DecodedValue, Phase, SessionEvent};
pub use domain::session::{Session, SessionEventSink};
pub use domain::settings::{SessionConfig, Settings, SettingsService};
pub use infrastructure::bluetooth::{BtleAdapter, SessionCommand, SessionHandle, SessionRunner};
