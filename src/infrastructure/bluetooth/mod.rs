//! Bluetooth Module
//!
//! Connects the GATT session to the host radio.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  SessionCommand   ┌───────────────────────┐  SessionEvent
//! │  Front end   │ ────────────────▶ │     SessionRunner     │ ──────────────▶ sink
//! └──────────────┘                   │  (single task, owns   │
//!                                    │   the Session)        │
//!                                    └──────┬────────▲───────┘
//!                              RadioAdapter │        │ AdapterEvent
//!                                  requests ▼        │ (mpsc queue)
//!                                    ┌───────────────┴───────┐
//!                                    │      BtleAdapter      │
//!                                    │  (btleplug, one task  │
//!                                    │   per BLE operation)  │
//!                                    └───────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`btle`] - Radio adapter backed by btleplug
//! - [`service`] - Session runner and command handle

pub mod btle;
pub mod service;

// Re-export main types for convenience
pub use btle::BtleAdapter;
pub use service::{SessionCommand, SessionHandle, SessionRunner};
