pub mod adapter;
pub mod capabilities;
pub mod codec;
pub mod error;
pub mod models;
pub mod protocol;
pub mod session;
pub mod settings;
