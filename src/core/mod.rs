//! Core module: error taxonomy, konfigurasi, dan logging
//!
//! Dipakai oleh semua layer lain (protocol, network, client, registry).

mod config;
mod error;
pub mod logging;

pub use config::{ClientConfig, Dialect, RegistryConfig};
pub(crate) use error::lift_transport;
pub use error::{ConnectionError, DecodeError, EncodeError, Error, Result, SchemaError, TransportError};
