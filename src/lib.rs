//! wirecall - Self-describing binary RPC
//!
//! Arsitektur:
//! - Discovery: registry mengirim daftar contract sebagai record biner fixed-size
//! - Schema Codec: bahasa tipe mini (`u32:date|c16:summary|str:name`)
//! - Transport: unary call (raw TCP / HTTP) dan push stream (WebSocket) di atas mio
//! - Dua client: proxy hasil generate (statis) dan dynamic client (runtime)

pub mod client;
pub mod core;
pub mod generator;
pub mod network;
pub mod protocol;
pub mod registry;

pub use crate::client::{discover, DynamicClient, Response, ResultBoard};
pub use crate::core::{
    ClientConfig, ConnectionError, DecodeError, Dialect, EncodeError, Error, RegistryConfig,
    Result, SchemaError, TransportError,
};
pub use crate::network::{PendingCall, Session, StreamState, Subscription, Transport};
pub use crate::protocol::{
    decode, encode, CommandId, Contract, ContractKind, Record, RecordLayout, Schema, Strictness,
    Value,
};
pub use crate::registry::{Registry, RegistryServer};
