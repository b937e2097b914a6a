//! Network Layer: non-blocking I/O di atas mio
//!
//! Fitur:
//! - Satu event loop single-threaded untuk semua exchange
//! - Unary call lewat raw TCP atau HTTP/1.1
//! - Push stream lewat WebSocket (frame biner)
//! - HTTP dan WebSocket framing juga dipakai oleh registry server

mod connection;
mod event_loop;
pub mod http;
mod session;
mod subscription;
pub mod websocket;

pub(crate) use connection::{Connection, ReadStatus};
pub use event_loop::PendingCall;
pub use session::{Session, Transport};
pub use subscription::{StreamState, Subscription};
