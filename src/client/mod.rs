//! Client Layer
//!
//! - [`discover`]: introspection, daftar contract dari registry
//! - [`DynamicClient`]: call dan subscribe memakai schema hasil discovery
//! - [`ResultBoard`]: state explorer (status line + riwayat response)

mod board;
mod dynamic;
mod introspection;

pub use board::{
    BoardEntry, ResultBoard, SharedBoard, CALL_HISTORY, STATUS_CALL_FAILED, STATUS_CALL_OK,
    STATUS_CONNECTION_FAILED, STATUS_DISCOVERED, STATUS_DISCOVERING, STATUS_READY, STREAM_HISTORY,
};
pub use dynamic::{DynamicClient, Response};
pub use introspection::{discover, parse_snapshot};
