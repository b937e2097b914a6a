//! Protocol Layer: schema mini-language, codec, dan contract records
//!
//! Prinsip desain:
//! - Flat Binary: numerik little-endian, tanpa tag atau framing per field
//! - Fixed-size records: layout contract bisa dibaca dengan offset konstan
//! - Schema dan data selalu berjalan bersama ([`Record`])

mod codec;
mod contract;
mod schema;

pub use codec::{decode, encode, FieldValues, Record, Strictness, Value};
pub use contract::{
    CommandId, Contract, ContractKind, ContractRecords, RecordLayout, CURRENT_RECORD_SIZE,
    LEGACY_RECORD_SIZE,
};
pub use schema::{Field, FieldType, Schema, MAX_CHAR_WIDTH};
