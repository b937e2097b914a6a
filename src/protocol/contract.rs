//! Contract Record Format (fixed layout)
//!
//! Current layout, 128 bytes:
//! ┌────────┬────────┬──────────────────────────────┐
//! │ offset │ length │ field                        │
//! ├────────┼────────┼──────────────────────────────┤
//! │ 0      │ 1      │ id (char)                    │
//! │ 1      │ 31     │ name (UTF-8, NUL padded)     │
//! │ 32     │ 4      │ response_size (u32 LE)       │
//! │ 36     │ 4      │ kind (u32 LE, 0=unary 1=stream)│
//! │ 40     │ 44     │ request_schema               │
//! │ 84     │ 44     │ response_schema              │
//! └────────┴────────┴──────────────────────────────┘
//!
//! Legacy layout, 100 bytes (response-only, selalu unary):
//! id(1) | name(31) | response_size(4) | schema(64)
//!
//! Tidak ada negosiasi versi: consumer memilih layout secara eksplisit.

use std::fmt;

use tracing::warn;

use super::schema::Schema;
use crate::core::SchemaError;

/// Single-byte command identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(u8);

impl CommandId {
    /// Reserved id of the introspection exchange.
    pub const DISCOVERY: CommandId = CommandId(b'?');

    pub const fn new(byte: u8) -> Self {
        Self(byte)
    }

    /// `None` for chars that do not fit in a single byte.
    pub fn from_char(c: char) -> Option<Self> {
        u8::try_from(c as u32).ok().map(Self)
    }

    #[inline(always)]
    pub fn as_byte(self) -> u8 {
        self.0
    }

    pub fn as_char(self) -> char {
        self.0 as char
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractKind {
    /// Single request, single response
    Unary = 0,
    /// Server-pushed sequence of records
    Stream = 1,
}

impl ContractKind {
    #[inline(always)]
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Unary),
            1 => Some(Self::Stream),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unary => "unary",
            Self::Stream => "stream",
        }
    }
}

/// One command exposed by a registry
#[derive(Debug, Clone, PartialEq)]
pub struct Contract {
    pub id: CommandId,
    pub name: String,
    pub kind: ContractKind,
    pub request_schema: Schema,
    pub response_schema: Schema,
    /// Fixed response length in bytes, 0 means variable.
    pub response_size: u32,
}

impl Contract {
    pub fn is_stream(&self) -> bool {
        self.kind == ContractKind::Stream
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordLayout {
    /// 128-byte record with kind and request schema.
    #[default]
    Current,
    /// 100-byte response-only record.
    Legacy,
}

pub const CURRENT_RECORD_SIZE: usize = 128;
pub const LEGACY_RECORD_SIZE: usize = 100;

const NAME: (usize, usize) = (1, 31);
const RESPONSE_SIZE_OFFSET: usize = 32;
const KIND_OFFSET: usize = 36;
const REQUEST_SCHEMA: (usize, usize) = (40, 44);
const RESPONSE_SCHEMA: (usize, usize) = (84, 44);
const LEGACY_SCHEMA: (usize, usize) = (36, 64);

impl RecordLayout {
    #[inline(always)]
    pub const fn record_size(self) -> usize {
        match self {
            Self::Current => CURRENT_RECORD_SIZE,
            Self::Legacy => LEGACY_RECORD_SIZE,
        }
    }

    /// Parse one record. `record` must be exactly `record_size()` bytes.
    pub fn parse(self, record: &[u8]) -> Result<Contract, SchemaError> {
        debug_assert_eq!(record.len(), self.record_size());

        let id = CommandId(record[0]);
        let name = padded_text(slot(record, NAME));
        let response_size = read_u32(record, RESPONSE_SIZE_OFFSET);

        match self {
            Self::Current => {
                let raw_kind = read_u32(record, KIND_OFFSET);
                let kind = ContractKind::from_u32(raw_kind).unwrap_or_else(|| {
                    warn!(%id, raw_kind, "unknown contract kind, treating as unary");
                    ContractKind::Unary
                });
                Ok(Contract {
                    id,
                    name,
                    kind,
                    request_schema: Schema::parse(&padded_text(slot(record, REQUEST_SCHEMA)))?,
                    response_schema: Schema::parse(&padded_text(slot(record, RESPONSE_SCHEMA)))?,
                    response_size,
                })
            }
            Self::Legacy => Ok(Contract {
                id,
                name,
                kind: ContractKind::Unary,
                request_schema: Schema::empty(),
                response_schema: Schema::parse(&padded_text(slot(record, LEGACY_SCHEMA)))?,
                response_size,
            }),
        }
    }

    /// Write one record. Text longer than its slot is cut so at least one NUL
    /// terminator remains, the same way the registry fills its records.
    pub fn write(self, contract: &Contract, out: &mut Vec<u8>) {
        let start = out.len();
        out.resize(start + self.record_size(), 0);
        let record = &mut out[start..];

        record[0] = contract.id.as_byte();
        put_text(record, NAME, &contract.name);
        record[RESPONSE_SIZE_OFFSET..RESPONSE_SIZE_OFFSET + 4]
            .copy_from_slice(&contract.response_size.to_le_bytes());

        match self {
            Self::Current => {
                record[KIND_OFFSET..KIND_OFFSET + 4]
                    .copy_from_slice(&(contract.kind as u32).to_le_bytes());
                put_text(record, REQUEST_SCHEMA, contract.request_schema.as_str());
                put_text(record, RESPONSE_SCHEMA, contract.response_schema.as_str());
            }
            Self::Legacy => {
                put_text(record, LEGACY_SCHEMA, contract.response_schema.as_str());
            }
        }
    }
}

/// Iterator over complete records of a discovery payload
///
/// A trailing chunk shorter than one record is dropped.
pub struct ContractRecords<'a> {
    chunks: std::slice::ChunksExact<'a, u8>,
    layout: RecordLayout,
}

impl<'a> ContractRecords<'a> {
    pub fn new(payload: &'a [u8], layout: RecordLayout) -> Self {
        Self {
            chunks: payload.chunks_exact(layout.record_size()),
            layout,
        }
    }

    /// Bytes of the incomplete trailing record, if any.
    pub fn partial_tail(&self) -> usize {
        self.chunks.remainder().len()
    }
}

impl<'a> Iterator for ContractRecords<'a> {
    type Item = Result<Contract, SchemaError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.chunks.next().map(|chunk| self.layout.parse(chunk))
    }
}

#[inline(always)]
fn slot(record: &[u8], (offset, len): (usize, usize)) -> &[u8] {
    &record[offset..offset + len]
}

#[inline(always)]
fn read_u32(record: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&record[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

/// NUL padded text: stop at the first NUL, trim whitespace.
fn padded_text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

fn put_text(record: &mut [u8], (offset, len): (usize, usize), text: &str) {
    let bytes = text.as_bytes();
    let n = bytes.len().min(len - 1);
    record[offset..offset + n].copy_from_slice(&bytes[..n]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weather() -> Contract {
        Contract {
            id: CommandId::new(b'1'),
            name: "GetWeatherForecast".into(),
            kind: ContractKind::Unary,
            request_schema: Schema::empty(),
            response_schema: Schema::parse("u32:date|i32:temp|c16:summary").unwrap(),
            response_size: 24,
        }
    }

    #[test]
    fn test_current_layout_offsets() {
        let contract = Contract {
            id: CommandId::new(b'4'),
            name: "RegisterUser".into(),
            kind: ContractKind::Stream,
            request_schema: Schema::parse("str:name|str:email").unwrap(),
            response_schema: Schema::parse("u32:id").unwrap(),
            response_size: 0,
        };
        let mut buf = Vec::new();
        RecordLayout::Current.write(&contract, &mut buf);

        assert_eq!(buf.len(), 128);
        assert_eq!(buf[0], b'4');
        assert_eq!(&buf[1..13], b"RegisterUser");
        assert_eq!(buf[13], 0);
        assert_eq!(&buf[32..36], &0u32.to_le_bytes());
        assert_eq!(&buf[36..40], &1u32.to_le_bytes());
        assert_eq!(&buf[40..58], b"str:name|str:email");
        assert_eq!(&buf[84..90], b"u32:id");

        assert_eq!(RecordLayout::Current.parse(&buf).unwrap(), contract);
    }

    #[test]
    fn test_legacy_layout_is_unary_response_only() {
        let mut buf = vec![0u8; LEGACY_RECORD_SIZE];
        buf[0] = b'2';
        buf[1..16].copy_from_slice(b"GetSystemStatus");
        buf[32..36].copy_from_slice(&2u32.to_le_bytes());
        buf[36..45].copy_from_slice(b"c2:status");

        let contract = RecordLayout::Legacy.parse(&buf).unwrap();
        assert_eq!(contract.id.as_char(), '2');
        assert_eq!(contract.name, "GetSystemStatus");
        assert_eq!(contract.kind, ContractKind::Unary);
        assert!(contract.request_schema.is_empty());
        assert_eq!(contract.response_schema.as_str(), "c2:status");
        assert_eq!(contract.response_size, 2);
    }

    #[test]
    fn test_records_drop_partial_tail() {
        let mut payload = Vec::new();
        RecordLayout::Current.write(&weather(), &mut payload);
        RecordLayout::Current.write(&weather(), &mut payload);
        payload.extend_from_slice(&[b'9'; 50]);

        let mut records = ContractRecords::new(&payload, RecordLayout::Current);
        assert_eq!(records.partial_tail(), 50);
        assert!(records.next().unwrap().is_ok());
        assert!(records.next().unwrap().is_ok());
        assert!(records.next().is_none());
    }

    #[test]
    fn test_name_and_schema_are_trimmed() {
        let mut buf = Vec::new();
        let mut contract = weather();
        contract.name = "  Padded  ".into();
        RecordLayout::Current.write(&contract, &mut buf);

        let parsed = RecordLayout::Current.parse(&buf).unwrap();
        assert_eq!(parsed.name, "Padded");
    }

    #[test]
    fn test_long_name_keeps_terminator() {
        let mut contract = weather();
        contract.name = "X".repeat(40);
        let mut buf = Vec::new();
        RecordLayout::Current.write(&contract, &mut buf);

        assert_eq!(buf[31], 0);
        assert_eq!(RecordLayout::Current.parse(&buf).unwrap().name.len(), 30);
    }

    #[test]
    fn test_unknown_kind_falls_back_to_unary() {
        let mut buf = Vec::new();
        RecordLayout::Current.write(&weather(), &mut buf);
        buf[36..40].copy_from_slice(&7u32.to_le_bytes());

        assert_eq!(
            RecordLayout::Current.parse(&buf).unwrap().kind,
            ContractKind::Unary
        );
    }

    #[test]
    fn test_command_id_from_char() {
        assert_eq!(CommandId::from_char('L'), Some(CommandId::new(b'L')));
        assert_eq!(CommandId::from_char('✓'), None);
        assert_eq!(CommandId::DISCOVERY.to_string(), "?");
    }
}
