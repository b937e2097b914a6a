//! Schema mini-language
//!
//! Grammar:
//! ```text
//! schema := field ('|' field)*
//! field  := type ':' name
//! type   := 'u8' | 'u32' | 'i32' | 'f32' | 'c' DIGITS | 'str'
//! ```
//!
//! Schema diturunkan murni dari teksnya: teks yang sama selalu menghasilkan
//! daftar field yang sama, dengan urutan yang sama.

use std::collections::HashSet;
use std::fmt;

use crate::core::SchemaError;

/// Wire type of a single field. Numerics are little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    U8,
    U32,
    I32,
    F32,
    /// Fixed-width char block, NUL padded.
    Chars(usize),
    /// u32 LE length prefix followed by UTF-8 bytes.
    Str,
}

impl FieldType {
    fn parse(ty: &str) -> Option<Self> {
        match ty {
            "u8" => Some(Self::U8),
            "u32" => Some(Self::U32),
            "i32" => Some(Self::I32),
            "f32" => Some(Self::F32),
            "str" => Some(Self::Str),
            _ => None,
        }
    }

    /// Encoded size, `None` for variable-length strings.
    #[inline(always)]
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Self::U8 => Some(1),
            Self::U32 | Self::I32 | Self::F32 => Some(4),
            Self::Chars(width) => Some(width),
            Self::Str => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::U8 | Self::U32 | Self::I32 | Self::F32)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U8 => f.write_str("u8"),
            Self::U32 => f.write_str("u32"),
            Self::I32 => f.write_str("i32"),
            Self::F32 => f.write_str("f32"),
            Self::Chars(width) => write!(f, "c{}", width),
            Self::Str => f.write_str("str"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
}

/// Ordered field list plus the text it was parsed from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    source: String,
    fields: Vec<Field>,
}

impl Schema {
    /// Parse a schema string. Empty text is an empty schema.
    pub fn parse(text: &str) -> Result<Self, SchemaError> {
        let mut fields = Vec::new();
        let mut seen = HashSet::new();

        if !text.is_empty() {
            for raw in text.split('|') {
                let field = parse_field(raw)?;
                if !seen.insert(field.name.clone()) {
                    return Err(SchemaError::DuplicateName { name: field.name });
                }
                fields.push(field);
            }
        }

        Ok(Self {
            source: text.to_string(),
            fields,
        })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Total encoded size when no field is a variable string.
    pub fn fixed_size(&self) -> Option<usize> {
        self.fields
            .iter()
            .try_fold(0usize, |acc, f| f.ty.fixed_size().map(|n| acc + n))
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_field(raw: &str) -> Result<Field, SchemaError> {
    let (ty, name) = raw.split_once(':').ok_or_else(|| SchemaError::MissingColon {
        field: raw.to_string(),
    })?;

    if name.is_empty() {
        return Err(SchemaError::EmptyName {
            field: raw.to_string(),
        });
    }

    let ty = match FieldType::parse(ty) {
        Some(ty) => ty,
        None => match ty.strip_prefix('c') {
            Some(digits) if digits.bytes().all(|b| b.is_ascii_digit()) => {
                FieldType::Chars(parse_width(digits).ok_or_else(|| SchemaError::InvalidWidth {
                    field: raw.to_string(),
                })?)
            }
            _ => {
                return Err(SchemaError::UnknownType {
                    field: raw.to_string(),
                    ty: ty.to_string(),
                })
            }
        },
    };

    Ok(Field {
        name: name.to_string(),
        ty,
    })
}

/// Widest `cN` block a schema may declare.
pub const MAX_CHAR_WIDTH: usize = u16::MAX as usize;

fn parse_width(digits: &str) -> Option<usize> {
    digits
        .parse::<usize>()
        .ok()
        .filter(|&w| w > 0 && w <= MAX_CHAR_WIDTH)
}
