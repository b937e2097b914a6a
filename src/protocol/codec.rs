//! Schema-driven Encoder/Decoder
//!
//! Encode dilakukan dua pass:
//! 1. Hitung total ukuran buffer dari schema + nilai
//! 2. Tulis field sesuai urutan deklarasi ke buffer yang sudah dialokasi
//!
//! Decode membaca field berurutan dari offset yang terus naik, dan gagal
//! dengan [`DecodeError`] terstruktur jika buffer kurang panjang.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::schema::{FieldType, Schema};
use crate::core::{DecodeError, EncodeError};

/// How the encoder treats missing or unparsable input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    /// Missing numerics become `"0"`, missing text becomes `""`, numbers are
    /// read from their leading numeric prefix and wrapped to the field width.
    #[default]
    Lenient,
    /// Missing fields and bad numbers are reported as [`EncodeError`].
    Strict,
}

/// Source of raw string values, looked up by field name.
pub trait FieldValues {
    fn value(&self, name: &str) -> Option<&str>;
}

impl FieldValues for HashMap<String, String> {
    fn value(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

impl FieldValues for BTreeMap<String, String> {
    fn value(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FieldValues for [(K, V)] {
    fn value(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_ref())
    }
}

impl<K: AsRef<str>, V: AsRef<str>, const N: usize> FieldValues for [(K, V); N] {
    fn value(&self, name: &str) -> Option<&str> {
        self.as_slice().value(name)
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FieldValues for Vec<(K, V)> {
    fn value(&self, name: &str) -> Option<&str> {
        self.as_slice().value(name)
    }
}

/// Decoded field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    U32(u32),
    I32(i32),
    F32(f32),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::U8(v) => Some(*v as f64),
            Value::U32(v) => Some(*v as f64),
            Value::I32(v) => Some(*v as f64),
            Value::F32(v) => Some(*v as f64),
            Value::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::U8(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// Decoded values together with the schema that produced them
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: Schema,
    values: Vec<(String, Value)>,
}

impl Record {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Name/value pairs in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Canonical string form of every value, re-encodable with the same schema.
    pub fn to_inputs(&self) -> HashMap<String, String> {
        self.values
            .iter()
            .map(|(n, v)| (n.clone(), v.to_string()))
            .collect()
    }
}

/// Encode `values` against `schema`.
pub fn encode<V: FieldValues + ?Sized>(
    schema: &Schema,
    values: &V,
    strictness: Strictness,
) -> Result<Vec<u8>, EncodeError> {
    // Pass 1: hitung ukuran
    let mut size = 0usize;
    for field in schema.fields() {
        let width = match field.ty.fixed_size() {
            Some(n) => Some(n),
            None => values.value(&field.name).unwrap_or("").len().checked_add(4),
        };
        size = width
            .and_then(|w| size.checked_add(w))
            .ok_or_else(|| EncodeError::TooLarge {
                field: field.name.clone(),
            })?;
    }

    let mut encoder = Encoder::with_size(size);

    // Pass 2: tulis field sesuai urutan
    for field in schema.fields() {
        let raw = match values.value(&field.name) {
            Some(v) => v,
            None if strictness == Strictness::Strict => {
                return Err(EncodeError::MissingField {
                    name: field.name.clone(),
                })
            }
            None if field.ty.is_numeric() => "0",
            None => "",
        };

        match field.ty {
            FieldType::U8 => {
                let v = match strictness {
                    Strictness::Lenient => lenient_int(raw) as u8,
                    Strictness::Strict => strict_parse::<u8>(&field.name, "u8", raw)?,
                };
                encoder.put(&[v]);
            }
            FieldType::U32 => {
                let v = match strictness {
                    Strictness::Lenient => lenient_int(raw) as u32,
                    Strictness::Strict => strict_parse::<u32>(&field.name, "u32", raw)?,
                };
                encoder.put(&v.to_le_bytes());
            }
            FieldType::I32 => {
                let v = match strictness {
                    Strictness::Lenient => lenient_int(raw) as u32 as i32,
                    Strictness::Strict => strict_parse::<i32>(&field.name, "i32", raw)?,
                };
                encoder.put(&v.to_le_bytes());
            }
            FieldType::F32 => {
                let v = match strictness {
                    Strictness::Lenient => lenient_float(raw),
                    Strictness::Strict => strict_parse::<f32>(&field.name, "f32", raw)?,
                };
                encoder.put(&v.to_le_bytes());
            }
            FieldType::Chars(width) => {
                // Potong di batas karakter supaya tetap valid UTF-8.
                let mut n = raw.len().min(width);
                while !raw.is_char_boundary(n) {
                    n -= 1;
                }
                encoder.put(&raw.as_bytes()[..n]);
                encoder.skip(width - n); // sudah zero-filled
            }
            FieldType::Str => {
                encoder.put(&(raw.len() as u32).to_le_bytes());
                encoder.put(raw.as_bytes());
            }
        }
    }

    Ok(encoder.finish())
}

/// Decode `bytes` into a [`Record`]. Bytes beyond the schema are ignored.
pub fn decode(bytes: &[u8], schema: &Schema) -> Result<Record, DecodeError> {
    let mut decoder = Decoder::new(bytes);
    let mut values = Vec::with_capacity(schema.len());

    for field in schema.fields() {
        let name = field.name.as_str();
        let value = match field.ty {
            FieldType::U8 => Value::U8(decoder.take(name, 1)?[0]),
            FieldType::U32 => Value::U32(u32::from_le_bytes(decoder.take_array(name)?)),
            FieldType::I32 => Value::I32(i32::from_le_bytes(decoder.take_array(name)?)),
            FieldType::F32 => Value::F32(f32::from_le_bytes(decoder.take_array(name)?)),
            FieldType::Chars(width) => {
                let block = decoder.take(name, width)?;
                let end = block.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                let text = std::str::from_utf8(&block[..end]).map_err(|_| {
                    DecodeError::InvalidUtf8 {
                        field: name.to_string(),
                    }
                })?;
                Value::Text(text.trim().to_string())
            }
            FieldType::Str => {
                let len = u32::from_le_bytes(decoder.take_array(name)?) as usize;
                let bytes = decoder.take(name, len)?;
                let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8 {
                    field: name.to_string(),
                })?;
                Value::Text(text.to_string())
            }
        };
        values.push((field.name.clone(), value));
    }

    Ok(Record {
        schema: schema.clone(),
        values,
    })
}

/// Fixed-size write buffer, sized by pass 1
struct Encoder {
    buffer: Vec<u8>,
    write_pos: usize,
}

impl Encoder {
    fn with_size(size: usize) -> Self {
        Self {
            buffer: vec![0u8; size],
            write_pos: 0,
        }
    }

    #[inline(always)]
    fn put(&mut self, bytes: &[u8]) {
        self.buffer[self.write_pos..self.write_pos + bytes.len()].copy_from_slice(bytes);
        self.write_pos += bytes.len();
    }

    #[inline(always)]
    fn skip(&mut self, n: usize) {
        self.write_pos += n;
    }

    fn finish(self) -> Vec<u8> {
        debug_assert_eq!(self.write_pos, self.buffer.len());
        self.buffer
    }
}

/// Read cursor over a response buffer
struct Decoder<'a> {
    buffer: &'a [u8],
    read_pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            read_pos: 0,
        }
    }

    #[inline(always)]
    fn remaining(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    fn take(&mut self, field: &str, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::Truncated {
                field: field.to_string(),
                needed: n,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.buffer[self.read_pos..self.read_pos + n];
        self.read_pos += n;
        Ok(bytes)
    }

    fn take_array(&mut self, field: &str) -> Result<[u8; 4], DecodeError> {
        let mut out = [0u8; 4];
        out.copy_from_slice(self.take(field, 4)?);
        Ok(out)
    }
}

fn strict_parse<T: std::str::FromStr>(
    field: &str,
    ty: &'static str,
    raw: &str,
) -> Result<T, EncodeError> {
    raw.trim().parse::<T>().map_err(|_| EncodeError::InvalidNumber {
        field: field.to_string(),
        ty,
        value: raw.to_string(),
    })
}

/// Leading `[sign]digits` prefix, wrapped modulo 2^64; no digits gives 0.
fn lenient_int(raw: &str) -> u64 {
    let s = raw.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let mut acc = 0u64;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        acc = acc.wrapping_mul(10).wrapping_add((b - b'0') as u64);
    }

    if negative {
        acc.wrapping_neg()
    } else {
        acc
    }
}

/// Longest leading float literal; no literal gives 0.0.
fn lenient_float(raw: &str) -> f32 {
    let s = raw.trim_start().as_bytes();
    let mut end = 0;

    if matches!(s.first(), Some(b'-' | b'+')) {
        end += 1;
    }
    let int_start = end;
    while end < s.len() && s[end].is_ascii_digit() {
        end += 1;
    }
    let mut mantissa_digits = end - int_start;
    if end < s.len() && s[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < s.len() && s[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        mantissa_digits += frac_end - frac_start;
        end = frac_end;
    }
    if mantissa_digits == 0 {
        return 0.0;
    }
    if end < s.len() && matches!(s[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if matches!(s.get(exp_end), Some(b'-' | b'+')) {
            exp_end += 1;
        }
        let digits_start = exp_end;
        while exp_end < s.len() && s[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > digits_start {
            end = exp_end;
        }
    }

    std::str::from_utf8(&s[..end])
        .ok()
        .and_then(|t| t.parse::<f32>().ok())
        .unwrap_or(0.0)
}
