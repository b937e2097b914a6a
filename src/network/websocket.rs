//! WebSocket (RFC 6455) handshake dan framing
//!
//! Hanya bagian yang dibutuhkan untuk push stream biner:
//! - Client mengirim frame ter-mask, server tidak
//! - Payload length 7-bit, 16-bit, atau 64-bit
//! - Tidak ada extension (permessage-deflate dll.)

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use sha1::{Digest, Sha1};

use super::http;
use crate::protocol::CommandId;

/// Magic GUID dari RFC 6455 §1.3
pub const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound for a frame payload, and for a reassembled message.
pub const MAX_FRAME_PAYLOAD: usize = 16 * 1024 * 1024; // 16MB

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    #[inline(always)]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    /// Unmasked payload
    pub payload: Vec<u8>,
}

/// Random 16-byte nonce, base64 encoded.
pub fn client_key() -> String {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    STANDARD.encode(nonce)
}

/// `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.trim().as_bytes());
    hasher.update(GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

pub fn handshake_request(command: CommandId, host: &str, port: u16, key: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(b"GET ");
    http::push_target(&mut out, command);
    out.extend_from_slice(
        format!(
            " HTTP/1.1\r\nHost: {}:{}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n\r\n",
            host, port, key
        )
        .as_bytes(),
    );
    out
}

pub fn handshake_response(client_key: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(client_key)
    )
    .into_bytes()
}

/// Parse one frame from the front of `buf`.
///
/// Returns the frame and the number of bytes it occupied, or `Ok(None)` if
/// `buf` does not yet hold a complete frame.
pub fn parse_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, String> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let fin = buf[0] & 0x80 != 0;
    if buf[0] & 0x70 != 0 {
        return Err("reserved bits set without a negotiated extension".to_string());
    }
    let opcode = Opcode::from_u8(buf[0] & 0x0F)
        .ok_or_else(|| format!("unknown opcode 0x{:X}", buf[0] & 0x0F))?;
    let masked = buf[1] & 0x80 != 0;

    let mut pos = 2;
    let len = match buf[1] & 0x7F {
        126 => {
            if buf.len() < pos + 2 {
                return Ok(None);
            }
            let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
            pos += 2;
            len
        }
        127 => {
            if buf.len() < pos + 8 {
                return Ok(None);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[2..10]);
            pos += 8;
            usize::try_from(u64::from_be_bytes(raw)).unwrap_or(usize::MAX)
        }
        n => n as usize,
    };
    if len > MAX_FRAME_PAYLOAD {
        return Err(format!("frame payload of {} bytes exceeds limit", len));
    }

    let mask = if masked {
        if buf.len() < pos + 4 {
            return Ok(None);
        }
        let key = [buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]];
        pos += 4;
        Some(key)
    } else {
        None
    };

    if buf.len() < pos + len {
        return Ok(None);
    }

    let mut payload = buf[pos..pos + len].to_vec();
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    Ok(Some((
        Frame {
            fin,
            opcode,
            payload,
        },
        pos + len,
    )))
}

/// Encode a final frame. Client-to-server frames must pass a mask key.
pub fn encode_frame(opcode: Opcode, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 14);
    out.push(0x80 | opcode as u8);

    let mask_bit = if mask.is_some() { 0x80 } else { 0 };
    match payload.len() {
        n if n < 126 => out.push(mask_bit | n as u8),
        n if n <= u16::MAX as usize => {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(n as u16).to_be_bytes());
        }
        n => {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(n as u64).to_be_bytes());
        }
    }

    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(payload);
            apply_mask(&mut out[start..], key);
        }
        None => out.extend_from_slice(payload),
    }
    out
}

/// Fresh random mask key for a client frame.
pub fn mask_key() -> [u8; 4] {
    rand::random()
}

#[inline]
fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, b) in data.iter_mut().enumerate() {
        *b ^= key[i & 3];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_key_rfc_sample() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_client_key_is_16_bytes() {
        let key = client_key();
        assert_eq!(STANDARD.decode(key).unwrap().len(), 16);
    }

    #[test]
    fn test_unmasked_binary_frame() {
        let bytes = encode_frame(Opcode::Binary, &[1, 2, 3], None);
        assert_eq!(bytes, vec![0x82, 3, 1, 2, 3]);

        let (frame, used) = parse_frame(&bytes).unwrap().unwrap();
        assert_eq!(used, 5);
        assert!(frame.fin);
        assert_eq!(frame.opcode, Opcode::Binary);
        assert_eq!(frame.payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_masked_frame_is_unmasked_on_parse() {
        let bytes = encode_frame(Opcode::Close, b"bye", Some([0xA, 0xB, 0xC, 0xD]));
        assert_eq!(bytes[1], 0x80 | 3);
        assert_ne!(&bytes[6..], b"bye");

        let (frame, _) = parse_frame(&bytes).unwrap().unwrap();
        assert_eq!(frame.opcode, Opcode::Close);
        assert_eq!(frame.payload, b"bye");
    }

    #[test]
    fn test_16_bit_length() {
        let payload = vec![7u8; 300];
        let bytes = encode_frame(Opcode::Binary, &payload, None);
        assert_eq!(bytes[1], 126);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), 300);

        let (frame, used) = parse_frame(&bytes).unwrap().unwrap();
        assert_eq!(used, 304);
        assert_eq!(frame.payload.len(), 300);
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let bytes = encode_frame(Opcode::Binary, &[9u8; 10], None);
        assert!(parse_frame(&bytes[..1]).unwrap().is_none());
        assert!(parse_frame(&bytes[..6]).unwrap().is_none());
    }

    #[test]
    fn test_two_frames_back_to_back() {
        let mut bytes = encode_frame(Opcode::Binary, b"A", None);
        bytes.extend(encode_frame(Opcode::Binary, b"B", None));

        let (first, used) = parse_frame(&bytes).unwrap().unwrap();
        let (second, _) = parse_frame(&bytes[used..]).unwrap().unwrap();
        assert_eq!(first.payload, b"A");
        assert_eq!(second.payload, b"B");
    }

    #[test]
    fn test_unknown_opcode_is_error() {
        assert!(parse_frame(&[0x83, 0]).is_err());
    }

    #[test]
    fn test_handshake_request_shape() {
        let req = handshake_request(CommandId::new(b'3'), "localhost", 8081, "abc");
        let text = String::from_utf8(req).unwrap();
        assert!(text.starts_with("GET /3 HTTP/1.1\r\n"));
        assert!(text.contains("Sec-WebSocket-Key: abc\r\n"));
        assert!(text.contains("Upgrade: websocket\r\n"));
    }

    #[test]
    fn test_handshake_target_is_percent_encoded() {
        let req = handshake_request(CommandId::new(b' '), "localhost", 8081, "abc");
        assert!(req.starts_with(b"GET /%20 HTTP/1.1\r\n"));

        let head = http::parse_request_head(&req).unwrap().unwrap();
        assert_eq!(head.command(), Some(CommandId::new(b' ')));
    }
}
