//! Minimal HTTP/1.1 framing
//!
//! Cukup untuk satu request per koneksi (`Connection: close`): request line,
//! header, body dengan `Content-Length`. Dipakai oleh client dan registry.

use crate::protocol::CommandId;

#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    /// Length of the head including the blank line.
    pub len: usize,
}

#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    /// Raw request target, the command id is its second byte.
    pub target: Vec<u8>,
    pub headers: Vec<(String, String)>,
    pub len: usize,
}

impl ResponseHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length").and_then(|v| v.trim().parse().ok())
    }

    #[inline(always)]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl RequestHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length").and_then(|v| v.trim().parse().ok())
    }

    /// First byte after the leading `/`, if any. `%XX` is decoded.
    pub fn command(&self) -> Option<CommandId> {
        match self.target.as_slice() {
            [b'/', b'%', hi, lo, ..] => {
                let hex = [*hi, *lo];
                let hex = std::str::from_utf8(&hex).ok()?;
                u8::from_str_radix(hex, 16).ok().map(CommandId::new)
            }
            [b'/', c, ..] if c.is_ascii_graphic() => Some(CommandId::new(*c)),
            _ => None,
        }
    }

    pub fn is_websocket_upgrade(&self) -> bool {
        self.header("upgrade")
            .map(|v| v.trim().eq_ignore_ascii_case("websocket"))
            .unwrap_or(false)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Index just past `\r\n\r\n`, or `None` if the head is incomplete.
fn head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn parse_headers(lines: &[&[u8]]) -> Vec<(String, String)> {
    lines
        .iter()
        .filter_map(|line| {
            let colon = line.iter().position(|&b| b == b':')?;
            let name = String::from_utf8_lossy(&line[..colon]).trim().to_string();
            let value = String::from_utf8_lossy(&line[colon + 1..]).trim().to_string();
            Some((name, value))
        })
        .collect()
}

fn split_head(head: &[u8]) -> Vec<&[u8]> {
    head.split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.is_empty())
        .collect()
}

/// `Ok(None)` while the head is still incomplete.
pub fn parse_response_head(buf: &[u8]) -> Result<Option<ResponseHead>, String> {
    let Some(len) = head_end(buf) else {
        return Ok(None);
    };
    let lines = split_head(&buf[..len]);
    let status_line = lines
        .first()
        .map(|l| String::from_utf8_lossy(l).to_string())
        .ok_or_else(|| "empty response head".to_string())?;

    // HTTP/1.1 200 OK
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/") {
        return Err(format!("not an HTTP response: {:?}", status_line));
    }
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| format!("bad status line: {:?}", status_line))?;
    let reason = parts.next().unwrap_or("").to_string();

    Ok(Some(ResponseHead {
        status,
        reason,
        headers: parse_headers(&lines[1..]),
        len,
    }))
}

/// `Ok(None)` while the head is still incomplete.
pub fn parse_request_head(buf: &[u8]) -> Result<Option<RequestHead>, String> {
    let Some(len) = head_end(buf) else {
        return Ok(None);
    };
    let lines = split_head(&buf[..len]);
    let request_line = lines
        .first()
        .ok_or_else(|| "empty request head".to_string())?;

    let mut parts = request_line.split(|&b| b == b' ');
    let method = parts
        .next()
        .map(|m| String::from_utf8_lossy(m).to_string())
        .unwrap_or_default();
    let target = parts
        .next()
        .filter(|t| t.first() == Some(&b'/'))
        .ok_or_else(|| "request target must start with '/'".to_string())?
        .to_vec();

    Ok(Some(RequestHead {
        method,
        target,
        headers: parse_headers(&lines[1..]),
        len,
    }))
}

/// Append the `/<id>` request target. Bytes that cannot appear literally in
/// a request line (space, control, non-ASCII, `%`) are percent-encoded.
pub fn push_target(out: &mut Vec<u8>, command: CommandId) {
    let byte = command.as_byte();
    out.push(b'/');
    if byte.is_ascii_graphic() && byte != b'%' {
        out.push(byte);
    } else {
        out.extend_from_slice(format!("%{:02X}", byte).as_bytes());
    }
}

/// One-shot request for `command`. A body turns it into a POST.
pub fn request(command: CommandId, host: &str, port: u16, body: Option<&[u8]>) -> Vec<u8> {
    let method = if body.is_some() { "POST" } else { "GET" };

    let mut out = Vec::with_capacity(128 + body.map_or(0, <[u8]>::len));
    out.extend_from_slice(method.as_bytes());
    out.push(b' ');
    push_target(&mut out, command);
    out.extend_from_slice(b" HTTP/1.1\r\n");
    out.extend_from_slice(format!("Host: {}:{}\r\n", host, port).as_bytes());
    out.extend_from_slice(b"Accept: application/octet-stream\r\nConnection: close\r\n");
    if let Some(body) = body {
        out.extend_from_slice(b"Content-Type: application/octet-stream\r\n");
        out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    if let Some(body) = body {
        out.extend_from_slice(body);
    }
    out
}

/// Complete response with body, used by the registry.
pub fn response(status: u16, reason: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nAccess-Control-Allow-Origin: *\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason,
        content_type,
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}

/// CORS preflight answer.
pub fn preflight_response() -> Vec<u8> {
    b"HTTP/1.1 204 No Content\r\nAccess-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: POST, GET, OPTIONS\r\nAccess-Control-Allow-Headers: Content-Type\r\nConnection: close\r\n\r\n".to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_request_has_no_body() {
        let req = request(CommandId::new(b'1'), "127.0.0.1", 8081, None);
        let text = String::from_utf8(req).unwrap();

        assert!(text.starts_with("GET /1 HTTP/1.1\r\n"));
        assert!(text.contains("Host: 127.0.0.1:8081\r\n"));
        assert!(!text.contains("Content-Length"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_post_request_carries_body() {
        let req = request(CommandId::new(b'4'), "h", 1, Some(b"\x01\x02"));
        let head = parse_request_head(&req).unwrap().unwrap();

        assert_eq!(head.method, "POST");
        assert_eq!(head.command(), Some(CommandId::new(b'4')));
        assert_eq!(head.content_length(), Some(2));
        assert_eq!(&req[head.len..], b"\x01\x02");
    }

    #[test]
    fn test_discovery_target_is_question_mark() {
        let req = request(CommandId::DISCOVERY, "h", 1, None);
        assert!(req.starts_with(b"GET /? HTTP/1.1"));
    }

    #[test]
    fn test_unsafe_command_bytes_are_percent_encoded() {
        for (byte, target) in [(b' ', "/%20"), (0xFF, "/%FF"), (b'%', "/%25"), (0x0A, "/%0A")] {
            let req = request(CommandId::new(byte), "h", 1, None);
            assert!(req.starts_with(format!("GET {} HTTP/1.1\r\n", target).as_bytes()));

            let head = parse_request_head(&req).unwrap().unwrap();
            assert_eq!(head.command(), Some(CommandId::new(byte)), "{target}");
        }
    }

    #[test]
    fn test_bad_percent_escape_has_no_command() {
        let head = parse_request_head(b"GET /%G1 HTTP/1.1\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.command(), None);
    }

    #[test]
    fn test_parse_response_head() {
        let raw = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
        let head = parse_response_head(raw).unwrap().unwrap();

        assert_eq!(head.status, 404);
        assert_eq!(head.reason, "Not Found");
        assert_eq!(head.content_length(), Some(0));
        assert!(!head.is_success());
        assert_eq!(head.len, raw.len());
    }

    #[test]
    fn test_incomplete_head() {
        assert!(parse_response_head(b"HTTP/1.1 200 OK\r\nContent-")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(parse_response_head(b"hello\r\n\r\n").is_err());
    }

    #[test]
    fn test_root_path_has_no_command() {
        let head = parse_request_head(b"GET / HTTP/1.1\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.command(), None);
    }

    #[test]
    fn test_websocket_upgrade_header_is_case_insensitive() {
        let head = parse_request_head(b"GET /3 HTTP/1.1\r\nupgrade: WebSocket\r\n\r\n")
            .unwrap()
            .unwrap();
        assert!(head.is_websocket_upgrade());
    }
}
