//! Static proxy generator
//!
//! Mengubah snapshot contract menjadi source Rust berisi `BinaryClient`
//! dengan satu method per contract. Output deterministik kecuali baris
//! `Generated:` (timestamp).
//!
//! Penulisan file:
//! - Path utama selalu ditulis (direktori dibuat jika perlu)
//! - Mirror hanya jika direktori induknya sudah ada; gagal = warn saja

use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{info, warn};

use crate::core::{Error, Result};
use crate::protocol::{Contract, ContractKind};

/// Method names the generated client defines itself.
const RESERVED: &[&str] = &["new", "transport", "transport_mut", "into_inner"];

const KEYWORDS: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum",
    "extern", "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move",
    "mut", "pub", "ref", "return", "self", "static", "struct", "super", "trait", "true", "try",
    "type", "unsafe", "use", "where", "while", "abstract", "become", "box", "do", "final",
    "macro", "override", "priv", "typeof", "unsized", "virtual", "yield", "gen",
];

/// Render the client module for `contracts`.
pub fn generate(contracts: &[Contract], generated_at: DateTime<Utc>) -> String {
    let mut out = String::with_capacity(1024 + contracts.len() * 512);
    let mut names = MethodNames::default();

    let _ = writeln!(out, "//! AUTO-GENERATED BINARY PROXY");
    let _ = writeln!(
        out,
        "//! Generated: {}",
        generated_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    );
    let _ = writeln!(out, "//!");
    let _ = writeln!(out, "//! Regenerate with `wirecall generate`; manual edits are overwritten.");
    out.push('\n');
    out.push_str("#![allow(dead_code)]\n\n");
    out.push_str("use wirecall::{CommandId, Subscription, Transport, TransportError};\n\n");

    out.push_str("/// Typed calls for every contract of the registry.\n");
    out.push_str("pub struct BinaryClient<T: Transport> {\n    transport: T,\n}\n\n");
    out.push_str("impl<T: Transport> BinaryClient<T> {\n");
    out.push_str("    pub fn new(transport: T) -> Self {\n        Self { transport }\n    }\n\n");
    out.push_str("    pub fn transport(&self) -> &T {\n        &self.transport\n    }\n\n");
    out.push_str("    pub fn transport_mut(&mut self) -> &mut T {\n        &mut self.transport\n    }\n\n");
    out.push_str("    pub fn into_inner(self) -> T {\n        self.transport\n    }\n");

    for contract in contracts {
        out.push('\n');
        write_doc(&mut out, contract);
        let id = byte_literal(contract.id.as_byte());
        match contract.kind {
            ContractKind::Unary => {
                let method = names.claim(&snake_case(&contract.name, contract.id.as_byte()));
                if contract.request_schema.is_empty() {
                    let _ = writeln!(
                        out,
                        "    pub fn {}(&mut self) -> Result<Vec<u8>, TransportError> {{\n        self.transport.call(CommandId::new({}), None)\n    }}",
                        method, id
                    );
                } else {
                    let _ = writeln!(
                        out,
                        "    pub fn {}(&mut self, body: &[u8]) -> Result<Vec<u8>, TransportError> {{\n        self.transport.call(CommandId::new({}), Some(body))\n    }}",
                        method, id
                    );
                }
            }
            ContractKind::Stream => {
                let base = format!("subscribe_to_{}", snake_case(&contract.name, contract.id.as_byte()));
                let method = names.claim(&base);
                let _ = writeln!(
                    out,
                    "    pub fn {}<F>(&mut self, on_record: F) -> Result<Subscription, TransportError>\n    where\n        F: FnMut(&[u8]) + 'static,\n    {{\n        self.transport.open_stream(CommandId::new({}), Box::new(on_record))\n    }}",
                    method, id
                );
            }
        }
    }

    out.push_str("}\n");
    out
}

fn write_doc(out: &mut String, contract: &Contract) {
    let _ = writeln!(out, "    /// {} (`{}`)", doc_text(&contract.name), contract.id.as_byte().escape_ascii());
    out.push_str("    ///\n");
    if !contract.request_schema.is_empty() {
        let _ = writeln!(out, "    /// Request: `{}`", doc_text(contract.request_schema.as_str()));
    }
    let size = match contract.response_size {
        0 => "variable size".to_string(),
        n => format!("{} bytes", n),
    };
    let noun = if contract.is_stream() { "Record" } else { "Response" };
    let _ = writeln!(
        out,
        "    /// {}: `{}` ({})",
        noun,
        doc_text(contract.response_schema.as_str()),
        size
    );
}

/// Control characters would break out of the doc comment line.
fn doc_text(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_control() || c == '`' { ' ' } else { c })
        .collect()
}

/// `b'1'`, with escapes for bytes that are not plain printable ASCII.
fn byte_literal(byte: u8) -> String {
    format!("b'{}'", byte.escape_ascii())
}

/// `GetWeatherForecast` → `get_weather_forecast`. Falls back to
/// `command_<hex id>` when nothing usable remains.
fn snake_case(name: &str, id: u8) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_ascii_alphanumeric() {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }
        if c.is_ascii_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).map_or(false, |n| n.is_ascii_lowercase());
            let boundary = prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_lower);
            if boundary && !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
        }
        out.push(c.to_ascii_lowercase());
    }

    let trimmed = out.trim_end_matches('_');
    if trimmed.is_empty() {
        return format!("command_{:02x}", id);
    }
    if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        return format!("cmd_{}", trimmed);
    }
    if KEYWORDS.contains(&trimmed) {
        return format!("{}_", trimmed);
    }
    trimmed.to_string()
}

/// Unique identifiers in declaration order.
#[derive(Default)]
struct MethodNames {
    taken: HashSet<String>,
}

impl MethodNames {
    fn claim(&mut self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut n = 2;
        while RESERVED.contains(&candidate.as_str()) || self.taken.contains(&candidate) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}

/// Write `source` to `primary`, and to `mirror` when its directory exists.
///
/// Returns the paths actually written. Only a failure on `primary` is an
/// error.
pub fn write_artifact(source: &str, primary: &Path, mirror: Option<&Path>) -> Result<Vec<PathBuf>> {
    if let Some(dir) = primary.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|source| Error::Artifact {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    fs::write(primary, source).map_err(|source| Error::Artifact {
        path: primary.to_path_buf(),
        source,
    })?;
    info!(path = %primary.display(), "proxy generated");

    let mut written = vec![primary.to_path_buf()];

    if let Some(mirror) = mirror {
        let dir_exists = match mirror.parent() {
            Some(dir) if dir.as_os_str().is_empty() => true,
            Some(dir) => dir.is_dir(),
            None => false,
        };
        if !dir_exists {
            info!(path = %mirror.display(), "mirror directory missing, skipping");
        } else {
            match fs::write(mirror, source) {
                Ok(()) => {
                    info!(path = %mirror.display(), "proxy mirrored");
                    written.push(mirror.to_path_buf());
                }
                Err(e) => warn!(path = %mirror.display(), error = %e, "failed to mirror proxy"),
            }
        }
    }

    Ok(written)
}
