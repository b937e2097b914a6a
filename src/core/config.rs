//! Client and registry configuration
//!
//! Struct biasa dengan `Default`; binary mengisi field dari argumen CLI.

use std::time::Duration;

use crate::protocol::{RecordLayout, Strictness};

/// How a unary exchange is framed on the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// `GET /<id>` or `POST /<id>` over HTTP/1.1, one request per connection.
    #[default]
    Http,
    /// `[id][body]` over plain TCP, response read until the peer closes.
    Raw,
}

/// Per-session client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub dialect: Dialect,
    /// Discovery record layout, picked by the consumer.
    pub layout: RecordLayout,
    pub strictness: Strictness,
    /// Upper bound for `Transport::wait`. `None` waits forever.
    pub call_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
            dialect: Dialect::Http,
            layout: RecordLayout::Current,
            strictness: Strictness::Lenient,
            call_timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_layout(mut self, layout: RecordLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }
}

/// Registry server configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub bind_addr: String,
    /// Broadcast interval for stream contracts.
    pub tick: Duration,
    pub layout: RecordLayout,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8081".to_string(),
            tick: Duration::from_millis(16), // ~60Hz
            layout: RecordLayout::Current,
        }
    }
}
