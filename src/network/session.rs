//! Transport abstraction dan implementasi TCP-nya
//!
//! `Transport` adalah satu-satunya seam antara client (introspection,
//! generated, dynamic) dan socket. `Session` adalah implementasi nyata:
//! satu per registry endpoint, tanpa singleton global.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::debug;

use super::event_loop::{EventLoop, PendingCall};
use super::http;
use super::subscription::Subscription;
use super::websocket;
use crate::core::{ClientConfig, ConnectionError, Dialect, TransportError};
use crate::protocol::CommandId;

/// Request/response and push-stream exchange addressed by command id
pub trait Transport {
    /// Start a one-shot exchange. `None` sends a bodiless request.
    fn unary_call(
        &mut self,
        command: CommandId,
        body: Option<&[u8]>,
    ) -> Result<PendingCall, TransportError>;

    /// Open a push stream. `on_record` runs once per inbound binary frame,
    /// in arrival order, from inside [`turn`](Transport::turn).
    fn open_stream(
        &mut self,
        command: CommandId,
        on_record: Box<dyn FnMut(&[u8])>,
    ) -> Result<Subscription, TransportError>;

    /// Drive I/O once, blocking at most `timeout` (`None` blocks until
    /// something happens).
    fn turn(&mut self, timeout: Option<Duration>) -> Result<(), TransportError>;

    /// Abandon an unresolved call.
    fn cancel(&mut self, _call: &PendingCall) {}

    /// Upper bound applied by [`wait`](Transport::wait).
    fn call_timeout(&self) -> Option<Duration> {
        None
    }

    /// Drive the transport until `call` resolves.
    fn wait(&mut self, call: &PendingCall) -> Result<Vec<u8>, TransportError> {
        let deadline = self.call_timeout().map(|t| (t, Instant::now() + t));
        loop {
            if let Some(result) = call.take() {
                return result;
            }
            if call.is_taken() {
                return Err(TransportError::Protocol {
                    command: call.command(),
                    reason: "result was already taken".to_string(),
                });
            }

            let timeout = match deadline {
                Some((limit, at)) => {
                    let now = Instant::now();
                    if now >= at {
                        self.cancel(call);
                        return Err(ConnectionError::TimedOut(limit).into());
                    }
                    Some(at - now)
                }
                None => None,
            };
            self.turn(timeout)?;
        }
    }

    /// `unary_call` followed by `wait`.
    fn call(&mut self, command: CommandId, body: Option<&[u8]>) -> Result<Vec<u8>, TransportError> {
        let pending = self.unary_call(command, body)?;
        self.wait(&pending)
    }

    /// Keep driving I/O for `duration`, delivering stream records.
    fn run_for(&mut self, duration: Duration) -> Result<(), TransportError> {
        let deadline = Instant::now() + duration;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            self.turn(Some(deadline - now))?;
        }
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn unary_call(
        &mut self,
        command: CommandId,
        body: Option<&[u8]>,
    ) -> Result<PendingCall, TransportError> {
        (**self).unary_call(command, body)
    }

    fn open_stream(
        &mut self,
        command: CommandId,
        on_record: Box<dyn FnMut(&[u8])>,
    ) -> Result<Subscription, TransportError> {
        (**self).open_stream(command, on_record)
    }

    fn turn(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        (**self).turn(timeout)
    }

    fn cancel(&mut self, call: &PendingCall) {
        (**self).cancel(call)
    }

    fn call_timeout(&self) -> Option<Duration> {
        (**self).call_timeout()
    }
}

/// Transport over TCP to one registry endpoint
pub struct Session {
    config: ClientConfig,
    addr: SocketAddr,
    event_loop: EventLoop,
}

impl Session {
    /// Resolve the registry address. No connection is made yet; every
    /// exchange opens its own socket.
    pub fn open(config: ClientConfig) -> Result<Self, ConnectionError> {
        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .and_then(|mut addrs| {
                addrs.next().ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses returned")
                })
            })
            .map_err(|source| ConnectionError::Resolve {
                host: config.host.clone(),
                port: config.port,
                source,
            })?;

        debug!(%addr, dialect = ?config.dialect, "session opened");
        Ok(Self {
            config,
            addr,
            event_loop: EventLoop::new()?,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Exchanges (calls and streams) still holding a socket.
    pub fn in_flight(&self) -> usize {
        self.event_loop.in_flight()
    }
}

impl Transport for Session {
    fn unary_call(
        &mut self,
        command: CommandId,
        body: Option<&[u8]>,
    ) -> Result<PendingCall, TransportError> {
        let request = match self.config.dialect {
            Dialect::Raw => {
                let body = body.unwrap_or_default();
                let mut request = Vec::with_capacity(1 + body.len());
                request.push(command.as_byte());
                request.extend_from_slice(body);
                request
            }
            Dialect::Http => http::request(command, &self.config.host, self.config.port, body),
        };
        self.event_loop
            .start_unary(self.addr, command, self.config.dialect, request)
    }

    fn open_stream(
        &mut self,
        command: CommandId,
        on_record: Box<dyn FnMut(&[u8])>,
    ) -> Result<Subscription, TransportError> {
        let key = websocket::client_key();
        let request =
            websocket::handshake_request(command, &self.config.host, self.config.port, &key);
        self.event_loop
            .start_stream(self.addr, command, request, key, on_record)
    }

    fn turn(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        self.event_loop.turn(timeout).map_err(TransportError::from)
    }

    fn cancel(&mut self, call: &PendingCall) {
        self.event_loop.cancel(call)
    }

    fn call_timeout(&self) -> Option<Duration> {
        self.config.call_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn serve_once(response: &'static [u8]) -> (u16, std::thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let n = socket.read(&mut buf).unwrap();
            socket.write_all(response).unwrap();
            buf[..n].to_vec()
        });
        (port, handle)
    }

    #[test]
    fn test_raw_call_sends_id_then_body() {
        let (port, server) = serve_once(b"\x01\x02\x03");
        let config = ClientConfig::new("127.0.0.1", port).with_dialect(Dialect::Raw);
        let mut session = Session::open(config).unwrap();

        let response = session.call(CommandId::new(b'7'), Some(b"xy")).unwrap();

        assert_eq!(response, vec![1, 2, 3]);
        assert_eq!(server.join().unwrap(), b"7xy".to_vec());
        assert_eq!(session.in_flight(), 0);
    }

    #[test]
    fn test_http_error_status_surfaces() {
        let (port, _server) =
            serve_once(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        let mut session = Session::open(ClientConfig::new("127.0.0.1", port)).unwrap();

        let err = session.call(CommandId::new(b'Z'), None).unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 404, .. }));
    }

    #[test]
    fn test_http_body_by_content_length() {
        let (port, _server) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: 2\r\n\r\nOK",
        );
        let mut session = Session::open(ClientConfig::new("127.0.0.1", port)).unwrap();

        assert_eq!(session.call(CommandId::new(b'2'), None).unwrap(), b"OK");
    }

    #[test]
    fn test_connection_refused() {
        // Bind then drop to get a port nobody listens on.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let config = ClientConfig::new("127.0.0.1", port)
            .with_call_timeout(Duration::from_secs(5));
        let mut session = Session::open(config).unwrap();

        let err = session.call(CommandId::DISCOVERY, None).unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }

    #[test]
    fn test_call_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = ClientConfig::new("127.0.0.1", port)
            .with_dialect(Dialect::Raw)
            .with_call_timeout(Duration::from_millis(50));
        let mut session = Session::open(config).unwrap();

        let err = session.call(CommandId::new(b'1'), None).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Connection(ConnectionError::TimedOut(_))
        ));
        assert_eq!(session.in_flight(), 0);
        drop(listener);
    }

    #[test]
    fn test_taking_twice_is_an_error() {
        let (port, _server) = serve_once(b"x");
        let config = ClientConfig::new("127.0.0.1", port).with_dialect(Dialect::Raw);
        let mut session = Session::open(config).unwrap();

        let pending = session.unary_call(CommandId::new(b'1'), None).unwrap();
        assert_eq!(session.wait(&pending).unwrap(), b"x");
        assert!(session.wait(&pending).is_err());
    }
}
