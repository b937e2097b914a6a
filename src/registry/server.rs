//! Registry server dengan event-driven I/O
//!
//! Satu `mio::Poll` untuk listener, request satu-kali, dan subscriber stream.
//!
//! Protocol per koneksi (ditentukan dari byte pertama yang diterima):
//! - HTTP (`GET `, `POST `, `OPTIONS `): command id = karakter pertama path,
//!   body lewat `Content-Length`, WebSocket upgrade untuk stream
//! - Raw TCP: byte pertama = command id, sisanya body
//!
//! Stream di-broadcast pada tick tetap: producer dipanggil sekali per
//! stream, frame yang sama dikirim ke semua subscriber.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mio::net::TcpListener as MioTcpListener;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, warn};

use super::Registry;
use crate::core::RegistryConfig;
use crate::network::http::{self, RequestHead};
use crate::network::websocket::{self, Opcode};
use crate::network::{Connection, ReadStatus};
use crate::protocol::CommandId;

const SERVER_TOKEN: Token = Token(0);
const MAX_CONNECTIONS: usize = 1024;
const EVENTS_CAPACITY: usize = 1024;
/// A subscriber this far behind is dropped.
const MAX_PENDING_WRITE: usize = 1024 * 1024; // 1MB

const HTTP_METHODS: [&[u8]; 3] = [b"GET ", b"POST ", b"OPTIONS "];
const HEALTH_BODY: &[u8] = br#"{"status":"ok","server":"wirecall"}"#;

enum Phase {
    /// Waiting for a complete request.
    Request,
    /// Upgraded subscriber of a stream.
    Streaming(CommandId),
    /// Response queued, close once flushed.
    Draining,
}

struct Client {
    conn: Connection,
    phase: Phase,
}

/// What to do with a connection after handling an event
enum Next {
    Keep,
    Close,
}

/// Registry server
///
/// Event-driven dengan:
/// - Non-blocking I/O (epoll/kqueue/IOCP)
/// - Satu request per koneksi untuk unary/discovery
/// - Broadcast tick untuk stream subscriber
pub struct RegistryServer {
    poll: Poll,
    listener: MioTcpListener,
    connections: HashMap<Token, Client>,
    next_token: usize,
    registry: Registry,
    config: RegistryConfig,
    next_tick: Instant,
}

impl RegistryServer {
    /// Bind the listener from `config.bind_addr`.
    pub fn bind(registry: Registry, config: RegistryConfig) -> io::Result<Self> {
        let poll = Poll::new()?;

        let listener = TcpListener::bind(config.bind_addr.as_str())?;
        listener.set_nonblocking(true)?;
        let mut listener = MioTcpListener::from_std(listener);

        poll.registry()
            .register(&mut listener, SERVER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            listener,
            connections: HashMap::with_capacity(64),
            next_token: 1,
            registry,
            next_tick: Instant::now() + config.tick,
            config,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run server event loop forever.
    pub fn run(&mut self) -> io::Result<()> {
        let stop = AtomicBool::new(false);
        self.run_until(&stop)
    }

    /// Run until `stop` is set. Checked at least once per tick.
    pub fn run_until(&mut self, stop: &AtomicBool) -> io::Result<()> {
        info!(
            addr = %self.local_addr()?,
            contracts = self.registry.len(),
            "registry listening"
        );
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        while !stop.load(Ordering::Relaxed) {
            let timeout = self.next_tick.saturating_duration_since(Instant::now());
            match self.poll.poll(&mut events, Some(timeout)) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            for event in events.iter() {
                match event.token() {
                    SERVER_TOKEN => self.accept_connections()?,
                    token => self.handle_ready(token),
                }
            }

            if Instant::now() >= self.next_tick {
                self.broadcast();
                self.next_tick = Instant::now() + self.config.tick;
            }
        }

        info!("registry stopped");
        Ok(())
    }

    /// Accept new connections
    fn accept_connections(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((mut stream, addr)) => {
                    if self.connections.len() >= MAX_CONNECTIONS {
                        warn!(%addr, "max connections reached, rejecting");
                        continue;
                    }

                    let token = Token(self.next_token);
                    self.next_token += 1;

                    self.poll.registry().register(
                        &mut stream,
                        token,
                        Interest::READABLE | Interest::WRITABLE,
                    )?;

                    self.connections.insert(
                        token,
                        Client {
                            conn: Connection::accepted(stream),
                            phase: Phase::Request,
                        },
                    );
                    debug!(%addr, ?token, "connection accepted");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn handle_ready(&mut self, token: Token) {
        let Some(mut client) = self.connections.remove(&token) else {
            return;
        };

        let next = match self.advance(&mut client) {
            Ok(next) => next,
            Err(e) => {
                debug!(?token, error = %e, "connection error");
                Next::Close
            }
        };

        match next {
            Next::Keep => {
                self.connections.insert(token, client);
            }
            Next::Close => self.close(client),
        }
    }

    fn close(&mut self, mut client: Client) {
        let _ = self.poll.registry().deregister(client.conn.stream_mut());
    }

    fn advance(&mut self, client: &mut Client) -> io::Result<Next> {
        client.conn.flush_write_buffer()?;

        match client.phase {
            Phase::Draining => {
                return Ok(if client.conn.write_pending() == 0 {
                    Next::Close
                } else {
                    Next::Keep
                })
            }
            Phase::Streaming(command) => return self.advance_subscriber(client, command),
            Phase::Request => {}
        }

        let status = client.conn.fill_read_buffer()?;
        let data = client.conn.readable();
        if data.is_empty() {
            return Ok(match status {
                ReadStatus::Eof => Next::Close,
                ReadStatus::Open => Next::Keep,
            });
        }

        let response = if HTTP_METHODS.iter().any(|m| data.starts_with(m)) {
            match http::parse_request_head(data) {
                Ok(Some(head)) => {
                    let body_start = head.len;
                    let expected = head.content_length().unwrap_or(0);
                    if data.len() - body_start < expected && status == ReadStatus::Open {
                        return Ok(Next::Keep);
                    }
                    let end = (body_start + expected).min(data.len());
                    let body = data[body_start..end].to_vec();
                    match self.handle_http(client, &head, &body) {
                        Some(response) => response,
                        // Upgraded: flush the 101 and pick up any early frames.
                        None => match client.phase {
                            Phase::Streaming(command) => return self.advance_subscriber(client, command),
                            _ => return Ok(Next::Keep),
                        },
                    }
                }
                Ok(None) if status == ReadStatus::Open => return Ok(Next::Keep),
                Ok(None) => return Ok(Next::Close),
                Err(reason) => {
                    debug!(%reason, "bad request");
                    http::response(400, "Bad Request", "text/plain", reason.as_bytes())
                }
            }
        } else {
            let command = CommandId::new(data[0]);
            let body = data[1..].to_vec();
            match self.dispatch(command, &body) {
                Some(response) => response,
                None => {
                    debug!(%command, "unknown raw command");
                    Vec::new()
                }
            }
        };

        let rest = client.conn.readable().len();
        client.conn.consume(rest);
        client.conn.queue_write(&response);
        client.conn.flush_write_buffer()?;
        client.phase = Phase::Draining;

        Ok(if client.conn.write_pending() == 0 {
            Next::Close
        } else {
            Next::Keep
        })
    }

    /// Discovery or unary command. `None` when the id is not served.
    fn dispatch(&mut self, command: CommandId, body: &[u8]) -> Option<Vec<u8>> {
        if command == CommandId::DISCOVERY {
            debug!("discovery request");
            return Some(self.registry.encode_contracts(self.config.layout));
        }
        let response = self.registry.invoke(command, body)?;
        debug!(%command, request = body.len(), response = response.len(), "command handled");
        Some(response)
    }

    /// Build the HTTP answer. `None` means the connection became a stream
    /// subscriber and the 101 is already queued.
    fn handle_http(&mut self, client: &mut Client, head: &RequestHead, body: &[u8]) -> Option<Vec<u8>> {
        if head.method == "OPTIONS" {
            return Some(http::preflight_response());
        }

        let Some(command) = head.command() else {
            return Some(http::response(200, "OK", "application/json", HEALTH_BODY));
        };

        if head.is_websocket_upgrade() {
            if !self.registry.is_stream(command) {
                return Some(http::response(404, "Not Found", "text/plain", b"no such stream"));
            }
            let Some(key) = head.header("sec-websocket-key") else {
                return Some(http::response(400, "Bad Request", "text/plain", b"missing Sec-WebSocket-Key"));
            };

            client.conn.queue_write(&websocket::handshake_response(key));
            let consumed = head.len;
            client.conn.consume(consumed);
            client.phase = Phase::Streaming(command);
            info!(%command, "stream subscriber added");
            return None;
        }

        Some(match self.dispatch(command, body) {
            Some(payload) => http::response(200, "OK", "application/octet-stream", &payload),
            None => http::response(404, "Not Found", "application/octet-stream", &[]),
        })
    }

    /// Inbound traffic from a subscriber: close and ping only.
    fn advance_subscriber(&mut self, client: &mut Client, command: CommandId) -> io::Result<Next> {
        let status = client.conn.fill_read_buffer()?;

        loop {
            let (frame, used) = match websocket::parse_frame(client.conn.readable()) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => break,
                Err(reason) => {
                    debug!(%command, %reason, "bad frame from subscriber");
                    return Ok(Next::Close);
                }
            };
            client.conn.consume(used);

            match frame.opcode {
                Opcode::Close => {
                    client.conn.queue_write(&websocket::encode_frame(Opcode::Close, &[], None));
                    let _ = client.conn.flush_write_buffer();
                    info!(%command, "stream subscriber left");
                    return Ok(Next::Close);
                }
                Opcode::Ping => {
                    client
                        .conn
                        .queue_write(&websocket::encode_frame(Opcode::Pong, &frame.payload, None));
                }
                _ => {}
            }
        }

        client.conn.flush_write_buffer()?;
        Ok(match status {
            ReadStatus::Eof => Next::Close,
            ReadStatus::Open => Next::Keep,
        })
    }

    /// One tick: produce once per subscribed stream, fan out the frame.
    fn broadcast(&mut self) {
        let mut by_stream: HashMap<CommandId, Vec<Token>> = HashMap::new();
        for (token, client) in &self.connections {
            if let Phase::Streaming(command) = client.phase {
                by_stream.entry(command).or_default().push(*token);
            }
        }

        let mut dead = Vec::new();
        for (command, tokens) in by_stream {
            let payload = match self.registry.produce(command) {
                Some(payload) if !payload.is_empty() => payload,
                _ => continue,
            };
            let frame = websocket::encode_frame(Opcode::Binary, &payload, None);

            for token in tokens {
                let Some(client) = self.connections.get_mut(&token) else {
                    continue;
                };
                client.conn.queue_write(&frame);
                let flushed = client.conn.flush_write_buffer();
                if flushed.is_err() || client.conn.write_pending() > MAX_PENDING_WRITE {
                    dead.push(token);
                }
            }
        }

        for token in dead {
            if let Some(client) = self.connections.remove(&token) {
                warn!(?token, "dropping stream subscriber that cannot keep up");
                self.close(client);
            }
        }
    }
}
