//! Single-threaded event loop untuk semua exchange client
//!
//! Satu `mio::Poll` memultipleks:
//! - Unary exchange: satu koneksi per call, selesai saat response lengkap
//! - Stream exchange: koneksi WebSocket yang hidup sampai unsubscribe
//!   atau ditutup oleh remote
//!
//! Callback stream dipanggil di dalam `turn`, berurutan per stream.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, warn};

use super::connection::{Connection, ReadStatus, STREAM_RECV_BUFFER};
use super::http;
use super::subscription::{StreamShared, StreamState, Subscription};
use super::websocket::{self, Opcode};
use crate::core::{ConnectionError, Dialect, TransportError};
use crate::protocol::CommandId;

const EVENTS_CAPACITY: usize = 256;

type CallResult = Result<Vec<u8>, TransportError>;

#[derive(Debug)]
enum CallState {
    Waiting,
    Ready(CallResult),
    Taken,
}

/// Handle of an in-flight unary call
///
/// Resolved by the event loop; read it with `Transport::wait`.
#[derive(Debug, Clone)]
pub struct PendingCall {
    command: CommandId,
    token: Option<Token>,
    slot: Rc<RefCell<CallState>>,
}

impl PendingCall {
    fn waiting(command: CommandId, token: Token) -> Self {
        Self {
            command,
            token: Some(token),
            slot: Rc::new(RefCell::new(CallState::Waiting)),
        }
    }

    /// Already-completed call, for transports that answer synchronously.
    pub fn resolved(command: CommandId, result: Result<Vec<u8>, TransportError>) -> Self {
        Self {
            command,
            token: None,
            slot: Rc::new(RefCell::new(CallState::Ready(result))),
        }
    }

    pub fn command(&self) -> CommandId {
        self.command
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.slot.borrow(), CallState::Ready(_))
    }

    /// `true` once the result has been handed out.
    pub fn is_taken(&self) -> bool {
        matches!(*self.slot.borrow(), CallState::Taken)
    }

    /// Take the result if the call has resolved.
    pub fn take(&self) -> Option<Result<Vec<u8>, TransportError>> {
        let mut slot = self.slot.borrow_mut();
        match std::mem::replace(&mut *slot, CallState::Taken) {
            CallState::Ready(result) => Some(result),
            other => {
                *slot = other;
                None
            }
        }
    }

    fn resolve(&self, result: CallResult) {
        let mut slot = self.slot.borrow_mut();
        if matches!(*slot, CallState::Waiting) {
            *slot = CallState::Ready(result);
        }
    }
}

/// Fragment reassembly state of a stream
enum Fragment {
    None,
    Binary(Vec<u8>),
    /// Continuations of an ignored text message.
    Text,
}

struct StreamExchange {
    shared: Rc<StreamShared>,
    key: String,
    on_record: Box<dyn FnMut(&[u8])>,
    fragment: Fragment,
    upgraded: bool,
}

enum ExchangeKind {
    Unary { dialect: Dialect, call: PendingCall },
    Stream(StreamExchange),
}

struct Exchange {
    conn: Connection,
    addr: SocketAddr,
    command: CommandId,
    kind: ExchangeKind,
}

impl Exchange {
    fn fail(&mut self, err: TransportError) {
        debug!(command = %self.command, error = %err, "exchange failed");
        match &self.kind {
            ExchangeKind::Unary { call, .. } => call.resolve(Err(err)),
            ExchangeKind::Stream(stream) => stream.shared.close(Some(err.to_string())),
        }
    }

    /// Drive the exchange after a readiness event. Returns `true` once it
    /// is finished and can be dropped.
    fn advance(&mut self) -> bool {
        match self.conn.poll_connected() {
            Ok(true) => {}
            Ok(false) => return false,
            Err(source) => {
                let addr = self.addr;
                self.fail(ConnectionError::Connect { addr, source }.into());
                return true;
            }
        }

        if let Err(e) = self.conn.flush_write_buffer() {
            self.fail(e.into());
            return true;
        }

        let status = match self.conn.fill_read_buffer() {
            Ok(status) => status,
            Err(e) => {
                self.fail(e.into());
                return true;
            }
        };

        let command = self.command;
        match &mut self.kind {
            ExchangeKind::Unary { dialect, call } => {
                let outcome = match dialect {
                    Dialect::Raw => raw_outcome(&mut self.conn, status),
                    Dialect::Http => http_outcome(&mut self.conn, command, status),
                };
                match outcome {
                    Some(result) => {
                        if let Ok(body) = &result {
                            debug!(%command, bytes = body.len(), "unary call resolved");
                        }
                        call.resolve(result);
                        true
                    }
                    None => false,
                }
            }
            ExchangeKind::Stream(stream) => advance_stream(&mut self.conn, command, stream, status),
        }
    }
}

/// Raw dialect: the response is everything sent before the peer closes.
fn raw_outcome(conn: &mut Connection, status: ReadStatus) -> Option<CallResult> {
    match status {
        ReadStatus::Eof => Some(Ok(conn.take_readable())),
        ReadStatus::Open => None,
    }
}

fn http_outcome(conn: &mut Connection, command: CommandId, status: ReadStatus) -> Option<CallResult> {
    let eof = status == ReadStatus::Eof;
    let head = match http::parse_response_head(conn.readable()) {
        Ok(Some(head)) => head,
        Ok(None) if eof => {
            return Some(Err(TransportError::Protocol {
                command,
                reason: "connection closed before response head".to_string(),
            }))
        }
        Ok(None) => return None,
        Err(reason) => return Some(Err(TransportError::Protocol { command, reason })),
    };

    if !head.is_success() {
        return Some(Err(TransportError::Status {
            command,
            status: head.status,
            reason: head.reason,
        }));
    }

    let received = conn.readable().len() - head.len;
    match head.content_length() {
        Some(expected) if received >= expected => {
            conn.consume(head.len);
            let mut body = conn.take_readable();
            body.truncate(expected);
            Some(Ok(body))
        }
        Some(expected) if eof => Some(Err(TransportError::Protocol {
            command,
            reason: format!("body truncated: expected {} bytes, got {}", expected, received),
        })),
        None if eof => {
            conn.consume(head.len);
            Some(Ok(conn.take_readable()))
        }
        _ => None,
    }
}

fn advance_stream(
    conn: &mut Connection,
    command: CommandId,
    stream: &mut StreamExchange,
    status: ReadStatus,
) -> bool {
    let eof = status == ReadStatus::Eof;

    if stream.shared.state.get() == StreamState::Connecting {
        let head = match http::parse_response_head(conn.readable()) {
            Ok(Some(head)) => head,
            Ok(None) if eof => {
                let reason = "connection closed during handshake".to_string();
                stream.shared.close(Some(TransportError::Handshake { command, reason }.to_string()));
                return true;
            }
            Ok(None) => return false,
            Err(reason) => {
                stream.shared.close(Some(TransportError::Handshake { command, reason }.to_string()));
                return true;
            }
        };

        if head.status != 101 {
            let reason = format!("expected 101, got {} {}", head.status, head.reason);
            stream.shared.close(Some(TransportError::Handshake { command, reason }.to_string()));
            return true;
        }
        let expected = websocket::accept_key(&stream.key);
        if head.header("sec-websocket-accept") != Some(expected.as_str()) {
            let reason = "Sec-WebSocket-Accept mismatch".to_string();
            stream.shared.close(Some(TransportError::Handshake { command, reason }.to_string()));
            return true;
        }

        conn.consume(head.len);
        conn.set_recv_buffer(STREAM_RECV_BUFFER);
        stream.upgraded = true;
        stream.shared.state.set(StreamState::Open);
        info!(%command, "stream open");
    }

    loop {
        if !stream.shared.accepts_frames() {
            return true;
        }

        let (frame, used) = match websocket::parse_frame(conn.readable()) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => break,
            Err(reason) => {
                stream.shared.close(Some(TransportError::Protocol { command, reason }.to_string()));
                return true;
            }
        };
        conn.consume(used);

        match frame.opcode {
            Opcode::Binary if frame.fin => (stream.on_record)(&frame.payload),
            Opcode::Binary => stream.fragment = Fragment::Binary(frame.payload),
            Opcode::Continuation => match &mut stream.fragment {
                Fragment::Binary(buf) => {
                    if buf.len() + frame.payload.len() > websocket::MAX_FRAME_PAYLOAD {
                        let reason = format!(
                            "fragmented message exceeds {} bytes",
                            websocket::MAX_FRAME_PAYLOAD
                        );
                        stream.shared.close(Some(TransportError::Protocol { command, reason }.to_string()));
                        return true;
                    }
                    buf.extend_from_slice(&frame.payload);
                    if frame.fin {
                        if let Fragment::Binary(message) =
                            std::mem::replace(&mut stream.fragment, Fragment::None)
                        {
                            (stream.on_record)(&message);
                        }
                    }
                }
                Fragment::Text if frame.fin => stream.fragment = Fragment::None,
                _ => {}
            },
            Opcode::Text => {
                warn!(%command, bytes = frame.payload.len(), "ignoring text frame on binary stream");
                if !frame.fin {
                    stream.fragment = Fragment::Text;
                }
            }
            Opcode::Ping => {
                conn.queue_write(&websocket::encode_frame(
                    Opcode::Pong,
                    &frame.payload,
                    Some(websocket::mask_key()),
                ));
            }
            Opcode::Pong => {}
            Opcode::Close => {
                conn.queue_write(&websocket::encode_frame(
                    Opcode::Close,
                    &[],
                    Some(websocket::mask_key()),
                ));
                let _ = conn.flush_write_buffer();
                info!(%command, "stream closed by remote");
                stream.shared.close(None);
                return true;
            }
        }
    }

    if let Err(e) = conn.flush_write_buffer() {
        stream.shared.close(Some(e.to_string()));
        return true;
    }

    if eof {
        info!(%command, "stream connection closed by peer");
        stream.shared.close(Some("connection closed by peer".to_string()));
        return true;
    }
    false
}

pub(crate) struct EventLoop {
    poll: Poll,
    events: Events,
    exchanges: HashMap<Token, Exchange>,
    next_token: usize,
}

impl EventLoop {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENTS_CAPACITY),
            exchanges: HashMap::new(),
            next_token: 0,
        })
    }

    /// Number of exchanges still in flight.
    pub fn in_flight(&self) -> usize {
        self.exchanges.len()
    }

    fn register(
        &mut self,
        addr: SocketAddr,
        command: CommandId,
        request: &[u8],
        kind: impl FnOnce(Token) -> ExchangeKind,
    ) -> Result<Token, TransportError> {
        let mut conn =
            Connection::open(addr).map_err(|source| ConnectionError::Connect { addr, source })?;
        conn.queue_write(request);

        let token = Token(self.next_token);
        self.next_token = self.next_token.wrapping_add(1);

        self.poll.registry().register(
            conn.stream_mut(),
            token,
            Interest::READABLE | Interest::WRITABLE,
        )?;

        self.exchanges.insert(
            token,
            Exchange {
                conn,
                addr,
                command,
                kind: kind(token),
            },
        );
        Ok(token)
    }

    pub fn start_unary(
        &mut self,
        addr: SocketAddr,
        command: CommandId,
        dialect: Dialect,
        request: Vec<u8>,
    ) -> Result<PendingCall, TransportError> {
        let mut pending = None;
        self.register(addr, command, &request, |token| {
            let call = PendingCall::waiting(command, token);
            pending = Some(call.clone());
            ExchangeKind::Unary { dialect, call }
        })?;
        debug!(%command, ?dialect, bytes = request.len(), "unary call started");

        pending.ok_or_else(|| TransportError::Protocol {
            command,
            reason: "exchange was not registered".to_string(),
        })
    }

    pub fn start_stream(
        &mut self,
        addr: SocketAddr,
        command: CommandId,
        request: Vec<u8>,
        key: String,
        on_record: Box<dyn FnMut(&[u8])>,
    ) -> Result<Subscription, TransportError> {
        let shared = StreamShared::new(command);
        let stream = StreamExchange {
            shared: shared.clone(),
            key,
            on_record,
            fragment: Fragment::None,
            upgraded: false,
        };
        self.register(addr, command, &request, |_| ExchangeKind::Stream(stream))?;
        debug!(%command, "stream handshake started");

        Ok(Subscription::new(shared))
    }

    /// Forget an unresolved call. Its connection is closed.
    pub fn cancel(&mut self, call: &PendingCall) {
        if let Some(token) = call.token {
            if let Some(exchange) = self.exchanges.get(&token) {
                if matches!(exchange.kind, ExchangeKind::Unary { .. }) {
                    self.remove(token);
                }
            }
        }
    }

    /// Poll once and drive every ready exchange.
    pub fn turn(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.reap_unsubscribed();

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        let ready: Vec<Token> = self.events.iter().map(|event| event.token()).collect();
        for token in ready {
            let finished = match self.exchanges.get_mut(&token) {
                Some(exchange) => exchange.advance(),
                None => continue,
            };
            if finished {
                self.remove(token);
            }
        }

        // Callbacks may have unsubscribed during this turn.
        self.reap_unsubscribed();
        Ok(())
    }

    fn reap_unsubscribed(&mut self) {
        let tokens: Vec<Token> = self
            .exchanges
            .iter()
            .filter(|(_, ex)| match &ex.kind {
                ExchangeKind::Stream(stream) => stream.shared.close_requested.get(),
                ExchangeKind::Unary { .. } => false,
            })
            .map(|(token, _)| *token)
            .collect();

        for token in tokens {
            if let Some(exchange) = self.exchanges.get_mut(&token) {
                let upgraded = matches!(&exchange.kind, ExchangeKind::Stream(s) if s.upgraded);
                if upgraded {
                    exchange.conn.queue_write(&websocket::encode_frame(
                        Opcode::Close,
                        &[],
                        Some(websocket::mask_key()),
                    ));
                    let _ = exchange.conn.flush_write_buffer();
                }
                info!(command = %exchange.command, "stream unsubscribed");
            }
            self.remove(token);
        }
    }

    fn remove(&mut self, token: Token) {
        if let Some(mut exchange) = self.exchanges.remove(&token) {
            let _ = self.poll.registry().deregister(exchange.conn.stream_mut());
        }
    }
}
