//! Stream subscription handle
//!
//! State machine: `Connecting → Open → Closed`. `Closed` is terminal;
//! a closed subscription is never reopened.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::protocol::CommandId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Upgrade handshake still in flight.
    Connecting,
    Open,
    Closed,
}

/// State shared between a [`Subscription`] and the event loop.
#[derive(Debug)]
pub(crate) struct StreamShared {
    pub command: CommandId,
    pub state: Cell<StreamState>,
    pub close_requested: Cell<bool>,
    pub last_error: RefCell<Option<String>>,
}

impl StreamShared {
    pub fn new(command: CommandId) -> Rc<Self> {
        Rc::new(Self {
            command,
            state: Cell::new(StreamState::Connecting),
            close_requested: Cell::new(false),
            last_error: RefCell::new(None),
        })
    }

    /// Move to `Closed`, remembering why if the close was not requested.
    pub fn close(&self, error: Option<String>) {
        if self.state.get() == StreamState::Closed {
            return;
        }
        if let Some(e) = error {
            *self.last_error.borrow_mut() = Some(e);
        }
        self.state.set(StreamState::Closed);
    }

    /// Whether inbound frames may still be delivered.
    #[inline]
    pub fn accepts_frames(&self) -> bool {
        !self.close_requested.get() && self.state.get() != StreamState::Closed
    }
}

/// Handle returned by `open_stream`
///
/// Dropping the handle does **not** close the stream; call
/// [`unsubscribe`](Subscription::unsubscribe).
#[must_use = "a stream keeps running until `unsubscribe` is called"]
#[derive(Debug, Clone)]
pub struct Subscription {
    shared: Rc<StreamShared>,
}

impl Subscription {
    pub(crate) fn new(shared: Rc<StreamShared>) -> Self {
        Self { shared }
    }

    /// Open handle not tied to a socket, for custom `Transport` impls.
    pub fn standalone(command: CommandId) -> Self {
        let shared = StreamShared::new(command);
        shared.state.set(StreamState::Open);
        Self { shared }
    }

    pub fn command(&self) -> CommandId {
        self.shared.command
    }

    pub fn state(&self) -> StreamState {
        self.shared.state.get()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == StreamState::Closed
    }

    /// Why the stream closed, when the remote side or the network ended it.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.borrow().clone()
    }

    /// Stop delivery and close the socket on the next loop turn.
    ///
    /// Idempotent, and a no-op after the stream closed by itself. No
    /// callback runs after this returns.
    pub fn unsubscribe(&self) {
        if self.shared.close_requested.replace(true) {
            return;
        }
        self.shared.close(None);
    }
}
