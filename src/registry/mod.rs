//! Registry: contract host untuk discovery, unary command, dan stream
//!
//! `Registry` menyimpan contract + handler. `RegistryServer` menjalankannya
//! di atas event loop mio (raw TCP, HTTP/1.1, WebSocket).

pub mod demo;
mod server;

use tracing::warn;

use crate::core::SchemaError;
use crate::protocol::{CommandId, Contract, ContractKind, RecordLayout, Schema};

pub use server::RegistryServer;

/// Unary handler: request body in, response bytes out.
pub type CommandHandler = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;
/// Stream producer, called once per broadcast tick.
pub type StreamProducer = Box<dyn FnMut() -> Vec<u8> + Send>;

enum Handler {
    Command(CommandHandler),
    Stream(StreamProducer),
}

struct Entry {
    contract: Contract,
    handler: Handler,
}

/// Contracts and their handlers, in registration order
#[derive(Default)]
pub struct Registry {
    entries: Vec<Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, contract: Contract, handler: Handler) {
        if contract.id == CommandId::DISCOVERY {
            warn!(name = %contract.name, "'?' is reserved for discovery, registration ignored");
            return;
        }
        if let Some(existing) = self.entries.iter_mut().find(|e| e.contract.id == contract.id) {
            warn!(id = %contract.id, old = %existing.contract.name, new = %contract.name, "replacing contract");
            *existing = Entry { contract, handler };
        } else {
            self.entries.push(Entry { contract, handler });
        }
    }

    /// Register a unary command. Schema texts are validated up front.
    pub fn register_command<F>(
        &mut self,
        id: CommandId,
        name: &str,
        response_size: u32,
        request_schema: &str,
        response_schema: &str,
        handler: F,
    ) -> Result<&mut Self, SchemaError>
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        let contract = Contract {
            id,
            name: name.to_string(),
            kind: ContractKind::Unary,
            request_schema: Schema::parse(request_schema)?,
            response_schema: Schema::parse(response_schema)?,
            response_size,
        };
        self.insert(contract, Handler::Command(Box::new(handler)));
        Ok(self)
    }

    /// Register a push stream; `producer` runs once per tick while the
    /// stream has subscribers.
    pub fn register_stream<F>(
        &mut self,
        id: CommandId,
        name: &str,
        response_size: u32,
        schema: &str,
        producer: F,
    ) -> Result<&mut Self, SchemaError>
    where
        F: FnMut() -> Vec<u8> + Send + 'static,
    {
        let contract = Contract {
            id,
            name: name.to_string(),
            kind: ContractKind::Stream,
            request_schema: Schema::empty(),
            response_schema: Schema::parse(schema)?,
            response_size,
        };
        self.insert(contract, Handler::Stream(Box::new(producer)));
        Ok(self)
    }

    pub fn contracts(&self) -> impl Iterator<Item = &Contract> {
        self.entries.iter().map(|e| &e.contract)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Discovery payload: one fixed-size record per contract.
    pub fn encode_contracts(&self, layout: RecordLayout) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * layout.record_size());
        for entry in &self.entries {
            layout.write(&entry.contract, &mut out);
        }
        out
    }

    pub(crate) fn is_stream(&self, id: CommandId) -> bool {
        self.entries
            .iter()
            .any(|e| e.contract.id == id && matches!(e.handler, Handler::Stream(_)))
    }

    /// Run the unary handler for `id`. `None` if no such command.
    pub(crate) fn invoke(&mut self, id: CommandId, body: &[u8]) -> Option<Vec<u8>> {
        let entry = self.entries.iter_mut().find(|e| e.contract.id == id)?;
        match &mut entry.handler {
            Handler::Command(handler) => Some(handler(body)),
            Handler::Stream(_) => None,
        }
    }

    /// Next payload of stream `id`.
    pub(crate) fn produce(&mut self, id: CommandId) -> Option<Vec<u8>> {
        let entry = self.entries.iter_mut().find(|e| e.contract.id == id)?;
        match &mut entry.handler {
            Handler::Stream(producer) => Some(producer()),
            Handler::Command(_) => None,
        }
    }
}
