//! Dynamic client: schema dibaca saat runtime, bukan saat build
//!
//! Request body di-encode dari input string mentah memakai request schema
//! contract, response di-decode memakai response schema. Hasil decode
//! selalu dibawa bersama byte mentahnya, jadi kegagalan decode tidak
//! menghilangkan data.

use std::fmt::Write as _;

use tracing::{debug, info};

use super::introspection;
use crate::core::{DecodeError, Error, Result};
use crate::network::{Subscription, Transport};
use crate::protocol::{decode, encode, CommandId, Contract, FieldValues, Record, RecordLayout, Strictness};

/// One response, raw and decoded
#[derive(Debug, Clone)]
pub struct Response {
    pub command: CommandId,
    pub raw: Vec<u8>,
    pub decoded: std::result::Result<Record, DecodeError>,
}

impl Response {
    pub fn new(command: CommandId, raw: Vec<u8>, contract: &Contract) -> Self {
        let decoded = decode(&raw, &contract.response_schema);
        Self {
            command,
            raw,
            decoded,
        }
    }

    /// `name: value` per line in schema order, or the decode error.
    pub fn render(&self) -> String {
        match &self.decoded {
            Ok(record) => {
                let mut out = String::new();
                for (name, value) in record.iter() {
                    let _ = writeln!(out, "{}: {}", name, value);
                }
                out
            }
            Err(e) => format!("decode failed: {}\n", e),
        }
    }

    /// Space separated lowercase hex bytes.
    pub fn hex(&self) -> String {
        self.raw
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Printable ASCII as-is, every other byte as `.`.
    pub fn printable(&self) -> String {
        self.raw
            .iter()
            .map(|&b| if (32..=126).contains(&b) { b as char } else { '.' })
            .collect()
    }
}

/// Client driven entirely by discovered contracts
pub struct DynamicClient<T: Transport> {
    transport: T,
    layout: RecordLayout,
    strictness: Strictness,
    contracts: Vec<Contract>,
}

impl<T: Transport> DynamicClient<T> {
    /// Client with an empty snapshot; call [`discover`](Self::discover) next.
    pub fn new(transport: T, layout: RecordLayout, strictness: Strictness) -> Self {
        Self {
            transport,
            layout,
            strictness,
            contracts: Vec::new(),
        }
    }

    /// Construct and run discovery once.
    pub fn connect(transport: T, layout: RecordLayout, strictness: Strictness) -> Result<Self> {
        let mut client = Self::new(transport, layout, strictness);
        client.discover()?;
        Ok(client)
    }

    /// Fetch contracts and replace the current snapshot.
    ///
    /// On failure the previous snapshot is kept.
    pub fn discover(&mut self) -> Result<&[Contract]> {
        self.contracts = introspection::discover(&mut self.transport, self.layout)?;
        Ok(&self.contracts)
    }

    /// Same as [`discover`](Self::discover), for an explicit refresh.
    pub fn rediscover(&mut self) -> Result<&[Contract]> {
        info!("refreshing contract snapshot");
        self.discover()
    }

    pub fn contracts(&self) -> &[Contract] {
        &self.contracts
    }

    pub fn contract(&self, id: CommandId) -> Option<&Contract> {
        self.contracts.iter().find(|c| c.id == id)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn strictness(&self) -> Strictness {
        self.strictness
    }

    fn lookup(&self, id: CommandId, expect_stream: bool) -> Result<Contract> {
        let contract = self.contract(id).ok_or(Error::UnknownCommand(id))?;
        if contract.is_stream() != expect_stream {
            return Err(Error::WrongKind {
                id,
                expected: if expect_stream { "stream" } else { "unary" },
                actual: contract.kind.as_str(),
            });
        }
        Ok(contract.clone())
    }

    /// Call a unary contract with raw string inputs keyed by field name.
    ///
    /// Contracts with an empty request schema are called without a body.
    pub fn call<V: FieldValues + ?Sized>(&mut self, id: CommandId, inputs: &V) -> Result<Response> {
        let contract = self.lookup(id, false)?;

        let body = if contract.request_schema.is_empty() {
            None
        } else {
            Some(encode(&contract.request_schema, inputs, self.strictness)?)
        };
        debug!(%id, name = %contract.name, body = body.as_ref().map_or(0, Vec::len), "dynamic call");

        let raw = self.transport.call(id, body.as_deref())?;
        Ok(Response::new(id, raw, &contract))
    }

    /// Subscribe to a stream contract. Each frame is decoded with the
    /// contract's response schema; a frame that fails to decode is still
    /// delivered, with the error in [`Response::decoded`].
    pub fn subscribe<F>(&mut self, id: CommandId, mut on_response: F) -> Result<Subscription>
    where
        F: FnMut(Response) + 'static,
    {
        let contract = self.lookup(id, true)?;
        let subscription = self.transport.open_stream(
            id,
            Box::new(move |frame: &[u8]| on_response(Response::new(id, frame.to_vec(), &contract))),
        )?;
        Ok(subscription)
    }

    /// Drive the transport, delivering stream records.
    pub fn run_for(&mut self, duration: std::time::Duration) -> Result<()> {
        Ok(self.transport.run_for(duration)?)
    }
}
