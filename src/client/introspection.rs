//! Introspection: satu request discovery (`?`), lalu potong payload
//! menjadi record berukuran tetap.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::core::{lift_transport, Result};
use crate::network::Transport;
use crate::protocol::{CommandId, Contract, ContractRecords, RecordLayout};

/// Fetch the registry's contracts in arrival order.
///
/// A trailing chunk shorter than one record is dropped. Records whose
/// schema text does not parse, and later duplicates of an id, are skipped
/// with a warning.
pub fn discover<T: Transport + ?Sized>(transport: &mut T, layout: RecordLayout) -> Result<Vec<Contract>> {
    let payload = transport
        .call(CommandId::DISCOVERY, None)
        .map_err(lift_transport)?;

    Ok(parse_snapshot(&payload, layout))
}

/// Split a discovery payload into contracts.
pub fn parse_snapshot(payload: &[u8], layout: RecordLayout) -> Vec<Contract> {
    let records = ContractRecords::new(payload, layout);
    if records.partial_tail() > 0 {
        debug!(
            bytes = records.partial_tail(),
            record_size = layout.record_size(),
            "dropping incomplete trailing record"
        );
    }

    let mut seen = HashSet::new();
    let mut contracts = Vec::with_capacity(payload.len() / layout.record_size());
    for (index, record) in records.enumerate() {
        let contract = match record {
            Ok(contract) => contract,
            Err(e) => {
                warn!(index, error = %e, "skipping contract record with invalid schema");
                continue;
            }
        };
        if !seen.insert(contract.id) {
            warn!(id = %contract.id, name = %contract.name, "duplicate contract id in snapshot, keeping the first");
            continue;
        }
        let size = contract.response_size as usize;
        match contract.response_schema.fixed_size() {
            Some(fixed) if size != 0 && fixed != size => {
                debug!(id = %contract.id, fixed, size, "response_size differs from schema size");
            }
            _ => {}
        }
        contracts.push(contract);
    }

    info!(count = contracts.len(), "discovery complete");
    contracts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ConnectionError, Error, TransportError};
    use crate::network::{PendingCall, Subscription};
    use crate::protocol::{ContractKind, Schema};
    use std::time::Duration;

    struct Canned(Result<Vec<u8>, fn() -> TransportError>);

    impl Transport for Canned {
        fn unary_call(&mut self, command: CommandId, body: Option<&[u8]>) -> std::result::Result<PendingCall, TransportError> {
            assert_eq!(command, CommandId::DISCOVERY);
            assert!(body.is_none());
            let result = match &self.0 {
                Ok(bytes) => Ok(bytes.clone()),
                Err(make) => Err(make()),
            };
            Ok(PendingCall::resolved(command, result))
        }

        fn open_stream(&mut self, _: CommandId, _: Box<dyn FnMut(&[u8])>) -> std::result::Result<Subscription, TransportError> {
            unreachable!("discovery never opens streams")
        }

        fn turn(&mut self, _: Option<Duration>) -> std::result::Result<(), TransportError> {
            Ok(())
        }
    }

    fn contract(id: u8, name: &str) -> Contract {
        Contract {
            id: CommandId::new(id),
            name: name.into(),
            kind: ContractKind::Unary,
            request_schema: Schema::empty(),
            response_schema: Schema::parse("c2:status").unwrap(),
            response_size: 2,
        }
    }

    fn payload(contracts: &[Contract]) -> Vec<u8> {
        let mut out = Vec::new();
        for c in contracts {
            RecordLayout::Current.write(c, &mut out);
        }
        out
    }

    #[test]
    fn test_discover_keeps_arrival_order() {
        let expected = vec![contract(b'2', "B"), contract(b'1', "A")];
        let mut transport = Canned(Ok(payload(&expected)));

        let found = discover(&mut transport, RecordLayout::Current).unwrap();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_empty_payload_is_empty_list() {
        let mut transport = Canned(Ok(Vec::new()));
        assert!(discover(&mut transport, RecordLayout::Current).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_id_keeps_first() {
        let bytes = payload(&[contract(b'1', "First"), contract(b'1', "Second")]);
        let found = parse_snapshot(&bytes, RecordLayout::Current);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "First");
    }

    #[test]
    fn test_bad_schema_record_is_skipped() {
        let mut bytes = payload(&[contract(b'1', "Good"), contract(b'2', "Bad")]);
        // Overwrite the second record's response schema with junk.
        let bad = 128 + 84;
        bytes[bad..bad + 7].copy_from_slice(b"q9:oops");

        let found = parse_snapshot(&bytes, RecordLayout::Current);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Good");
    }

    #[test]
    fn test_connection_failure_is_connection_error() {
        let mut transport = Canned(Err(|| {
            ConnectionError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)).into()
        }));

        let err = discover(&mut transport, RecordLayout::Current).unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(err.class(), "ConnectionError");
    }
}
