//! Result board untuk explorer
//!
//! Menyimpan status line terakhir dan riwayat response (terbaru di depan).
//! Entry stream di-key per command id: frame baru menggantikan entry lama
//! (last write wins). Kegagalan hanya mengubah status, hasil sebelumnya
//! tetap ada.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, Local};

use super::dynamic::Response;
use crate::core::Error;
use crate::protocol::{CommandId, Contract};

/// Entries kept after a unary call.
pub const CALL_HISTORY: usize = 5;
/// Entries kept after a stream update.
pub const STREAM_HISTORY: usize = 20;

pub const STATUS_READY: &str = "Ready";
pub const STATUS_DISCOVERING: &str = "Introspecting Service...";
pub const STATUS_DISCOVERED: &str = "Discovery Successful";
pub const STATUS_CONNECTION_FAILED: &str = "Connection Failed";
pub const STATUS_CALL_OK: &str = "Execution Success";
pub const STATUS_CALL_FAILED: &str = "Execution Failed";

#[derive(Debug, Clone)]
pub struct BoardEntry {
    pub command: CommandId,
    pub received_at: DateTime<Local>,
    pub response: Response,
    pub streaming: bool,
}

/// Board shared between stream callbacks and the explorer loop.
pub type SharedBoard = Rc<RefCell<ResultBoard>>;

#[derive(Debug, Clone)]
pub struct ResultBoard {
    status: String,
    /// Newest first
    entries: Vec<BoardEntry>,
}

impl Default for ResultBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultBoard {
    pub fn new() -> Self {
        Self {
            status: STATUS_READY.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn shared() -> SharedBoard {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// Status line mentions a failure.
    pub fn is_failed(&self) -> bool {
        self.status.to_lowercase().contains("failed")
    }

    pub fn entries(&self) -> &[BoardEntry] {
        &self.entries
    }

    /// Most recent entry for `command`.
    pub fn latest(&self, command: CommandId) -> Option<&BoardEntry> {
        self.entries.iter().find(|e| e.command == command)
    }

    pub fn begin_discovery(&mut self) {
        self.status = STATUS_DISCOVERING.to_string();
    }

    pub fn finish_discovery<T>(&mut self, outcome: &Result<T, Error>) {
        self.status = match outcome {
            Ok(_) => STATUS_DISCOVERED,
            Err(_) => STATUS_CONNECTION_FAILED,
        }
        .to_string();
    }

    pub fn begin_call(&mut self, contract: &Contract) {
        self.status = format!("Executing {}...", contract.name);
    }

    pub fn finish_call(&mut self, outcome: Result<Response, &Error>) {
        match outcome {
            Ok(response) => {
                self.push(response, false, CALL_HISTORY);
                self.status = STATUS_CALL_OK.to_string();
            }
            Err(_) => self.status = STATUS_CALL_FAILED.to_string(),
        }
    }

    /// Replace the streaming entry of the same command, if any.
    pub fn record_stream(&mut self, response: Response) {
        let command = response.command;
        self.entries.retain(|e| !(e.streaming && e.command == command));
        self.push(response, true, STREAM_HISTORY);
    }

    fn push(&mut self, response: Response, streaming: bool, cap: usize) {
        self.entries.insert(
            0,
            BoardEntry {
                command: response.command,
                received_at: Local::now(),
                response,
                streaming,
            },
        );
        self.entries.truncate(cap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ConnectionError;
    use crate::protocol::{ContractKind, Schema};

    fn contract(id: u8, kind: ContractKind) -> Contract {
        Contract {
            id: CommandId::new(id),
            name: "Telemetry".into(),
            kind,
            request_schema: Schema::empty(),
            response_schema: Schema::parse("u32:counter").unwrap(),
            response_size: 4,
        }
    }

    fn response(id: u8, counter: u32) -> Response {
        Response::new(
            CommandId::new(id),
            counter.to_le_bytes().to_vec(),
            &contract(id, ContractKind::Stream),
        )
    }

    #[test]
    fn test_stream_entries_are_last_write_wins() {
        let mut board = ResultBoard::new();
        board.record_stream(response(b'3', 1));
        board.record_stream(response(b'9', 1));
        board.record_stream(response(b'3', 2));

        assert_eq!(board.entries().len(), 2);
        let latest = board.latest(CommandId::new(b'3')).unwrap();
        assert_eq!(latest.response.raw, 2u32.to_le_bytes().to_vec());
        assert_eq!(board.entries()[0].command, CommandId::new(b'3'));
    }

    #[test]
    fn test_call_history_is_capped() {
        let mut board = ResultBoard::new();
        for i in 0..8 {
            board.finish_call(Ok(response(b'1', i)));
        }
        assert_eq!(board.entries().len(), CALL_HISTORY);
        assert_eq!(board.status(), STATUS_CALL_OK);
    }

    #[test]
    fn test_failure_keeps_previous_results() {
        let mut board = ResultBoard::new();
        board.begin_call(&contract(b'1', ContractKind::Unary));
        assert_eq!(board.status(), "Executing Telemetry...");

        board.finish_call(Ok(response(b'1', 1)));
        let err: Error = ConnectionError::TimedOut(std::time::Duration::from_secs(1)).into();
        board.finish_call(Err(&err));

        assert_eq!(board.status(), STATUS_CALL_FAILED);
        assert!(board.is_failed());
        assert_eq!(board.entries().len(), 1);
    }

    #[test]
    fn test_discovery_status() {
        let mut board = ResultBoard::new();
        assert_eq!(board.status(), STATUS_READY);

        board.begin_discovery();
        assert_eq!(board.status(), STATUS_DISCOVERING);

        board.finish_discovery::<()>(&Err(Error::UnknownCommand(CommandId::DISCOVERY)));
        assert_eq!(board.status(), STATUS_CONNECTION_FAILED);

        board.finish_discovery(&Ok(()));
        assert_eq!(board.status(), STATUS_DISCOVERED);
    }
}
