//! Command dispatch.
//!
//! Turns a parsed argument list into a store operation and a reply. A
//! command-level failure is an ordinary `Err` reply; the connection stays
//! open.

use crate::protocol::{Status, MAX_VALUE_LEN};
use crate::storage::Storage;
use tracing::trace;

const UNKNOWN_COMMAND: &[u8] = b"Unknown command";
const VALUE_TOO_LARGE: &[u8] = b"value too large";

/// Recognized command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Get { key: &'a [u8] },
    Set { key: &'a [u8], value: &'a [u8] },
    Del { key: &'a [u8] },
}

impl<'a> Command<'a> {
    /// Match the argument list against the known commands.
    ///
    /// The name is matched case-insensitively; wrong arity is treated the
    /// same as an unknown name.
    pub fn parse(args: &[&'a [u8]]) -> Option<Self> {
        match *args {
            [name, key] if name.eq_ignore_ascii_case(b"get") => Some(Command::Get { key }),
            [name, key, value] if name.eq_ignore_ascii_case(b"set") => {
                Some(Command::Set { key, value })
            }
            [name, key] if name.eq_ignore_ascii_case(b"del") => Some(Command::Del { key }),
            _ => None,
        }
    }
}

/// Outcome of a command: a status and the result payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply<'a> {
    pub status: Status,
    pub body: &'a [u8],
}

impl<'a> Reply<'a> {
    fn ok(body: &'a [u8]) -> Self {
        Self {
            status: Status::Ok,
            body,
        }
    }

    fn error(body: &'a [u8]) -> Self {
        Self {
            status: Status::Err,
            body,
        }
    }

    fn not_found() -> Self {
        Self {
            status: Status::NotFound,
            body: &[],
        }
    }
}

/// Execute one request against the store.
///
/// Performs at most one store read or mutation. The reply body is bounded
/// by `MAX_VALUE_LEN`, so it always fits a response buffer.
pub fn execute<'s>(args: &[&[u8]], storage: &'s mut Storage) -> Reply<'s> {
    let command = match Command::parse(args) {
        Some(command) => command,
        None => {
            trace!(argc = args.len(), "Unknown command");
            return Reply::error(UNKNOWN_COMMAND);
        }
    };

    trace!(?command, "Executing command");

    match command {
        Command::Get { key } => match storage.get(key) {
            Some(value) => Reply::ok(value),
            None => Reply::not_found(),
        },
        Command::Set { key, value } => {
            if value.len() > MAX_VALUE_LEN {
                return Reply::error(VALUE_TOO_LARGE);
            }
            storage.set(key, value);
            Reply::ok(&[])
        }
        Command::Del { key } => {
            storage.delete(key);
            Reply::ok(&[])
        }
    }
}
