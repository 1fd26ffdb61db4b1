//! pollkv: a single-threaded key/value server.
//!
//! One readiness-polling loop multiplexes every client connection. Requests
//! use a length-prefixed binary protocol and may be pipelined; each one runs
//! against an in-memory store.
//!
//! - `protocol`: framing codec
//! - `command`: GET / SET / DEL dispatch
//! - `storage`: the owned key/value map
//! - `runtime`: connection state machine and mio event loop

pub mod command;
pub mod config;
pub mod error;
pub mod protocol;
pub mod runtime;
pub mod storage;
