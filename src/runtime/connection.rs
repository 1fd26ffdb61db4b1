//! Connection state machine for managing client streams.
//!
//! Each connection owns a read buffer of bytes received but not yet parsed
//! and a write buffer holding exactly one encoded response. The state
//! machine runs to a fixed point on every readiness event: it stops when
//! the stream would block or the connection is closing.

use crate::command;
use crate::protocol::{self, DecodeResult};
use crate::storage::Storage;
use slab::Slab;
use std::io::{self, Read, Write};
use tracing::{debug, error, trace, warn};

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Reading and decoding requests.
    ReceivingRequest,
    /// Flushing the encoded response in the write buffer.
    SendingResponse {
        /// Encoded response length.
        len: usize,
        /// Bytes already written.
        sent: usize,
    },
    /// Terminal. The owner releases the connection when it sees this.
    Closing,
}

/// A single client connection.
pub struct Connection<S> {
    stream: S,
    state: ConnState,
    read_buf: Box<[u8]>,
    /// Bytes of `read_buf` holding received data.
    filled: usize,
    write_buf: Box<[u8]>,
}

impl<S: Read + Write> Connection<S> {
    /// Create a new connection in the initial receiving state.
    ///
    /// Both buffers must be able to hold one full message plus its header.
    pub fn new(stream: S, read_buf: Box<[u8]>, write_buf: Box<[u8]>) -> Self {
        debug_assert!(read_buf.len() >= protocol::BUFFER_CAPACITY);
        debug_assert!(write_buf.len() >= protocol::BUFFER_CAPACITY);
        Self {
            stream,
            state: ConnState::ReceivingRequest,
            read_buf,
            filled: 0,
            write_buf,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_closing(&self) -> bool {
        self.state == ConnState::Closing
    }

    /// Whether the connection is waiting for the stream to become writable.
    pub fn wants_write(&self) -> bool {
        matches!(self.state, ConnState::SendingResponse { .. })
    }

    /// Bytes received but not yet consumed by a request.
    pub fn buffered(&self) -> usize {
        self.filled
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Mark connection for closing.
    pub fn close(&mut self) {
        self.state = ConnState::Closing;
    }

    /// Tear the connection down into its stream and buffers.
    pub fn into_parts(self) -> (S, Box<[u8]>, Box<[u8]>) {
        (self.stream, self.read_buf, self.write_buf)
    }

    /// Drive the state machine until the stream would block or the
    /// connection is closing.
    pub fn handle_io(&mut self, storage: &mut Storage) {
        loop {
            let progressed = match self.state {
                ConnState::ReceivingRequest => self.receive(storage),
                ConnState::SendingResponse { .. } => self.flush(),
                ConnState::Closing => false,
            };
            if !progressed {
                break;
            }
        }
    }

    fn receive(&mut self, storage: &mut Storage) -> bool {
        // Serve pipelined requests that are already buffered before reading
        if self.try_one_request(storage) {
            return true;
        }
        self.fill_buffer()
    }

    /// Decode and execute one buffered request.
    ///
    /// Returns true if the state changed (a response is queued or the
    /// connection is closing).
    fn try_one_request(&mut self, storage: &mut Storage) -> bool {
        let (payload, consumed) = match protocol::decode_request(&self.read_buf[..self.filled]) {
            DecodeResult::Complete(payload, consumed) => (payload, consumed),
            DecodeResult::Incomplete => return false,
            DecodeResult::Malformed(e) => {
                warn!(error = %e, "Protocol error");
                self.state = ConnState::Closing;
                return true;
            }
        };

        let encoded = protocol::parse_arguments(payload).and_then(|args| {
            let reply = command::execute(&args, storage);
            trace!(status = ?reply.status, body_len = reply.body.len(), "Reply");
            protocol::encode_response(reply.status, reply.body, &mut self.write_buf)
        });

        // Discard the consumed request, keeping any pipelined bytes after it
        self.read_buf.copy_within(consumed..self.filled, 0);
        self.filled -= consumed;

        match encoded {
            Ok(len) => {
                self.state = ConnState::SendingResponse { len, sent: 0 };
            }
            Err(e) => {
                warn!(error = %e, "Protocol error");
                self.state = ConnState::Closing;
            }
        }
        true
    }

    /// Read more bytes from the stream.
    ///
    /// Returns true if progress was made and the caller should continue.
    fn fill_buffer(&mut self) -> bool {
        // An incomplete request always leaves room: the decoder rejects any
        // length that would not fit the buffer.
        debug_assert!(self.filled < self.read_buf.len());

        match self.stream.read(&mut self.read_buf[self.filled..]) {
            Ok(0) => {
                if self.filled > 0 {
                    debug!(buffered = self.filled, "unexpected EOF");
                } else {
                    debug!("EOF");
                }
                self.state = ConnState::Closing;
                false
            }
            Ok(n) => {
                self.filled += n;
                true
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => true,
            Err(e) => {
                error!(error = %e, "Read error");
                self.state = ConnState::Closing;
                false
            }
        }
    }

    /// Write the unsent remainder of the response.
    ///
    /// Returns true if progress was made and the caller should continue.
    fn flush(&mut self) -> bool {
        let (len, sent) = match self.state {
            ConnState::SendingResponse { len, sent } => (len, sent),
            _ => return false,
        };

        match self.stream.write(&self.write_buf[sent..len]) {
            Ok(0) => {
                error!("Write returned 0");
                self.state = ConnState::Closing;
                false
            }
            Ok(n) => {
                let sent = sent + n;
                debug_assert!(sent <= len);
                self.state = if sent >= len {
                    ConnState::ReceivingRequest
                } else {
                    ConnState::SendingResponse { len, sent }
                };
                true
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => true,
            Err(e) => {
                error!(error = %e, "Write error");
                self.state = ConnState::Closing;
                false
            }
        }
    }
}

/// Registry of active connections using slab allocation.
///
/// Keys are stable for the lifetime of a connection and independent of the
/// underlying descriptor number. A key is only reused after its connection
/// has been removed.
pub struct ConnectionRegistry<S> {
    connections: Slab<Connection<S>>,
    max_connections: usize,
}

impl<S> ConnectionRegistry<S> {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::new(),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Hands the connection back if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection<S>) -> Result<usize, Connection<S>> {
        if self.is_full() {
            return Err(conn);
        }
        Ok(self.connections.insert(conn))
    }

    /// Get a mutable reference to a connection.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection<S>> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, id: usize) -> Option<Connection<S>> {
        self.connections.try_remove(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if there are no connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }
}
