//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! Everything runs on one thread. Each ready connection is driven until it
//! would block, so the store needs no synchronization.

use crate::config::Config;
use crate::protocol::BUFFER_CAPACITY;
use crate::runtime::{BufferPool, Connection, ConnectionRegistry};
use crate::storage::Storage;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, debug_span, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Idle buffers kept for reuse by future connections.
const MAX_IDLE_BUFFERS: usize = 1024;

/// Single-threaded reactor owning the listener, the connection table and
/// the store.
pub struct EventLoop {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    connections: ConnectionRegistry<TcpStream>,
    buffers: BufferPool,
    storage: Storage,
    poll_timeout: Duration,
}

impl EventLoop {
    /// Wrap an already bound and listening socket.
    pub fn new(listener: std::net::TcpListener, config: &Config) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        let mut listener = TcpListener::from_std(listener);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(config.event_capacity),
            listener,
            connections: ConnectionRegistry::new(config.max_connections),
            buffers: BufferPool::new(BUFFER_CAPACITY, MAX_IDLE_BUFFERS),
            storage: Storage::new(),
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Buffers parked in the pool for future connections.
    pub fn idle_buffers(&self) -> usize {
        self.buffers.available()
    }

    /// Run until the poller fails.
    pub fn run(&mut self) -> io::Result<()> {
        info!(addr = %self.local_addr()?, "Event loop started");
        loop {
            self.turn()?;
        }
    }

    /// One iteration: wait for readiness, drive every ready connection,
    /// then accept new ones.
    pub fn turn(&mut self) -> io::Result<()> {
        match self.poll.poll(&mut self.events, Some(self.poll_timeout)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        let mut listener_ready = false;

        for event in self.events.iter() {
            match event.token() {
                LISTENER_TOKEN => listener_ready = true,
                Token(conn_id) => drive_connection(
                    conn_id,
                    self.poll.registry(),
                    &mut self.connections,
                    &mut self.buffers,
                    &mut self.storage,
                ),
            }
        }

        // Accept last so a connection closed above can never have its key
        // handed to a new stream while events for it are still queued.
        if listener_ready {
            self.accept_connections();
        }

        Ok(())
    }

    /// Accept until the listener would block.
    ///
    /// Readiness is edge-triggered, so the backlog must be drained here.
    /// Accept failures are logged and never stop the loop.
    fn accept_connections(&mut self) {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Accept error");
                    break;
                }
            };

            if self.connections.is_full() {
                // Dropping the stream closes it
                warn!(peer = %peer, "Connection limit reached, rejecting");
                continue;
            }

            let conn = Connection::new(stream, self.buffers.alloc(), self.buffers.alloc());
            let conn_id = match self.connections.insert(conn) {
                Ok(conn_id) => conn_id,
                Err(conn) => {
                    release(conn, self.poll.registry(), &mut self.buffers);
                    continue;
                }
            };

            let registered = match self.connections.get_mut(conn_id) {
                Some(conn) => self.poll.registry().register(
                    conn.stream_mut(),
                    Token(conn_id),
                    Interest::READABLE,
                ),
                None => continue,
            };

            match registered {
                Ok(()) => debug!(conn_id, peer = %peer, "Accepted connection"),
                Err(e) => {
                    error!(conn_id, error = %e, "Failed to register connection");
                    close_connection(
                        conn_id,
                        self.poll.registry(),
                        &mut self.connections,
                        &mut self.buffers,
                    );
                }
            }
        }
    }
}

/// Run one connection's state machine and apply the outcome: update its
/// poll interest or release it.
fn drive_connection(
    conn_id: usize,
    registry: &Registry,
    connections: &mut ConnectionRegistry<TcpStream>,
    buffers: &mut BufferPool,
    storage: &mut Storage,
) {
    let conn = match connections.get_mut(conn_id) {
        Some(conn) => conn,
        None => return,
    };

    let span = debug_span!("conn", conn_id);
    let _enter = span.enter();

    let was_writing = conn.wants_write();
    conn.handle_io(storage);

    if !conn.is_closing() && conn.wants_write() != was_writing {
        let interest = if conn.wants_write() {
            Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        if let Err(e) = registry.reregister(conn.stream_mut(), Token(conn_id), interest) {
            error!(error = %e, "Failed to update interest");
            conn.close();
        }
    }

    if conn.is_closing() {
        close_connection(conn_id, registry, connections, buffers);
        if connections.is_empty() {
            debug!(
                keys = storage.len(),
                memory_used = storage.memory_used(),
                idle_buffers = buffers.available(),
                "No connections left"
            );
        }
    }
}

fn close_connection(
    conn_id: usize,
    registry: &Registry,
    connections: &mut ConnectionRegistry<TcpStream>,
    buffers: &mut BufferPool,
) {
    if let Some(conn) = connections.remove(conn_id) {
        release(conn, registry, buffers);
        debug!(conn_id, remaining = connections.len(), "Connection closed");
    }
}

fn release(conn: Connection<TcpStream>, registry: &Registry, buffers: &mut BufferPool) {
    let (mut stream, read_buf, write_buf) = conn.into_parts();
    // Never registered if insertion failed; nothing to undo then
    let _ = registry.deregister(&mut stream);
    buffers.free(read_buf);
    buffers.free(write_buf);
}
