//! Single-threaded networking runtime.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS):
//! - `BufferPool`: Recycled per-connection buffers
//! - `Connection`: Connection state machine
//! - `EventLoop`: The reactor driving every connection

mod buffer;
mod connection;
mod event_loop;

pub use buffer::BufferPool;
pub use connection::{ConnState, Connection, ConnectionRegistry};
pub use event_loop::EventLoop;

use crate::config::Config;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use tracing::info;

/// Create a non-blocking listening socket with `SO_REUSEADDR`.
pub fn bind_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

/// Bind the configured address and serve forever.
pub fn run(config: &Config) -> io::Result<()> {
    let listener = bind_listener(config.listen, config.backlog)?;

    info!(
        addr = %config.listen,
        max_connections = config.max_connections,
        poll_timeout_ms = config.poll_timeout_ms,
        "Starting event loop"
    );

    EventLoop::new(listener, config)?.run()
}
