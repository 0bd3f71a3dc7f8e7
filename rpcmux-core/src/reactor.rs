use crate::connection::Connection;
use async_trait::async_trait;
use std::io;
use std::time::Duration;

/// Accepts inbound connections for a bound listener. Returned by
/// [`Reactor::bind`].
#[async_trait]
pub trait Acceptor: Send {
    type Connection: Connection;

    async fn accept(&mut self) -> io::Result<Self::Connection>;
}

/// The external I/O reactor collaborator: lifecycle ownership of listeners
/// and outbound connections is delegated to it rather than managed
/// inline. `rpcmux-net-tokio` provides the concrete tokio-based
/// implementation.
#[async_trait]
pub trait Reactor: Send + Sync + 'static {
    type Connection: Connection;
    type Acceptor: Acceptor<Connection = Self::Connection>;

    /// Starts (or adopts) the reactor. Called once by [`crate::Server`]
    /// before binding; a reactor that merely rides an externally-driven
    /// event loop (as `rpcmux-net-tokio`'s does on the ambient tokio
    /// runtime) may treat this as a no-op.
    async fn start(&self) -> io::Result<()>;

    /// Stops the reactor if it owns the underlying event loop. Called by
    /// [`crate::Server::stop`] after every accepted connection has
    /// drained.
    async fn stop(&self) -> io::Result<()>;

    async fn connect(&self, host: &str, port: u16) -> io::Result<Self::Connection>;
    async fn bind(&self, addr: &str, port: u16, backlog: u32) -> io::Result<Self::Acceptor>;

    /// Resolves after `duration` has elapsed. The reactor, not the peer,
    /// owns timer scheduling per spec's external-interface contract.
    async fn schedule_timer(&self, duration: Duration);
}
