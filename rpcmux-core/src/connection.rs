use async_trait::async_trait;
use std::io;

/// A reliable byte-stream connection, as provided by an external I/O
/// reactor (see [`Reactor`](crate::reactor::Reactor)).
///
/// Reading is pull-based rather than callback-based: the peer's read pump
/// repeatedly calls [`Connection::read`] in a loop, which is the idiomatic
/// Rust analogue of the `on_data(callback)` hook in the abstract design —
/// the pump task itself *is* the installed handler. Concurrent writers are
/// the implementation's responsibility to serialize; [`Connection::write`]
/// must write one complete, contiguous frame per call.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    fn host(&self) -> &str;
    fn port(&self) -> u16;

    /// Write `bytes` as a single contiguous unit. Implementations must
    /// serialize concurrent callers so that two writes never interleave.
    async fn write(&self, bytes: bytes::Bytes) -> io::Result<()>;

    /// Read the next chunk of bytes. Returns `Ok(0)` on orderly EOF.
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Initiate shutdown of the underlying transport. Idempotent.
    async fn shutdown(&self);
}
