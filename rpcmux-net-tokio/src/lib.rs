//! Concrete [`rpcmux_core::Connection`] and [`rpcmux_core::Reactor`]
//! implementations backed by tokio TCP sockets.

use async_trait::async_trait;
use bytes::Bytes;
use rpcmux_core::{Acceptor, Connection, Reactor};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

/// A tokio [`TcpStream`] wrapped as an [`rpcmux_core::Connection`].
///
/// Writes are serialized with an internal mutex: the half-open write side
/// of a `TcpStream` is `Send` but not safely shareable across concurrent
/// writers without one, and the contract requires that two writes never
/// interleave.
pub struct TcpConnection {
    host: String,
    port: u16,
    read_half: Mutex<tokio::net::tcp::OwnedReadHalf>,
    write_half: Mutex<tokio::net::tcp::OwnedWriteHalf>,
}

impl TcpConnection {
    fn new(stream: TcpStream, host: String, port: u16) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            host,
            port,
            read_half: Mutex::new(read_half),
            write_half: Mutex::new(write_half),
        }
    }
}

#[async_trait]
impl Connection for TcpConnection {
    fn host(&self) -> &str {
        &self.host
    }

    fn port(&self) -> u16 {
        self.port
    }

    async fn write(&self, bytes: Bytes) -> io::Result<()> {
        self.write_half.lock().await.write_all(&bytes).await
    }

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_half.lock().await.read(buf).await
    }

    async fn shutdown(&self) {
        let _ = self.write_half.lock().await.shutdown().await;
    }
}

/// Accepts connections on a bound [`TcpListener`].
pub struct TcpAcceptor {
    listener: TcpListener,
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    type Connection = TcpConnection;

    async fn accept(&mut self) -> io::Result<Self::Connection> {
        let (stream, peer_addr) = self.listener.accept().await?;
        stream.set_nodelay(true).ok();
        Ok(TcpConnection::new(
            stream,
            peer_addr.ip().to_string(),
            peer_addr.port(),
        ))
    }
}

/// The default [`Reactor`] implementation: plain TCP via tokio, with
/// `TCP_NODELAY` enabled on every socket (request/response traffic has no
/// use for Nagle's batching).
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioReactor;

#[async_trait]
impl Reactor for TokioReactor {
    type Connection = TcpConnection;
    type Acceptor = TcpAcceptor;

    async fn start(&self) -> io::Result<()> {
        // The tokio runtime is ambient (owned by whoever called
        // `#[tokio::main]`), not by this reactor, so there is nothing to
        // start.
        Ok(())
    }

    async fn stop(&self) -> io::Result<()> {
        // Symmetric no-op: this reactor never owned the runtime it rides.
        Ok(())
    }

    async fn connect(&self, host: &str, port: u16) -> io::Result<Self::Connection> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true).ok();
        Ok(TcpConnection::new(stream, host.to_string(), port))
    }

    async fn bind(&self, addr: &str, port: u16, backlog: u32) -> io::Result<Self::Acceptor> {
        let _ = backlog; // tokio's TcpListener has no explicit backlog knob
        let listener = TcpListener::bind((addr, port)).await?;
        Ok(TcpAcceptor { listener })
    }

    async fn schedule_timer(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
