use crate::client::ClientPeer;
use crate::reactor::{Acceptor, Reactor};
use crate::server::{RequestHandler, ServerPeer};
use rpcmux_std::{Codec, RpcError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Establishes outgoing connections against a [`Reactor`] and hands back a
/// ready-to-use [`ClientPeer`] for each one.
///
/// Multi-host routing across a pool of peers is explicitly out of scope:
/// callers wanting that can hold however many `ClientPeer` handles they like
/// (cloning one is cheap) and pick among them themselves.
pub struct Client<R: Reactor> {
    reactor: Arc<R>,
}

impl<R: Reactor> Client<R> {
    pub fn new(reactor: R) -> Self {
        Self {
            reactor: Arc::new(reactor),
        }
    }

    /// Connect to `host:port` and wrap the resulting connection in a
    /// [`ClientPeer`] with a channel table sized for `max_channels`.
    pub async fn connect<Cod, M>(
        &self,
        host: &str,
        port: u16,
        codec: Cod,
        max_channels: usize,
    ) -> rpcmux_std::Result<ClientPeer<R::Connection, Cod, M>>
    where
        Cod: Codec<M> + Send + 'static,
        M: Send + 'static,
    {
        let conn = self
            .reactor
            .connect(host, port)
            .await
            .map_err(RpcError::Io)?;
        ClientPeer::new(conn, codec, max_channels)
    }
}

/// Owns a bound listener and turns every accepted connection into a
/// [`ServerPeer`] backed by a shared `handler`.
///
/// Each accepted connection gets its own codec instance, built fresh by
/// `codec_factory` (codecs hold per-connection framing state and cannot be
/// shared across connections).
pub struct Server<R: Reactor> {
    reactor: Arc<R>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    active_connections: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl<R: Reactor> Server<R> {
    /// Starts (or adopts) `reactor`, binds `addr:port`, and spawns the
    /// accept loop. Each accepted connection is wrapped in a `ServerPeer`
    /// and handed to `on_connection`. Returns once the bind succeeds; the
    /// accept loop itself runs in the background until [`Server::stop`] is
    /// called or the listener errors out.
    pub async fn start<Cod, M, H, F>(
        reactor: R,
        addr: &str,
        port: u16,
        backlog: u32,
        codec_factory: F,
        handler: Arc<H>,
        on_connection: impl Fn(ServerPeer<R::Connection, Cod, M, H>) + Send + Sync + 'static,
    ) -> std::io::Result<Self>
    where
        Cod: Codec<M> + Send + 'static,
        M: Send + 'static,
        H: RequestHandler<M> + 'static,
        F: Fn() -> Cod + Send + Sync + 'static,
    {
        let reactor = Arc::new(reactor);
        reactor.start().await?;
        let mut acceptor = reactor.bind(addr, port, backlog).await?;
        let on_connection = Arc::new(on_connection);

        let shutdown = CancellationToken::new();
        let active_connections = Arc::new(AtomicUsize::new(0));
        let drained = Arc::new(Notify::new());

        let accept_task = {
            let shutdown = shutdown.clone();
            let active_connections = active_connections.clone();
            let drained = drained.clone();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            debug!("stop requested, accept loop exiting");
                            break;
                        }
                        accepted = acceptor.accept() => {
                            match accepted {
                                Ok(conn) => {
                                    let codec = codec_factory();
                                    let peer = ServerPeer::new(conn, codec, handler.clone());

                                    active_connections.fetch_add(1, Ordering::SeqCst);
                                    let active_connections = active_connections.clone();
                                    let drained = drained.clone();
                                    peer.on_closed(move |_| {
                                        if active_connections.fetch_sub(1, Ordering::SeqCst) == 1 {
                                            drained.notify_one();
                                        }
                                    });

                                    on_connection(peer);
                                }
                                Err(e) => {
                                    warn!(error = %e, "accept failed, listener stopping");
                                    break;
                                }
                            }
                        }
                    }
                }
            })
        };

        Ok(Self {
            reactor,
            accept_task: Mutex::new(Some(accept_task)),
            shutdown,
            active_connections,
            drained,
        })
    }

    pub fn reactor(&self) -> &R {
        &self.reactor
    }

    /// Stops accepting new connections, waits for every connection already
    /// accepted to drain (its `ServerPeer` to close), then stops the
    /// reactor. Resolves once draining completes.
    pub async fn stop(&self) -> std::io::Result<()> {
        self.shutdown.cancel();

        let accept_task = self.accept_task.lock().unwrap().take();
        if let Some(accept_task) = accept_task {
            let _ = accept_task.await;
        }

        while self.active_connections.load(Ordering::SeqCst) > 0 {
            self.drained.notified().await;
        }

        self.reactor.stop().await
    }
}
