use crate::channel_table::{ChannelTable, Promise};
use crate::connection::Connection;
use crate::pump::{run_read_pump, Dispatch, PeerCore};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rpcmux_std::{Codec, RpcError, UNASSIGNED_CHANNEL};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::trace;

enum QueuedPayload<M> {
    /// Codec is not recoding-capable: keep the original request and encode
    /// it with the real channel once one is available.
    Raw(M),
    /// Codec is recoding-capable: eagerly encoded at enqueue time with the
    /// `UNASSIGNED_CHANNEL` placeholder, rewritten via `recode` at flush.
    PreEncoded(Bytes),
}

struct QueuedRequest<M> {
    payload: QueuedPayload<M>,
    promise: Promise<M>,
}

struct Shared<M> {
    table: ChannelTable<M>,
    queue: VecDeque<QueuedRequest<M>>,
}

/// Concrete peer owned by a caller that issues requests and awaits
/// correlated responses over a single connection.
///
/// Cloning a `ClientPeer` is cheap and shares the same underlying
/// connection, channel table and pending queue (it is a thin handle over
/// an `Arc`).
pub struct ClientPeer<C, Cod, M> {
    core: Arc<PeerCore<C, Cod>>,
    shared: Arc<Mutex<Shared<M>>>,
}

impl<C, Cod, M> Clone for ClientPeer<C, Cod, M> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<C, Cod, M> ClientPeer<C, Cod, M>
where
    C: Connection,
    Cod: Codec<M> + Send + 'static,
    M: Send + 'static,
{
    /// Construct a new client peer over `conn` using `codec`, with a
    /// channel table sized for `max_channels` concurrent outstanding
    /// requests. Spawns the read pump immediately.
    ///
    /// Rejects `max_channels > 2^15` synchronously.
    pub fn new(conn: C, codec: Cod, max_channels: usize) -> rpcmux_std::Result<Self> {
        let table = ChannelTable::new(max_channels)?;
        let core = Arc::new(PeerCore::new(conn, codec));
        let shared = Arc::new(Mutex::new(Shared {
            table,
            queue: VecDeque::new(),
        }));

        let peer = Self { core, shared };

        let pump_core = peer.core.clone();
        let dispatch: Arc<Self> = Arc::new(peer.clone());
        tokio::spawn(run_read_pump(pump_core, dispatch));

        Ok(peer)
    }

    pub fn host(&self) -> &str {
        self.core.host()
    }

    pub fn port(&self) -> u16 {
        self.core.port()
    }

    pub fn on_closed<F>(&self, callback: F)
    where
        F: FnMut(Option<&RpcError>) + Send + 'static,
    {
        self.core.on_closed(callback);
    }

    /// Initiates shutdown and immediately fails every outstanding and
    /// queued request with [`RpcError::ConnectionClosed`], without waiting
    /// for the remote side to acknowledge.
    pub async fn close(&self) {
        self.core.close().await;
        if self.core.fire_closed(None).await {
            self.handle_closed(None).await;
        }
    }

    pub fn state(&self) -> crate::state::PeerState {
        self.core.state()
    }

    /// The channel table's fixed capacity, as passed to [`Self::new`].
    pub fn max_channels(&self) -> usize {
        self.shared.lock().table.len()
    }

    /// Number of channels currently occupied by an outstanding request.
    pub fn outstanding_channels(&self) -> usize {
        self.shared.lock().table.occupied_count()
    }

    /// Number of requests currently waiting for a free channel.
    pub fn queue_len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Send `request`, returning a future that resolves to the correlated
    /// response, a [`RpcError::Timeout`] if `timeout` elapses first, or a
    /// [`RpcError::ConnectionClosed`] if the peer closes first.
    pub async fn send_message(
        &self,
        request: M,
        timeout: Option<Duration>,
    ) -> rpcmux_std::Result<M> {
        let (tx, rx) = oneshot::channel();

        let allocation = {
            let mut shared = self.shared.lock();
            shared.table.try_allocate(tx)
        };

        match allocation {
            Ok(channel) => self.send_on_channel(channel, request).await,
            Err(tx) => self.enqueue(tx, request).await,
        }

        Self::await_response(rx, timeout).await
    }

    async fn send_on_channel(&self, channel: usize, request: M) {
        trace!(channel, "channel allocated, encoding request");
        match self.core.encode(request, channel as i32) {
            Ok(bytes) => {
                if let Err(e) = self.core.write(bytes).await {
                    self.fail_channel(channel, RpcError::Io(e));
                }
            }
            Err(e) => self.fail_channel(channel, e),
        }
    }

    async fn enqueue(&self, promise: Promise<M>, request: M) {
        let recoding = self.core.recoding::<M>();

        let payload = if recoding {
            match self.core.encode(request, UNASSIGNED_CHANNEL) {
                Ok(bytes) => QueuedPayload::PreEncoded(bytes),
                Err(e) => {
                    let _ = promise.send(Err(e));
                    return;
                }
            }
        } else {
            QueuedPayload::Raw(request)
        };

        trace!("no free channel, queueing request");
        self.shared
            .lock()
            .queue
            .push_back(QueuedRequest { payload, promise });
    }

    fn fail_channel(&self, channel: usize, err: RpcError) {
        let promise = self.shared.lock().table.take(channel);
        if let Some(promise) = promise {
            let _ = promise.send(Err(err));
        }
    }

    /// Drain as many queued requests as there are free channels, in FIFO
    /// order, and write each out. Invoked after every response.
    async fn flush_queue(&self) {
        let drained: Vec<(usize, QueuedPayload<M>)> = {
            let mut shared = self.shared.lock();
            let mut drained = Vec::new();

            while let Some(front) = shared.queue.pop_front() {
                match shared.table.try_allocate(front.promise) {
                    Ok(channel) => drained.push((channel, front.payload)),
                    Err(promise) => {
                        shared.queue.push_front(QueuedRequest {
                            payload: front.payload,
                            promise,
                        });
                        break;
                    }
                }
            }

            drained
        };

        for (channel, payload) in drained {
            trace!(channel, "flushing queued request onto freed channel");
            let encoded = match payload {
                QueuedPayload::Raw(message) => self.core.encode(message, channel as i32),
                QueuedPayload::PreEncoded(bytes) => self.core.recode::<M>(bytes, channel as i32),
            };

            match encoded {
                Ok(bytes) => {
                    if let Err(e) = self.core.write(bytes).await {
                        self.fail_channel(channel, RpcError::Io(e));
                    }
                }
                Err(e) => self.fail_channel(channel, e),
            }
        }
    }

    async fn await_response(
        rx: oneshot::Receiver<rpcmux_std::Result<M>>,
        timeout: Option<Duration>,
    ) -> rpcmux_std::Result<M> {
        match timeout {
            Some(duration) => match tokio::time::timeout(duration, rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(RpcError::ConnectionClosed),
                Err(_) => Err(RpcError::Timeout),
            },
            None => rx.await.unwrap_or(Err(RpcError::ConnectionClosed)),
        }
    }
}

#[async_trait]
impl<C, Cod, M> Dispatch<M> for ClientPeer<C, Cod, M>
where
    C: Connection,
    Cod: Codec<M> + Send + 'static,
    M: Send + 'static,
{
    async fn handle_message(&self, message: M, channel: i32) {
        if channel < 0 {
            trace!(channel, "ignoring response on unassigned channel");
            return;
        }

        let promise = self.shared.lock().table.take(channel as usize);
        if let Some(promise) = promise {
            // Fulfillment is idempotent by construction: if the caller's
            // future already completed (e.g. via timeout), its Receiver
            // was dropped, so this send is a harmless no-op.
            let _ = promise.send(Ok(message));
        }

        self.flush_queue().await;
    }

    async fn handle_closed(&self, _cause: Option<RpcError>) {
        let drained = {
            let mut shared = self.shared.lock();
            let mut promises = shared.table.drain_all();
            promises.extend(shared.queue.drain(..).map(|q| q.promise));
            promises
        };

        for promise in drained {
            let _ = promise.send(Err(RpcError::ConnectionClosed));
        }
    }
}
