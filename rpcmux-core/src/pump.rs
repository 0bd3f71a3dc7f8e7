use crate::connection::Connection;
use crate::state::PeerState;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use rpcmux_std::{Codec, RpcError};
use std::sync::Arc;
use tracing::{debug, warn};

const READ_CHUNK: usize = 8 * 1024;

type ClosedCallback = Box<dyn FnMut(Option<&RpcError>) + Send>;

/// The two hooks a concrete peer (client or server side) provides to the
/// shared read pump. Composition, not inheritance: [`PeerCore`] drives
/// these, it does not sit above them in a hierarchy.
#[async_trait]
pub(crate) trait Dispatch<M>: Send + Sync {
    async fn handle_message(&self, message: M, channel: i32);
    async fn handle_closed(&self, cause: Option<RpcError>);
}

/// Shared decode/dispatch/close plumbing embedded by both `ClientPeer` and
/// `ServerPeer`. Owns the connection and codec instance, tracks peer state,
/// and fires `on_closed` callbacks exactly once.
pub struct PeerCore<C, Cod> {
    conn: C,
    codec: Mutex<Cod>,
    state: Mutex<PeerState>,
    on_closed: Mutex<Vec<ClosedCallback>>,
}

impl<C, Cod> PeerCore<C, Cod>
where
    C: Connection,
{
    pub fn new(conn: C, codec: Cod) -> Self {
        Self {
            conn,
            codec: Mutex::new(codec),
            state: Mutex::new(PeerState::Open),
            on_closed: Mutex::new(Vec::new()),
        }
    }

    pub fn host(&self) -> &str {
        self.conn.host()
    }

    pub fn port(&self) -> u16 {
        self.conn.port()
    }

    /// The underlying connection, handed to `RequestHandler::handle_request`
    /// so handlers can inspect `host()`/`port()` without needing the whole
    /// `ServerPeer` threaded through their trait signature.
    pub(crate) fn connection(&self) -> &C {
        &self.conn
    }

    pub fn state(&self) -> PeerState {
        *self.state.lock()
    }

    /// Registers a callback fired once when the peer closes. If the peer
    /// has already closed, the callback fires immediately (with `None` as
    /// the cause, since it is not retained past the original firing).
    pub fn on_closed<F>(&self, mut callback: F)
    where
        F: FnMut(Option<&RpcError>) + Send + 'static,
    {
        let already_closed = *self.state.lock() == PeerState::Closed;
        if already_closed {
            callback(None);
        } else {
            self.on_closed.lock().push(Box::new(callback));
        }
    }

    /// Initiates shutdown. Idempotent; the actual `Closed` transition and
    /// `on_closed` firing happen once the read pump observes EOF/error.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state != PeerState::Open {
                return;
            }
            *state = PeerState::Closing;
        }
        self.conn.shutdown().await;
    }

    pub(crate) fn encode<M>(&self, message: M, channel: i32) -> rpcmux_std::Result<Bytes>
    where
        Cod: Codec<M>,
    {
        Ok(self.codec.lock().encode(message, channel)?)
    }

    pub(crate) fn recode<M>(&self, prebuilt: Bytes, channel: i32) -> rpcmux_std::Result<Bytes>
    where
        Cod: Codec<M>,
    {
        Ok(Codec::<M>::recode(
            &mut *self.codec.lock(),
            prebuilt,
            channel,
        )?)
    }

    pub(crate) fn recoding<M>(&self) -> bool
    where
        Cod: Codec<M>,
    {
        Codec::<M>::recoding(&*self.codec.lock())
    }

    pub(crate) async fn write(&self, bytes: Bytes) -> std::io::Result<()> {
        self.conn.write(bytes).await
    }

    /// Transition to `Closed` and fire every registered callback, exactly
    /// once no matter how many times this is called. Returns `true` for
    /// the call that performed the transition — the caller that wins this
    /// race is also responsible for driving `Dispatch::handle_closed`,
    /// since both a locally-initiated close and the read pump observing
    /// EOF can reach here concurrently.
    pub(crate) async fn fire_closed(&self, cause: Option<&RpcError>) -> bool {
        let callbacks = {
            let mut state = self.state.lock();
            if *state == PeerState::Closed {
                return false;
            }
            *state = PeerState::Closed;
            std::mem::take(&mut *self.on_closed.lock())
        };

        for mut callback in callbacks {
            callback(cause);
        }
        true
    }
}

/// Drives the codec against incoming bytes and dispatches decoded frames,
/// in wire order, to `dispatch.handle_message`. Runs until EOF, a decode
/// error, or an I/O error, then calls `dispatch.handle_closed` exactly
/// once.
pub(crate) async fn run_read_pump<C, Cod, M, D>(core: Arc<PeerCore<C, Cod>>, dispatch: Arc<D>)
where
    C: Connection,
    Cod: Codec<M>,
    M: Send + 'static,
    D: Dispatch<M>,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];

    let cause = loop {
        match core.conn.read(&mut chunk).await {
            Ok(0) => break None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) => break Some(RpcError::Io(e)),
        }

        let decoded = {
            let mut codec = core.codec.lock();
            codec.decode(&mut buf)
        };

        match decoded {
            Ok(frames) => {
                for frame in frames {
                    dispatch.handle_message(frame.message, frame.channel).await;
                }
            }
            Err(e) => {
                warn!(error = %e, "decode error, closing peer");
                break Some(RpcError::Codec(e));
            }
        }
    };

    debug!(host = core.host(), port = core.port(), closed = ?cause, "peer closed");
    if core.fire_closed(cause.as_ref()).await {
        dispatch.handle_closed(cause).await;
    }
}
