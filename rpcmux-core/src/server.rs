use crate::connection::Connection;
use crate::pump::{run_read_pump, Dispatch, PeerCore};
use async_trait::async_trait;
use rpcmux_std::{Codec, RpcError};
use std::sync::Arc;
use tracing::warn;

/// Application-provided request handler.
///
/// Implementations must always produce a response; a request left
/// unanswered permanently occupies the caller's channel budget, since
/// nothing on the client side ever times out a slot it still believes is
/// in flight.
#[async_trait]
pub trait RequestHandler<M>: Send + Sync {
    /// `connection` is the same connection the request arrived on (and the
    /// response will be written back to), exposed so a handler can read
    /// `host()`/`port()` or otherwise identify its peer.
    async fn handle_request(
        &self,
        message: M,
        channel: i32,
        connection: &dyn Connection,
    ) -> rpcmux_std::Result<M>;
}

/// Concrete peer owned by a listener that answers incoming requests.
pub struct ServerPeer<C, Cod, M, H> {
    core: Arc<PeerCore<C, Cod>>,
    handler: Arc<H>,
    _message: std::marker::PhantomData<fn() -> M>,
}

impl<C, Cod, M, H> Clone for ServerPeer<C, Cod, M, H> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            handler: self.handler.clone(),
            _message: std::marker::PhantomData,
        }
    }
}

impl<C, Cod, M, H> ServerPeer<C, Cod, M, H>
where
    C: Connection,
    Cod: Codec<M> + Send + 'static,
    M: Send + 'static,
    H: RequestHandler<M> + 'static,
{
    pub fn new(conn: C, codec: Cod, handler: Arc<H>) -> Self {
        let core = Arc::new(PeerCore::new(conn, codec));
        let peer = Self {
            core,
            handler,
            _message: std::marker::PhantomData,
        };

        let pump_core = peer.core.clone();
        let dispatch: Arc<Self> = Arc::new(peer.clone());
        tokio::spawn(run_read_pump(pump_core, dispatch));

        peer
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

    pub async fn close(&self) {
        self.core.close().await;
        if self.core.fire_closed(None).await {
            self.handle_closed(None).await;
        }
    }

    pub fn state(&self) -> crate::state::PeerState {
        self.core.state()
    }
}

#[async_trait]
impl<C, Cod, M, H> Dispatch<M> for ServerPeer<C, Cod, M, H>
where
    C: Connection,
    Cod: Codec<M> + Send + 'static,
    M: Send + 'static,
    H: RequestHandler<M> + 'static,
{
    async fn handle_message(&self, message: M, channel: i32) {
        // Concurrent requests on distinct channels are handled
        // concurrently; writes of responses may interleave in any order.
        let core = self.core.clone();
        let handler = self.handler.clone();

        tokio::spawn(async move {
            let connection: &dyn Connection = core.connection();
            match handler.handle_request(message, channel, connection).await {
                Ok(response) => match core.encode(response, channel) {
                    Ok(bytes) => {
                        if let Err(e) = core.write(bytes).await {
                            warn!(channel, error = %e, "failed to write response");
                        }
                    }
                    Err(e) => warn!(channel, error = %e, "failed to encode response"),
                },
                Err(e) => warn!(
                    channel,
                    error = %e,
                    "request handler failed; channel will not receive a response"
                ),
            }
        });
    }

    async fn handle_closed(&self, _cause: Option<RpcError>) {
        // In-flight handler tasks are not notified; they simply fail to
        // write a response once the connection is gone.
    }
}
