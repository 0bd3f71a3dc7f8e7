//! Channel-multiplexed request/response RPC over any reliable byte-stream
//! connection.
//!
//! A [`ClientPeer`] issues requests and awaits correlated responses; a
//! [`ServerPeer`] answers them via an application-supplied
//! [`RequestHandler`]. Both multiplex an arbitrary number of concurrent
//! in-flight requests over a single connection using small integer channel
//! IDs, queueing new requests once the channel table is full rather than
//! blocking the caller.
//!
//! [`Client`] and [`Server`] are thin supervisors that pair the peer types
//! with an [`Reactor`] (a tokio TCP implementation ships in this crate by
//! default via [`TokioReactor`]).

pub use rpcmux_core::{
    Acceptor, ChannelTableError, Client, ClientPeer, Codec, CodecError, Connection, Decoded,
    PeerState, Reactor, RequestHandler, RpcError, Server, ServerPeer, MAX_CHANNELS,
    UNASSIGNED_CHANNEL,
};
pub use rpcmux_net_tokio::{TcpAcceptor, TcpConnection, TokioReactor};
pub use rpcmux_protocol::BincodeCodec;
