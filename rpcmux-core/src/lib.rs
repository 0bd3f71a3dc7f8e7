mod channel_table;
mod client;
mod connection;
mod pump;
mod reactor;
mod server;
mod state;
mod supervisor;

pub use client::ClientPeer;
pub use connection::Connection;
pub use reactor::{Acceptor, Reactor};
pub use server::{RequestHandler, ServerPeer};
pub use state::PeerState;
pub use supervisor::{Client, Server};

pub use rpcmux_std::{
    ChannelTableError, Codec, CodecError, Decoded, RpcError, MAX_CHANNELS, UNASSIGNED_CHANNEL,
};
