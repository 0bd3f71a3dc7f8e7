//! rpcmux-protocol is a dependent crate of rpcmux. Do not use directly.
//!
//! Provides the concrete, length-delimited `bincode` [`Codec`](rpcmux_std::Codec)
//! implementation used by default. Applications may supply their own codec
//! instead; nothing in `rpcmux-core` depends on this crate's wire format.

mod codec;

pub use codec::BincodeCodec;
