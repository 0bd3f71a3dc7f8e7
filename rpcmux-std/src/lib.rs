//! rpcmux-std is a dependent crate of rpcmux. Do not use directly.
//!
//! Holds the error taxonomy and the [`Codec`](traits::Codec) trait contract
//! that the rest of the workspace programs against, mirroring the role of
//! a small "standard" crate shared by protocol, core and transport crates.

pub mod errors;
pub mod traits;

pub use errors::{ChannelTableError, CodecError, Result, RpcError};
pub use traits::{Codec, Decoded, MAX_CHANNELS, UNASSIGNED_CHANNEL};
