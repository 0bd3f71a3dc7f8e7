use thiserror::Error;

pub type Result<T, E = RpcError> = std::result::Result<T, E>;

/// Errors raised by a [`Codec`](crate::traits::Codec) implementation.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("failed to encode message")]
    Encode(#[source] anyhow::Error),

    #[error("failed to decode message frame")]
    Decode(#[source] anyhow::Error),

    #[error("failed to recode frame with new channel")]
    Recode(#[source] anyhow::Error),

    #[error("frame size ({0} bytes) is greater than maximum allowed size ({1} bytes)")]
    FrameTooLarge(usize, usize),
}

/// Errors raised while allocating or releasing channel table slots.
#[derive(Error, Debug)]
pub enum ChannelTableError {
    #[error("max_channels ({0}) exceeds the maximum of 2^15")]
    TooManyChannels(usize),
}

/// Errors surfaced to a caller of `send_message`, or propagated through
/// `handle_closed` to every outstanding promise.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("the request timed out before receiving a response")]
    Timeout,

    #[error("the connection was closed before a response was received")]
    ConnectionClosed,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    ChannelTable(#[from] ChannelTableError),

    #[error("io error communicating with peer")]
    Io(#[from] std::io::Error),

    #[error("the request handler failed: {0}")]
    HandlerFailure(String),
}
