use crate::errors::CodecError;
use bytes::{Bytes, BytesMut};

/// Reserved channel value meaning "not yet assigned". Only valid in a
/// payload that is destined for a later [`Codec::recode`] call.
pub const UNASSIGNED_CHANNEL: i32 = -1;

/// The largest number of concurrently outstanding channels a
/// [`ClientPeer`](../rpcmux_core/struct.ClientPeer.html) may be configured
/// with.
pub const MAX_CHANNELS: usize = 1 << 15;

/// A single decoded wire frame, as produced by [`Codec::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded<M> {
    pub message: M,
    pub channel: i32,
    /// Set when this frame is the last fragment of a logical message.
    /// Present for forward compatibility with fragmenting codecs; the
    /// peer engine itself always treats every frame as complete.
    pub is_last: bool,
}

/// Stateful per-connection byte <-> message translator.
///
/// A `Codec` owns whatever framing state it needs across calls (e.g. a
/// partially-read length prefix) and is never shared between connections.
pub trait Codec<M>: Send {
    /// Encode `message`, embedding `channel` in the frame. `channel ==
    /// UNASSIGNED_CHANNEL` is only valid when the resulting bytes will
    /// later be passed to [`Codec::recode`].
    fn encode(&mut self, message: M, channel: i32) -> Result<Bytes, CodecError>;

    /// Rewrite the channel field of a previously encoded frame without
    /// re-encoding the payload. Only callable when [`Codec::recoding`]
    /// returns `true`.
    fn recode(&mut self, prebuilt: Bytes, channel: i32) -> Result<Bytes, CodecError> {
        let _ = (prebuilt, channel);
        unimplemented!("recode called on a codec that does not support it")
    }

    /// Whether this codec supports [`Codec::recode`]. Enables the
    /// eager-encode-then-recode path for queued requests.
    fn recoding(&self) -> bool {
        false
    }

    /// Consume as many complete frames as `src` contains, returning them
    /// in wire order. Partial frames are left buffered in `src` (or
    /// internal state) for the next call.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Vec<Decoded<M>>, CodecError>;
}
