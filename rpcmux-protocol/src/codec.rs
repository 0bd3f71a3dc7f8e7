use bytes::{Buf, BufMut, Bytes, BytesMut};
use rpcmux_std::{Codec, CodecError, Decoded};
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;

/// Number of bytes occupied by the length prefix.
const LEN_PREFIX: usize = 4;
/// Offset of the channel field within a frame, immediately after the
/// length prefix. Kept fixed so [`BincodeCodec::recode`] can rewrite it
/// without touching the payload.
const CHANNEL_OFFSET: usize = LEN_PREFIX;
const CHANNEL_LEN: usize = 4;
const IS_LAST_OFFSET: usize = CHANNEL_OFFSET + CHANNEL_LEN;
const HEADER_LEN: usize = IS_LAST_OFFSET + 1;

const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// A length-delimited, `bincode`-based [`Codec`] supporting `recode`.
///
/// Wire format per frame: `u32 total_len | i32 channel | u8 is_last |
/// bincode payload`, where `total_len` counts every byte after itself.
/// Because `channel` sits at a fixed offset, [`BincodeCodec::recode`] can
/// rewrite it in place without touching or re-serializing the payload.
pub struct BincodeCodec<M> {
    max_frame_size: usize,
    _message: PhantomData<fn() -> M>,
}

impl<M> Default for BincodeCodec<M> {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            _message: PhantomData,
        }
    }
}

impl<M> BincodeCodec<M> {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            _message: PhantomData,
        }
    }
}

impl<M> Codec<M> for BincodeCodec<M>
where
    M: Serialize + DeserializeOwned + Send,
{
    fn encode(&mut self, message: M, channel: i32) -> Result<Bytes, CodecError> {
        let payload = bincode::serialize(&message).map_err(|e| CodecError::Encode(e.into()))?;

        let total_len = CHANNEL_LEN + 1 + payload.len();
        if total_len > self.max_frame_size {
            return Err(CodecError::FrameTooLarge(total_len, self.max_frame_size));
        }

        let mut dst = BytesMut::with_capacity(LEN_PREFIX + total_len);
        dst.put_u32(total_len as u32);
        dst.put_i32(channel);
        dst.put_u8(0);
        dst.extend_from_slice(&payload);

        Ok(dst.freeze())
    }

    fn recode(&mut self, prebuilt: Bytes, channel: i32) -> Result<Bytes, CodecError> {
        if prebuilt.len() < HEADER_LEN {
            return Err(CodecError::Recode(anyhow::anyhow!(
                "frame too short to carry a channel field"
            )));
        }

        let mut dst = BytesMut::from(&prebuilt[..]);
        dst[CHANNEL_OFFSET..CHANNEL_OFFSET + CHANNEL_LEN].copy_from_slice(&channel.to_be_bytes());
        Ok(dst.freeze())
    }

    fn recoding(&self) -> bool {
        true
    }

    fn decode(&mut self, src: &mut BytesMut) -> Result<Vec<Decoded<M>>, CodecError> {
        let mut out = Vec::new();

        loop {
            if src.len() < LEN_PREFIX {
                break;
            }

            let total_len = u32::from_be_bytes(src[..LEN_PREFIX].try_into().unwrap()) as usize;
            if total_len > self.max_frame_size {
                return Err(CodecError::FrameTooLarge(total_len, self.max_frame_size));
            }
            if total_len < CHANNEL_LEN + 1 {
                return Err(CodecError::Decode(anyhow::anyhow!(
                    "frame length {total_len} too short to carry a channel and is_last flag"
                )));
            }

            if src.len() < LEN_PREFIX + total_len {
                src.reserve(LEN_PREFIX + total_len - src.len());
                break;
            }

            src.advance(LEN_PREFIX);
            let mut frame = src.split_to(total_len);

            let channel = i32::from_be_bytes(frame[..CHANNEL_LEN].try_into().unwrap());
            frame.advance(CHANNEL_LEN);
            let is_last = frame[0] != 0;
            frame.advance(1);

            let message: M =
                bincode::deserialize(&frame).map_err(|e| CodecError::Decode(e.into()))?;

            out.push(Decoded {
                message,
                channel,
                is_last,
            });
        }

        Ok(out)
    }
}
