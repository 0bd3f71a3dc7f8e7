use rpcmux_std::{ChannelTableError, MAX_CHANNELS};
use std::collections::BTreeSet;
use tokio::sync::oneshot;

pub(crate) type Promise<M> = oneshot::Sender<rpcmux_std::Result<M>>;

/// Fixed-length table of outstanding channels plus the free-index set.
///
/// Allocation always prefers the lowest free index (deterministic
/// tie-break). A `BTreeSet` gives that ordering with `O(log n)`
/// allocation, trading the O(1) of a plain free-list stack for the
/// lower-index-first guarantee exercised by the allocation-order tests
/// below.
pub(crate) struct ChannelTable<M> {
    slots: Vec<Option<Promise<M>>>,
    free: BTreeSet<usize>,
}

impl<M> ChannelTable<M> {
    pub(crate) fn new(max_channels: usize) -> Result<Self, ChannelTableError> {
        if max_channels > MAX_CHANNELS {
            return Err(ChannelTableError::TooManyChannels(max_channels));
        }

        Ok(Self {
            slots: (0..max_channels).map(|_| None).collect(),
            free: (0..max_channels).collect(),
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Attempt to install `promise` into the lowest free slot. Returns the
    /// promise back on failure so the caller can fall back to queueing it.
    pub(crate) fn try_allocate(&mut self, promise: Promise<M>) -> Result<usize, Promise<M>> {
        match self.free.pop_first() {
            Some(channel) => {
                self.slots[channel] = Some(promise);
                Ok(channel)
            }
            None => Err(promise),
        }
    }

    /// Clear the slot for `channel` and free it, returning the promise
    /// that occupied it, if any. Used both for response correlation and
    /// to roll back a slot whose request failed to encode.
    pub(crate) fn take(&mut self, channel: usize) -> Option<Promise<M>> {
        let slot = self.slots.get_mut(channel)?.take();
        if slot.is_some() {
            self.free.insert(channel);
        }
        slot
    }

    /// Drain every occupied slot, freeing all of them. Used at close time.
    pub(crate) fn drain_all(&mut self) -> Vec<Promise<M>> {
        let mut drained = Vec::new();
        for (channel, slot) in self.slots.iter_mut().enumerate() {
            if let Some(promise) = slot.take() {
                drained.push(promise);
                self.free.insert(channel);
            }
        }
        drained
    }

    pub(crate) fn occupied_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}
