//! Receive Slot: at most one received frame waiting for the IP stack.
//!
//! Filled from the USB OUT completion, drained by the main loop. Backed by
//! a capacity-1 channel so the producer never blocks and never overwrites:
//! a frame arriving while the slot is occupied is dropped.

use core::fmt;
use core::ops::{Deref, DerefMut};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use super::config::ECM_MAX_SEGMENT_SIZE;

/// One Ethernet frame in fixed, statically sized storage
#[derive(Clone)]
pub struct Frame {
    len: usize,
    data: [u8; ECM_MAX_SEGMENT_SIZE],
}

impl Frame {
    /// Empty frame with full-size storage
    pub const fn new() -> Self {
        Self {
            len: 0,
            data: [0; ECM_MAX_SEGMENT_SIZE],
        }
    }

    /// Copy `bytes` into a new frame. `None` if they do not fit a segment.
    pub fn copy_from(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > ECM_MAX_SEGMENT_SIZE {
            return None;
        }
        let mut frame = Self::new();
        frame.data[..bytes.len()].copy_from_slice(bytes);
        frame.len = bytes.len();
        Some(frame)
    }

    /// Append one segment of a chained frame. Returns `false` on overflow,
    /// leaving the frame unchanged.
    pub fn push_segment(&mut self, segment: &[u8]) -> bool {
        let end = self.len + segment.len();
        if end > ECM_MAX_SEGMENT_SIZE {
            return false;
        }
        self.data[self.len..end].copy_from_slice(segment);
        self.len = end;
        true
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

impl DerefMut for Frame {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame").field("len", &self.len).finish()
    }
}

pub struct ReceiveSlot {
    frame: Channel<CriticalSectionRawMutex, Frame, 1>,
}

impl ReceiveSlot {
    pub const fn new() -> Self {
        Self {
            frame: Channel::new(),
        }
    }

    /// Store a received frame if the slot is empty.
    ///
    /// USB callback context. Returns `false` (and copies nothing) when a
    /// frame is already waiting or `data` exceeds the maximum segment size.
    pub fn offer(&self, data: &[u8]) -> bool {
        // Only this producer fills the slot, so an empty slot stays empty
        // until try_send below.
        if self.frame.is_full() {
            return false;
        }
        match Frame::copy_from(data) {
            Some(frame) => self.frame.try_send(frame).is_ok(),
            None => false,
        }
    }

    /// Remove the waiting frame, if any. Main loop context.
    pub fn take(&self) -> Option<Frame> {
        self.frame.try_receive().ok()
    }

    pub fn is_occupied(&self) -> bool {
        self.frame.is_full()
    }

    /// Discard any waiting frame (USB reset)
    pub fn clear(&self) {
        while self.frame.try_receive().is_ok() {}
    }
}

impl Default for ReceiveSlot {
    fn default() -> Self {
        Self::new()
    }
}
