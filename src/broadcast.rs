//! Latest-frame broadcaster.
//!
//! Holds exactly one current `EncodedFrame` and a sequence counter. The producer
//! replaces the frame with `publish`; any number of readers block in
//! `await_next` until the counter moves past the last sequence they saw.
//!
//! Delivery is at-most-latest: frames published while a reader is busy are
//! never queued. When the reader comes back it gets whatever is current, and
//! the intermediate frames are gone.
//!
//! The lock is held only to swap or clone the frame handle, never across I/O,
//! so a stalled reader cannot slow the producer.

use std::sync::{Condvar, Mutex, MutexGuard};

use crate::frame::EncodedFrame;

#[derive(Default)]
struct Slot {
    frame: Option<EncodedFrame>,
    sequence: u64,
    closed: bool,
}

/// Single-slot, multi-reader frame holder.
///
/// Construct once and share it as `Arc<FrameBroadcaster>` between the capture
/// loop and the streaming server.
#[derive(Default)]
pub struct FrameBroadcaster {
    slot: Mutex<Slot>,
    updated: Condvar,
}

impl FrameBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame and wake every waiting reader.
    ///
    /// Returns the sequence number assigned to `frame`, or the unchanged
    /// sequence when the broadcaster has been closed.
    pub fn publish(&self, frame: EncodedFrame) -> u64 {
        let mut slot = self.lock();
        if slot.closed {
            return slot.sequence;
        }
        slot.frame = Some(frame);
        slot.sequence += 1;
        let sequence = slot.sequence;
        drop(slot);
        self.updated.notify_all();
        sequence
    }

    /// Block until a frame newer than `last_seen` is published.
    ///
    /// Returns the current frame and its sequence number, or `None` once the
    /// broadcaster is closed. Pass `0` to receive the first frame ever published.
    pub fn await_next(&self, last_seen: u64) -> Option<(EncodedFrame, u64)> {
        let mut slot = self.lock();
        loop {
            if slot.closed {
                return None;
            }
            if slot.sequence > last_seen {
                if let Some(frame) = &slot.frame {
                    return Some((frame.clone(), slot.sequence));
                }
            }
            slot = self
                .updated
                .wait(slot)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Current frame without waiting, if any has been published.
    pub fn latest(&self) -> Option<(EncodedFrame, u64)> {
        let slot = self.lock();
        slot.frame.clone().map(|frame| (frame, slot.sequence))
    }

    /// Sequence number of the current frame (0 before the first publish).
    pub fn sequence(&self) -> u64 {
        self.lock().sequence
    }

    /// Wake all readers and make every later `await_next` return `None`.
    pub fn close(&self) {
        self.lock().closed = true;
        self.updated.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    // The slot is only ever swapped whole, so a panic elsewhere cannot leave it
    // half-written. Recover the guard instead of propagating poison.
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
