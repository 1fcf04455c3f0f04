//! The receiver's reorder store: frames that arrived ahead of the next expected sequence
//!  number wait here, one slot per window position (`seq % window_size`), until the gap in
//!  front of them closes and they can be drained to the sink in order.

use tracing::trace;

pub struct ReorderBuffer {
    slots: Vec<Option<BufferedFrame>>,
    window_size: u32,
}

struct BufferedFrame {
    seq: u32,
    /// complete encoded frame, header included - the checksum was verified on receipt
    bytes: Vec<u8>,
}

impl ReorderBuffer {
    pub fn new(window_size: u32) -> ReorderBuffer {
        assert!(window_size > 0);
        ReorderBuffer {
            slots: (0..window_size).map(|_| None).collect(),
            window_size,
        }
    }

    /// Store an out-of-order frame. A slot occupant with a smaller seq is stale (the window
    ///  has moved past it) and is overwritten; a larger one is kept.
    pub fn insert(&mut self, seq: u32, bytes: Vec<u8>) {
        let index = (seq % self.window_size) as usize;
        match &self.slots[index] {
            Some(occupant) if occupant.seq > seq => {
                trace!("keeping buffered #{} over incoming #{}", occupant.seq, seq);
            }
            _ => {
                self.slots[index] = Some(BufferedFrame { seq, bytes });
            }
        }
    }

    /// Remove and return the frame for `seq` if it is buffered.
    pub fn take(&mut self, seq: u32) -> Option<Vec<u8>> {
        let index = (seq % self.window_size) as usize;
        if self.slots[index].as_ref().is_some_and(|f| f.seq == seq) {
            self.slots[index].take().map(|f| f.bytes)
        } else {
            None
        }
    }
}
