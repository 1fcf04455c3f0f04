//! The sender's sliding-window store: one slot per in-flight frame, primarily indexed by
//!  `seq % window_size` with an alternate-slot search on collision, and a linear scan as the
//!  lookup fallback. The window holds the fully encoded frame so a retransmission only needs
//!  to patch the flag byte and recompute the checksum.

use crate::frame::FrameKind;
use tracing::{debug, trace, warn};

#[derive(Debug)]
pub struct FrameRecord {
    pub seq: u32,
    /// complete encoded frame, header included
    pub bytes: Vec<u8>,
    pub kind: FrameKind,
    pub acknowledged: bool,
    pub retransmit_count: u32,
}

pub struct SendWindow {
    slots: Vec<Option<FrameRecord>>,
    window_size: u32,
    base: u32,
}

impl SendWindow {
    pub fn new(window_size: u32) -> SendWindow {
        assert!(window_size > 0);
        SendWindow {
            slots: (0..window_size).map(|_| None).collect(),
            window_size,
            base: 0,
        }
    }

    /// seq of the oldest unacknowledged frame - the left edge of the window
    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// Is the window full relative to the given next sequence number?
    pub fn is_full(&self, next_seq: u32) -> bool {
        next_seq.wrapping_sub(self.base) >= self.window_size
    }

    fn primary_index(&self, seq: u32) -> usize {
        (seq % self.window_size) as usize
    }

    /// Store a frame. If the primary slot holds a different, unacknowledged seq, an
    ///  empty-or-acknowledged slot is searched (starting at the primary index); if none
    ///  exists the occupant is overwritten - window turnover has outrun the acks, and the
    ///  replay buffer covers the evicted frame.
    pub fn insert(&mut self, seq: u32, bytes: Vec<u8>, kind: FrameKind) {
        let mut index = self.primary_index(seq);

        if let Some(occupant) = &self.slots[index] {
            if occupant.seq != seq {
                match self.find_reusable_slot(index) {
                    Some(alt) => {
                        trace!("slot {} holds #{}, storing #{} at alternate slot {}", index, occupant.seq, seq, alt);
                        index = alt;
                    }
                    None => {
                        warn!("window has no free slot for #{}: evicting unacknowledged #{}", seq, occupant.seq);
                    }
                }
            }
        }

        self.slots[index] = Some(FrameRecord {
            seq,
            bytes,
            kind,
            acknowledged: false,
            retransmit_count: 0,
        });
    }

    fn find_reusable_slot(&self, start: usize) -> Option<usize> {
        (0..self.slots.len())
            .map(|i| (start + i) % self.slots.len())
            .find(|&i| match &self.slots[i] {
                None => true,
                Some(record) => record.acknowledged,
            })
    }

    fn find_slot(&self, seq: u32) -> Option<usize> {
        let primary = self.primary_index(seq);
        (0..self.slots.len())
            .map(|i| (primary + i) % self.slots.len())
            .find(|&i| matches!(&self.slots[i], Some(record) if record.seq == seq))
    }

    pub fn get(&self, seq: u32) -> Option<&FrameRecord> {
        self.find_slot(seq).and_then(|i| self.slots[i].as_ref())
    }

    pub fn get_mut(&mut self, seq: u32) -> Option<&mut FrameRecord> {
        self.find_slot(seq).and_then(|i| self.slots[i].as_mut())
    }

    /// Mark every in-window frame in `[base, ack_seq]` as acknowledged. Acks below the base
    ///  are stale duplicates and ignored; the covered range is clamped to the window size.
    pub fn mark_acked_through(&mut self, ack_seq: u32) {
        if ack_seq < self.base {
            trace!("ack for #{} is below the window base {} - ignoring", ack_seq, self.base);
            return;
        }

        let count = (ack_seq - self.base + 1).min(self.window_size);
        for seq in self.base..self.base + count {
            match self.find_slot(seq) {
                Some(i) => {
                    if let Some(record) = self.slots[i].as_mut() {
                        record.acknowledged = true;
                    }
                }
                None => trace!("#{} not in the window to acknowledge", seq),
            }
        }
    }

    /// Advance the base past every contiguous acknowledged frame, clearing their slots.
    ///  Returns the number of frames released.
    pub fn slide(&mut self) -> u32 {
        let old_base = self.base;

        for _ in 0..self.window_size {
            match self.find_slot(self.base) {
                Some(i) if self.slots[i].as_ref().is_some_and(|r| r.acknowledged) => {
                    self.slots[i] = None;
                    self.base += 1;
                }
                _ => break,
            }
        }

        let slid = self.base - old_base;
        if slid > 0 {
            debug!("window slid from base {} to {}", old_base, self.base);
        }
        slid
    }

    /// Forcibly acknowledge the frame at the base (or clear the slot outright if no record
    ///  exists) so the window can move past a frame that will never be acked. The transfer
    ///  continues with a gap.
    pub fn force_ack_base(&mut self) {
        warn!("forcing acknowledgement of #{} to restore forward progress", self.base);
        match self.find_slot(self.base) {
            Some(i) => {
                if let Some(record) = self.slots[i].as_mut() {
                    record.acknowledged = true;
                }
            }
            None => {
                // nothing stored for the base seq: slide over it directly
                self.base += 1;
                return;
            }
        }
        self.slide();
    }
}
