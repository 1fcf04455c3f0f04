//! Protocol constants and the per-session configuration negotiated at handshake time.

use crate::frame::MAX_DATA_SIZE;
use anyhow::bail;
use std::time::Duration;

/// Retransmissions of a single data frame (and EOF attempts) before giving up on it.
pub const MAX_RETRANSMIT: u32 = 10;

/// Handshake attempts on the client before reporting failure. Generous because nothing can
///  happen without it.
pub const INIT_RETRY_LIMIT: u32 = 10;

/// How long the client waits for the handshake reply per attempt.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(5000);

/// How long either side waits for an ack-class frame before acting on its absence.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(1000);

/// How long the receiver waits for a data frame before re-acking / counting a timeout.
pub const DATA_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Full-window wait iterations with an unmoved base before a timeout is forced regardless of
///  poll results.
pub const STALL_LIMIT: u32 = 3;

/// Identical RRs for `base - 1` before the sender treats them as a fast-retransmit hint.
pub const DUP_RR_LIMIT: u32 = 3;

/// Consecutive sender timeouts without base movement before the base slot is forcibly
///  acknowledged to restore progress.
pub const SENDER_TIMEOUT_LIMIT: u32 = 10;

/// Consecutive receiver timeouts before the transfer is abandoned as truncated.
pub const RECEIVER_TIMEOUT_LIMIT: u32 = 15;

/// How often the terminal RR is repeated after EOF.
pub const FINAL_RR_COUNT: u32 = 3;

/// "File not found" handshake replies sent before the session terminates.
pub const NOT_FOUND_RESPONSES: u32 = 3;

/// Unanswered "OK" handshake replies after which the session proceeds to data transfer
///  anyway - the client does not speak until data arrives, so waiting longer only delays it.
pub const HANDSHAKE_OK_EARLY_EXIT: u32 = 3;

/// EOF attempt from which any valid control frame is accepted as the terminal ack.
pub const EOF_ACCEPT_ANY_AFTER: u32 = 4;

/// EOF attempts after which the session is considered closed unilaterally.
pub const EOF_UNILATERAL_AFTER: u32 = 6;

/// The transfer parameters the client chooses and sends in the handshake.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SessionConfig {
    /// sliding window capacity in frames
    pub window_size: u32,
    /// payload bytes per data frame
    pub buffer_size: u32,
}

impl SessionConfig {
    pub fn new(window_size: u32, buffer_size: u32) -> SessionConfig {
        SessionConfig { window_size, buffer_size }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.window_size == 0 || self.window_size >= 1 << 30 {
            bail!("invalid window size {} (must be > 0 and < 2^30)", self.window_size);
        }
        if self.buffer_size == 0 || self.buffer_size as usize > MAX_DATA_SIZE {
            bail!("invalid buffer size {} (must be > 0 and <= {})", self.buffer_size, MAX_DATA_SIZE);
        }
        Ok(())
    }

    /// The replay ring keeps payloads for twice the window, so a frame whose window record was
    ///  reused can still be reconstructed for retransmission.
    pub fn replay_capacity(&self) -> usize {
        2 * self.window_size as usize * self.buffer_size as usize
    }
}
