//! Reliable unidirectional file transfer over UDP.
//!
//! A client requests a named file from a server; the server streams the file back in fixed-size
//!  frames over plain UDP datagrams. The network is assumed to be adversarial within reason: it
//!  may drop frames, flip bits inside them, and reorder them. The protocol recovers through a
//!  sender-side sliding window with selective-reject ARQ and a receiver that buffers
//!  out-of-order frames until the gaps are filled.
//!
//! ## Design goals
//!
//! * One transfer per session, one session per UDP socket pair
//!   * the server listens on a well-known port for file requests only
//!   * every accepted request is served from a fresh ephemeral port, so concurrent clients
//!     demultiplex by address without any connection table
//! * The receiver's output is byte-exact and strictly ordered - frames are delivered to the
//!   sink at most once and in sequence order
//! * Liveness over completeness: both sides bound their retries and force forward progress
//!   (skipping a frame, or giving up) rather than hang forever under sustained loss
//! * The window size and frame payload size are chosen by the client at handshake time;
//!   there is no congestion control
//! * A 16-bit Internet checksum per frame rejects grossly corrupted datagrams; control frames
//!   additionally duplicate their ack value in the payload to survive the checksum's blind spots
//!
//! ## Frame header
//!
//! Every datagram is a frame: a 7-byte header followed by up to 1400 payload bytes - all
//!  numbers in network byte order (BE):
//!
//! ```ascii
//! 0:  sequence number (u32): 0 for the handshake and the first data frame; the flag
//!      disambiguates. Monotonically increasing within a session, no wrap-around.
//! 4:  checksum (u16): Internet checksum over header+payload with this field zeroed, one
//!      zero byte appended for odd-length input
//! 6:  flag (u8): the frame kind
//!     * 5  RR             receiver ready (ack), ack seq duplicated in payload
//!     * 6  SREJ           selective reject (nack), nack'ed seq duplicated in payload
//!     * 8  FILENAME       handshake request carrying the 109-byte init payload
//!     * 9  FILENAME_RESP  handshake reply ("OK" or "File not found")
//!     * 10 EOF            end of transfer, may carry final payload bytes
//!     * 16 DATA           regular data frame
//!     * 17 RESENT_SREJ    data frame re-sent in response to a SREJ
//!     * 18 RESENT_TIMEOUT data frame re-sent after a timeout
//! ```
//!
//! ## Handshake
//!
//! The client sends a FILENAME frame carrying the requested file name and its chosen window
//!  and buffer sizes, and retries until a checksum-valid FILENAME_RESP arrives. The reply is
//!  sent from the session's ephemeral port; the client captures the reply's source address
//!  and talks to it for the rest of the transfer.
//!
//! ## Data transfer
//!
//! The server reads the file in `buffer_size` chunks, frames them with increasing sequence
//!  numbers and keeps up to `window_size` frames in flight. The client acks each in-order
//!  frame with an RR and nacks the first gap with a SREJ; out-of-order frames are buffered
//!  and drained once the gap closes. The sender answers SREJs from its window store, falling
//!  back to a byte-addressed replay ring holding the last `2 * window_size` payloads when the
//!  window record has already been reused. When the file is exhausted and the window drained,
//!  an EOF frame closes the session after a terminal RR exchange.

pub mod checksum;
pub mod client;
pub mod config;
pub mod frame;
pub mod handshake;
pub mod receiver;
pub mod reorder_buffer;
pub mod replay_buffer;
pub mod sender;
pub mod server;
pub mod socket;
pub mod window;

#[cfg(test)]
mod test_util;
