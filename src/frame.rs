//! Frame codec: the 7-byte header, the frame kinds, and encoding/decoding with checksum
//!  computation and verification.

use crate::checksum::internet_checksum;
use bytes::BufMut;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

pub const HEADER_SIZE: usize = 7;
pub const MAX_DATA_SIZE: usize = 1400;
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_DATA_SIZE;

const CHECKSUM_OFFSET: usize = 4;
const FLAG_OFFSET: usize = 6;

#[derive(Copy, Clone, Eq, PartialEq, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FrameKind {
    /// receiver ready: positive ack, ack'ed seq duplicated in the payload
    Rr = 5,
    /// selective reject: request retransmission of one specific seq
    Srej = 6,
    /// handshake request carrying the init payload
    Filename = 8,
    /// handshake reply ("OK" or "File not found")
    FilenameResp = 9,
    /// end of transfer
    Eof = 10,
    Data = 16,
    /// data frame re-sent in response to a SREJ
    ResentSrej = 17,
    /// data frame re-sent after a timeout
    ResentTimeout = 18,
}

impl FrameKind {
    pub fn is_data(&self) -> bool {
        matches!(self, FrameKind::Data | FrameKind::ResentSrej | FrameKind::ResentTimeout)
    }
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum DecodeError {
    /// shorter than a header, or longer than the maximum frame: not a protocol frame at all
    #[error("datagram of {0} bytes is outside the valid frame size range")]
    BadLength(usize),
    #[error("checksum mismatch: frame carries {carried:#06x}, computed {computed:#06x}")]
    Checksum { carried: u16, computed: u16 },
    #[error("unknown frame kind {0}")]
    UnknownKind(u8),
    /// RR/SREJ whose payload ack value contradicts the header seq
    #[error("ack value {payload} in payload contradicts header seq {header}")]
    AckMismatch { header: u32, payload: u32 },
}

/// A decoded frame. The payload is owned - frames are small (<= 1407 bytes) and short-lived.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame {
    pub seq: u32,
    pub kind: FrameKind,
    pub payload: Vec<u8>,
}

impl Frame {
    /// The ack value of an RR / SREJ frame, read from the payload duplicate. `decode` has
    ///  already verified that it matches the header seq.
    pub fn ack_value(&self) -> u32 {
        self.seq
    }
}

/// Lay out header and payload with the checksum field zeroed, then compute the Internet
///  checksum across the whole buffer and write it back.
pub fn encode(seq: u32, kind: FrameKind, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= MAX_DATA_SIZE);

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u32(seq);
    buf.put_u16(0);
    buf.put_u8(kind.into());
    buf.put_slice(payload);

    let checksum = internet_checksum(&buf);
    buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&checksum.to_be_bytes());
    buf
}

/// Encode an RR or SREJ frame: the acknowledged seq goes into the header seq field *and*
///  into the first four payload bytes, so that a corrupted-but-checksum-passing frame with a
///  zeroed seq field is still detectable.
pub fn encode_control(kind: FrameKind, ack_seq: u32) -> Vec<u8> {
    debug_assert!(matches!(kind, FrameKind::Rr | FrameKind::Srej));
    encode(ack_seq, kind, &ack_seq.to_be_bytes())
}

/// Verify and parse a received datagram.
pub fn decode(buf: &[u8]) -> Result<Frame, DecodeError> {
    if buf.len() < HEADER_SIZE || buf.len() > MAX_FRAME_SIZE {
        return Err(DecodeError::BadLength(buf.len()));
    }

    let carried = u16::from_be_bytes([buf[CHECKSUM_OFFSET], buf[CHECKSUM_OFFSET + 1]]);
    let mut scratch = buf.to_vec();
    scratch[CHECKSUM_OFFSET] = 0;
    scratch[CHECKSUM_OFFSET + 1] = 0;
    let computed = internet_checksum(&scratch);
    if carried != computed {
        return Err(DecodeError::Checksum { carried, computed });
    }

    let seq = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let kind = FrameKind::try_from(buf[FLAG_OFFSET])
        .map_err(|_| DecodeError::UnknownKind(buf[FLAG_OFFSET]))?;
    let payload = buf[HEADER_SIZE..].to_vec();

    if matches!(kind, FrameKind::Rr | FrameKind::Srej) {
        if payload.len() < 4 {
            return Err(DecodeError::BadLength(buf.len()));
        }
        let dup = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        if dup != seq {
            return Err(DecodeError::AckMismatch { header: seq, payload: dup });
        }
    }

    Ok(Frame { seq, kind, payload })
}

/// Rewrite the flag byte of an already-encoded frame in place and recompute its checksum.
///  Used when retransmitting a stored DATA frame as RESENT_SREJ / RESENT_TIMEOUT.
pub fn patch_kind(buf: &mut [u8], kind: FrameKind) {
    debug_assert!(buf.len() >= HEADER_SIZE);

    buf[FLAG_OFFSET] = kind.into();
    buf[CHECKSUM_OFFSET] = 0;
    buf[CHECKSUM_OFFSET + 1] = 0;
    let checksum = internet_checksum(buf);
    buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&checksum.to_be_bytes());
}
