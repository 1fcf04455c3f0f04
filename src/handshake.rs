//! The handshake payloads: the fixed-layout init payload of a FILENAME frame and the
//!  null-terminated status strings of a FILENAME_RESP frame.

use crate::config::SessionConfig;
use anyhow::bail;
use bytes::BufMut;

/// name field width: up to 100 name bytes plus the terminating null
const NAME_FIELD_SIZE: usize = 101;
pub const MAX_FILENAME_LEN: usize = NAME_FIELD_SIZE - 1;

/// 101-byte name field + u32 window size + u32 buffer size
pub const INIT_PAYLOAD_SIZE: usize = NAME_FIELD_SIZE + 4 + 4;

pub const RESPONSE_OK: &str = "OK";
pub const RESPONSE_NOT_FOUND: &str = "File not found";

/// The payload of a FILENAME frame: which file, and the transfer parameters the client
///  chose for the session.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct InitPayload {
    pub file_name: String,
    pub config: SessionConfig,
}

impl InitPayload {
    pub fn new(file_name: impl Into<String>, config: SessionConfig) -> InitPayload {
        InitPayload { file_name: file_name.into(), config }
    }

    /// Fixed 109-byte layout: zero-filled null-terminated name, then window and buffer size
    ///  in network byte order.
    pub fn ser(&self) -> Vec<u8> {
        debug_assert!(self.file_name.len() <= MAX_FILENAME_LEN);

        let mut buf = Vec::with_capacity(INIT_PAYLOAD_SIZE);
        buf.put_slice(self.file_name.as_bytes());
        buf.resize(NAME_FIELD_SIZE, 0);
        buf.put_u32(self.config.window_size);
        buf.put_u32(self.config.buffer_size);
        buf
    }

    pub fn deser(buf: &[u8]) -> anyhow::Result<InitPayload> {
        if buf.len() < INIT_PAYLOAD_SIZE {
            bail!("init payload of {} bytes is shorter than the {} byte layout", buf.len(), INIT_PAYLOAD_SIZE);
        }

        let name_field = &buf[..NAME_FIELD_SIZE];
        let name_len = match name_field.iter().position(|&b| b == 0) {
            Some(n) => n,
            None => bail!("file name field is not null-terminated"),
        };
        let file_name = match std::str::from_utf8(&name_field[..name_len]) {
            Ok(s) => s.to_owned(),
            Err(_) => bail!("file name is not valid UTF-8"),
        };

        let window_size = u32::from_be_bytes(buf[NAME_FIELD_SIZE..NAME_FIELD_SIZE + 4].try_into()?);
        let buffer_size = u32::from_be_bytes(buf[NAME_FIELD_SIZE + 4..INIT_PAYLOAD_SIZE].try_into()?);

        let config = SessionConfig::new(window_size, buffer_size);
        config.validate()?;

        Ok(InitPayload { file_name, config })
    }
}

/// The payload of a FILENAME_RESP frame: a null-terminated status string.
pub fn response_payload(status: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(status.len() + 1);
    buf.put_slice(status.as_bytes());
    buf.put_u8(0);
    buf
}

/// Parse a FILENAME_RESP payload back into its status string.
pub fn parse_response(payload: &[u8]) -> anyhow::Result<&str> {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    match std::str::from_utf8(&payload[..end]) {
        Ok(s) => Ok(s),
        Err(_) => bail!("handshake response is not valid UTF-8"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_ser_layout() {
        let payload = InitPayload::new("data.bin", SessionConfig::new(10, 1000));
        let buf = payload.ser();

        assert_eq!(buf.len(), INIT_PAYLOAD_SIZE);
        assert_eq!(&buf[..8], b"data.bin");
        assert!(buf[8..NAME_FIELD_SIZE].iter().all(|&b| b == 0));
        assert_eq!(&buf[101..105], &[0, 0, 0, 10]);
        assert_eq!(&buf[105..109], &[0, 0, 0x03, 0xe8]);
    }

    #[rstest]
    #[case::short_name(String::from("f"), 1, 1)]
    #[case::typical(String::from("some/dir/file.txt"), 50, 1400)]
    #[case::max_len_name("n".repeat(100), 1 << 29, 7)]
    fn test_deser_reverses_ser(#[case] name: String, #[case] window: u32, #[case] buffer: u32) {
        let payload = InitPayload::new(name, SessionConfig::new(window, buffer));
        assert_eq!(InitPayload::deser(&payload.ser()).unwrap(), payload);
    }

    #[test]
    fn test_deser_rejects_short_buffer() {
        assert!(InitPayload::deser(&[0; INIT_PAYLOAD_SIZE - 1]).is_err());
    }

    #[test]
    fn test_deser_rejects_unterminated_name() {
        let mut buf = vec![b'x'; INIT_PAYLOAD_SIZE];
        buf[NAME_FIELD_SIZE..].copy_from_slice(&[0, 0, 0, 1, 0, 0, 0, 1]);
        assert!(InitPayload::deser(&buf).is_err());
    }

    #[rstest]
    #[case::zero_window(0, 1000)]
    #[case::huge_window(1 << 30, 1000)]
    #[case::zero_buffer(5, 0)]
    #[case::oversized_buffer(5, 9999)]
    fn test_deser_rejects_out_of_range_parameters(#[case] window: u32, #[case] buffer: u32) {
        let mut buf = vec![0u8; INIT_PAYLOAD_SIZE];
        buf[0] = b'f';
        buf[NAME_FIELD_SIZE..NAME_FIELD_SIZE + 4].copy_from_slice(&window.to_be_bytes());
        buf[NAME_FIELD_SIZE + 4..].copy_from_slice(&buffer.to_be_bytes());
        assert!(InitPayload::deser(&buf).is_err());
    }

    #[rstest]
    #[case::ok(RESPONSE_OK)]
    #[case::not_found(RESPONSE_NOT_FOUND)]
    fn test_response_round_trip(#[case] status: &str) {
        let payload = response_payload(status);
        assert_eq!(payload.last(), Some(&0));
        assert_eq!(parse_response(&payload).unwrap(), status);
    }

    #[test]
    fn test_parse_response_without_terminator() {
        // a reply truncated before the null is still readable
        assert_eq!(parse_response(b"OK").unwrap(), "OK");
    }
}
