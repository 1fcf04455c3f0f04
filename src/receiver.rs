//! The receiver engine: writes in-order payloads to the sink, buffers out-of-order frames,
//!  answers with RRs and SREJs, and finishes on EOF - or gives up after enough silence.

use crate::config::{DATA_TIMEOUT, FINAL_RR_COUNT, RECEIVER_TIMEOUT_LIMIT};
use crate::frame::{self, Frame, FrameKind, HEADER_SIZE};
use crate::reorder_buffer::ReorderBuffer;
use crate::socket::DatagramSocket;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace, warn};

pub struct Receiver<W> {
    socket: Arc<dyn DatagramSocket>,
    peer: SocketAddr,
    sink: W,
    reorder: ReorderBuffer,
    expected_seq: u32,
    highest_received_seq: u32,
    consecutive_timeouts: u32,
    eof_received: bool,
}

impl<W: AsyncWrite + Unpin> Receiver<W> {
    pub fn new(
        socket: Arc<dyn DatagramSocket>,
        peer: SocketAddr,
        sink: W,
        window_size: u32,
    ) -> Receiver<W> {
        Receiver {
            socket,
            peer,
            sink,
            reorder: ReorderBuffer::new(window_size),
            expected_seq: 0,
            highest_received_seq: 0,
            consecutive_timeouts: 0,
            eof_received: false,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        info!("receiving from {:?}", self.peer);

        loop {
            match self.socket.recv_from(Some(DATA_TIMEOUT)).await {
                Some((datagram, _)) => {
                    if self.on_datagram(&datagram).await? {
                        break;
                    }
                }
                None => {
                    if self.on_timeout().await {
                        break;
                    }
                }
            }
        }

        self.sink.flush().await?;
        Ok(())
    }

    /// Returns true when the transfer is finished.
    async fn on_datagram(&mut self, datagram: &[u8]) -> anyhow::Result<bool> {
        let frame = match frame::decode(datagram) {
            Ok(frame) => frame,
            Err(e @ (frame::DecodeError::BadLength(_) | frame::DecodeError::UnknownKind(_))) => {
                debug!("ignoring datagram: {}", e);
                return Ok(false);
            }
            Err(e) => {
                debug!("corrupt datagram ({}), requesting #{}", e, self.expected_seq);
                self.send_srej(self.expected_seq).await;
                return Ok(false);
            }
        };

        self.consecutive_timeouts = 0;

        if frame.kind.is_data() {
            self.on_data(frame).await?;
            Ok(false)
        } else if frame.kind == FrameKind::Eof {
            self.on_eof(frame).await?;
            Ok(true)
        } else {
            // late handshake duplicates and stray control frames
            trace!("ignoring {:?} frame", frame.kind);
            Ok(false)
        }
    }

    async fn on_data(&mut self, frame: Frame) -> anyhow::Result<()> {
        trace!("received {:?} #{} ({} payload bytes), expecting #{}",
               frame.kind, frame.seq, frame.payload.len(), self.expected_seq);

        if frame.seq == self.expected_seq {
            self.sink.write_all(&frame.payload).await?;
            self.send_rr(frame.seq).await;
            self.expected_seq += 1;
            self.drain_reorder_buffer().await?;
        } else if frame.seq > self.expected_seq {
            debug!("out of order: got #{}, expected #{} - buffering and requesting the gap", frame.seq, self.expected_seq);
            self.reorder.insert(frame.seq, frame::encode(frame.seq, frame.kind, &frame.payload));
            self.send_srej(self.expected_seq).await;
        } else {
            debug!("duplicate #{} (expecting #{})", frame.seq, self.expected_seq);
            if self.expected_seq > 0 {
                self.send_rr(self.expected_seq - 1).await;
            }
        }

        if frame.seq > self.highest_received_seq {
            self.highest_received_seq = frame.seq;
        }
        Ok(())
    }

    /// Buffered frames become deliverable as soon as the gap before them closes.
    async fn drain_reorder_buffer(&mut self) -> anyhow::Result<()> {
        while let Some(bytes) = self.reorder.take(self.expected_seq) {
            trace!("draining buffered #{}", self.expected_seq);
            self.sink.write_all(&bytes[HEADER_SIZE..]).await?;
            self.send_rr(self.expected_seq).await;
            self.expected_seq += 1;
        }
        Ok(())
    }

    async fn on_eof(&mut self, frame: Frame) -> anyhow::Result<()> {
        info!("EOF #{} received after {} in-order frames", frame.seq, self.expected_seq);

        if !frame.payload.is_empty() {
            self.sink.write_all(&frame.payload).await?;
        }

        // the terminal ack is repeated - it is the only frame whose loss the sender can
        //  confuse with a dead receiver
        let terminal = self.expected_seq.saturating_sub(1);
        for _ in 0..FINAL_RR_COUNT {
            self.send_rr(terminal).await;
        }

        self.eof_received = true;
        Ok(())
    }

    /// Returns true when the transfer should be abandoned.
    async fn on_timeout(&mut self) -> bool {
        if self.eof_received {
            return true;
        }

        self.consecutive_timeouts += 1;
        debug!("no data for {:?} ({}/{} timeouts) - re-acking #{}",
               DATA_TIMEOUT, self.consecutive_timeouts, RECEIVER_TIMEOUT_LIMIT, self.highest_received_seq);
        self.send_rr(self.highest_received_seq).await;

        if self.consecutive_timeouts >= RECEIVER_TIMEOUT_LIMIT {
            warn!("{} consecutive timeouts - giving up, the file may be truncated", self.consecutive_timeouts);
            self.send_srej(self.highest_received_seq + 1).await;
            return true;
        }
        false
    }

    async fn send_rr(&self, seq: u32) {
        trace!("sending RR #{}", seq);
        self.socket.send_to(&frame::encode_control(FrameKind::Rr, seq), self.peer).await;
    }

    async fn send_srej(&self, seq: u32) {
        trace!("sending SREJ #{}", seq);
        self.socket.send_to(&frame::encode_control(FrameKind::Srej, seq), self.peer).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode;
    use crate::handshake;
    use crate::test_util::{test_addr, ScriptedSocket};

    fn data(seq: u32, payload: &[u8]) -> Option<Vec<u8>> {
        Some(encode(seq, FrameKind::Data, payload))
    }

    fn resent(seq: u32, payload: &[u8]) -> Option<Vec<u8>> {
        Some(encode(seq, FrameKind::ResentSrej, payload))
    }

    fn eof(seq: u32) -> Option<Vec<u8>> {
        Some(encode(seq, FrameKind::Eof, &[]))
    }

    async fn run_receiver(script: Vec<Option<Vec<u8>>>, window_size: u32) -> (Vec<u8>, Arc<ScriptedSocket>) {
        let socket = Arc::new(ScriptedSocket::new(test_addr(9), script));
        let mut sink = Vec::new();
        let receiver = Receiver::new(socket.clone(), test_addr(9), &mut sink, window_size);
        receiver.run().await.unwrap();
        (sink, socket)
    }

    #[tokio::test]
    async fn test_in_order_delivery() {
        let script = vec![data(0, b"ab"), data(1, b"cd"), eof(2)];
        let (sink, socket) = run_receiver(script, 4).await;

        assert_eq!(sink, b"abcd");
        assert_eq!(socket.sent_frames(), vec![
            (FrameKind::Rr, 0),
            (FrameKind::Rr, 1),
            (FrameKind::Rr, 1), (FrameKind::Rr, 1), (FrameKind::Rr, 1),
        ]);
    }

    #[tokio::test]
    async fn test_out_of_order_frame_is_buffered_and_drained() {
        // #2 is late: #3 arrives first, gets buffered, a SREJ asks for #2, and the resent #2
        //  drains both
        let script = vec![
            data(0, b"aa"), data(1, b"bb"),
            data(3, b"dd"),
            resent(2, b"cc"),
            eof(4),
        ];
        let (sink, socket) = run_receiver(script, 4).await;

        assert_eq!(sink, b"aabbccdd");
        assert_eq!(socket.sent_frames(), vec![
            (FrameKind::Rr, 0),
            (FrameKind::Rr, 1),
            (FrameKind::Srej, 2),
            (FrameKind::Rr, 2),
            (FrameKind::Rr, 3),
            (FrameKind::Rr, 3), (FrameKind::Rr, 3), (FrameKind::Rr, 3),
        ]);
    }

    #[tokio::test]
    async fn test_corrupt_frame_triggers_srej_for_expected() {
        let mut corrupt = encode(0, FrameKind::Data, b"xx");
        corrupt[7] ^= 0x01;

        let script = vec![Some(corrupt), data(0, b"xx"), eof(1)];
        let (sink, socket) = run_receiver(script, 4).await;

        assert_eq!(sink, b"xx");
        assert_eq!(socket.sent_frames()[0], (FrameKind::Srej, 0));
    }

    #[tokio::test]
    async fn test_duplicate_frame_reacks_previous() {
        let script = vec![data(0, b"aa"), data(0, b"aa"), data(1, b"bb"), eof(2)];
        let (sink, socket) = run_receiver(script, 4).await;

        // the duplicate is not written twice, and the sender gets its base re-acked
        assert_eq!(sink, b"aabb");
        assert_eq!(socket.sent_frames()[1], (FrameKind::Rr, 0));
    }

    #[tokio::test]
    async fn test_eof_payload_reaches_the_sink() {
        let script = vec![data(0, b"aa"), Some(encode(1, FrameKind::Eof, b"tail"))];
        let (sink, _) = run_receiver(script, 4).await;

        assert_eq!(sink, b"aatail");
    }

    #[tokio::test]
    async fn test_eof_before_any_data() {
        // zero-byte file: EOF only, terminal RR falls back to #0
        let script = vec![eof(0)];
        let (sink, socket) = run_receiver(script, 4).await;

        assert!(sink.is_empty());
        assert_eq!(socket.sent_frames(), vec![
            (FrameKind::Rr, 0), (FrameKind::Rr, 0), (FrameKind::Rr, 0),
        ]);
    }

    #[tokio::test]
    async fn test_gives_up_after_consecutive_timeouts() {
        let (sink, socket) = run_receiver(vec![], 4).await;

        assert!(sink.is_empty());
        let frames = socket.sent_frames();
        assert_eq!(frames.len(), RECEIVER_TIMEOUT_LIMIT as usize + 1);
        assert!(frames[..RECEIVER_TIMEOUT_LIMIT as usize].iter().all(|f| *f == (FrameKind::Rr, 0)));
        assert_eq!(*frames.last().unwrap(), (FrameKind::Srej, 1));
    }

    #[tokio::test]
    async fn test_timeout_counter_resets_on_activity() {
        // 14 timeouts, one frame, 14 more timeouts: no give-up SREJ yet after the first 14,
        //  and the counter starts over after the frame
        let mut script: Vec<Option<Vec<u8>>> = std::iter::repeat_with(|| None).take(14).collect();
        script.push(data(0, b"aa"));
        script.extend(std::iter::repeat_with(|| None).take(15));
        let (sink, socket) = run_receiver(script, 4).await;

        assert_eq!(sink, b"aa");
        let frames = socket.sent_frames();
        assert_eq!(*frames.last().unwrap(), (FrameKind::Srej, 1));
        // 14 idle RRs + RR(0) for the data + 15 idle RRs + final SREJ
        assert_eq!(frames.len(), 14 + 1 + 15 + 1);
    }

    #[tokio::test]
    async fn test_stray_handshake_reply_is_ignored() {
        let stray = encode(0, FrameKind::FilenameResp, &handshake::response_payload("OK"));
        let script = vec![Some(stray), data(0, b"aa"), eof(1)];
        let (sink, socket) = run_receiver(script, 4).await;

        assert_eq!(sink, b"aa");
        assert_eq!(socket.sent_frames()[0], (FrameKind::Rr, 0));
    }
}
