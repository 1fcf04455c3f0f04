//! The sender engine: reads the source in `buffer_size` chunks, keeps up to `window_size`
//!  data frames in flight, retransmits on SREJ, on timeout and on repeated duplicate RRs,
//!  and closes the session with an EOF / terminal-RR exchange.
//!
//! The engine is a single cooperative loop; its only suspension point is the socket receive
//!  with timeout. It terminates in bounded time under arbitrary loss: a frame that cannot be
//!  delivered after `MAX_RETRANSMIT` attempts is skipped (leaving a gap at the receiver), and
//!  a session that gets no terminal ack is closed unilaterally.

use crate::config::{
    SessionConfig, ACK_TIMEOUT, DUP_RR_LIMIT, EOF_ACCEPT_ANY_AFTER, EOF_UNILATERAL_AFTER,
    MAX_RETRANSMIT, SENDER_TIMEOUT_LIMIT, STALL_LIMIT,
};
use crate::frame::{self, Frame, FrameKind};
use crate::replay_buffer::ReplayBuffer;
use crate::socket::DatagramSocket;
use crate::window::SendWindow;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, trace, warn};

/// Tracks identical RRs for the seq just below the window base. Three in a row mean the
///  receiver is stuck waiting for the base frame - a fast-retransmit hint. One tracker per
///  session: sessions must not share ack state.
struct DupRrTracker {
    last_rr: Option<u32>,
    count: u32,
}

impl DupRrTracker {
    fn new() -> DupRrTracker {
        DupRrTracker { last_rr: None, count: 0 }
    }

    /// Returns true when the duplicate threshold is hit (and resets the counter).
    fn observe(&mut self, ack_seq: u32, base: u32) -> bool {
        if self.last_rr == Some(ack_seq) && ack_seq == base.wrapping_sub(1) {
            self.count += 1;
            trace!("duplicate RR for #{} seen {} times", ack_seq, self.count);
            if self.count >= DUP_RR_LIMIT {
                self.count = 0;
                return true;
            }
        } else if self.last_rr != Some(ack_seq) {
            self.last_rr = Some(ack_seq);
            self.count = 1;
        }
        false
    }
}

pub struct Sender<R> {
    socket: Arc<dyn DatagramSocket>,
    peer: SocketAddr,
    source: R,
    window: SendWindow,
    replay: ReplayBuffer,
    buffer_size: usize,
    next_seq: u32,
    eof_reached: bool,
    dup_rr: DupRrTracker,
    /// frames skipped after retry exhaustion - the receiver saw a gap
    skipped_frames: u32,
}

impl<R: AsyncRead + Unpin> Sender<R> {
    pub fn new(
        socket: Arc<dyn DatagramSocket>,
        peer: SocketAddr,
        source: R,
        config: &SessionConfig,
    ) -> Sender<R> {
        Sender {
            socket,
            peer,
            source,
            window: SendWindow::new(config.window_size),
            replay: ReplayBuffer::new(config.replay_capacity(), config.buffer_size as usize),
            buffer_size: config.buffer_size as usize,
            next_seq: 0,
            eof_reached: false,
            dup_rr: DupRrTracker::new(),
            skipped_frames: 0,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        info!("starting transfer to {:?}", self.peer);

        let mut last_base = self.window.base();
        let mut stall_counter = 0u32;
        let mut consecutive_timeouts = 0u32;

        loop {
            self.fill_window().await?;

            if self.eof_reached && self.window.base() == self.next_seq {
                break;
            }

            let base_at_iteration_start = self.window.base();
            let full = self.window.is_full(self.next_seq);
            // once the source is exhausted there is nothing left to fill, so an idle wait on
            //  the outstanding tail must block rather than spin
            let draining = self.eof_reached && self.window.base() < self.next_seq;
            let mut timed_out = false;

            if full {
                // deadlock breaker: a full window whose base refuses to move means the acks
                //  are not coming, whatever the poll says
                if self.window.base() == last_base {
                    stall_counter += 1;
                    if stall_counter >= STALL_LIMIT {
                        debug!("window base stuck at {} for {} full-window waits - forcing a timeout", last_base, stall_counter);
                        stall_counter = 0;
                        timed_out = true;
                    }
                } else {
                    stall_counter = 0;
                    last_base = self.window.base();
                }
            }

            if !timed_out {
                let timeout = if full || draining { ACK_TIMEOUT } else { Duration::ZERO };
                match self.socket.recv_from(Some(timeout)).await {
                    Some((datagram, _)) => {
                        stall_counter = 0;
                        self.on_control_datagram(&datagram).await;
                    }
                    None if full || draining => timed_out = true,
                    None => {}
                }
            }

            if timed_out {
                consecutive_timeouts += 1;
                self.on_timeout(consecutive_timeouts).await;
            }

            if self.window.base() != base_at_iteration_start {
                consecutive_timeouts = 0;
            }

            if self.eof_reached && self.window.base() >= self.next_seq {
                break;
            }
        }

        if self.skipped_frames > 0 {
            warn!("transfer finished with {} skipped frames - the receiver saw gaps", self.skipped_frames);
        }

        self.send_eof().await
    }

    /// Read from the source and transmit new data frames until the window is full or the
    ///  source is exhausted, draining arrived control frames after every send.
    async fn fill_window(&mut self) -> anyhow::Result<()> {
        while !self.window.is_full(self.next_seq) && !self.eof_reached {
            let payload = self.read_chunk().await?;
            if payload.is_empty() {
                debug!("source exhausted after {} frames", self.next_seq);
                self.eof_reached = true;
                break;
            }

            self.replay.write(&payload, self.next_seq);

            let bytes = frame::encode(self.next_seq, FrameKind::Data, &payload);
            self.window.insert(self.next_seq, bytes.clone(), FrameKind::Data);
            trace!("sending DATA #{} ({} payload bytes)", self.next_seq, payload.len());
            self.socket.send_to(&bytes, self.peer).await;
            self.next_seq += 1;

            self.drain_control_frames().await;
        }
        Ok(())
    }

    /// Read up to `buffer_size` bytes; short reads are re-polled so every frame except the
    ///  final one carries a full chunk. Empty result means end of source.
    async fn read_chunk(&mut self) -> anyhow::Result<Vec<u8>> {
        let mut chunk = vec![0u8; self.buffer_size];
        let mut filled = 0;
        while filled < chunk.len() {
            let n = self.source.read(&mut chunk[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        chunk.truncate(filled);
        Ok(chunk)
    }

    async fn drain_control_frames(&mut self) {
        while let Some((datagram, _)) = self.socket.recv_from(Some(Duration::ZERO)).await {
            self.on_control_datagram(&datagram).await;
        }
    }

    async fn on_control_datagram(&mut self, datagram: &[u8]) {
        let frame = match frame::decode(datagram) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("dropping control datagram: {}", e);
                return;
            }
        };

        match frame.kind {
            FrameKind::Rr => self.on_rr(&frame).await,
            FrameKind::Srej => self.on_srej(&frame).await,
            other => trace!("ignoring {:?} frame in data phase", other),
        }
    }

    async fn on_rr(&mut self, frame: &Frame) {
        let ack_seq = frame.ack_value();
        trace!("RR for #{} (window base {})", ack_seq, self.window.base());

        if self.dup_rr.observe(ack_seq, self.window.base()) {
            debug!("receiver appears to be missing #{} - fast retransmit", self.window.base());
            self.resend_base().await;
        }

        self.window.mark_acked_through(ack_seq);
        self.window.slide();
    }

    async fn on_srej(&mut self, frame: &Frame) {
        let srej_seq = frame.ack_value();
        debug!("SREJ for #{}", srej_seq);

        if let Some(record) = self.window.get_mut(srej_seq) {
            frame::patch_kind(&mut record.bytes, FrameKind::ResentSrej);
            record.kind = FrameKind::ResentSrej;
            let bytes = record.bytes.clone();
            self.socket.send_to(&bytes, self.peer).await;
        } else if let Some(payload) = self.replay.read(srej_seq) {
            debug!("window record for #{} already reused - reconstructing from the replay ring", srej_seq);
            let bytes = frame::encode(srej_seq, FrameKind::ResentTimeout, &payload);
            self.socket.send_to(&bytes, self.peer).await;
        } else {
            debug!("cannot satisfy SREJ for #{}: not in window or replay range", srej_seq);
        }
    }

    /// Retransmit the base frame; a frame that exhausts its retries is skipped so the
    ///  transfer keeps moving.
    async fn on_timeout(&mut self, consecutive_timeouts: u32) {
        let base = self.window.base();
        debug!("timeout: retransmitting #{} (consecutive timeouts: {})", base, consecutive_timeouts);

        if let Some(record) = self.window.get_mut(base) {
            frame::patch_kind(&mut record.bytes, FrameKind::ResentTimeout);
            record.kind = FrameKind::ResentTimeout;
            record.retransmit_count += 1;
            let bytes = record.bytes.clone();
            let exhausted = record.retransmit_count >= MAX_RETRANSMIT;
            self.socket.send_to(&bytes, self.peer).await;

            if exhausted {
                warn!("#{} exceeded {} retransmissions - skipping it", base, MAX_RETRANSMIT);
                self.skipped_frames += 1;
                self.window.force_ack_base();
            }
        } else if let Some(payload) = self.replay.read(base) {
            debug!("window record for #{} missing on timeout - reconstructing from the replay ring", base);
            let bytes = frame::encode(base, FrameKind::ResentTimeout, &payload);
            self.window.insert(base, bytes.clone(), FrameKind::ResentTimeout);
            self.socket.send_to(&bytes, self.peer).await;
        } else if consecutive_timeouts > SENDER_TIMEOUT_LIMIT {
            warn!("no frame for #{} anywhere and {} consecutive timeouts - forcing the window forward", base, consecutive_timeouts);
            self.skipped_frames += 1;
            self.window.force_ack_base();
        }
    }

    async fn resend_base(&mut self) {
        let base = self.window.base();
        if let Some(record) = self.window.get_mut(base) {
            frame::patch_kind(&mut record.bytes, FrameKind::ResentTimeout);
            record.kind = FrameKind::ResentTimeout;
            let bytes = record.bytes.clone();
            self.socket.send_to(&bytes, self.peer).await;
        } else if let Some(payload) = self.replay.read(base) {
            let bytes = frame::encode(base, FrameKind::ResentTimeout, &payload);
            self.socket.send_to(&bytes, self.peer).await;
        } else {
            debug!("no frame for #{} to fast-retransmit", base);
        }
    }

    /// The termination exchange: EOF carries `next_seq`, the receiver answers with a terminal
    ///  RR. Loss-tolerant on both sides: any valid ack is accepted after a few attempts, and
    ///  after six unanswered attempts the session closes unilaterally - the receiver has its
    ///  own timeout-based exit.
    async fn send_eof(&mut self) -> anyhow::Result<()> {
        let eof_bytes = frame::encode(self.next_seq, FrameKind::Eof, &[]);
        info!("sending EOF #{} after {} data frames", self.next_seq, self.next_seq);

        for attempt in 1..=MAX_RETRANSMIT {
            debug!("EOF attempt {}/{}", attempt, MAX_RETRANSMIT);
            self.socket.send_to(&eof_bytes, self.peer).await;

            if let Some((datagram, _)) = self.socket.recv_from(Some(ACK_TIMEOUT)).await {
                match frame::decode(&datagram) {
                    Ok(frame) if frame.kind == FrameKind::Rr => {
                        let ack_seq = frame.ack_value();
                        let terminal = self.next_seq == 0 || ack_seq >= self.next_seq - 1;
                        if terminal || attempt >= EOF_ACCEPT_ANY_AFTER {
                            info!("transfer complete: terminal RR for #{}", ack_seq);
                            return Ok(());
                        }
                        debug!("RR for #{} is older than the EOF - waiting for a newer ack", ack_seq);
                    }
                    Ok(frame) if frame.kind == FrameKind::Srej => {
                        // the receiver is still missing something we can no longer provide
                        debug!("SREJ for #{} after EOF", frame.ack_value());
                        if attempt >= EOF_ACCEPT_ANY_AFTER {
                            info!("accepting post-EOF SREJ as the terminal ack after {} attempts", attempt);
                            return Ok(());
                        }
                    }
                    Ok(frame) => trace!("ignoring {:?} frame during EOF exchange", frame.kind),
                    Err(e) => debug!("dropping corrupt datagram during EOF exchange: {}", e),
                }
            }

            if attempt >= EOF_UNILATERAL_AFTER {
                warn!("no terminal ack after {} EOF attempts - closing unilaterally", attempt);
                return Ok(());
            }
        }

        warn!("no terminal ack after {} EOF attempts - closing unilaterally", MAX_RETRANSMIT);
        Ok(())
    }
}
