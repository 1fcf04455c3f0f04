//! In-memory sockets for driving the protocol engines in tests without any I/O.

use crate::socket::DatagramSocket;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;

pub fn test_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Records everything sent; never receives anything.
#[derive(Default)]
pub struct RecordingSocket {
    pub sent: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
}

#[async_trait]
impl DatagramSocket for RecordingSocket {
    async fn send_to(&self, buf: &[u8], to: SocketAddr) {
        self.sent.lock().unwrap().push((buf.to_vec(), to));
    }

    async fn recv_from(&self, _timeout: Option<Duration>) -> Option<(Vec<u8>, SocketAddr)> {
        None
    }

    fn local_addr(&self) -> SocketAddr {
        test_addr(1)
    }
}

/// Plays back a scripted sequence of receive results (one entry per `recv_from` call; `None`
///  entries are timeouts) and records everything sent. Once the script is exhausted every
///  receive times out, so engine loops with bounded retries terminate.
pub struct ScriptedSocket {
    script: Mutex<VecDeque<Option<Vec<u8>>>>,
    peer: SocketAddr,
    pub sent: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
}

impl ScriptedSocket {
    pub fn new(peer: SocketAddr, script: Vec<Option<Vec<u8>>>) -> ScriptedSocket {
        ScriptedSocket {
            script: Mutex::new(script.into()),
            peer,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// The scripted frames all consumed?
    pub fn script_exhausted(&self) -> bool {
        self.script.lock().unwrap().is_empty()
    }

    /// Decoded kinds and seqs of everything sent, in order.
    pub fn sent_frames(&self) -> Vec<(crate::frame::FrameKind, u32)> {
        self.sent.lock().unwrap().iter()
            .map(|(buf, _)| {
                let frame = crate::frame::decode(buf).expect("test sent an undecodable frame");
                (frame.kind, frame.seq)
            })
            .collect()
    }
}

#[async_trait]
impl DatagramSocket for ScriptedSocket {
    async fn send_to(&self, buf: &[u8], to: SocketAddr) {
        self.sent.lock().unwrap().push((buf.to_vec(), to));
    }

    async fn recv_from(&self, _timeout: Option<Duration>) -> Option<(Vec<u8>, SocketAddr)> {
        self.script.lock().unwrap()
            .pop_front()
            .flatten()
            .map(|buf| (buf, self.peer))
    }

    fn local_addr(&self) -> SocketAddr {
        test_addr(1)
    }
}

/// Decide per outgoing datagram whether the "network" delivers it.
pub type SendFilter = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// One end of an in-memory datagram link. Run with a paused-clock runtime, timeouts elapse
///  instantly when both ends are idle, so whole-session tests are fast and deterministic.
pub struct ChannelSocket {
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
    filter: Mutex<SendFilter>,
    pub sent: Mutex<Vec<Vec<u8>>>,
}

/// A bidirectional link between `a` and `b`; each direction has its own delivery filter.
pub fn channel_pair(
    a: SocketAddr,
    b: SocketAddr,
    a_filter: SendFilter,
    b_filter: SendFilter,
) -> (ChannelSocket, ChannelSocket) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();

    let a_socket = ChannelSocket {
        addr: a,
        tx: a_tx,
        rx: tokio::sync::Mutex::new(a_rx),
        filter: Mutex::new(a_filter),
        sent: Mutex::new(Vec::new()),
    };
    let b_socket = ChannelSocket {
        addr: b,
        tx: b_tx,
        rx: tokio::sync::Mutex::new(b_rx),
        filter: Mutex::new(b_filter),
        sent: Mutex::new(Vec::new()),
    };
    (a_socket, b_socket)
}

pub fn deliver_all() -> SendFilter {
    Box::new(|_| true)
}

#[async_trait]
impl DatagramSocket for ChannelSocket {
    async fn send_to(&self, buf: &[u8], _to: SocketAddr) {
        self.sent.lock().unwrap().push(buf.to_vec());
        if (self.filter.lock().unwrap())(buf) {
            let _ = self.tx.send((buf.to_vec(), self.addr));
        }
    }

    async fn recv_from(&self, timeout: Option<Duration>) -> Option<(Vec<u8>, SocketAddr)> {
        let mut rx = self.rx.lock().await;
        match timeout {
            Some(limit) => time::timeout(limit, rx.recv()).await.ok().flatten(),
            None => rx.recv().await,
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}
