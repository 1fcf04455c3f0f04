//! The datagram seam between the protocol engines and the network: a trait so engines can be
//!  tested against scripted sockets, a `tokio::net::UdpSocket` implementation, and a
//!  fault-injecting wrapper that simulates the lossy network the protocol is built for.

use crate::frame::MAX_FRAME_SIZE;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time;
use tracing::{debug, error, trace};

/// One UDP endpoint as the protocol sees it. `recv_from` is the single suspension point of a
///  session: it waits up to `timeout` for a datagram (`None` waits indefinitely,
///  `Some(Duration::ZERO)` only drains already-queued datagrams).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatagramSocket: Send + Sync + 'static {
    async fn send_to(&self, buf: &[u8], to: SocketAddr);

    /// `None` on timeout.
    async fn recv_from(&self, timeout: Option<Duration>) -> Option<(Vec<u8>, SocketAddr)>;

    fn local_addr(&self) -> SocketAddr;
}

pub struct UdpEndpoint {
    socket: UdpSocket,
}

impl UdpEndpoint {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<UdpEndpoint> {
        let socket = UdpSocket::bind(addr).await?;
        debug!("bound UDP endpoint to {:?}", socket.local_addr()?);
        Ok(UdpEndpoint { socket })
    }
}

#[async_trait]
impl DatagramSocket for UdpEndpoint {
    async fn send_to(&self, buf: &[u8], to: SocketAddr) {
        trace!("sending {} bytes to {:?}", buf.len(), to);

        if let Err(e) = self.socket.send_to(buf, to).await {
            // a send error is handled like a dropped datagram: the ARQ machinery recovers
            error!("error sending UDP datagram to {:?}: {}", to, e);
        }
    }

    async fn recv_from(&self, timeout: Option<Duration>) -> Option<(Vec<u8>, SocketAddr)> {
        // oversized datagrams are truncated by recv and then fail the length check upstream,
        //  so one byte of slack is enough to distinguish them
        let mut buf = vec![0u8; MAX_FRAME_SIZE + 1];

        let received = match timeout {
            Some(limit) => time::timeout(limit, self.socket.recv_from(&mut buf)).await.ok()?,
            None => self.socket.recv_from(&mut buf).await,
        };

        match received {
            Ok((len, from)) => {
                buf.truncate(len);
                trace!("received {} bytes from {:?}", len, from);
                Some((buf, from))
            }
            Err(e) => {
                error!("error receiving UDP datagram: {}", e);
                None
            }
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
            .expect("UdpSocket should have an initialized local addr")
    }
}

/// Wraps a socket and damages outgoing datagrams at a configured rate: an affected datagram is
///  either dropped outright or has a single random bit flipped, with equal probability. The
///  receive path is untouched - corrupting one direction's sends corrupts the other's receives.
pub struct FaultySocket {
    inner: Arc<dyn DatagramSocket>,
    error_rate: f64,
    rng: Mutex<SmallRng>,
}

impl FaultySocket {
    pub fn new(inner: Arc<dyn DatagramSocket>, error_rate: f64) -> FaultySocket {
        FaultySocket {
            inner,
            error_rate,
            rng: Mutex::new(SmallRng::from_entropy()),
        }
    }

    #[cfg(test)]
    pub fn with_seed(inner: Arc<dyn DatagramSocket>, error_rate: f64, seed: u64) -> FaultySocket {
        FaultySocket {
            inner,
            error_rate,
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        }
    }

    /// Wrap only if there is anything to inject.
    pub fn wrap(inner: Arc<dyn DatagramSocket>, error_rate: f64) -> Arc<dyn DatagramSocket> {
        if error_rate > 0.0 {
            Arc::new(FaultySocket::new(inner, error_rate))
        } else {
            inner
        }
    }
}

enum Fault {
    None,
    Drop,
    FlipBit(usize),
}

#[async_trait]
impl DatagramSocket for FaultySocket {
    async fn send_to(&self, buf: &[u8], to: SocketAddr) {
        let fault = {
            let mut rng = self.rng.lock().unwrap();
            if !rng.gen_bool(self.error_rate) {
                Fault::None
            } else if rng.gen_bool(0.5) {
                Fault::Drop
            } else {
                Fault::FlipBit(rng.gen_range(0..buf.len() * 8))
            }
        };

        match fault {
            Fault::None => self.inner.send_to(buf, to).await,
            Fault::Drop => {
                debug!("fault injection: dropping {} byte datagram to {:?}", buf.len(), to);
            }
            Fault::FlipBit(bit) => {
                debug!("fault injection: flipping bit {} of datagram to {:?}", bit, to);
                let mut damaged = buf.to_vec();
                damaged[bit / 8] ^= 1 << (bit % 8);
                self.inner.send_to(&damaged, to).await;
            }
        }
    }

    async fn recv_from(&self, timeout: Option<Duration>) -> Option<(Vec<u8>, SocketAddr)> {
        self.inner.recv_from(timeout).await
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }
}
