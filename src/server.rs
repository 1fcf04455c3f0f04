//! The server: a parent loop that accepts FILENAME requests on the well-known endpoint, and
//!  one task per accepted request that serves the transfer from a fresh ephemeral endpoint.
//!
//! The migration to an ephemeral endpoint is load-bearing: concurrent clients demultiplex by
//!  the address they learned from the handshake reply, so sessions share no state at all -
//!  the parent hands each task the decoded request and never hears from it again.

use crate::config::{ACK_TIMEOUT, HANDSHAKE_OK_EARLY_EXIT, MAX_RETRANSMIT, NOT_FOUND_RESPONSES};
use crate::frame::{self, FrameKind};
use crate::handshake::{self, InitPayload, RESPONSE_NOT_FOUND, RESPONSE_OK};
use crate::sender::Sender;
use crate::socket::{DatagramSocket, FaultySocket, UdpEndpoint};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::BufReader;
use tracing::{debug, error, info};

pub struct Server {
    socket: Arc<UdpEndpoint>,
    error_rate: f64,
}

impl Server {
    pub async fn bind(addr: SocketAddr, error_rate: f64) -> anyhow::Result<Server> {
        let socket = Arc::new(UdpEndpoint::bind(addr).await?);
        info!("server listening on {:?}", socket.local_addr());
        Ok(Server { socket, error_rate })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    /// Accept requests forever. Anything that is not a checksum-valid FILENAME frame with a
    ///  well-formed init payload is dropped.
    pub async fn run(&self) -> anyhow::Result<()> {
        loop {
            let Some((datagram, from)) = self.socket.recv_from(None).await else {
                continue;
            };

            let Some(init) = parse_request(&datagram) else {
                continue;
            };

            info!("file request for {} from {:?} (window {}, buffer {})",
                  init.file_name, from, init.config.window_size, init.config.buffer_size);

            let error_rate = self.error_rate;
            tokio::spawn(async move {
                if let Err(e) = run_session(init, from, error_rate).await {
                    error!("session for {:?} failed: {:#}", from, e);
                }
            });
        }
    }
}

fn parse_request(datagram: &[u8]) -> Option<InitPayload> {
    let frame = match frame::decode(datagram) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("dropping datagram on the well-known endpoint: {}", e);
            return None;
        }
    };

    if frame.kind != FrameKind::Filename {
        debug!("dropping {:?} frame on the well-known endpoint", frame.kind);
        return None;
    }

    match InitPayload::deser(&frame.payload) {
        Ok(init) => Some(init),
        Err(e) => {
            debug!("dropping malformed file request: {:#}", e);
            None
        }
    }
}

/// One transfer session, owning its ephemeral endpoint for the whole lifetime of the
///  transfer.
async fn run_session(init: InitPayload, client: SocketAddr, error_rate: f64) -> anyhow::Result<()> {
    let bind_addr: SocketAddr = if client.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }.parse()?;
    let endpoint = Arc::new(UdpEndpoint::bind(bind_addr).await?);
    info!("session for {:?} on {:?}", client, endpoint.local_addr());
    let socket = FaultySocket::wrap(endpoint, error_rate);

    let file = match File::open(&init.file_name).await {
        Ok(file) => file,
        Err(e) => {
            info!("cannot open {}: {} - telling the client", init.file_name, e);
            respond(&socket, client, RESPONSE_NOT_FOUND, NOT_FOUND_RESPONSES).await;
            return Ok(());
        }
    };

    respond(&socket, client, RESPONSE_OK, MAX_RETRANSMIT).await;

    let sender = Sender::new(socket, client, BufReader::new(file), &init.config);
    sender.run().await?;

    info!("session for {:?} finished", client);
    Ok(())
}

/// Send the handshake reply until the client speaks on the session endpoint (proof that it
///  has observed the migration), with a bounded number of attempts. The client stays silent
///  until data arrives in the normal case, so after a few unanswered attempts the session
///  proceeds anyway - the replies already sent cover ordinary loss.
async fn respond(socket: &Arc<dyn DatagramSocket>, client: SocketAddr, status: &str, max_attempts: u32) {
    let reply = frame::encode(0, FrameKind::FilenameResp, &handshake::response_payload(status));

    for attempt in 1..=max_attempts {
        debug!("sending handshake reply {:?} (attempt {}/{})", status, attempt, max_attempts);
        socket.send_to(&reply, client).await;

        if socket.recv_from(Some(ACK_TIMEOUT)).await.is_some() {
            debug!("client is talking on the session endpoint");
            return;
        }

        if attempt >= HANDSHAKE_OK_EARLY_EXIT {
            break;
        }
    }

    debug!("no reaction to handshake reply {:?} - proceeding", status);
}
