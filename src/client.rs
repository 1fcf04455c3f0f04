//! The client side of a transfer: handshake with the server's well-known endpoint, capture
//!  of the per-session endpoint from the reply, then the receiver engine writing to the
//!  output file.

use crate::config::{SessionConfig, HANDSHAKE_TIMEOUT, INIT_RETRY_LIMIT};
use crate::frame::{self, FrameKind};
use crate::handshake::{self, InitPayload, MAX_FILENAME_LEN, RESPONSE_OK};
use crate::receiver::Receiver;
use crate::socket::{DatagramSocket, FaultySocket, UdpEndpoint};
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::BufWriter;
use tokio::net::lookup_host;
use tracing::{debug, info};

pub struct FetchOptions {
    pub remote_file: String,
    pub local_file: PathBuf,
    pub config: SessionConfig,
    pub error_rate: f64,
    pub remote_host: String,
    pub remote_port: u16,
}

/// Fetch one file from the server. Fails on invalid parameters, an exhausted handshake, a
///  missing remote file, or an I/O error on the local side.
pub async fn fetch(options: &FetchOptions) -> anyhow::Result<()> {
    if options.remote_file.len() > MAX_FILENAME_LEN {
        bail!("file name {} is too long (max {} bytes)", options.remote_file, MAX_FILENAME_LEN);
    }
    options.config.validate()?;

    let server_addr = resolve(&options.remote_host, options.remote_port).await?;
    debug!("server address resolved to {:?}", server_addr);

    let bind_addr: SocketAddr = if server_addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }.parse()?;
    let endpoint = Arc::new(UdpEndpoint::bind(bind_addr).await?);
    let socket = FaultySocket::wrap(endpoint, options.error_rate);

    let sink = File::create(&options.local_file).await
        .with_context(|| format!("cannot create output file {:?}", options.local_file))?;

    let init = InitPayload::new(options.remote_file.clone(), options.config);
    let session_addr = request_file(&socket, server_addr, &init).await?;
    info!("session established with {:?}", session_addr);

    let receiver = Receiver::new(socket, session_addr, BufWriter::new(sink), options.config.window_size);
    receiver.run().await?;

    info!("wrote {:?}", options.local_file);
    Ok(())
}

async fn resolve(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    lookup_host((host, port)).await?
        .next()
        .with_context(|| format!("cannot resolve {}:{}", host, port))
}

/// Send the FILENAME request until a checksum-valid FILENAME_RESP arrives, and return the
///  reply's source address - the server migrates each session to a fresh ephemeral endpoint,
///  and the reply is the only place the client learns it.
pub(crate) async fn request_file(
    socket: &Arc<dyn DatagramSocket>,
    server_addr: SocketAddr,
    init: &InitPayload,
) -> anyhow::Result<SocketAddr> {
    let request = frame::encode(0, FrameKind::Filename, &init.ser());

    for attempt in 1..=INIT_RETRY_LIMIT {
        debug!("sending file request for {} (attempt {}/{})", init.file_name, attempt, INIT_RETRY_LIMIT);
        socket.send_to(&request, server_addr).await;

        if let Some((datagram, from)) = socket.recv_from(Some(HANDSHAKE_TIMEOUT)).await {
            match frame::decode(&datagram) {
                Ok(reply) if reply.kind == FrameKind::FilenameResp => {
                    let status = handshake::parse_response(&reply.payload)?;
                    debug!("server answered: {:?}", status);
                    if status == RESPONSE_OK {
                        return Ok(from);
                    }
                    bail!("server rejected the request for {}: {}", init.file_name, status);
                }
                Ok(reply) => debug!("ignoring unexpected {:?} reply", reply.kind),
                Err(e) => debug!("dropping handshake reply: {}", e),
            }
        } else {
            debug!("no handshake reply within {:?}", HANDSHAKE_TIMEOUT);
        }
    }

    bail!("no response from server after {} attempts", INIT_RETRY_LIMIT)
}
