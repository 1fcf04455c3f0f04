use clap::Parser;
use filewire::server::Server;
use std::net::SocketAddr;
use tracing::Level;

/// Serve files to filewire clients.
#[derive(Parser)]
struct Args {
    /// fraction of sent datagrams to damage (0.0 disables injection)
    error_rate: f64,
    /// port to listen on; 0 lets the OS pick one
    #[clap(default_value_t = 0)]
    port: u16,

    /// log protocol events
    #[clap(short = 'd', long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let server = Server::bind(addr, args.error_rate).await?;
    println!("listening on port {}", server.local_addr().port());

    server.run().await
}
