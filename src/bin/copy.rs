use clap::Parser;
use filewire::client::{fetch, FetchOptions};
use filewire::config::SessionConfig;
use std::path::PathBuf;
use tracing::Level;

/// Copy a file from a filewire server.
#[derive(Parser)]
struct Args {
    /// file to request from the server
    from_filename: String,
    /// local file to write
    to_filename: PathBuf,
    /// sliding window size in frames
    window_size: u32,
    /// payload bytes per frame
    buffer_size: u32,
    /// fraction of sent datagrams to damage (0.0 disables injection)
    error_rate: f64,
    remote_host: String,
    remote_port: u16,

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

    let options = FetchOptions {
        remote_file: args.from_filename,
        local_file: args.to_filename,
        config: SessionConfig::new(args.window_size, args.buffer_size),
        error_rate: args.error_rate,
        remote_host: args.remote_host,
        remote_port: args.remote_port,
    };

    fetch(&options).await
}
