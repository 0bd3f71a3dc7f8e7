use anyhow::{anyhow, Result};
use clap::Parser;
use rpcmux::{BincodeCodec, Client, TokioReactor};
use rpcmux_demo::Message;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
struct Args {
    /// Server address to connect to.
    #[arg(long, default_value = "127.0.0.1")]
    addr: String,

    /// Server port to connect to.
    #[arg(long, default_value_t = 7878)]
    port: u16,

    /// Number of pings to send concurrently.
    #[arg(long, default_value_t = 4)]
    count: u64,

    /// Maximum concurrently in-flight requests before new ones queue.
    #[arg(long, default_value_t = 16)]
    max_channels: usize,

    /// Per-request timeout in milliseconds.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let client = Client::new(TokioReactor);
    let peer = client
        .connect(
            &args.addr,
            args.port,
            BincodeCodec::<Message>::default(),
            args.max_channels,
        )
        .await?;

    let timeout = Duration::from_millis(args.timeout_ms);
    let mut replies = Vec::new();
    for n in 0..args.count {
        let peer = peer.clone();
        replies.push(tokio::spawn(async move {
            peer.send_message(Message::Ping(n), Some(timeout)).await
        }));
    }

    for (n, reply) in replies.into_iter().enumerate() {
        match reply.await? {
            Ok(Message::Pong(echoed)) => info!(sent = n, echoed, "got pong"),
            Ok(Message::Ping(_)) => return Err(anyhow!("server replied with a Ping")),
            Err(e) => return Err(anyhow!(e)),
        }
    }

    peer.close().await;
    Ok(())
}
