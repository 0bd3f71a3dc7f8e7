use anyhow::Result;
use clap::Parser;
use rpcmux::{
    BincodeCodec, Connection, RequestHandler, RpcError, Server, ServerPeer, TcpConnection,
    TokioReactor,
};
use rpcmux_demo::Message;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
struct Args {
    /// Address to bind the listener on.
    #[arg(long, default_value = "127.0.0.1")]
    addr: String,

    /// Port to bind the listener on.
    #[arg(long, default_value_t = 7878)]
    port: u16,

    /// Listen backlog.
    #[arg(long, default_value_t = 1024)]
    backlog: u32,
}

struct Pong;

#[async_trait::async_trait]
impl RequestHandler<Message> for Pong {
    async fn handle_request(
        &self,
        message: Message,
        channel: i32,
        connection: &dyn Connection,
    ) -> rpcmux_std::Result<Message> {
        match message {
            Message::Ping(n) => {
                info!(
                    channel,
                    n,
                    host = connection.host(),
                    port = connection.port(),
                    "answering ping"
                );
                Ok(Message::Pong(n))
            }
            Message::Pong(_) => Err(RpcError::HandlerFailure(
                "server does not expect a Pong request".into(),
            )),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let handler = Arc::new(Pong);

    let server = Server::start(
        TokioReactor,
        &args.addr,
        args.port,
        args.backlog,
        BincodeCodec::<Message>::default,
        handler,
        |peer: ServerPeer<TcpConnection, BincodeCodec<Message>, Message, Pong>| {
            info!(
                host = peer.host(),
                port = peer.port(),
                "accepted connection"
            );
        },
    )
    .await?;

    info!(addr = %args.addr, port = args.port, "listening");
    let _ = server.reactor();

    tokio::signal::ctrl_c().await?;
    Ok(())
}
