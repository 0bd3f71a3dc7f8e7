use async_trait::async_trait;
use bytes::Bytes;
use rpcmux::{ClientPeer, Connection, PeerState, RequestHandler, RpcError, ServerPeer};
use rpcmux_protocol::BincodeCodec;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{split, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Msg {
    Req(String),
    Resp(String),
}

/// An in-process connection over a `tokio::io::duplex` pipe, standing in
/// for a real socket so these tests run without touching the network.
struct DuplexConnection {
    read_half: Mutex<ReadHalf<tokio::io::DuplexStream>>,
    write_half: Mutex<WriteHalf<tokio::io::DuplexStream>>,
}

impl DuplexConnection {
    fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (ar, aw) = split(a);
        let (br, bw) = split(b);
        (
            Self {
                read_half: Mutex::new(ar),
                write_half: Mutex::new(aw),
            },
            Self {
                read_half: Mutex::new(br),
                write_half: Mutex::new(bw),
            },
        )
    }
}

#[async_trait]
impl Connection for DuplexConnection {
    fn host(&self) -> &str {
        "local"
    }

    fn port(&self) -> u16 {
        0
    }

    async fn write(&self, bytes: Bytes) -> std::io::Result<()> {
        self.write_half.lock().await.write_all(&bytes).await
    }

    async fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.read_half.lock().await.read(buf).await
    }

    async fn shutdown(&self) {
        let _ = self.write_half.lock().await.shutdown().await;
    }
}

/// Replies with `Resp(n)` for every `Req(n)`, in the order requests are
/// handed to it, after an optional artificial delay — lets tests control
/// response ordering to exercise multiplexing and queueing.
struct ScriptedHandler {
    delay: Duration,
    never_respond: bool,
}

#[async_trait]
impl RequestHandler<Msg> for ScriptedHandler {
    async fn handle_request(
        &self,
        message: Msg,
        _channel: i32,
        _connection: &dyn Connection,
    ) -> rpcmux_std::Result<Msg> {
        if self.never_respond {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.delay).await;
        match message {
            Msg::Req(s) => Ok(Msg::Resp(s)),
            Msg::Resp(_) => Err(RpcError::HandlerFailure("unexpected Resp".into())),
        }
    }
}

fn spawn_server(conn: DuplexConnection, handler: ScriptedHandler) {
    let handler = Arc::new(handler);
    let peer = ServerPeer::new(conn, BincodeCodec::<Msg>::default(), handler);
    // keep the peer alive for the duration of the test by leaking the
    // handle into a background task that just waits on close.
    tokio::spawn(async move {
        loop {
            if peer.state() == PeerState::Closed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });
}

#[tokio::test]
async fn s1_basic_round_trip() {
    let (client_conn, server_conn) = DuplexConnection::pair();
    spawn_server(
        server_conn,
        ScriptedHandler {
            delay: Duration::ZERO,
            never_respond: false,
        },
    );

    let client = ClientPeer::new(client_conn, BincodeCodec::<Msg>::default(), 4).unwrap();
    let response = client
        .send_message(Msg::Req("ping".into()), Some(Duration::from_secs(1)))
        .await
        .unwrap();

    assert_eq!(response, Msg::Resp("ping".into()));
}

#[tokio::test]
async fn s2_multiplexing_and_queueing() {
    // A handler that holds each response until the test explicitly
    // releases it by name, so the "b" answers before "a", then "a", then
    // "c" ordering is deterministic rather than timing-dependent.
    use std::collections::HashMap;
    use tokio::sync::oneshot as gate;

    struct GatedHandler {
        gates: Mutex<HashMap<String, gate::Receiver<()>>>,
    }

    #[async_trait]
    impl RequestHandler<Msg> for GatedHandler {
        async fn handle_request(
            &self,
            message: Msg,
            _channel: i32,
            _connection: &dyn Connection,
        ) -> rpcmux_std::Result<Msg> {
            let Msg::Req(s) = message else {
                return Err(RpcError::HandlerFailure("unexpected Resp".into()));
            };
            let rx = self.gates.lock().await.remove(&s);
            if let Some(rx) = rx {
                let _ = rx.await;
            }
            Ok(Msg::Resp(s))
        }
    }

    let (client_conn, server_conn) = DuplexConnection::pair();

    let mut gates = HashMap::new();
    let (a_tx, a_rx) = gate::channel();
    let (b_tx, b_rx) = gate::channel();
    let (c_tx, c_rx) = gate::channel();
    gates.insert("a".to_string(), a_rx);
    gates.insert("b".to_string(), b_rx);
    gates.insert("c".to_string(), c_rx);

    let handler = Arc::new(GatedHandler {
        gates: Mutex::new(gates),
    });
    let server = ServerPeer::new(server_conn, BincodeCodec::<Msg>::default(), handler);
    tokio::spawn(async move {
        loop {
            if server.state() == PeerState::Closed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    let client = ClientPeer::new(client_conn, BincodeCodec::<Msg>::default(), 2).unwrap();

    let a = client.clone();
    let fa = tokio::spawn(async move {
        a.send_message(Msg::Req("a".into()), Some(Duration::from_secs(2)))
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let b = client.clone();
    let fb = tokio::spawn(async move {
        b.send_message(Msg::Req("b".into()), Some(Duration::from_secs(2)))
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Both channels are now taken; this one queues.
    assert_eq!(client.outstanding_channels(), 2);
    let c = client.clone();
    let fc = tokio::spawn(async move {
        c.send_message(Msg::Req("c".into()), Some(Duration::from_secs(2)))
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.queue_len(), 1);

    // Release "b" first: its response lands while "a" is still in flight,
    // freeing its channel for "c" to flush onto.
    let _ = b_tx.send(());
    assert_eq!(fb.await.unwrap().unwrap(), Msg::Resp("b".into()));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.queue_len(), 0);
    assert_eq!(client.outstanding_channels(), 2);

    let _ = a_tx.send(());
    assert_eq!(fa.await.unwrap().unwrap(), Msg::Resp("a".into()));

    let _ = c_tx.send(());
    assert_eq!(fc.await.unwrap().unwrap(), Msg::Resp("c".into()));
}

#[tokio::test]
async fn s3_timeout_keeps_channel_reserved_and_second_request_queues() {
    let (client_conn, server_conn) = DuplexConnection::pair();
    spawn_server(
        server_conn,
        ScriptedHandler {
            delay: Duration::ZERO,
            never_respond: true,
        },
    );

    let client = ClientPeer::new(client_conn, BincodeCodec::<Msg>::default(), 1).unwrap();

    let slow = client.clone();
    let slow_fut = tokio::spawn(async move {
        slow.send_message(Msg::Req("slow".into()), Some(Duration::from_millis(50)))
            .await
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(client.outstanding_channels(), 1);

    let second = client.clone();
    let second_fut = tokio::spawn(async move {
        second
            .send_message(Msg::Req("second".into()), Some(Duration::from_secs(1)))
            .await
    });
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(client.queue_len(), 1);

    assert!(matches!(slow_fut.await.unwrap(), Err(RpcError::Timeout)));

    // The timed-out request's channel is never freed by the timeout path
    // itself, so the queued request is still waiting behind it.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.outstanding_channels(), 1);
    assert_eq!(client.queue_len(), 1);

    drop(second_fut);
}

#[tokio::test]
async fn s4_close_mid_flight_fails_every_outstanding_future_exactly_once() {
    let (client_conn, server_conn) = DuplexConnection::pair();
    spawn_server(
        server_conn,
        ScriptedHandler {
            delay: Duration::ZERO,
            never_respond: true,
        },
    );

    let client = ClientPeer::new(client_conn, BincodeCodec::<Msg>::default(), 4).unwrap();

    let fire_count = Arc::new(AtomicUsize::new(0));
    let counter = fire_count.clone();
    client.on_closed(move |_cause| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut futs = Vec::new();
    for i in 0..3 {
        let peer = client.clone();
        futs.push(tokio::spawn(async move {
            peer.send_message(Msg::Req(format!("req-{i}")), Some(Duration::from_secs(5)))
                .await
        }));
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(client.outstanding_channels(), 3);

    client.close().await;

    for fut in futs {
        assert!(matches!(
            fut.await.unwrap(),
            Err(RpcError::ConnectionClosed)
        ));
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(fire_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn s5_recoding_path_rewrites_channel_without_reencoding() {
    let (client_conn, server_conn) = DuplexConnection::pair();
    spawn_server(
        server_conn,
        ScriptedHandler {
            delay: Duration::from_millis(300),
            never_respond: false,
        },
    );

    let client = ClientPeer::new(client_conn, BincodeCodec::<Msg>::default(), 1).unwrap();

    let first = client.clone();
    let first_fut = tokio::spawn(async move {
        first
            .send_message(Msg::Req("first".into()), Some(Duration::from_secs(2)))
            .await
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = client.clone();
    let second_fut = tokio::spawn(async move {
        second
            .send_message(Msg::Req("second".into()), Some(Duration::from_secs(2)))
            .await
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(client.queue_len(), 1);

    assert_eq!(first_fut.await.unwrap().unwrap(), Msg::Resp("first".into()));
    assert_eq!(
        second_fut.await.unwrap().unwrap(),
        Msg::Resp("second".into())
    );
}

#[tokio::test]
async fn s6_construction_guard_rejects_oversized_channel_table() {
    let (client_conn, _server_conn) = DuplexConnection::pair();
    let err = ClientPeer::new(client_conn, BincodeCodec::<Msg>::default(), (1 << 15) + 1)
        .err()
        .expect("construction must fail synchronously");

    assert!(matches!(err, RpcError::ChannelTable(_)));
}

#[tokio::test]
async fn handle_closed_fails_queued_requests_too() {
    let (client_conn, server_conn) = DuplexConnection::pair();
    spawn_server(
        server_conn,
        ScriptedHandler {
            delay: Duration::ZERO,
            never_respond: true,
        },
    );

    let client = ClientPeer::new(client_conn, BincodeCodec::<Msg>::default(), 1).unwrap();

    let occupying = client.clone();
    let occupying_fut = tokio::spawn(async move {
        occupying
            .send_message(Msg::Req("occupy".into()), Some(Duration::from_secs(5)))
            .await
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let queued = client.clone();
    let queued_fut = tokio::spawn(async move {
        queued
            .send_message(Msg::Req("queued".into()), Some(Duration::from_secs(5)))
            .await
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(client.queue_len(), 1);

    client.close().await;

    assert!(matches!(
        occupying_fut.await.unwrap(),
        Err(RpcError::ConnectionClosed)
    ));
    assert!(matches!(
        queued_fut.await.unwrap(),
        Err(RpcError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn server_never_reopens_channel_until_client_responds_are_drained() {
    // Sanity check that concurrent requests on distinct channels do not
    // block one another on the server side.
    struct ConcurrentHandler {
        started: Arc<(tokio::sync::Notify, AtomicUsize)>,
    }

    #[async_trait]
    impl RequestHandler<Msg> for ConcurrentHandler {
        async fn handle_request(
            &self,
            message: Msg,
            _channel: i32,
            _connection: &dyn Connection,
        ) -> rpcmux_std::Result<Msg> {
            self.started.1.fetch_add(1, Ordering::SeqCst);
            self.started.0.notify_waiters();
            tokio::time::sleep(Duration::from_millis(50)).await;
            match message {
                Msg::Req(s) => Ok(Msg::Resp(s)),
                Msg::Resp(_) => unreachable!(),
            }
        }
    }

    let (client_conn, server_conn) = DuplexConnection::pair();
    let started = Arc::new((tokio::sync::Notify::new(), AtomicUsize::new(0)));
    let handler = Arc::new(ConcurrentHandler {
        started: started.clone(),
    });
    let server = ServerPeer::new(server_conn, BincodeCodec::<Msg>::default(), handler);
    tokio::spawn(async move {
        loop {
            if server.state() == PeerState::Closed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    let client = ClientPeer::new(client_conn, BincodeCodec::<Msg>::default(), 4).unwrap();
    let a = client.clone();
    let fa = tokio::spawn(async move {
        a.send_message(Msg::Req("x".into()), Some(Duration::from_secs(2)))
            .await
    });
    let b = client.clone();
    let fb = tokio::spawn(async move {
        b.send_message(Msg::Req("y".into()), Some(Duration::from_secs(2)))
            .await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(started.1.load(Ordering::SeqCst), 2);

    let (_, _) = (fa.await.unwrap(), fb.await.unwrap());
}

#[tokio::test]
async fn server_stop_drains_outstanding_connections_before_returning() {
    use rpcmux::{Client, Server, TokioReactor};

    struct EchoHandler;

    #[async_trait]
    impl RequestHandler<Msg> for EchoHandler {
        async fn handle_request(
            &self,
            message: Msg,
            _channel: i32,
            _connection: &dyn Connection,
        ) -> rpcmux_std::Result<Msg> {
            match message {
                Msg::Req(s) => Ok(Msg::Resp(s)),
                Msg::Resp(_) => unreachable!(),
            }
        }
    }

    let server = Server::start(
        TokioReactor,
        "127.0.0.1",
        18732,
        128,
        BincodeCodec::<Msg>::default,
        Arc::new(EchoHandler),
        |_peer| {},
    )
    .await
    .unwrap();

    let client = Client::new(TokioReactor);
    let peer = client
        .connect("127.0.0.1", 18732, BincodeCodec::<Msg>::default(), 4)
        .await
        .unwrap();

    let response = peer
        .send_message(Msg::Req("hello".into()), Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(response, Msg::Resp("hello".into()));

    // Give the server side a moment to register the accepted connection's
    // on_closed hook before the client closes it.
    tokio::time::sleep(Duration::from_millis(20)).await;
    peer.close().await;

    // stop() must resolve once the accepted connection has drained, not
    // hang waiting on a connection that already closed.
    tokio::time::timeout(Duration::from_secs(1), server.stop())
        .await
        .expect("server.stop() must not hang once connections have drained")
        .unwrap();
}
