//! Bounceback Client End-to-End Tests
//!
//! Each test starts a one-connection WebSocket server on an ephemeral port
//! with a scripted behaviour, then runs a single iteration against it.

use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use ws_bounceback_client::connection::InboundHandler;
use ws_bounceback_client::events::EventCategory;
use ws_bounceback_client::protocol::{self, EnvelopeParts};
use ws_bounceback_client::{
    BouncebackClient, ChannelSink, Config, Connection, IterationOutcome, MeasurementEvent,
};

const PATH: &str = "/messages/listen";

type ServerStream = WebSocketStream<TcpStream>;

/// Accept one connection, record its X-User-Id header and hand it to `behaviour`
async fn serve_once<F, Fut>(behaviour: F) -> (String, Arc<Mutex<Option<String>>>, JoinHandle<()>)
where
    F: FnOnce(ServerStream) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let host = format!("ws://{}", listener.local_addr().unwrap());
    let user_header = Arc::new(Mutex::new(None));

    let seen = Arc::clone(&user_header);
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_hdr_async(stream, move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            *seen.lock().unwrap() = req
                .headers()
                .get("X-User-Id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            Ok(resp)
        })
        .await
        .unwrap();
        behaviour(ws).await;
    });

    (host, user_header, handle)
}

/// Read frames until the client's tagged request arrives
async fn read_request(ws: &mut ServerStream) -> EnvelopeParts {
    while let Some(Ok(msg)) = ws.next().await {
        if let Message::Text(text) = msg {
            return protocol::parse_frame(&text).expect("client sent an invalid envelope");
        }
    }
    panic!("connection ended before a request arrived");
}

fn broadcast(request_id: &str, issued_at_ns: u64, body: &str) -> Message {
    Message::Text(
        serde_json::json!({
            "id": 1,
            "type": 1,
            "message": format!("{}__{}__{}", request_id, issued_at_ns, body),
            "user": { "id": 1000, "is_me": true },
        })
        .to_string(),
    )
}

/// Keep the socket serviced until the client goes away
async fn drain(ws: &mut ServerStream) {
    while let Some(Ok(_)) = ws.next().await {}
}

fn client(host: String) -> (BouncebackClient, UnboundedReceiver<MeasurementEvent>) {
    let config = Config {
        host,
        poll_interval_ms: 10,
        ..Default::default()
    };
    let (sink, rx) = ChannelSink::new();
    (BouncebackClient::new(&config, Arc::new(sink)), rx)
}

fn events(rx: &mut UnboundedReceiver<MeasurementEvent>) -> Vec<MeasurementEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_matching_reply_is_measured() {
    let (host, user_header, server) = serve_once(|mut ws| async move {
        let request = read_request(&mut ws).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        ws.send(broadcast(&request.request_id, request.issued_at_ns, "pong"))
            .await
            .unwrap();
        drain(&mut ws).await;
    })
    .await;

    let (mut client, mut rx) = client(host);
    let outcome = client.run_iteration(PATH, "ping", 10).await.unwrap();

    assert_eq!(outcome, IterationOutcome::Matched);
    let events = events(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].category, EventCategory::ResponseReceived);
    assert_eq!(events[0].name, "pong");
    assert!(events[0].elapsed_ms >= 50.0, "elapsed {}", events[0].elapsed_ms);
    assert!(events[0].elapsed_ms < 1000.0, "elapsed {}", events[0].elapsed_ms);
    assert_eq!(events[0].context.user_id, "1000");
    assert_eq!(user_header.lock().unwrap().as_deref(), Some("1000"));

    server.await.unwrap();
}

#[tokio::test]
async fn test_unrelated_traffic_is_skipped() {
    let (host, _, server) = serve_once(|mut ws| async move {
        let request = read_request(&mut ws).await;
        ws.send(Message::Text(String::new())).await.unwrap();
        ws.send(Message::Ping(vec![1, 2, 3])).await.unwrap();
        ws.send(Message::Text("not json".into())).await.unwrap();
        ws.send(Message::Text(r#"{"type":1}"#.into())).await.unwrap();
        ws.send(Message::Text(r#"{"message":"a__b"}"#.into())).await.unwrap();
        ws.send(broadcast(&protocol::generate_request_id(), 1, "someone else"))
            .await
            .unwrap();
        ws.send(broadcast(&request.request_id, request.issued_at_ns, "pong"))
            .await
            .unwrap();
        drain(&mut ws).await;
    })
    .await;

    let (mut client, mut rx) = client(host);
    let outcome = client.run_iteration(PATH, "ping", 10).await.unwrap();

    assert_eq!(outcome, IterationOutcome::Matched);
    let events = events(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "pong");

    server.await.unwrap();
}

#[tokio::test]
async fn test_stale_reply_times_out_with_one_event() {
    let (host, _, server) = serve_once(|mut ws| async move {
        let request = read_request(&mut ws).await;
        let stale = protocol::generate_request_id();
        ws.send(broadcast(&stale, request.issued_at_ns, "pong"))
            .await
            .unwrap();
        drain(&mut ws).await;
    })
    .await;

    let (mut client, mut rx) = client(host);
    let started = Instant::now();
    let outcome = client.run_iteration(PATH, "ping", 1).await.unwrap();

    assert_eq!(outcome, IterationOutcome::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(5));
    let events = events(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].category, EventCategory::ResponseReceived);
    assert_eq!(events[0].name, "ping");
    assert_eq!(events[0].byte_length, "ping".len());
    assert!(events[0].failure.is_none());
    assert!(events[0].elapsed_ms >= 1000.0, "elapsed {}", events[0].elapsed_ms);
    assert!(events[0].elapsed_ms < 3000.0, "elapsed {}", events[0].elapsed_ms);

    server.await.unwrap();
}

#[tokio::test]
async fn test_dropped_connection_ends_wait_without_event() {
    let (host, _, server) = serve_once(|mut ws| async move {
        read_request(&mut ws).await;
        ws.close(None).await.unwrap();
        drain(&mut ws).await;
    })
    .await;

    let (mut client, mut rx) = client(host);
    let started = Instant::now();
    let outcome = client.run_iteration(PATH, "ping", 10).await.unwrap();

    assert_eq!(outcome, IterationOutcome::ConnectionLost);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(events(&mut rx).is_empty());
    assert!(!client.tracker().is_accepted());
    assert!(!client.tracker().expire());

    server.await.unwrap();
}

#[tokio::test]
async fn test_reply_followed_by_close_counts_as_matched() {
    const RUNS: usize = 20;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let host = format!("ws://{}", listener.local_addr().unwrap());
    let server = tokio::spawn(async move {
        for _ in 0..RUNS {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let request = read_request(&mut ws).await;
            ws.send(broadcast(&request.request_id, request.issued_at_ns, "pong"))
                .await
                .unwrap();
            // Close straight after the reply; the client may see both in one poll.
            let _ = ws.close(None).await;
            drain(&mut ws).await;
        }
    });

    let (mut client, mut rx) = client(host);
    for _ in 0..RUNS {
        let outcome = client.run_iteration(PATH, "ping", 5).await.unwrap();
        // The reply is handled before the close frame, so it always wins.
        assert_eq!(outcome, IterationOutcome::Matched);
        assert_eq!(events(&mut rx).len(), 1);
    }

    server.await.unwrap();
}

#[tokio::test]
async fn test_connect_failure_reports_failure_event() {
    // Reserve a port, then free it so nothing is listening there.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let host = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let (mut client, mut rx) = client(host);
    let result = client.run_iteration(PATH, "ping", 1).await;

    assert!(result.is_err());
    let events = events(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].category, EventCategory::ConnectFailed);
    assert!(events[0].failure.is_some());
}

#[tokio::test]
async fn test_client_is_reusable_across_iterations() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let host = format!("ws://{}", listener.local_addr().unwrap());
    let server = tokio::spawn(async move {
        for _ in 0..2 {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let request = read_request(&mut ws).await;
            ws.send(broadcast(&request.request_id, request.issued_at_ns, "pong"))
                .await
                .unwrap();
            drain(&mut ws).await;
        }
    });

    let (mut client, mut rx) = client(host);
    assert_eq!(client.run_iteration(PATH, "ping", 5).await.unwrap(), IterationOutcome::Matched);
    assert_eq!(client.run_iteration(PATH, "ping", 5).await.unwrap(), IterationOutcome::Matched);
    assert_eq!(events(&mut rx).len(), 2);

    server.await.unwrap();
}

struct Collect(Mutex<Vec<String>>);

impl InboundHandler for Collect {
    fn on_inbound(&self, frame: &str) {
        self.0.lock().unwrap().push(frame.to_string());
    }
}

#[tokio::test]
async fn test_connection_forwards_frames_and_closes_idempotently() {
    let (host, _, server) = serve_once(|mut ws| async move {
        ws.send(Message::Text(String::new())).await.unwrap();
        ws.send(Message::Text("hello".into())).await.unwrap();
        ws.send(Message::Binary(b"bytes".to_vec())).await.unwrap();
        drain(&mut ws).await;
    })
    .await;

    let collect = Arc::new(Collect(Mutex::new(Vec::new())));
    let handler: Arc<dyn InboundHandler> = collect.clone();
    let mut conn = Connection::open(&format!("{}{}", host, PATH), &[], handler)
        .await
        .unwrap();
    assert!(conn.is_open());

    for _ in 0..100 {
        if collect.0.lock().unwrap().len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(*collect.0.lock().unwrap(), vec!["hello".to_string(), "bytes".to_string()]);

    conn.close().await;
    assert!(!conn.is_open());
    conn.close().await;
    assert!(!conn.is_open());
    assert!(conn.send_text("late".into()).await.is_err());

    server.await.unwrap();
}
