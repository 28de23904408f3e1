//! End-to-end test driving a real TCP client against the acceptor, with the
//! cluster itself mocked by an in-process axum server.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::Router as AxumRouter;
use robustirc_bridge::acceptor;
use robustirc_bridge::registry::ServerRegistry;
use robustirc_bridge::router::Router;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};

#[derive(Clone, Default)]
struct MockCluster {
    posted: Arc<Mutex<Vec<String>>>,
    deleted: Arc<Mutex<Option<String>>>,
    stream_calls: Arc<AtomicUsize>,
}

async fn spawn_mock_cluster(state: MockCluster) -> String {
    let app = AxumRouter::new()
        .route(
            "/robustirc/v1/session",
            post(|| async { r#"{"Sessionid":"sess-1","Prefix":"bridge!b@h"}"# }),
        )
        .route(
            "/robustirc/v1/{sid}/message",
            post(
                |Path(_sid): Path<String>, State(state): State<MockCluster>, body: String| async move {
                    state.posted.lock().await.push(body);
                    StatusCode::OK
                },
            ),
        )
        .route(
            "/robustirc/v1/{sid}/messages",
            get(|State(state): State<MockCluster>| async move {
                let call = state.stream_calls.fetch_add(1, Ordering::SeqCst);
                if call == 0 {
                    r#"{"Id":1,"Type":"IRCToClient","Data":":srv PRIVMSG #x :hello\r\n"}"#
                        .to_owned()
                } else {
                    // Further polls never resolve within the test's lifetime;
                    // the connection is torn down before this matters.
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }),
        )
        .route(
            "/robustirc/v1/{sid}",
            delete(
                |Path(_sid): Path<String>, State(state): State<MockCluster>, body: String| async move {
                    *state.deleted.lock().await = Some(body);
                    StatusCode::OK
                },
            ),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr.to_string()
}

#[tokio::test]
async fn relays_client_lines_and_pushes_cluster_messages() {
    let state = MockCluster::default();
    let cluster_addr = spawn_mock_cluster(state.clone()).await;

    let registry = Arc::new(ServerRegistry::new(vec![cluster_addr]));
    let router = Arc::new(Router::new(registry.clone()));

    let bridge_addr: std::net::SocketAddr = "127.0.0.1:18972".parse().unwrap();
    let bridge_router = router.clone();
    let bridge_registry = registry.clone();
    tokio::spawn(async move {
        acceptor::run(bridge_addr, bridge_router, bridge_registry)
            .await
            .unwrap();
    });

    // Give the acceptor a moment to bind.
    let mut client = connect_retrying(bridge_addr).await;

    client
        .write_all(b"PRIVMSG #x :hi there\r\n")
        .await
        .unwrap();

    let mut reader = BufReader::new(&mut client);
    let mut pushed = String::new();
    timeout(Duration::from_secs(2), reader.read_line(&mut pushed))
        .await
        .expect("timed out waiting for pushed line")
        .unwrap();
    assert!(pushed.contains("PRIVMSG #x :hello"));

    client.write_all(b"QUIT :done here\r\n").await.unwrap();

    timeout(Duration::from_secs(2), async {
        loop {
            if state.deleted.lock().await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session was never deleted");

    let posted = state.posted.lock().await;
    assert!(posted.iter().any(|p| p.contains("PRIVMSG #x :hi there")));

    let deleted = state.deleted.lock().await.clone().unwrap();
    assert!(deleted.contains("done here"));
}

async fn connect_retrying(addr: std::net::SocketAddr) -> TcpStream {
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(addr).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("could not connect to bridge listener");
}
