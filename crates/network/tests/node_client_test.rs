use algocash_net::{Config, NetError, NodeClient};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_test::assert_ok;

/// Serves exactly one canned HTTP response and returns the raw request it received.
async fn serve_once(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let n = socket.read(&mut buf).await.unwrap();
        let response = format!(
            "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&buf[..n]).to_string()
    });
    (format!("http://{}", addr), handle)
}

#[tokio::test]
async fn test_status_request_and_parse() {
    let (url, server) = serve_once("HTTP/1.1 200 OK", r#"{"last-round": 1234}"#).await;
    let client = NodeClient::new(Config::default().with_node_url(&url).with_api_token("secret")).unwrap();

    let status = client.status().await.unwrap();
    assert_eq!(status.last_round, 1234);

    let request = server.await.unwrap();
    assert!(request.starts_with("GET /v2/status"));
    assert!(request.to_lowercase().contains("x-ledger-api-token: secret"));
}

#[tokio::test]
async fn test_account_balance_parse() {
    let (url, _server) = serve_once(
        "HTTP/1.1 200 OK",
        r#"{"address": "POOL", "amount": 13000000}"#,
    )
    .await;
    let client = NodeClient::new(Config::default().with_node_url(&url)).unwrap();

    let account = assert_ok!(client.account("POOL").await);
    assert_eq!(account.amount, 13_000_000);
}

#[tokio::test]
async fn test_non_success_status_surfaces_body() {
    let (url, _server) = serve_once("HTTP/1.1 404 Not Found", r#"{"message": "no such app"}"#).await;
    let client = NodeClient::new(Config::default().with_node_url(&url)).unwrap();

    match client.application_state(99).await {
        Err(NetError::Status { status, body }) => {
            assert_eq!(status, 404);
            assert!(body.contains("no such app"));
        }
        other => panic!("expected status error, got {:?}", other.map(|s| s.app_id)),
    }
}

#[tokio::test]
async fn test_refused_connection_is_transient() {
    // Bind then drop to obtain a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = NodeClient::new(
        Config::default()
            .with_node_url(&format!("http://{}", addr))
            .with_timeout(2),
    )
    .unwrap();

    let err = client.status().await.unwrap_err();
    assert!(err.is_transient(), "unexpected error kind: {}", err);
}
