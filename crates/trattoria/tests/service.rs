//! Service lifecycle tests.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use trattoria::config::{ConfigLoader, RecordBackend, TrattoriaConfig};
use trattoria::core::SystemClock;
use trattoria::server::{ServerError, ShutdownSignal};
use trattoria::Service;

async fn free_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

async fn post(addr: &str, path: &str, key: &str, body: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let raw = format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nIdempotency-Key: {key}\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8(response).unwrap()
}

#[tokio::test]
async fn test_invalid_address_fails_fast() {
    let mut config = TrattoriaConfig::default();
    config.server.http_addr = "nowhere".to_string();
    config.idempotency.backend = RecordBackend::Memory;

    let service = Service::from_config(&config, SystemClock::shared()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), service.run(ShutdownSignal::new()))
        .await
        .expect("service should return");
    assert!(matches!(result, Err(ServerError::InvalidAddress { .. })));
}

#[tokio::test]
async fn test_replay_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let database = dir.path().join("records.redb");
    let toml = format!(
        "[server]\nhttp_addr = \"{}\"\nshutdown_timeout_secs = 1\n\n\
         [idempotency]\ndatabase_path = \"{}\"\n",
        free_addr().await,
        database.display()
    );
    let config = ConfigLoader::new()
        .with_string(&toml, "toml")
        .unwrap()
        .load()
        .unwrap();
    let addr = config.server.http_addr.clone();

    let first = {
        let shutdown = ShutdownSignal::new();
        let service = Service::from_config(&config, SystemClock::shared()).unwrap();
        let running = tokio::spawn(service.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let response = post(&addr, "/pedidos", "pedido-42", r#"{"mesa":4}"#).await;
        shutdown.trigger();
        running.await.unwrap().unwrap();
        response
    };
    assert!(first.starts_with("HTTP/1.1 201"), "{}", first);
    assert!(!first.to_ascii_lowercase().contains("x-idempotent-replayed"));

    let shutdown = ShutdownSignal::new();
    let service = Service::from_config(&config, SystemClock::shared()).unwrap();
    let running = tokio::spawn(service.run(shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = post(&addr, "/pedidos", "pedido-42", r#"{"mesa":4}"#).await;
    shutdown.trigger();
    running.await.unwrap().unwrap();

    assert!(second.starts_with("HTTP/1.1 201"), "{}", second);
    assert!(second
        .to_ascii_lowercase()
        .contains("x-idempotent-replayed: true"));
    assert!(second.contains(r#""mesa":4"#));
}
