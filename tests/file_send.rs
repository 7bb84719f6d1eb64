mod common;

use std::fs;
use std::time::{Duration, Instant};

use btlink_monitor_lib::device::DeviceError;
use btlink_monitor_lib::{LinkOptions, LinkSession};
use common::MockConnector;
use tempfile::TempDir;

async fn connected() -> (MockConnector, LinkSession) {
    let connector = MockConnector::new();
    let session = LinkSession::new(connector.clone(), LinkOptions::immediate());
    session.connect("simulated-port", 9600).await.unwrap();
    (connector, session)
}

#[tokio::test]
async fn test_file_lines_sent_in_order_skipping_blanks() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("message.txt");
    fs::write(&path, "Hello\n\n  second line  \r\n   \nGET_DATA\n").unwrap();

    let (connector, session) = connected().await;
    let sent = session.commands().send_file(&path, Duration::ZERO).await.unwrap();

    assert_eq!(sent, 3);
    assert_eq!(
        connector.port().written_lines(),
        vec!["CONNECT", "Hello", "second line", "GET_DATA"]
    );
    session.disconnect().await;
}

#[tokio::test]
async fn test_file_lines_are_paced() {
    let (connector, session) = connected().await;

    let started = Instant::now();
    let sent = session
        .commands()
        .send_script("one\ntwo\nthree\n", Duration::from_millis(30))
        .await;

    assert_eq!(sent, 3);
    assert!(started.elapsed() >= Duration::from_millis(60));
    assert_eq!(connector.port().written_lines(), vec!["CONNECT", "one", "two", "three"]);
    session.disconnect().await;
}

#[tokio::test]
async fn test_missing_file_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let (connector, session) = connected().await;

    let err = session
        .commands()
        .send_file(dir.path().join("absent.txt"), Duration::ZERO)
        .await
        .unwrap_err();

    assert!(matches!(err, DeviceError::IoError(_)));
    assert_eq!(connector.port().written(), "CONNECT\n");
    session.disconnect().await;
}
