mod common;

use btlink_monitor_lib::device::DeviceError;
use btlink_monitor_lib::{DeviceCommand, LinkOptions, LinkSession, Thresholds};
use common::MockConnector;

async fn connected() -> (MockConnector, LinkSession) {
    let connector = MockConnector::new();
    let session = LinkSession::new(connector.clone(), LinkOptions::immediate());
    session.connect("simulated-port", 9600).await.unwrap();
    (connector, session)
}

#[tokio::test]
async fn test_request_data_writes_get_data() {
    let (connector, session) = connected().await;
    session.commands().request_data().await;
    assert_eq!(connector.port().written_lines(), vec!["CONNECT", "GET_DATA"]);
    session.disconnect().await;
}

#[tokio::test]
async fn test_set_thresholds_formats_decimals() {
    let (connector, session) = connected().await;
    let thresholds = Thresholds::new(18.0, 30.5, 30.0, 80.0).unwrap();

    session.commands().set_thresholds(&thresholds).await.unwrap();
    assert_eq!(
        connector.port().written_lines(),
        vec!["CONNECT", "SET_THRESHOLD,18.0,30.5,30.0,80.0"]
    );
    session.disconnect().await;
}

#[tokio::test]
async fn test_invalid_thresholds_write_nothing() {
    let (connector, session) = connected().await;
    let inverted = Thresholds { temp_min: 30.0, temp_max: 18.0, hum_min: 30.0, hum_max: 80.0 };

    let err = session.commands().set_thresholds(&inverted).await.unwrap_err();
    assert!(matches!(err, DeviceError::InvalidConfiguration(_)));
    assert_eq!(connector.port().written(), "CONNECT\n");
    session.disconnect().await;
}

#[tokio::test]
async fn test_raw_and_typed_commands() {
    let (connector, session) = connected().await;
    let commands = session.commands();
    commands.send_raw("Hello").await;
    commands.send(DeviceCommand::GetData).await;
    assert_eq!(
        connector.port().written_lines(),
        vec!["CONNECT", "Hello", "GET_DATA"]
    );
    session.disconnect().await;
}

#[tokio::test]
async fn test_ensure_connected_tracks_link() {
    let (_connector, session) = connected().await;
    assert!(session.commands().ensure_connected().is_ok());

    session.disconnect().await;
    assert!(matches!(
        session.commands().ensure_connected(),
        Err(DeviceError::NotConnected)
    ));
}
