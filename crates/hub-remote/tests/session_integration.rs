//! End-to-end tests: dispatcher → protocol session → simulated hub.
//!
//! Runs the same wiring as the binary, with the simulated hub standing in
//! for Bluetooth hardware and scripted keys standing in for the terminal.

use std::sync::Arc;
use std::time::Duration;

use hub_core::{InformationKind, Port, Speed};
use hub_remote::application::dispatch_command::{CommandDispatcher, DriveSettings, HubLink};
use hub_remote::infrastructure::keyboard::mock::ScriptedKeys;
use hub_remote::infrastructure::keyboard::KeySource;
use hub_remote::infrastructure::network::connection_manager::{
    ConnectError, ConnectionConfig, ConnectionManager,
};
use hub_remote::infrastructure::network::hub_session::{spawn_session, SessionConfig};
use hub_remote::infrastructure::network::retry::RetryPolicy;
use hub_remote::infrastructure::transport::simulated::{SimulatedAdapter, SimulatedHub};
use hub_remote::infrastructure::transport::TransportError;
use hub_remote::runner::{self, ProbeRequest, RunError, SessionEnd};
use uuid::Uuid;

fn characteristic() -> Uuid {
    Uuid::parse_str("00001624-1212-efde-1623-785feabcd123").unwrap()
}

fn session_config() -> SessionConfig {
    SessionConfig {
        characteristic: characteristic(),
        io_timeout: Duration::from_millis(500),
        retry: RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        },
        reply_timeout: Duration::from_millis(500),
        strict_replies: false,
    }
}

fn drive_settings() -> DriveSettings {
    DriveSettings {
        steering_pulse: Duration::from_millis(1),
        ..DriveSettings::default()
    }
}

async fn connect(hub: &SimulatedHub, failures: u32) -> Box<dyn hub_remote::infrastructure::transport::HubTransport> {
    let adapter = SimulatedAdapter::new(hub.clone(), failures);
    let manager = ConnectionManager::new(ConnectionConfig {
        max_attempts: 5,
        retry_delay: Duration::ZERO,
    });
    match manager.connect(&adapter, "90:84:2B:4C:84:8A".parse().unwrap()).await {
        Ok(transport) => transport,
        Err(e) => panic!("connect failed: {e}"),
    }
}

#[tokio::test]
async fn test_keystrokes_reach_the_hub_as_motor_frames() {
    // Arrange
    let hub = SimulatedHub::new(characteristic());
    let transport = connect(&hub, 0).await;
    let (session, mut events) = spawn_session(transport, session_config());
    let link: Arc<dyn HubLink> = Arc::new(session.clone());
    let mut dispatcher = CommandDispatcher::new(drive_settings(), link);
    let keys = ScriptedKeys::new(*b"wwaq");
    let mut key_rx = keys.start().unwrap();

    // Act
    let end = runner::drive(&mut dispatcher, &mut key_rx, &mut events, std::future::pending())
        .await
        .unwrap();
    session.shutdown().await;

    // Assert
    assert_eq!(end, SessionEnd::Quit);
    let writes = hub.writes();
    assert_eq!(
        writes,
        vec![
            vec![8, 0, 0x81, 0, 0x11, 0x51, 0, Speed::clamped(10).to_wire()],
            vec![8, 0, 0x81, 1, 0x11, 0x51, 0, Speed::clamped(10).to_wire()],
            vec![8, 0, 0x81, 0, 0x11, 0x51, 0, Speed::clamped(20).to_wire()],
            vec![8, 0, 0x81, 1, 0x11, 0x51, 0, Speed::clamped(20).to_wire()],
            vec![8, 0, 0x81, 2, 0x11, 0x51, 0, Speed::clamped(20).to_wire()],
            vec![8, 0, 0x81, 2, 0x11, 0x51, 0, 0x00],
        ]
    );
    assert_eq!(hub.read_count(), 0, "motor commands never trigger reads");
    assert!(hub.is_disconnected());
}

#[tokio::test]
async fn test_connection_succeeds_on_fifth_attempt() {
    let hub = SimulatedHub::new(characteristic());
    let adapter = SimulatedAdapter::new(hub, 4);
    let manager = ConnectionManager::new(ConnectionConfig {
        max_attempts: 5,
        retry_delay: Duration::ZERO,
    });

    let result = manager.connect(&adapter, "90:84:2B:4C:84:8A".parse().unwrap()).await;

    assert!(result.is_ok());
    assert_eq!(adapter.attempts(), 5);
}

#[tokio::test]
async fn test_unreachable_hub_exhausts_attempts() {
    let adapter = SimulatedAdapter::new(SimulatedHub::new(characteristic()), u32::MAX);
    let manager = ConnectionManager::new(ConnectionConfig {
        max_attempts: 5,
        retry_delay: Duration::ZERO,
    });

    let result = manager.connect(&adapter, "90:84:2B:4C:84:8A".parse().unwrap()).await;

    assert!(matches!(result, Err(ConnectError::RetriesExhausted { attempts: 5, .. })));
}

#[tokio::test]
async fn test_probe_collects_one_reply_per_request() {
    // Arrange
    let hub = SimulatedHub::new(characteristic());
    let transport = connect(&hub, 0).await;
    let (session, mut events) = spawn_session(transport, session_config());
    let request = ProbeRequest {
        port: Port(2),
        kind: InformationKind::Raw,
        subscribe: true,
    };

    // Act
    let replies = runner::probe(&session, &mut events, request, Duration::from_secs(1))
        .await
        .unwrap();
    session.shutdown().await;

    // Assert
    assert_eq!(replies.len(), 3);
    assert_eq!(hub.read_count(), 3, "one read per reply-expecting write");
    let sent: Vec<u8> = hub.writes().iter().map(|w| w[2]).collect();
    assert_eq!(sent, vec![0x21, 0x22, 0x41]);
    assert_eq!(hub.writes()[1], vec![6, 0, 0x22, 2, 0, 0x01]);
    for reply in &replies {
        assert_eq!(reply.as_bytes()[3], 2, "reply names the probed port");
    }
}

#[tokio::test]
async fn test_undersized_reply_is_skipped_by_default() {
    let hub = SimulatedHub::new(characteristic());
    hub.push_reply(vec![0x02, 0x00]);
    let transport = connect(&hub, 0).await;
    let (session, mut events) = spawn_session(transport, session_config());
    let request = ProbeRequest {
        port: Port(0),
        kind: InformationKind::Name,
        subscribe: false,
    };

    let replies = runner::probe(&session, &mut events, request, Duration::from_secs(1))
        .await
        .unwrap();
    session.shutdown().await;

    assert_eq!(replies.len(), 1, "the short reply is dropped, the second one kept");
}

#[tokio::test]
async fn test_undersized_reply_is_fatal_in_strict_mode() {
    let hub = SimulatedHub::new(characteristic());
    hub.push_reply(vec![0x01]);
    let transport = connect(&hub, 0).await;
    let config = SessionConfig {
        strict_replies: true,
        ..session_config()
    };
    let (session, mut events) = spawn_session(transport, config);
    let request = ProbeRequest {
        port: Port(0),
        kind: InformationKind::Name,
        subscribe: false,
    };

    let result = runner::probe(&session, &mut events, request, Duration::from_secs(1)).await;
    session.shutdown().await;

    assert!(matches!(result, Err(RunError::InvalidReply(_))));
}

#[tokio::test]
async fn test_transient_write_failures_are_retried_transparently() {
    let hub = SimulatedHub::new(characteristic());
    hub.fail_next_write(TransportError::Disconnected);
    hub.fail_next_write(TransportError::TimedOut {
        op: "write",
        after: Duration::from_millis(1),
    });
    let transport = connect(&hub, 0).await;
    let (session, _events) = spawn_session(transport, session_config());
    let link: Arc<dyn HubLink> = Arc::new(session.clone());
    let mut dispatcher = CommandDispatcher::new(drive_settings(), link);

    dispatcher.handle_key(b'b').await.unwrap();
    session.shutdown().await;

    assert_eq!(hub.writes().len(), 2, "both drive ports received the brake frame");
}

#[tokio::test]
async fn test_wrong_characteristic_fails_without_retry() {
    // Arrange
    let hub = SimulatedHub::new(characteristic());
    let transport = connect(&hub, 0).await;
    let config = SessionConfig {
        characteristic: Uuid::nil(),
        ..session_config()
    };
    let (session, _events) = spawn_session(transport, config);
    let link: Arc<dyn HubLink> = Arc::new(session.clone());
    let mut dispatcher = CommandDispatcher::new(drive_settings(), link);

    // Act
    let result = dispatcher.handle_key(b'w').await;
    session.shutdown().await;

    // Assert
    assert!(result.is_err());
    assert!(hub.writes().is_empty());
    assert!(hub.is_disconnected());
}

#[tokio::test]
async fn test_failed_read_ends_the_drive_loop() {
    // Arrange
    let hub = SimulatedHub::new(characteristic());
    hub.fail_next_read(TransportError::CharacteristicNotFound { uuid: characteristic() });
    let transport = connect(&hub, 0).await;
    let (session, mut events) = spawn_session(transport, session_config());
    let link: Arc<dyn HubLink> = Arc::new(session.clone());
    let mut dispatcher = CommandDispatcher::new(drive_settings(), link);
    // The key channel stays open, so only the session event can end the loop.
    let (_key_tx, mut key_rx) = tokio::sync::mpsc::channel::<u8>(1);
    session
        .send(hub_core::HubCommand::PortInformationRequest { port: Port(0) })
        .await
        .unwrap();

    // Act
    let result = tokio::time::timeout(
        Duration::from_secs(1),
        runner::drive(&mut dispatcher, &mut key_rx, &mut events, std::future::pending()),
    )
    .await
    .expect("drive loop ends on the failed read");
    session.shutdown().await;

    // Assert
    assert!(matches!(
        result,
        Err(RunError::Transport(TransportError::CharacteristicNotFound { .. }))
    ));
}
