//! HubSession: the protocol session task and its notification bridge.
//!
//! Architecture:
//! - The **protocol task** is the only owner of the [`HubTransport`]. It
//!   serves write requests from [`HubSession`] handles one at a time.
//! - After a successful write whose command expects a reply, it pushes a
//!   numbered [`PendingRead`] token on a capacity-1 channel and then serves
//!   only the read channel until the matching read is done or
//!   `reply_timeout` passes. Writes issued meanwhile wait in the request
//!   queue.
//! - The **bridge task** consumes tokens, asks the protocol task for the
//!   read, decodes the bytes, logs the hex dump, and publishes a
//!   [`SessionEvent`]. A read request left over from a token that already
//!   timed out carries an old sequence number and is dropped unserved.
//!
//! Every transport call is bounded by `io_timeout`. Transient failures are
//! retried with exponential backoff; configuration failures are returned at
//! once.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use hub_core::{decode_reply, encode_command, Frame, HubCommand, HubReply, Port, ProtocolError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::retry::RetryPolicy;
use crate::application::dispatch_command::{HubLink, LinkError};
use crate::infrastructure::transport::{HubTransport, TransportError};

const REQUEST_QUEUE_DEPTH: usize = 32;
const EVENT_QUEUE_DEPTH: usize = 32;

/// Configuration for a protocol session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// The single characteristic every frame is written to and read from.
    pub characteristic: Uuid,
    /// Deadline for each individual transport call.
    pub io_timeout: Duration,
    /// Retry policy for transient write and read failures.
    pub retry: RetryPolicy,
    /// How long a pending read waits for the bridge before it is dropped.
    pub reply_timeout: Duration,
    /// Treat undecodable replies as fatal.
    pub strict_replies: bool,
}

impl SessionConfig {
    /// Default timeouts for `characteristic`.
    pub fn new(characteristic: Uuid) -> Self {
        Self {
            characteristic,
            io_timeout: Duration::from_secs(2),
            retry: RetryPolicy::default(),
            reply_timeout: Duration::from_secs(1),
            strict_replies: false,
        }
    }
}

/// Events published by the notification bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A reply was read and passed validation.
    Reply(HubReply),
    /// A reply was read but could not be decoded.
    ReplyRejected { error: ProtocolError, fatal: bool },
    /// A read failed after retries; the bridge has stopped.
    Failed(TransportError),
}

impl SessionEvent {
    /// Whether the session must end after this event.
    pub fn is_fatal(&self) -> bool {
        match self {
            SessionEvent::Reply(_) => false,
            SessionEvent::ReplyRejected { fatal, .. } => *fatal,
            SessionEvent::Failed(_) => true,
        }
    }
}

/// Token announcing that a reply is waiting to be read.
#[derive(Debug, Clone, Copy)]
struct PendingRead {
    seq: u64,
    message_type: u8,
    port: Port,
}

struct ReadRequest {
    /// Sequence number of the token this request answers.
    seq: u64,
    reply: oneshot::Sender<Result<Vec<u8>, TransportError>>,
}

enum SessionRequest {
    Write {
        frame: Frame,
        expects_reply: bool,
        ack: oneshot::Sender<Result<(), TransportError>>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Handle to a running protocol session. Cheap to clone.
#[derive(Debug, Clone)]
pub struct HubSession {
    requests: mpsc::Sender<SessionRequest>,
}

impl std::fmt::Debug for SessionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionRequest::Write { frame, .. } => f.debug_tuple("Write").field(frame).finish(),
            SessionRequest::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}

/// Starts the protocol task and the bridge task for `transport`.
///
/// Returns the session handle and the receiver for [`SessionEvent`]s.
/// Must be called from within a Tokio runtime.
pub fn spawn_session(
    transport: Box<dyn HubTransport>,
    config: SessionConfig,
) -> (HubSession, mpsc::Receiver<SessionEvent>) {
    let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
    let (read_tx, read_rx) = mpsc::channel(1);
    let (token_tx, token_rx) = mpsc::channel(1);
    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

    let bridge = NotificationBridge {
        characteristic: config.characteristic,
        strict_replies: config.strict_replies,
        tokens: token_rx,
        reads: read_tx,
        events: event_tx,
    };
    let protocol = ProtocolTask {
        transport,
        config,
        reads: read_rx,
        tokens: token_tx,
        next_seq: 0,
        disconnected: false,
    };

    tokio::spawn(protocol.run(request_rx));
    tokio::spawn(bridge.run());

    (HubSession { requests: request_tx }, event_rx)
}

impl HubSession {
    /// Disconnects from the hub and stops the protocol task.
    ///
    /// Safe to call more than once; later calls return immediately.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .requests
            .send(SessionRequest::Shutdown { done: done_tx })
            .await
            .is_err()
        {
            return;
        }
        let _ = done_rx.await;
    }
}

#[async_trait]
impl HubLink for HubSession {
    async fn send(&self, command: HubCommand) -> Result<(), LinkError> {
        let frame = encode_command(&command);
        let (ack_tx, ack_rx) = oneshot::channel();
        self.requests
            .send(SessionRequest::Write {
                frame,
                expects_reply: command.expects_reply(),
                ack: ack_tx,
            })
            .await
            .map_err(|_| LinkError::Closed)?;

        ack_rx
            .await
            .map_err(|_| LinkError::Closed)?
            .map_err(|e| LinkError::Transport {
                class: e.class(),
                message: e.to_string(),
            })
    }
}

// ── Protocol task ─────────────────────────────────────────────────────────────

struct ProtocolTask {
    transport: Box<dyn HubTransport>,
    config: SessionConfig,
    reads: mpsc::Receiver<ReadRequest>,
    tokens: mpsc::Sender<PendingRead>,
    next_seq: u64,
    disconnected: bool,
}

impl ProtocolTask {
    async fn run(mut self, mut requests: mpsc::Receiver<SessionRequest>) {
        while let Some(request) = requests.recv().await {
            match request {
                SessionRequest::Write {
                    frame,
                    expects_reply,
                    ack,
                } => {
                    let result = self.write(&frame).await;
                    let written = result.is_ok();
                    let _ = ack.send(result);
                    if written && expects_reply {
                        self.await_pending_read(&frame).await;
                    }
                }
                SessionRequest::Shutdown { done } => {
                    self.disconnect().await;
                    let _ = done.send(());
                    break;
                }
            }
        }
        // Also reached when every handle was dropped without a shutdown.
        self.disconnect().await;
        debug!("protocol session task stopped");
    }

    async fn disconnect(&mut self) {
        if !self.disconnected {
            self.disconnected = true;
            self.transport.disconnect().await;
            info!("disconnected from hub");
        }
    }

    async fn write(&self, frame: &Frame) -> Result<(), TransportError> {
        let characteristic = self.config.characteristic;
        let transport = &self.transport;
        debug!("write {frame:?} to {characteristic}");
        let result = self
            .retrying("write", || transport.write(&characteristic, frame.as_bytes()))
            .await;
        if let Err(e) = &result {
            self.log_failure("Write", e);
        }
        result
    }

    async fn read(&self) -> Result<Vec<u8>, TransportError> {
        let characteristic = self.config.characteristic;
        let transport = &self.transport;
        let result = self.retrying("read", || transport.read(&characteristic)).await;
        if let Err(e) = &result {
            self.log_failure("Read", e);
        }
        result
    }

    async fn await_pending_read(&mut self, frame: &Frame) {
        self.next_seq += 1;
        let pending = PendingRead {
            seq: self.next_seq,
            message_type: frame.message_type_byte(),
            port: frame.port(),
        };

        while let Ok(stale) = self.reads.try_recv() {
            debug!("dropping stale read request #{}", stale.seq);
        }

        let reply_timeout = self.config.reply_timeout;
        match tokio::time::timeout(reply_timeout, self.claim(pending)).await {
            Ok(Some(request)) => {
                let result = self.read().await;
                let _ = request.reply.send(result);
            }
            Ok(None) => {
                warn!(
                    "notification bridge stopped; reply to 0x{:02x} ignored",
                    pending.message_type
                );
            }
            Err(_) => {
                warn!(
                    "no read requested within {reply_timeout:?} for 0x{:02x} on port {}; \
                     pending read dropped",
                    pending.message_type, pending.port
                );
            }
        }
    }

    /// Hands `pending` to the bridge and waits for its read request. The
    /// caller bounds the whole exchange by `reply_timeout`.
    async fn claim(&mut self, pending: PendingRead) -> Option<ReadRequest> {
        self.tokens.send(pending).await.ok()?;
        while let Some(request) = self.reads.recv().await {
            if request.seq == pending.seq {
                return Some(request);
            }
            debug!("dropping stale read request #{}", request.seq);
        }
        None
    }

    /// Runs `call` under the I/O deadline, retrying transient failures.
    async fn retrying<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let policy = &self.config.retry;
        let mut retry = 0;
        loop {
            let outcome = match tokio::time::timeout(self.config.io_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::TimedOut {
                    op,
                    after: self.config.io_timeout,
                }),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retry < policy.max_retries => {
                    retry += 1;
                    let delay = policy.delay_for(retry);
                    warn!(
                        "{op} on {} failed: {e}; retry {retry}/{} in {delay:?}",
                        self.config.characteristic, policy.max_retries
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn log_failure(&self, op: &str, err: &TransportError) {
        let uuid = self.config.characteristic;
        match err {
            TransportError::CharacteristicNotFound { .. } => error!(
                "{op} UUID {uuid} failed: {err}. Verify the characteristic UUID and that \
                 service discovery completed."
            ),
            _ => error!("{op} UUID {uuid} failed: {err}"),
        }
    }
}

// ── Notification bridge ───────────────────────────────────────────────────────

struct NotificationBridge {
    characteristic: Uuid,
    strict_replies: bool,
    tokens: mpsc::Receiver<PendingRead>,
    reads: mpsc::Sender<ReadRequest>,
    events: mpsc::Sender<SessionEvent>,
}

impl NotificationBridge {
    async fn run(mut self) {
        while let Some(pending) = self.tokens.recv().await {
            debug!(
                "reply pending for 0x{:02x} on port {}",
                pending.message_type, pending.port
            );

            let (reply_tx, reply_rx) = oneshot::channel();
            let request = ReadRequest {
                seq: pending.seq,
                reply: reply_tx,
            };
            if self.reads.send(request).await.is_err() {
                break;
            }
            let Ok(result) = reply_rx.await else {
                // Dropped unserved: timed out, stale, or shutdown.
                continue;
            };

            let event = self.to_event(result);
            let fatal = matches!(event, SessionEvent::Failed(_));
            if self.events.send(event).await.is_err() {
                debug!("session event receiver dropped");
            }
            if fatal {
                break;
            }
        }
        debug!("notification bridge stopped");
    }

    fn to_event(&self, result: Result<Vec<u8>, TransportError>) -> SessionEvent {
        let uuid = self.characteristic;
        match result {
            Ok(bytes) => match decode_reply(&bytes) {
                Ok(reply) => {
                    if reply.length_mismatch() {
                        warn!(
                            "reply declares {} bytes but {} were received",
                            reply.declared_len(),
                            reply.as_bytes().len()
                        );
                    }
                    info!("Read UUID {uuid} completed: {}", reply.hex());
                    SessionEvent::Reply(reply)
                }
                Err(error) => {
                    if self.strict_replies {
                        error!("Read UUID {uuid} returned an invalid reply: {error}");
                    } else {
                        warn!("Read UUID {uuid} returned an invalid reply: {error}; skipped");
                    }
                    SessionEvent::ReplyRejected {
                        error,
                        fatal: self.strict_replies,
                    }
                }
            },
            Err(e) => SessionEvent::Failed(e),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::simulated::SimulatedHub;
    use crate::infrastructure::transport::MockHubTransport;
    use hub_core::{ErrorClass, InformationKind, Speed};
    use mockall::Sequence;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio_test::assert_ok;

    fn characteristic() -> Uuid {
        Uuid::from_u128(0x0000_1624_1212_efde_1623_785f_eabc_d123)
    }

    fn make_config() -> SessionConfig {
        SessionConfig {
            characteristic: characteristic(),
            io_timeout: Duration::from_millis(200),
            retry: RetryPolicy {
                max_retries: 2,
                initial_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
            },
            reply_timeout: Duration::from_millis(500),
            strict_replies: false,
        }
    }

    fn motor(port: Port, speed: i32) -> HubCommand {
        HubCommand::MotorSpeed {
            port,
            speed: Speed::clamped(speed),
        }
    }

    async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("event within a second")
            .expect("event channel open")
    }

    #[tokio::test]
    async fn test_motor_command_is_written_once_without_read() {
        // Arrange
        let mut transport = MockHubTransport::new();
        transport
            .expect_write()
            .withf(|uuid, data| *uuid == characteristic() && data == [8, 0, 0x81, 0, 0x11, 0x51, 0, 0xF6])
            .times(1)
            .returning(|_, _| Ok(()));
        transport.expect_read().times(0);
        transport.expect_disconnect().times(1).returning(|| ());
        let (session, _events) = spawn_session(Box::new(transport), make_config());

        // Act
        let result = session.send(motor(Port::FRONT_DRIVE, 10)).await;
        session.shutdown().await;

        // Assert
        assert_ok!(result);
    }

    #[tokio::test]
    async fn test_reply_expecting_write_produces_exactly_one_read() {
        // Arrange
        let mut transport = MockHubTransport::new();
        transport.expect_write().times(1).returning(|_, _| Ok(()));
        transport
            .expect_read()
            .times(1)
            .returning(|_| Ok(vec![0x05, 0x00, 0x43, 0x00, 0x02]));
        transport.expect_disconnect().returning(|| ());
        let (session, mut events) = spawn_session(Box::new(transport), make_config());

        // Act
        assert_ok!(session.send(HubCommand::PortInformationRequest { port: Port(0) }).await);
        let event = next_event(&mut events).await;
        session.shutdown().await;

        // Assert
        match event {
            SessionEvent::Reply(reply) => assert_eq!(reply.hex(), "05 00 43 00 02"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_write_queued_behind_pending_read_runs_after_it() {
        // Arrange
        let mut seq = Sequence::new();
        let mut transport = MockHubTransport::new();
        transport
            .expect_write()
            .withf(|_, data| data[2] == 0x22)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        transport
            .expect_read()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![0x06, 0x00, 0x44, 0x01, 0x00, 0x00]));
        transport
            .expect_write()
            .withf(|_, data| data[2] == 0x81)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        transport.expect_disconnect().returning(|| ());
        let (session, mut events) = spawn_session(Box::new(transport), make_config());

        // Act
        let info = session.clone();
        let first = tokio::spawn(async move {
            info.send(HubCommand::PortModeInformationRequest {
                port: Port(1),
                kind: InformationKind::Name,
            })
            .await
        });
        assert_ok!(assert_ok!(first.await));
        assert_ok!(session.send(motor(Port::REAR_DRIVE, 0)).await);
        let event = next_event(&mut events).await;
        session.shutdown().await;

        // Assert
        assert!(matches!(event, SessionEvent::Reply(_)));
    }

    #[tokio::test]
    async fn test_characteristic_not_found_is_not_retried() {
        // Arrange
        let mut transport = MockHubTransport::new();
        transport
            .expect_write()
            .times(1)
            .returning(|uuid, _| Err(TransportError::CharacteristicNotFound { uuid: *uuid }));
        transport.expect_disconnect().returning(|| ());
        let (session, _events) = spawn_session(Box::new(transport), make_config());

        // Act
        let err = session.send(motor(Port::FRONT_DRIVE, 10)).await.unwrap_err();
        session.shutdown().await;

        // Assert
        assert!(matches!(
            err,
            LinkError::Transport { class: ErrorClass::Configuration, .. }
        ));
    }

    #[tokio::test]
    async fn test_transient_write_failure_is_retried_up_to_the_limit() {
        // Arrange
        let mut transport = MockHubTransport::new();
        transport.expect_write().times(3).returning(|_, _| {
            Err(TransportError::Link {
                code: Some(-5),
                message: "busy".into(),
            })
        });
        transport.expect_disconnect().returning(|| ());
        let (session, _events) = spawn_session(Box::new(transport), make_config());

        // Act
        let err = session.send(motor(Port::FRONT_DRIVE, 10)).await.unwrap_err();
        session.shutdown().await;

        // Assert
        assert!(matches!(err, LinkError::Transport { class: ErrorClass::Transient, .. }));
    }

    #[tokio::test]
    async fn test_transient_write_failure_recovers_on_retry() {
        // Arrange
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut transport = MockHubTransport::new();
        transport.expect_write().returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(TransportError::Disconnected)
            } else {
                Ok(())
            }
        });
        transport.expect_disconnect().returning(|| ());
        let (session, _events) = spawn_session(Box::new(transport), make_config());

        // Act
        let result = session.send(motor(Port::STEERING, 20)).await;
        session.shutdown().await;

        // Assert
        assert_ok!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_short_reply_is_rejected_but_not_fatal_by_default() {
        // Arrange
        let mut transport = MockHubTransport::new();
        transport.expect_write().returning(|_, _| Ok(()));
        transport.expect_read().returning(|_| Ok(vec![0x02, 0x00]));
        transport.expect_disconnect().returning(|| ());
        let (session, mut events) = spawn_session(Box::new(transport), make_config());

        // Act
        assert_ok!(session.send(HubCommand::PortInformationRequest { port: Port(2) }).await);
        let event = next_event(&mut events).await;
        session.shutdown().await;

        // Assert
        assert_eq!(
            event,
            SessionEvent::ReplyRejected {
                error: ProtocolError::ReplyTooShort { len: 2 },
                fatal: false,
            }
        );
        assert!(!event.is_fatal());
    }

    #[tokio::test]
    async fn test_short_reply_is_fatal_in_strict_mode() {
        let mut transport = MockHubTransport::new();
        transport.expect_write().returning(|_, _| Ok(()));
        transport.expect_read().returning(|_| Ok(vec![]));
        transport.expect_disconnect().returning(|| ());
        let config = SessionConfig {
            strict_replies: true,
            ..make_config()
        };
        let (session, mut events) = spawn_session(Box::new(transport), config);

        assert_ok!(session.send(HubCommand::PortInformationRequest { port: Port(0) }).await);
        let event = next_event(&mut events).await;
        session.shutdown().await;

        assert!(event.is_fatal());
    }

    #[tokio::test]
    async fn test_failed_read_publishes_fatal_event() {
        let mut transport = MockHubTransport::new();
        transport.expect_write().returning(|_, _| Ok(()));
        transport
            .expect_read()
            .times(1)
            .returning(|uuid| Err(TransportError::CharacteristicNotFound { uuid: *uuid }));
        transport.expect_disconnect().returning(|| ());
        let (session, mut events) = spawn_session(Box::new(transport), make_config());

        assert_ok!(session.send(HubCommand::PortInformationRequest { port: Port(0) }).await);
        let event = next_event(&mut events).await;
        session.shutdown().await;

        assert!(matches!(event, SessionEvent::Failed(TransportError::CharacteristicNotFound { .. })));
    }

    #[tokio::test]
    async fn test_send_after_shutdown_reports_closed() {
        let mut transport = MockHubTransport::new();
        transport.expect_disconnect().times(1).returning(|| ());
        let (session, _events) = spawn_session(Box::new(transport), make_config());

        session.shutdown().await;
        session.shutdown().await;
        let err = session.send(motor(Port::FRONT_DRIVE, 0)).await.unwrap_err();

        assert_eq!(err, LinkError::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_after_reply_timeout_is_paired_with_its_own_write() {
        // Arrange: nobody drains events, so the bridge stalls once the queue
        // is full and the next two pending reads time out.
        let hub = SimulatedHub::new(characteristic());
        let (session, mut events) = spawn_session(Box::new(hub.clone()), make_config());
        let served = EVENT_QUEUE_DEPTH + 1;
        for n in 0..served + 2 {
            let port = Port(n as u8);
            assert_ok!(session.send(HubCommand::PortInformationRequest { port }).await);
        }

        // Act
        let motor_write =
            tokio::time::timeout(Duration::from_secs(5), session.send(motor(Port::FRONT_DRIVE, 10)))
                .await;
        let mut backlog = Vec::new();
        for _ in 0..served {
            backlog.push(next_event(&mut events).await);
        }
        assert_ok!(session.send(HubCommand::PortInformationRequest { port: Port(0x7F) }).await);
        let event = next_event(&mut events).await;
        session.shutdown().await;

        // Assert
        assert!(matches!(motor_write, Ok(Ok(()))), "writes keep flowing while the bridge stalls");
        match backlog.last() {
            Some(SessionEvent::Reply(reply)) => assert_eq!(reply.as_bytes()[3], (served - 1) as u8),
            other => panic!("unexpected event {other:?}"),
        }
        match event {
            SessionEvent::Reply(reply) => assert_eq!(reply.as_bytes()[3], 0x7F),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(hub.read_count(), served + 1, "timed-out reads are never served");
    }

    struct StalledTransport;

    #[async_trait]
    impl HubTransport for StalledTransport {
        async fn write(&self, _: &Uuid, _: &[u8]) -> Result<(), TransportError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }

        async fn read(&self, _: &Uuid) -> Result<Vec<u8>, TransportError> {
            Ok(Vec::new())
        }

        async fn disconnect(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_write_times_out_after_retries() {
        let config = SessionConfig {
            retry: RetryPolicy {
                max_retries: 1,
                initial_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
            },
            ..make_config()
        };
        let (session, _events) = spawn_session(Box::new(StalledTransport), config);

        let err = session.send(motor(Port::FRONT_DRIVE, 10)).await.unwrap_err();

        match err {
            LinkError::Transport { class, message } => {
                assert_eq!(class, ErrorClass::Transient);
                assert!(message.contains("timed out"), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
