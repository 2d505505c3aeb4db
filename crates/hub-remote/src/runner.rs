//! Session runners shared by the binary and the integration tests.
//!
//! - [`drive`] is the interactive loop: keystrokes go to the dispatcher,
//!   session events are checked for fatal conditions, and an external
//!   shutdown signal (Ctrl-C in the binary) ends the loop cleanly.
//! - [`probe`] sends the port introspection requests and collects replies.

use std::future::Future;
use std::time::Duration;

use hub_core::{HubCommand, HubReply, InformationKind, Port, ProtocolError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::application::dispatch_command::{
    CommandDispatcher, DispatchError, DispatchOutcome, HubLink,
};
use crate::infrastructure::network::hub_session::SessionEvent;
use crate::infrastructure::transport::TransportError;

/// Errors that end a session with a failure exit status.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("hub read failed: {0}")]
    Transport(#[source] TransportError),
    #[error("hub sent an invalid reply: {0}")]
    InvalidReply(#[source] ProtocolError),
}

/// Why a drive session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The operator pressed the quit key.
    Quit,
    /// Stdin reached end of file.
    EndOfInput,
    /// The shutdown signal fired.
    Interrupted,
}

/// Runs the interactive drive loop until quit, end of input, the shutdown
/// signal, or a fatal error.
///
/// # Errors
///
/// Returns [`RunError`] if a command could not be delivered or the session
/// published a fatal event.
pub async fn drive<S>(
    dispatcher: &mut CommandDispatcher,
    keys: &mut mpsc::Receiver<u8>,
    events: &mut mpsc::Receiver<SessionEvent>,
    shutdown: S,
) -> Result<SessionEnd, RunError>
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            key = keys.recv() => match key {
                Some(key) => {
                    if dispatcher.handle_key(key).await? == DispatchOutcome::Quit {
                        return Ok(SessionEnd::Quit);
                    }
                }
                None => {
                    info!("end of input");
                    return Ok(SessionEnd::EndOfInput);
                }
            },
            Some(event) = events.recv() => check_event(event)?,
            _ = &mut shutdown => {
                info!("shutdown signal received");
                return Ok(SessionEnd::Interrupted);
            }
        }
    }
}

/// What the probe subcommand asks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeRequest {
    pub port: Port,
    pub kind: InformationKind,
    /// Also send a port input format setup for `kind`.
    pub subscribe: bool,
}

impl ProbeRequest {
    /// The commands sent, in order.
    pub fn commands(&self) -> Vec<HubCommand> {
        let mut commands = vec![
            HubCommand::PortInformationRequest { port: self.port },
            HubCommand::PortModeInformationRequest {
                port: self.port,
                kind: self.kind,
            },
        ];
        if self.subscribe {
            commands.push(HubCommand::PortInputFormatSetup {
                port: self.port,
                kind: self.kind,
            });
        }
        commands
    }
}

/// Sends each probe command and waits up to `wait` for its reply.
///
/// A missing or rejected reply is logged and skipped; the returned vector
/// holds the replies that did arrive. A reply whose message type does not
/// answer the current command arrived too late for an earlier one and is
/// discarded.
///
/// # Errors
///
/// Returns [`RunError`] if a write fails or the session reports a fatal event.
pub async fn probe(
    link: &dyn HubLink,
    events: &mut mpsc::Receiver<SessionEvent>,
    request: ProbeRequest,
    wait: Duration,
) -> Result<Vec<HubReply>, RunError> {
    let mut replies = Vec::new();

    for command in request.commands() {
        info!("probe: {command:?}");
        link.send(command)
            .await
            .map_err(|source| DispatchError::Send { command, source })?;

        match await_reply(events, command, wait).await? {
            ReplyWait::Received(reply) => {
                info!("probe reply to 0x{:02x}: {}", command.message_type() as u8, reply.hex());
                replies.push(reply);
            }
            ReplyWait::Skipped => {}
            ReplyWait::Closed => {
                warn!("session closed before a reply arrived");
                break;
            }
            ReplyWait::TimedOut => warn!("no reply to {command:?} within {wait:?}"),
        }
    }

    Ok(replies)
}

enum ReplyWait {
    Received(HubReply),
    /// A non-fatal rejected reply took the place of the expected one.
    Skipped,
    Closed,
    TimedOut,
}

async fn await_reply(
    events: &mut mpsc::Receiver<SessionEvent>,
    command: HubCommand,
    wait: Duration,
) -> Result<ReplyWait, RunError> {
    let expected = command.expected_reply();
    let deadline = Instant::now() + wait;

    loop {
        let event = match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(ReplyWait::Closed),
            Err(_) => return Ok(ReplyWait::TimedOut),
        };
        match event {
            SessionEvent::Reply(reply) if reply.message_type() == expected => {
                return Ok(ReplyWait::Received(reply));
            }
            SessionEvent::Reply(reply) => {
                warn!("discarding late reply 0x{:02x}: {}", reply.message_type_byte(), reply.hex());
            }
            other => {
                check_event(other)?;
                return Ok(ReplyWait::Skipped);
            }
        }
    }
}

fn check_event(event: SessionEvent) -> Result<(), RunError> {
    match event {
        SessionEvent::Reply(reply) => {
            debug!("reply 0x{:02x} ({} bytes)", reply.message_type_byte(), reply.as_bytes().len());
            Ok(())
        }
        SessionEvent::ReplyRejected { error, fatal: true } => Err(RunError::InvalidReply(error)),
        SessionEvent::ReplyRejected { .. } => Ok(()),
        SessionEvent::Failed(e) => Err(RunError::Transport(e)),
    }
}
