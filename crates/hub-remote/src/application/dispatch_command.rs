//! CommandDispatcher: turns operator commands into hub commands.
//!
//! This use case owns the only piece of session state, the current drive
//! speed. It depends on the [`HubLink`] trait for delivery, so it can be
//! unit-tested with a recording link and no Bluetooth hardware.
//!
//! Both drive motors always receive the same speed in the same action; the
//! steering motor only ever receives short pulses that end back at zero.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hub_core::{ErrorClass, HubCommand, OperatorCommand, Port, Speed};
use thiserror::Error;
use tracing::{debug, info};

/// Error returned by a [`HubLink`] when a command could not be delivered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    /// The transport rejected the write; `class` tells whether it was retried.
    #[error("{message}")]
    Transport { class: ErrorClass, message: String },
    /// The protocol session has already shut down.
    #[error("hub session is closed")]
    Closed,
}

/// Error type for the dispatch use case.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to send {command:?}: {source}")]
    Send {
        command: HubCommand,
        #[source]
        source: LinkError,
    },
}

/// Trait for delivering encoded commands to the hub.
///
/// The infrastructure implementation forwards to the protocol session task;
/// test implementations record calls.
#[async_trait]
pub trait HubLink: Send + Sync {
    /// Sends one command and waits until the write has completed.
    async fn send(&self, command: HubCommand) -> Result<(), LinkError>;
}

/// Drive tuning used by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct DriveSettings {
    pub front_port: Port,
    pub rear_port: Port,
    pub steering_port: Port,
    /// Speed change per accelerate/decelerate keystroke.
    pub speed_step: i32,
    /// Steering motor speed during a pulse.
    pub steering_speed: Speed,
    /// How long the steering motor runs per pulse.
    pub steering_pulse: Duration,
}

impl Default for DriveSettings {
    fn default() -> Self {
        Self {
            front_port: Port::FRONT_DRIVE,
            rear_port: Port::REAR_DRIVE,
            steering_port: Port::STEERING,
            speed_step: 10,
            steering_speed: Speed::clamped(20),
            steering_pulse: Duration::from_millis(10),
        }
    }
}

/// What the caller should do after a command was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Keep reading keystrokes.
    Continue,
    /// The operator asked to end the session.
    Quit,
}

/// The Dispatch Command use case: the single owner of the drive speed.
pub struct CommandDispatcher {
    settings: DriveSettings,
    speed: Speed,
    link: Arc<dyn HubLink>,
}

impl CommandDispatcher {
    /// Creates a dispatcher at neutral speed.
    pub fn new(settings: DriveSettings, link: Arc<dyn HubLink>) -> Self {
        Self {
            settings,
            speed: Speed::NEUTRAL,
            link,
        }
    }

    /// Returns the current drive speed.
    pub fn speed(&self) -> Speed {
        self.speed
    }

    /// Handles one raw keystroke. Unbound keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Send`] if the link fails to deliver a frame.
    pub async fn handle_key(&mut self, key: u8) -> Result<DispatchOutcome, DispatchError> {
        match OperatorCommand::from_key(key) {
            Some(command) => self.dispatch(command).await,
            None => {
                debug!("ignoring unbound key 0x{key:02x}");
                Ok(DispatchOutcome::Continue)
            }
        }
    }

    /// Applies one operator command.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Send`] if the link fails to deliver a frame.
    /// The speed state is updated before sending, matching what the operator
    /// asked for even when delivery fails.
    pub async fn dispatch(
        &mut self,
        command: OperatorCommand,
    ) -> Result<DispatchOutcome, DispatchError> {
        match command {
            OperatorCommand::Accelerate => {
                self.speed = self.speed.step(self.settings.speed_step);
                self.drive().await?;
            }
            OperatorCommand::Decelerate => {
                self.speed = self.speed.step(self.settings.speed_step.saturating_neg());
                self.drive().await?;
            }
            OperatorCommand::Brake => {
                self.speed = Speed::NEUTRAL;
                self.drive().await?;
            }
            OperatorCommand::SteerLeft => {
                self.steering_pulse(self.settings.steering_speed).await?;
            }
            OperatorCommand::SteerRight => {
                self.steering_pulse(self.settings.steering_speed.reversed()).await?;
            }
            OperatorCommand::Quit => {
                info!("quit requested at speed {}", self.speed);
                return Ok(DispatchOutcome::Quit);
            }
        }
        Ok(DispatchOutcome::Continue)
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    async fn drive(&self) -> Result<(), DispatchError> {
        debug!("drive speed {}", self.speed);
        self.send_speed(self.settings.front_port, self.speed).await?;
        self.send_speed(self.settings.rear_port, self.speed).await
    }

    async fn steering_pulse(&self, speed: Speed) -> Result<(), DispatchError> {
        debug!("steering pulse {speed} for {:?}", self.settings.steering_pulse);
        self.send_speed(self.settings.steering_port, speed).await?;
        tokio::time::sleep(self.settings.steering_pulse).await;
        self.send_speed(self.settings.steering_port, Speed::NEUTRAL).await
    }

    async fn send_speed(&self, port: Port, speed: Speed) -> Result<(), DispatchError> {
        let command = HubCommand::MotorSpeed { port, speed };
        self.link
            .send(command)
            .await
            .map_err(|source| DispatchError::Send { command, source })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
