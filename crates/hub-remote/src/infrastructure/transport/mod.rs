//! Bluetooth LE transport abstraction.
//!
//! The rest of the crate talks to the hub only through [`HubAdapter`] and
//! [`HubTransport`]. Two implementations exist:
//!
//! - **`simulated`** – an in-memory hub that records writes and answers reads.
//!   Used by `--simulate` and by the integration tests.
//! - **`btle`** (feature `ble`) – the real stack, built on `btleplug`.
//!
//! # Error classification
//!
//! Every [`TransportError`] maps to an [`ErrorClass`]. Callers retry
//! `Transient` errors and abort on `Configuration` errors.

pub mod simulated;

#[cfg(feature = "ble")]
pub mod btle;

use std::time::Duration;

use async_trait::async_trait;
use hub_core::{ErrorClass, HubAddress};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the Bluetooth transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// No usable Bluetooth adapter on this machine.
    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),
    /// The hub could not be reached during a connection attempt.
    #[error("could not connect to hub {address}: {message}")]
    ConnectFailed { address: HubAddress, message: String },
    /// The configured characteristic does not exist on the connected hub.
    #[error("characteristic {uuid} not found on the hub")]
    CharacteristicNotFound { uuid: Uuid },
    /// The link reported an error while writing or reading.
    #[error("link error{}: {message}", code_suffix(.code))]
    Link { code: Option<i32>, message: String },
    /// A transport call did not complete within its deadline.
    #[error("{op} timed out after {after:?}")]
    TimedOut { op: &'static str, after: Duration },
    /// The hub dropped the connection.
    #[error("hub disconnected")]
    Disconnected,
}

fn code_suffix(code: &Option<i32>) -> String {
    code.map(|c| format!(" (code {c})")).unwrap_or_default()
}

impl TransportError {
    /// Classifies the error for retry decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            TransportError::AdapterUnavailable(_) | TransportError::CharacteristicNotFound { .. } => {
                ErrorClass::Configuration
            }
            TransportError::ConnectFailed { .. }
            | TransportError::Link { .. }
            | TransportError::TimedOut { .. }
            | TransportError::Disconnected => ErrorClass::Transient,
        }
    }

    /// Returns `true` if repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// An open GATT connection to one hub.
///
/// Implementations must be safe to share across tasks, but the session task
/// is the only caller in practice.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HubTransport: Send + Sync {
    /// Writes `data` to the characteristic identified by `characteristic`.
    async fn write(&self, characteristic: &Uuid, data: &[u8]) -> Result<(), TransportError>;

    /// Reads the current value of the characteristic.
    async fn read(&self, characteristic: &Uuid) -> Result<Vec<u8>, TransportError>;

    /// Closes the connection. Errors are logged by the implementation.
    async fn disconnect(&self);
}

/// A local Bluetooth adapter able to open connections to hubs.
#[async_trait]
pub trait HubAdapter: Send + Sync {
    /// Makes one connection attempt to the hub at `address`.
    async fn connect(&self, address: &HubAddress) -> Result<Box<dyn HubTransport>, TransportError>;
}
