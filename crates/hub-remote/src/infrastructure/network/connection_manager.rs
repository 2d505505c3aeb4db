//! ConnectionManager: bounded connection attempts to the hub.
//!
//! A connection attempt succeeds when the adapter produces a transport
//! handle. Failures are logged and retried after a fixed delay until the
//! attempt budget is spent. Nothing here reconnects mid-session.

use std::time::Duration;

use hub_core::HubAddress;
use thiserror::Error;
use tracing::{info, warn};

use crate::infrastructure::transport::{HubAdapter, HubTransport, TransportError};

/// Error type for connection establishment.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Every attempt failed.
    #[error("could not connect to hub {address} after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        address: HubAddress,
        attempts: u32,
        #[source]
        last: TransportError,
    },
}

/// Configuration for connection establishment.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// The connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    /// Connects to the hub, trying up to `max_attempts` times.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::RetriesExhausted`] carrying the last transport
    /// error once every attempt has failed.
    pub async fn connect(
        &self,
        adapter: &dyn HubAdapter,
        address: HubAddress,
    ) -> Result<Box<dyn HubTransport>, ConnectError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            info!("connecting to hub {address} (attempt {attempt}/{max_attempts})");

            match adapter.connect(&address).await {
                Ok(transport) => {
                    info!("connected to hub {address}");
                    return Ok(transport);
                }
                Err(e) if attempt >= max_attempts => {
                    warn!("connection attempt {attempt} failed: {e}; giving up");
                    return Err(ConnectError::RetriesExhausted {
                        address,
                        attempts: attempt,
                        last: e,
                    });
                }
                Err(e) => {
                    warn!(
                        "connection attempt {attempt} failed: {e}; retrying in {:?}",
                        self.config.retry_delay
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
