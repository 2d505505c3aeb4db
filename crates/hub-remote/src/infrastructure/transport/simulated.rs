//! In-memory hub used by `--simulate` and the integration tests.
//!
//! The simulated hub accepts writes only on its own characteristic, records
//! every frame, and answers reads either from a queue of scripted replies or
//! with a reply synthesized from the last request it received.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hub_core::{HubAddress, MessageType};
use tracing::{debug, info};
use uuid::Uuid;

use super::{HubAdapter, HubTransport, TransportError};

const PORT_INFORMATION: u8 = MessageType::PortInformation as u8;
const PORT_MODE_INFORMATION: u8 = MessageType::PortModeInformation as u8;
const PORT_INPUT_FORMAT_SINGLE: u8 = MessageType::PortInputFormatSingle as u8;
const GENERIC_ERROR: u8 = 0x05;

#[derive(Debug, Default)]
struct HubState {
    writes: Vec<Vec<u8>>,
    replies: VecDeque<Vec<u8>>,
    write_failures: VecDeque<TransportError>,
    read_failures: VecDeque<TransportError>,
    last_request: Option<Vec<u8>>,
    reads: usize,
}

/// A fake hub. Clones share the same state.
#[derive(Debug, Clone)]
pub struct SimulatedHub {
    characteristic: Uuid,
    state: Arc<Mutex<HubState>>,
    disconnected: Arc<AtomicBool>,
}

impl SimulatedHub {
    /// Creates a hub exposing `characteristic`.
    pub fn new(characteristic: Uuid) -> Self {
        Self {
            characteristic,
            state: Arc::new(Mutex::new(HubState::default())),
            disconnected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queues a reply returned by the next read instead of a synthesized one.
    pub fn push_reply(&self, bytes: impl Into<Vec<u8>>) {
        self.lock().replies.push_back(bytes.into());
    }

    /// Makes the next write fail with `error`. Calls stack up in order.
    pub fn fail_next_write(&self, error: TransportError) {
        self.lock().write_failures.push_back(error);
    }

    /// Makes the next read fail with `error`. Calls stack up in order.
    pub fn fail_next_read(&self, error: TransportError) {
        self.lock().read_failures.push_back(error);
    }

    /// Every frame written so far, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Number of reads served so far, failed ones excluded.
    pub fn read_count(&self) -> usize {
        self.lock().reads
    }

    /// Whether `disconnect` has been called.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubState> {
        // A poisoned lock only means a test panicked mid-call; the data is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self, characteristic: &Uuid) -> Result<(), TransportError> {
        if self.is_disconnected() {
            return Err(TransportError::Disconnected);
        }
        if *characteristic != self.characteristic {
            return Err(TransportError::CharacteristicNotFound {
                uuid: *characteristic,
            });
        }
        Ok(())
    }
}

/// Builds the hub's answer to a request frame.
fn synthesize_reply(request: Option<&[u8]>) -> Vec<u8> {
    let Some(request) = request.filter(|r| r.len() >= 4) else {
        return vec![5, 0x00, GENERIC_ERROR, 0x00, 0x00];
    };
    let port = request[3];
    match request[2] {
        0x21 => vec![11, 0x00, PORT_INFORMATION, port, 0x02, 0x01, 0x00, 0x03, 0x00, 0x00, 0x00],
        0x22 => {
            let kind = request.get(5).copied().unwrap_or(0);
            vec![6, 0x00, PORT_MODE_INFORMATION, port, 0x00, kind]
        }
        0x41 => vec![10, 0x00, PORT_INPUT_FORMAT_SINGLE, port, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01],
        other => vec![5, 0x00, GENERIC_ERROR, other, 0x05],
    }
}

#[async_trait]
impl HubTransport for SimulatedHub {
    async fn write(&self, characteristic: &Uuid, data: &[u8]) -> Result<(), TransportError> {
        self.check(characteristic)?;
        let mut state = self.lock();
        if let Some(err) = state.write_failures.pop_front() {
            return Err(err);
        }
        debug!("simulated hub received {} bytes", data.len());
        state.writes.push(data.to_vec());
        state.last_request = Some(data.to_vec());
        Ok(())
    }

    async fn read(&self, characteristic: &Uuid) -> Result<Vec<u8>, TransportError> {
        self.check(characteristic)?;
        let mut state = self.lock();
        if let Some(err) = state.read_failures.pop_front() {
            return Err(err);
        }
        state.reads += 1;
        if let Some(reply) = state.replies.pop_front() {
            return Ok(reply);
        }
        Ok(synthesize_reply(state.last_request.as_deref()))
    }

    async fn disconnect(&self) {
        info!("simulated hub disconnected");
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

/// Adapter that hands out connections to one [`SimulatedHub`].
#[derive(Debug)]
pub struct SimulatedAdapter {
    hub: SimulatedHub,
    failures_before_success: u32,
    attempts: AtomicU32,
}

impl SimulatedAdapter {
    /// Creates an adapter whose first `failures_before_success` connects fail.
    /// Use `u32::MAX` for a hub that is never reachable.
    pub fn new(hub: SimulatedHub, failures_before_success: u32) -> Self {
        Self {
            hub,
            failures_before_success,
            attempts: AtomicU32::new(0),
        }
    }

    /// Number of connection attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HubAdapter for SimulatedAdapter {
    async fn connect(&self, address: &HubAddress) -> Result<Box<dyn HubTransport>, TransportError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures_before_success {
            return Err(TransportError::ConnectFailed {
                address: *address,
                message: format!("simulated hub unreachable (attempt {attempt})"),
            });
        }
        self.hub.disconnected.store(false, Ordering::SeqCst);
        Ok(Box::new(self.hub.clone()))
    }
}
