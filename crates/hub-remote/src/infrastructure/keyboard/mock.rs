//! Scripted key source for tests and non-interactive runs.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use super::{KeyboardError, KeySource};

/// Delivers a fixed sequence of keys, then reports end of input.
#[derive(Debug)]
pub struct ScriptedKeys {
    keys: Vec<u8>,
    started: AtomicBool,
}

impl ScriptedKeys {
    pub fn new(keys: impl Into<Vec<u8>>) -> Self {
        Self {
            keys: keys.into(),
            started: AtomicBool::new(false),
        }
    }
}

impl KeySource for ScriptedKeys {
    fn start(&self) -> Result<mpsc::Receiver<u8>, KeyboardError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(KeyboardError::AlreadyStarted);
        }
        let (tx, rx) = mpsc::channel(self.keys.len().max(1));
        for &key in &self.keys {
            // Capacity equals the script length, so this cannot fail.
            let _ = tx.try_send(key);
        }
        Ok(rx)
    }
}
