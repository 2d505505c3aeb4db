//! Keystroke input for the drive loop.
//!
//! Keystrokes are read one byte at a time on a dedicated OS thread, since
//! reading stdin blocks, and forwarded into the async runtime through a Tokio
//! `mpsc` channel. When the channel closes, stdin has reached end of file.
//!
//! # Unix terminals
//!
//! On unix the terminal is switched to raw mode (no echo, no line
//! buffering, one byte per read) for as long as the [`terminal::TerminalKeys`]
//! source lives. If stdin is not a terminal the bytes are forwarded as they
//! arrive, with no mode change.
//!
//! # Testability
//!
//! The [`KeySource`] trait lets tests feed scripted keystrokes through
//! [`mock::ScriptedKeys`].

use tokio::sync::mpsc;

pub mod mock;
pub mod terminal;

/// Error type for keyboard input.
#[derive(Debug, thiserror::Error)]
pub enum KeyboardError {
    #[error("terminal I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("key source has already been started")]
    AlreadyStarted,
}

/// Trait abstracting keystroke production.
pub trait KeySource: Send {
    /// Starts the source and returns a receiver of raw key bytes.
    fn start(&self) -> Result<mpsc::Receiver<u8>, KeyboardError>;
}
