//! Stdin key source with unix raw-mode support.
//!
//! This module uses `unsafe` code only for the termios FFI calls.
//! All `unsafe` blocks are annotated with `// SAFETY:` comments.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{KeyboardError, KeySource};

const KEY_QUEUE_DEPTH: usize = 64;

/// Reads keystrokes from the process's stdin.
///
/// Raw mode is restored when this value is dropped.
pub struct TerminalKeys {
    started: AtomicBool,
    #[cfg(unix)]
    raw_mode: Mutex<Option<raw_mode::RawModeGuard>>,
    #[cfg(not(unix))]
    raw_mode: Mutex<Option<()>>,
}

impl TerminalKeys {
    pub fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            raw_mode: Mutex::new(None),
        }
    }

    #[cfg(unix)]
    fn enter_raw_mode(&self) -> Result<(), KeyboardError> {
        use std::os::unix::io::AsRawFd;

        let fd = std::io::stdin().as_raw_fd();
        if !raw_mode::is_terminal(fd) {
            warn!("stdin is not a terminal; keys are read without raw mode");
            return Ok(());
        }
        let guard = raw_mode::RawModeGuard::enable(fd)?;
        if let Ok(mut slot) = self.raw_mode.lock() {
            *slot = Some(guard);
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn enter_raw_mode(&self) -> Result<(), KeyboardError> {
        warn!("raw terminal mode is not supported on this platform; press Enter after each key");
        Ok(())
    }
}

impl Default for TerminalKeys {
    fn default() -> Self {
        Self::new()
    }
}

impl KeySource for TerminalKeys {
    fn start(&self) -> Result<mpsc::Receiver<u8>, KeyboardError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(KeyboardError::AlreadyStarted);
        }
        self.enter_raw_mode()?;

        let (tx, rx) = mpsc::channel(KEY_QUEUE_DEPTH);
        thread::Builder::new()
            .name("hub-remote-keys".to_string())
            .spawn(move || read_keys(tx))?;
        Ok(rx)
    }
}

/// Entry point for the dedicated stdin thread. Returning drops the sender,
/// which the drive loop sees as end of input.
fn read_keys(tx: mpsc::Sender<u8>) {
    let stdin = std::io::stdin();
    for byte in stdin.lock().bytes() {
        match byte {
            Ok(key) => {
                if tx.blocking_send(key).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("stdin read failed: {e}");
                break;
            }
        }
    }
    debug!("key reader thread stopped");
}

#[cfg(unix)]
mod raw_mode {
    use std::io;
    use std::mem::MaybeUninit;
    use std::os::unix::io::RawFd;

    use tracing::{debug, warn};

    pub fn is_terminal(fd: RawFd) -> bool {
        // SAFETY: isatty only inspects the descriptor.
        unsafe { libc::isatty(fd) == 1 }
    }

    /// Puts a terminal into raw mode and restores the previous settings on drop.
    pub struct RawModeGuard {
        fd: RawFd,
        original: libc::termios,
    }

    impl RawModeGuard {
        pub fn enable(fd: RawFd) -> io::Result<Self> {
            let mut current = MaybeUninit::<libc::termios>::uninit();
            // SAFETY: tcgetattr writes a complete termios on success; we only
            // read it after checking the return value.
            let original = unsafe {
                if libc::tcgetattr(fd, current.as_mut_ptr()) != 0 {
                    return Err(io::Error::last_os_error());
                }
                current.assume_init()
            };

            let mut raw = original;
            raw.c_lflag &= !(libc::ICANON | libc::ECHO);
            raw.c_cc[libc::VMIN] = 1;
            raw.c_cc[libc::VTIME] = 0;

            // SAFETY: `raw` is a valid termios derived from the current settings.
            if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &raw) } != 0 {
                return Err(io::Error::last_os_error());
            }
            debug!("terminal switched to raw mode");
            Ok(Self { fd, original })
        }
    }

    impl Drop for RawModeGuard {
        fn drop(&mut self) {
            // SAFETY: restores the settings read in `enable` on the same descriptor.
            if unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, &self.original) } != 0 {
                warn!("failed to restore terminal mode: {}", io::Error::last_os_error());
            } else {
                debug!("terminal mode restored");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_keys_start_twice_fails() {
        // Arrange
        let source = TerminalKeys::new();
        source.started.store(true, Ordering::SeqCst);

        // Act
        let result = source.start();

        // Assert
        assert!(matches!(result, Err(KeyboardError::AlreadyStarted)));
    }

    #[cfg(unix)]
    #[test]
    fn test_invalid_descriptor_is_not_a_terminal() {
        assert!(!raw_mode::is_terminal(-1));
    }
}
