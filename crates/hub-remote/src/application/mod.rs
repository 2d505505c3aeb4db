//! Application layer use cases for the hub remote.
//!
//! Use cases in this layer orchestrate domain values from `hub_core` and
//! depend only on traits, never on the Bluetooth stack or the terminal.
//!
//! - **`dispatch_command`** – Maps operator keystrokes to motor commands and
//!   owns the current drive speed.

pub mod dispatch_command;
