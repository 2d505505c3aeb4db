//! Infrastructure layer for the hub remote.
//!
//! Contains OS-facing adapters: the Bluetooth transport, the protocol
//! session that owns it, terminal keystroke input, and configuration storage.
//!
//! **Dependency rule**: this layer may depend on `application` and `hub_core`,
//! but MUST NOT be imported by the `application` or domain layers.

pub mod keyboard;
pub mod network;
pub mod storage;
pub mod transport;
