//! Domain entities for the hub vehicle.
//!
//! Pure values with no I/O: the clamped motor speed, the hub's Bluetooth
//! address, and the operator's keystroke vocabulary.

pub mod address;
pub mod command;
pub mod speed;
