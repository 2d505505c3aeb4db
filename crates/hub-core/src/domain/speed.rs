//! Signed motor speed and its single-byte wire encoding.
//!
//! The logical range is `[-100, 100]`. On the wire the value is inverted
//! (the hub's forward is the vehicle's backward) and stored as one unsigned
//! byte, negative values biased by +256:
//!
//! ```text
//! logical   +20  ->  inverted -20  ->  wire 0xEC (236)
//! logical   -20  ->  inverted +20  ->  wire 0x14 (20)
//! logical     0  ->  wire 0x00
//! ```

use std::fmt;

/// A motor speed that is always inside `[-100, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Speed(i8);

impl Speed {
    /// Full reverse.
    pub const MIN: Speed = Speed(-100);
    /// Full forward.
    pub const MAX: Speed = Speed(100);
    /// Stopped.
    pub const NEUTRAL: Speed = Speed(0);

    /// Creates a speed, clamping `value` into `[-100, 100]`.
    pub fn clamped(value: i32) -> Self {
        Speed(value.clamp(Self::MIN.0 as i32, Self::MAX.0 as i32) as i8)
    }

    /// Returns this speed changed by `delta`, clamped to the valid range.
    pub fn step(self, delta: i32) -> Self {
        Self::clamped(i32::from(self.0).saturating_add(delta))
    }

    /// The logical value.
    pub fn value(self) -> i8 {
        self.0
    }

    /// The opposite direction at the same magnitude.
    pub fn reversed(self) -> Self {
        Speed(-self.0)
    }

    /// Encodes the speed as the byte sent in a motor speed frame.
    pub fn to_wire(self) -> u8 {
        let inverted = -(self.0 as i16);
        if inverted < 0 {
            (inverted + 256) as u8
        } else {
            inverted as u8
        }
    }

    /// Decodes a wire byte back to a logical speed.
    ///
    /// Bytes that no valid speed produces are clamped.
    pub fn from_wire(byte: u8) -> Self {
        let inverted = if byte > 127 { byte as i32 - 256 } else { byte as i32 };
        Self::clamped(-inverted)
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
