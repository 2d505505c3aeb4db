//! Binary codec for the hub command protocol.
//!
//! Frame layouts produced by this module (all single bytes):
//! ```text
//! motor speed          [8][00][81][port][11][51][00][speed]
//! input format setup   [10][00][41][port][00][kind][00][00][00][00]
//! mode info request    [6][00][22][port][00][kind]
//! port info request    [5][00][21][port][02]
//! ```
//! Byte 0 is always the total frame length, byte 1 the reserved hub id.

use thiserror::Error;
use tracing::trace;

use crate::domain::speed::Speed;
use crate::protocol::messages::{
    Frame, HubCommand, HubReply, InformationKind, MessageType, Port, DEFAULT_MODE, HUB_ID,
    MIN_REPLY_SIZE, OUTPUT_MODE_SPEED, OUTPUT_STARTUP_AND_COMPLETION,
    OUTPUT_SUBCOMMAND_WRITE_DIRECT_MODE, PORT_INFO_MODE_COMBINATIONS,
};

/// Broad failure classes shared by the protocol and transport layers.
///
/// Callers decide between retry and abort per class instead of per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Wrong identifiers or missing hardware; retrying cannot help.
    Configuration,
    /// Link hiccup or timeout; worth retrying with backoff.
    Transient,
    /// The hub sent something the protocol does not allow.
    ProtocolViolation,
}

/// Errors that can occur while encoding or decoding hub frames.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A reply buffer is shorter than the common header.
    #[error("message too short: need at least {MIN_REPLY_SIZE} bytes, got {len}")]
    ReplyTooShort { len: usize },

    /// An information kind name could not be parsed.
    #[error("unknown information kind: {0:?}")]
    UnknownInformationKind(String),
}

impl ProtocolError {
    /// Classifies the error for retry decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            ProtocolError::ReplyTooShort { .. } => ErrorClass::ProtocolViolation,
            ProtocolError::UnknownInformationKind(_) => ErrorClass::Configuration,
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`HubCommand`] into its wire frame.
///
/// # Examples
///
/// ```rust
/// use hub_core::protocol::codec::encode_command;
/// use hub_core::protocol::messages::{HubCommand, Port};
///
/// let frame = encode_command(&HubCommand::PortInformationRequest { port: Port(2) });
/// assert_eq!(frame.as_bytes(), &[0x05, 0x00, 0x21, 0x02, 0x02]);
/// ```
pub fn encode_command(command: &HubCommand) -> Frame {
    let frame = match *command {
        HubCommand::MotorSpeed { port, speed } => motor_speed_frame(port, speed),
        HubCommand::PortInputFormatSetup { port, kind } => {
            port_input_format_setup_frame(port, kind)
        }
        HubCommand::PortModeInformationRequest { port, kind } => {
            port_mode_information_request_frame(port, kind)
        }
        HubCommand::PortInformationRequest { port } => port_information_request_frame(port),
    };
    trace!("encoded {:?} as {:?}", command, frame);
    frame
}

/// Builds a PORT OUTPUT COMMAND frame setting `port` to `speed`.
///
/// The speed is inverted before encoding because the hub's forward polarity
/// is opposite to the vehicle's.
pub fn motor_speed_frame(port: Port, speed: Speed) -> Frame {
    build_frame(
        MessageType::PortOutputCommand,
        port,
        &[
            OUTPUT_STARTUP_AND_COMPLETION,
            OUTPUT_SUBCOMMAND_WRITE_DIRECT_MODE,
            OUTPUT_MODE_SPEED,
            speed.to_wire(),
        ],
    )
}

/// Builds a PORT INPUT FORMAT SETUP (SINGLE) frame.
///
/// The four trailing bytes are reserved and sent as zero.
pub fn port_input_format_setup_frame(port: Port, kind: InformationKind) -> Frame {
    build_frame(
        MessageType::PortInputFormatSetupSingle,
        port,
        &[DEFAULT_MODE, kind as u8, 0x00, 0x00, 0x00, 0x00],
    )
}

/// Builds a PORT MODE INFORMATION REQUEST frame.
pub fn port_mode_information_request_frame(port: Port, kind: InformationKind) -> Frame {
    build_frame(
        MessageType::PortModeInformationRequest,
        port,
        &[DEFAULT_MODE, kind as u8],
    )
}

/// Builds a PORT INFORMATION REQUEST frame asking for mode combinations.
pub fn port_information_request_frame(port: Port) -> Frame {
    build_frame(
        MessageType::PortInformationRequest,
        port,
        &[PORT_INFO_MODE_COMBINATIONS],
    )
}

/// Validates a raw reply read from the hub.
///
/// Only the size is checked: anything shorter than the common header is
/// rejected. The payload is not interpreted.
///
/// # Errors
///
/// Returns [`ProtocolError::ReplyTooShort`] for buffers under 3 bytes.
pub fn decode_reply(bytes: &[u8]) -> Result<HubReply, ProtocolError> {
    if bytes.len() < MIN_REPLY_SIZE {
        return Err(ProtocolError::ReplyTooShort { len: bytes.len() });
    }
    Ok(HubReply::new(bytes.to_vec()))
}

/// Formats bytes as space-separated lowercase hex (`"05 00 43"`).
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn build_frame(message_type: MessageType, port: Port, payload: &[u8]) -> Frame {
    let len = 4 + payload.len();
    let mut buf = Vec::with_capacity(len);
    buf.push(len as u8);
    buf.push(HUB_ID);
    buf.push(message_type as u8);
    buf.push(port.id());
    buf.extend_from_slice(payload);
    Frame::from_bytes(buf)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
