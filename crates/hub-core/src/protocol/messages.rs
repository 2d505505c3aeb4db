//! All hub protocol message types.
//!
//! Every frame exchanged with the hub starts with the same three bytes:
//!
//! ```text
//! [length:1][hub_id:1][message_type:1][port:1][payload...]
//! ```
//!
//! `length` counts the whole frame including itself, `hub_id` is reserved and
//! always `0x00`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::speed::Speed;
use crate::protocol::codec::ProtocolError;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Reserved hub identifier byte (offset 1 of every frame).
pub const HUB_ID: u8 = 0x00;

/// Size of the common prefix (length, hub id, message type).
pub const COMMON_HEADER_SIZE: usize = 3;

/// Minimum size of a reply the decoder accepts.
pub const MIN_REPLY_SIZE: usize = COMMON_HEADER_SIZE;

/// Port output startup/completion flags: execute immediately, request feedback.
pub const OUTPUT_STARTUP_AND_COMPLETION: u8 = 0x11;

/// Port output sub-command: write direct mode data.
pub const OUTPUT_SUBCOMMAND_WRITE_DIRECT_MODE: u8 = 0x51;

/// Mode byte used by the direct speed write.
pub const OUTPUT_MODE_SPEED: u8 = 0x00;

/// Port information request type: possible mode combinations.
///
/// `0x00` (port value) and `0x01` (mode info) exist but are not issued.
pub const PORT_INFO_MODE_COMBINATIONS: u8 = 0x02;

/// Mode queried by the mode information and input format requests.
pub const DEFAULT_MODE: u8 = 0x00;

// ── Message type codes ────────────────────────────────────────────────────────

/// Message type codes issued by this controller and the replies it reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    PortInformationRequest = 0x21,
    PortModeInformationRequest = 0x22,
    PortInputFormatSetupSingle = 0x41,
    PortOutputCommand = 0x81,
    // Hub -> controller
    PortInformation = 0x43,
    PortModeInformation = 0x44,
    PortInputFormatSingle = 0x47,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x21 => Ok(MessageType::PortInformationRequest),
            0x22 => Ok(MessageType::PortModeInformationRequest),
            0x41 => Ok(MessageType::PortInputFormatSetupSingle),
            0x81 => Ok(MessageType::PortOutputCommand),
            0x43 => Ok(MessageType::PortInformation),
            0x44 => Ok(MessageType::PortModeInformation),
            0x47 => Ok(MessageType::PortInputFormatSingle),
            _ => Err(()),
        }
    }
}

// ── Port ──────────────────────────────────────────────────────────────────────

/// A hub-side output/input channel.
///
/// The protocol addresses any `u8`; the vehicle only uses the three constants
/// below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Port(pub u8);

impl Port {
    /// Front drive motor.
    pub const FRONT_DRIVE: Port = Port(0);
    /// Rear drive motor.
    pub const REAR_DRIVE: Port = Port(1);
    /// Steering motor.
    pub const STEERING: Port = Port(2);

    /// Raw port number as written on the wire.
    pub fn id(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port {}", self.0)
    }
}

// ── Information kind ──────────────────────────────────────────────────────────

/// What port metadata a mode information or input format request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum InformationKind {
    Name = 0x00,
    Raw = 0x01,
    Pct = 0x02,
    Si = 0x03,
    Symbol = 0x04,
    Mapping = 0x05,
    Internal = 0x06,
    Bias = 0x07,
    Capability = 0x08,
    Format = 0x80,
}

impl InformationKind {
    /// Every kind, in wire order.
    pub const ALL: [InformationKind; 10] = [
        InformationKind::Name,
        InformationKind::Raw,
        InformationKind::Pct,
        InformationKind::Si,
        InformationKind::Symbol,
        InformationKind::Mapping,
        InformationKind::Internal,
        InformationKind::Bias,
        InformationKind::Capability,
        InformationKind::Format,
    ];

    /// Lowercase name accepted by [`FromStr`].
    pub fn as_str(self) -> &'static str {
        match self {
            InformationKind::Name => "name",
            InformationKind::Raw => "raw",
            InformationKind::Pct => "pct",
            InformationKind::Si => "si",
            InformationKind::Symbol => "symbol",
            InformationKind::Mapping => "mapping",
            InformationKind::Internal => "internal",
            InformationKind::Bias => "bias",
            InformationKind::Capability => "capability",
            InformationKind::Format => "format",
        }
    }
}

impl FromStr for InformationKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        InformationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| ProtocolError::UnknownInformationKind(s.to_string()))
    }
}

impl fmt::Display for InformationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// A semantic command for the hub, turned into a [`Frame`] by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubCommand {
    /// PORT OUTPUT COMMAND (0x81): direct speed write.
    MotorSpeed { port: Port, speed: Speed },
    /// PORT INPUT FORMAT SETUP SINGLE (0x41).
    PortInputFormatSetup { port: Port, kind: InformationKind },
    /// PORT MODE INFORMATION REQUEST (0x22).
    PortModeInformationRequest { port: Port, kind: InformationKind },
    /// PORT INFORMATION REQUEST (0x21), mode combinations.
    PortInformationRequest { port: Port },
}

impl HubCommand {
    /// Returns the message type code used on the wire.
    pub fn message_type(&self) -> MessageType {
        match self {
            HubCommand::MotorSpeed { .. } => MessageType::PortOutputCommand,
            HubCommand::PortInputFormatSetup { .. } => MessageType::PortInputFormatSetupSingle,
            HubCommand::PortModeInformationRequest { .. } => {
                MessageType::PortModeInformationRequest
            }
            HubCommand::PortInformationRequest { .. } => MessageType::PortInformationRequest,
        }
    }

    /// Returns the port the command addresses.
    pub fn port(&self) -> Port {
        match self {
            HubCommand::MotorSpeed { port, .. }
            | HubCommand::PortInputFormatSetup { port, .. }
            | HubCommand::PortModeInformationRequest { port, .. }
            | HubCommand::PortInformationRequest { port } => *port,
        }
    }

    /// The message type of the hub's reply, if the command has one.
    pub fn expected_reply(&self) -> Option<MessageType> {
        match self {
            HubCommand::MotorSpeed { .. } => None,
            HubCommand::PortInputFormatSetup { .. } => Some(MessageType::PortInputFormatSingle),
            HubCommand::PortModeInformationRequest { .. } => Some(MessageType::PortModeInformation),
            HubCommand::PortInformationRequest { .. } => Some(MessageType::PortInformation),
        }
    }

    /// `true` when the hub answers this command with a reply that must be read.
    pub fn expects_reply(&self) -> bool {
        self.expected_reply().is_some()
    }
}

// ── Frame ─────────────────────────────────────────────────────────────────────

/// An encoded, length-prefixed frame ready to be written to the hub.
///
/// Frames are only produced by [`crate::protocol::codec`], which guarantees
/// `bytes[0] == bytes.len()`. There is no mutable access.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Frame(Box<[u8]>);

impl Frame {
    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Self {
        debug_assert_eq!(bytes.first().copied().map(usize::from), Some(bytes.len()));
        Self(bytes.into_boxed_slice())
    }

    /// The encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of bytes in the frame.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`; a frame has at least its length byte.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The declared length byte.
    pub fn declared_len(&self) -> u8 {
        self.0[0]
    }

    /// The message type byte.
    pub fn message_type_byte(&self) -> u8 {
        self.0[2]
    }

    /// The addressed port.
    pub fn port(&self) -> Port {
        Port(self.0[3])
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame[{}]", crate::protocol::codec::hex_dump(&self.0))
    }
}

// ── Replies ───────────────────────────────────────────────────────────────────

/// A reply read back from the hub that passed the size check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubReply {
    bytes: Vec<u8>,
}

impl HubReply {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        debug_assert!(bytes.len() >= MIN_REPLY_SIZE);
        Self { bytes }
    }

    /// Length the hub declared in byte 0.
    pub fn declared_len(&self) -> u8 {
        self.bytes[0]
    }

    /// Message type byte of the reply.
    pub fn message_type_byte(&self) -> u8 {
        self.bytes[2]
    }

    /// The reply's message type, or `None` for codes this controller never reads.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::try_from(self.message_type_byte()).ok()
    }

    /// `true` when the declared length disagrees with the bytes received.
    pub fn length_mismatch(&self) -> bool {
        usize::from(self.declared_len()) != self.bytes.len()
    }

    /// All bytes as received.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Space-separated lowercase hex of the received bytes.
    pub fn hex(&self) -> String {
        crate::protocol::codec::hex_dump(&self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_information_kind_wire_values_are_protocol_constants() {
        assert_eq!(InformationKind::Name as u8, 0x00);
        assert_eq!(InformationKind::Bias as u8, 0x07);
        assert_eq!(InformationKind::Capability as u8, 0x08);
        assert_eq!(InformationKind::Format as u8, 0x80);
    }

    #[test]
    fn test_information_kind_values_are_unique() {
        let mut values: Vec<u8> = InformationKind::ALL.iter().map(|k| *k as u8).collect();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), InformationKind::ALL.len());
    }

    #[test]
    fn test_information_kind_parses_case_insensitively() {
        assert_eq!("SI".parse::<InformationKind>(), Ok(InformationKind::Si));
        assert_eq!(" mapping ".parse::<InformationKind>(), Ok(InformationKind::Mapping));
    }

    #[test]
    fn test_information_kind_rejects_unknown_name() {
        let result = "volume".parse::<InformationKind>();
        assert_eq!(
            result,
            Err(ProtocolError::UnknownInformationKind("volume".to_string()))
        );
    }

    #[test]
    fn test_motor_speed_does_not_expect_reply() {
        let cmd = HubCommand::MotorSpeed {
            port: Port::STEERING,
            speed: Speed::NEUTRAL,
        };
        assert!(!cmd.expects_reply());
        assert_eq!(cmd.message_type(), MessageType::PortOutputCommand);
    }

    #[test]
    fn test_introspection_commands_expect_reply() {
        let port = Port(3);
        let commands = [
            HubCommand::PortInputFormatSetup { port, kind: InformationKind::Raw },
            HubCommand::PortModeInformationRequest { port, kind: InformationKind::Name },
            HubCommand::PortInformationRequest { port },
        ];
        for cmd in commands {
            assert!(cmd.expects_reply(), "{cmd:?} must expect a reply");
            assert_eq!(cmd.port(), port);
        }
        let replies: Vec<u8> = commands
            .iter()
            .filter_map(|cmd| cmd.expected_reply())
            .map(|mt| mt as u8)
            .collect();
        assert_eq!(replies, vec![0x47, 0x44, 0x43]);
    }

    #[test]
    fn test_message_type_try_from_round_trips() {
        for mt in [
            MessageType::PortInformationRequest,
            MessageType::PortModeInformationRequest,
            MessageType::PortInputFormatSetupSingle,
            MessageType::PortOutputCommand,
            MessageType::PortInformation,
            MessageType::PortModeInformation,
            MessageType::PortInputFormatSingle,
        ] {
            assert_eq!(MessageType::try_from(mt as u8), Ok(mt));
        }
        assert!(MessageType::try_from(0x00).is_err());
    }
}
