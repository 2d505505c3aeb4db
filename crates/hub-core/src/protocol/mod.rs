//! Protocol module containing message types and the binary codec.

pub mod codec;
pub mod messages;

pub use codec::{decode_reply, encode_command, hex_dump, ErrorClass, ProtocolError};
pub use messages::*;
