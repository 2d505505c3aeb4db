//! # hub-core
//!
//! Shared library for the hub remote containing the command frame codec,
//! the reply decoder, and the small domain vocabulary of the vehicle.
//!
//! It has zero dependencies on OS APIs, Bluetooth stacks, or async runtimes.
//!
//! - **`protocol`** – How bytes travel to and from the hub. Commands are
//!   encoded into short length-prefixed frames; replies are size-checked and
//!   hex-dumped.
//!
//! - **`domain`** – [`Speed`] with its inverted single-byte encoding,
//!   [`HubAddress`], and the [`OperatorCommand`] key bindings.

pub mod domain;
pub mod protocol;

pub use domain::address::{AddressError, HubAddress};
pub use domain::command::OperatorCommand;
pub use domain::speed::Speed;
pub use protocol::codec::{decode_reply, encode_command, ErrorClass, ProtocolError};
pub use protocol::messages::{Frame, HubCommand, HubReply, InformationKind, MessageType, Port};
