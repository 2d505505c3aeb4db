//! Network infrastructure: the link to the hub once a transport exists.
//!
//! # Sub-modules
//!
//! - **`connection_manager`** – Bounded connection attempts with a fixed delay
//!   between them.
//!
//! - **`hub_session`** – The protocol session task that owns the transport,
//!   plus the notification bridge that turns pending reads into
//!   [`hub_session::SessionEvent`]s.
//!
//! - **`retry`** – Exponential backoff used for transient write and read
//!   failures.

pub mod connection_manager;
pub mod hub_session;
pub mod retry;
