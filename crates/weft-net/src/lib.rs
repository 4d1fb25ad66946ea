//! # Weft Net
//!
//! Peer-to-peer plumbing for Weft threads.
//!
//! ## Overview
//!
//! Peers are addressed by identity key. A [`Transport`] offers two ways to
//! reach one: a request that waits for a reply (fetching a block, asking for
//! a head) and a fire-and-forget message (pushing a newly committed block).
//! Inbound traffic arrives as a stream of [`Inbound`] items that the owner
//! dispatches to a [`Handler`].
//!
//! ## Message Flow
//!
//! ```text
//! Author                              Peer
//!   |-------- Block (push) ------------>|
//!   |<------- GetBlock (missing parent)-|
//!   |-------- BlockData --------------->|
//!   |<------- GetHead ------------------|
//!   |-------- Head -------------------->|
//! ```

pub mod error;
pub mod messages;
pub mod transport;

pub use error::{NetError, Result};
pub use messages::{limits, Envelope, ErrorCode, Message, PROTOCOL_VERSION};
pub use transport::{
    memory::MemoryNetwork, memory::MemoryTransport, Handler, Inbound, Transport,
};
