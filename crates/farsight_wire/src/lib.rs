//! # Farsight Wire - Binary Protocol Foundation
//!
//! Shared binary stream codec and protocol types for the Farsight server and
//! client crates. Everything that crosses a socket or an offload stream is
//! expressed in terms of this crate:
//!
//! * **Binary streams** - Little-endian readers and writers with
//!   length-prefixed strings and blobs
//! * **Compression sub-streams** - Deflate-wrapped regions for bulky
//!   entity payloads
//! * **Protocol types** - Protocol version, network addresses, login reply
//!   records and status codes
//! * **Client messages** - The downstream message set a witness emits to its
//!   client, and the `Bundle` accumulator that batches them per tick
//!
//! The crate is deliberately free of any I/O; it only defines layouts.

pub mod error;
pub mod message;
pub mod status;
pub mod stream;
pub mod types;

pub use error::WireError;
pub use message::{Bundle, ClientMessage};
pub use status::LogOnStatus;
pub use stream::{BinaryReader, BinaryWriter, CompressionReader, CompressionWriter};
pub use types::{
    EntityId, IdAlias, LoginReplyRecord, NetAddress, ProtocolVersion, SessionKey, NO_ID_ALIAS,
};
