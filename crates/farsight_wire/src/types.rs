//! Core protocol types shared between the AoI and connection subsystems.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::error::WireError;
use crate::stream::{BinaryReader, BinaryWriter};

/// Server-assigned entity identifier.
pub type EntityId = u32;

/// Per-witness one-byte alias for a volatile entity id.
pub type IdAlias = u8;

/// Sentinel alias meaning "no alias assigned, use the full id".
pub const NO_ID_ALIAS: IdAlias = 0xFF;

/// Session key handed out by the login and base applications.
pub type SessionKey = u32;

/// Four-component protocol version carried in every login request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub subpatch: u8,
}

impl ProtocolVersion {
    /// The version this build speaks.
    pub const CURRENT: ProtocolVersion = ProtocolVersion {
        major: 2,
        minor: 14,
        patch: 0,
        subpatch: 0,
    };

    /// Whether a peer at `other` can interoperate with this version.
    ///
    /// Compatibility is exact equality of all four components. Any two
    /// builds that differ anywhere in the tuple renegotiate from scratch.
    pub fn supports(&self, other: ProtocolVersion) -> bool {
        *self == other
    }

    pub fn write(&self, w: &mut BinaryWriter) {
        w.write_u8(self.major);
        w.write_u8(self.minor);
        w.write_u8(self.patch);
        w.write_u8(self.subpatch);
    }

    pub fn read(r: &mut BinaryReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            major: r.read_u8()?,
            minor: r.read_u8()?,
            patch: r.read_u8()?,
            subpatch: r.read_u8()?,
        })
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.patch, self.subpatch)
    }
}

/// IPv4 address and port in wire layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NetAddress {
    pub ip: u32,
    pub port: u16,
}

impl NetAddress {
    pub const NONE: NetAddress = NetAddress { ip: 0, port: 0 };

    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self {
            ip: u32::from(ip),
            port,
        }
    }

    pub fn is_none(&self) -> bool {
        self.ip == 0 && self.port == 0
    }

    /// The /24 network prefix, used for NAT misconfiguration diagnostics.
    pub fn subnet(&self) -> u32 {
        self.ip & 0xFF_FF_FF_00
    }

    pub fn write(&self, w: &mut BinaryWriter) {
        w.write_u32(self.ip);
        w.write_u16(self.port);
    }

    pub fn read(r: &mut BinaryReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            ip: r.read_u32()?,
            port: r.read_u16()?,
        })
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", Ipv4Addr::from(self.ip), self.port)
    }
}

impl From<SocketAddrV4> for NetAddress {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(*addr.ip(), addr.port())
    }
}

impl From<NetAddress> for SocketAddr {
    fn from(addr: NetAddress) -> Self {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(addr.ip), addr.port))
    }
}

/// Payload of a successful login reply: where to go next, and the session
/// key proving this client to that address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginReplyRecord {
    pub server_addr: NetAddress,
    pub session_key: SessionKey,
}

impl LoginReplyRecord {
    pub fn write(&self, w: &mut BinaryWriter) {
        self.server_addr.write(w);
        w.write_u32(self.session_key);
    }

    pub fn read(r: &mut BinaryReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            server_addr: NetAddress::read(r)?,
            session_key: r.read_u32()?,
        })
    }
}
