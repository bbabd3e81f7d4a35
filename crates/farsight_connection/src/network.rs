//! Transport seams for login traffic.
//!
//! Login code never touches sockets directly: it sends request payloads
//! through a [`NetworkInterface`] and consumes the events the interface
//! reports back. Interfaces are created by a [`NetworkFactory`], which is
//! what gives base-application retries their distinct source ports.

use std::time::{Duration, Instant};

use farsight_wire::NetAddress;

use crate::config::TransportKind;
use crate::error::LoginError;

/// Why a request or channel failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkReason {
    /// No reply within the request timeout.
    Timeout,
    /// The underlying channel went away.
    ChannelLost,
    /// The local end is shutting down.
    ShuttingDown,
    /// The peer actively refused the port (ICMP port unreachable or
    /// equivalent).
    NoSuchPort,
    /// A reply arrived but could not be decoded.
    Corrupted,
}

/// One observable outcome on an interface.
#[derive(Debug)]
pub enum NetworkEvent {
    Reply {
        attempt: u32,
        from: NetAddress,
        bytes: Vec<u8>,
    },
    Failure {
        attempt: u32,
        reason: NetworkReason,
    },
}

/// Progress of a transport channel's establishment handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenState {
    /// Handshake in flight; requests queue until it completes.
    Opening,
    /// Channel established, requests flow.
    Ready,
    /// Handshake failed or was cancelled.
    Failed(NetworkReason),
}

/// Establishes a transport channel before requests can flow.
///
/// Udp channels are connectionless and report [`OpenState::Ready`] at
/// once; Tcp and WebSocket transports complete a connection handshake
/// first and can be cancelled while it is in flight.
pub trait ConnectionOpener: Send {
    /// Drives the handshake up to `now`.
    fn poll_open(&mut self, now: Instant) -> OpenState;

    /// Abandons an in-flight handshake. A ready channel stays ready.
    fn cancel(&mut self);
}

/// A bound local endpoint capable of request/reply exchanges.
///
/// Implementations deliver at most one event per outstanding request and
/// none at all after [`cancel_requests`](Self::cancel_requests).
pub trait NetworkInterface: Send {
    fn local_addr(&self) -> NetAddress;

    /// Sends `bytes` to `peer`, expecting one reply within `timeout`.
    /// `attempt` tags the resulting event.
    fn send_request(
        &mut self,
        peer: NetAddress,
        attempt: u32,
        bytes: Vec<u8>,
        timeout: Duration,
        now: Instant,
    ) -> Result<(), LoginError>;

    /// Collects events that have occurred up to `now`.
    fn poll(&mut self, now: Instant) -> Vec<NetworkEvent>;

    /// Drops every outstanding request without delivering events.
    fn cancel_requests(&mut self);
}

/// Creates interfaces for a given transport.
pub trait NetworkFactory: Send {
    fn open_interface(
        &mut self,
        kind: TransportKind,
    ) -> Result<Box<dyn NetworkInterface>, LoginError>;
}
