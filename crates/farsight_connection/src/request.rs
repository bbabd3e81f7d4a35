//! One in-flight login attempt.

use std::time::{Duration, Instant};

use farsight_wire::NetAddress;
use tracing::warn;

use crate::error::LoginError;
use crate::network::{NetworkEvent, NetworkInterface};
use crate::server_connection::ServerConnection;

/// A single request sent to a login or base application.
///
/// Login-application attempts share the connection's primary interface and
/// are told apart by attempt number. Base-application attempts each own an
/// interface of their own, so every retry arrives from a distinct source
/// port and the winner's port becomes the session's channel.
pub struct LoginRequest {
    attempt: u32,
    peer: NetAddress,
    interface: Option<Box<dyn NetworkInterface>>,
    finished: bool,
}

impl LoginRequest {
    /// Sends `bytes` over the connection's shared interface.
    pub fn start_shared(
        attempt: u32,
        peer: NetAddress,
        conn: &mut ServerConnection,
        bytes: Vec<u8>,
        timeout: Duration,
        now: Instant,
    ) -> Result<Self, LoginError> {
        conn.interface()?.send_request(peer, attempt, bytes, timeout, now)?;
        Ok(Self {
            attempt,
            peer,
            interface: None,
            finished: false,
        })
    }

    /// Sends `bytes` over `iface`, which this request then owns.
    pub fn start_owned(
        attempt: u32,
        peer: NetAddress,
        mut iface: Box<dyn NetworkInterface>,
        bytes: Vec<u8>,
        timeout: Duration,
        now: Instant,
    ) -> Result<Self, LoginError> {
        iface.send_request(peer, attempt, bytes, timeout, now)?;
        Ok(Self {
            attempt,
            peer,
            interface: Some(iface),
            finished: false,
        })
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn peer(&self) -> NetAddress {
        self.peer
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn local_addr(&self) -> Option<NetAddress> {
        self.interface.as_ref().map(|i| i.local_addr())
    }

    /// Events from this request's owned interface, if it has one. Shared
    /// requests surface their events through the connection's interface.
    pub fn poll(&mut self, now: Instant) -> Vec<NetworkEvent> {
        match self.interface.as_mut() {
            Some(iface) if !self.finished => iface.poll(now),
            _ => Vec::new(),
        }
    }

    /// Hands over the owned interface, for adoption by the connection when
    /// this attempt wins.
    pub fn take_interface(&mut self) -> Option<Box<dyn NetworkInterface>> {
        self.interface.take()
    }

    /// Cancels the attempt. Idempotent; the owned interface, if still held,
    /// is condemned so stray replies cannot resurface.
    pub fn finish(&mut self, conn: &mut ServerConnection) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Some(iface) = self.interface.take() {
            conn.condemn_interface(iface);
        }
    }
}

impl Drop for LoginRequest {
    fn drop(&mut self) {
        if !self.finished {
            warn!(attempt = self.attempt, peer = %self.peer, "login request dropped while live");
        }
    }
}
