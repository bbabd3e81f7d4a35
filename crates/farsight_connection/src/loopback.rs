//! In-process network fabric.
//!
//! Binds handler closures to addresses and routes request payloads to them
//! synchronously, which makes login exchanges fully deterministic: time only
//! advances through the `now` values passed to `send_request` and `poll`.
//! Used by the demo binary and the crate tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use farsight_wire::NetAddress;

use crate::config::TransportKind;
use crate::error::LoginError;
use crate::network::{
    ConnectionOpener, NetworkEvent, NetworkFactory, NetworkInterface, NetworkReason, OpenState,
};

/// What a bound handler does with an incoming request.
pub enum SimAction {
    /// Deliver this reply on the caller's next poll.
    Reply(Vec<u8>),
    /// Swallow the request; the caller will time out.
    Drop,
    /// Refuse the request as if the port were closed.
    PortClosed,
}

type SimHandler = Box<dyn FnMut(&[u8]) -> SimAction + Send>;

#[derive(Default)]
struct FabricInner {
    handlers: HashMap<NetAddress, SimHandler>,
    next_port: u16,
}

/// Shared routing table for loopback interfaces.
#[derive(Clone, Default)]
pub struct LoopbackFabric {
    inner: Arc<Mutex<FabricInner>>,
}

impl LoopbackFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `handler` to `addr`, replacing any previous binding.
    pub fn bind(
        &self,
        addr: NetAddress,
        handler: impl FnMut(&[u8]) -> SimAction + Send + 'static,
    ) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.handlers.insert(addr, Box::new(handler));
    }

    pub fn unbind(&self, addr: NetAddress) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.handlers.remove(&addr);
    }

    /// A factory whose interfaces route through this fabric.
    pub fn factory(&self) -> LoopbackFactory {
        LoopbackFactory {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub struct LoopbackFactory {
    inner: Arc<Mutex<FabricInner>>,
}

impl NetworkFactory for LoopbackFactory {
    fn open_interface(
        &mut self,
        kind: TransportKind,
    ) -> Result<Box<dyn NetworkInterface>, LoginError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.next_port += 1;
        let local = NetAddress {
            ip: 0x7F_00_00_01,
            port: inner.next_port,
        };
        let opener = LoopbackOpener::new(kind);
        Ok(Box::new(LoopbackInterface {
            fabric: Arc::clone(&self.inner),
            local,
            channel: opener.state,
            opener: Box::new(opener),
            queued: Vec::new(),
            ready: Vec::new(),
            pending: Vec::new(),
        }))
    }
}

/// In-memory handshake: Udp is ready at once, stream transports complete
/// on their first poll.
struct LoopbackOpener {
    state: OpenState,
}

impl LoopbackOpener {
    fn new(kind: TransportKind) -> Self {
        let state = match kind {
            TransportKind::Udp => OpenState::Ready,
            TransportKind::Tcp | TransportKind::WebSocket => OpenState::Opening,
        };
        Self { state }
    }
}

impl ConnectionOpener for LoopbackOpener {
    fn poll_open(&mut self, _now: Instant) -> OpenState {
        if self.state == OpenState::Opening {
            self.state = OpenState::Ready;
        }
        self.state
    }

    fn cancel(&mut self) {
        if self.state == OpenState::Opening {
            self.state = OpenState::Failed(NetworkReason::ShuttingDown);
        }
    }
}

struct QueuedSend {
    peer: NetAddress,
    attempt: u32,
    bytes: Vec<u8>,
    deadline: Instant,
}

struct PendingTimeout {
    attempt: u32,
    deadline: Instant,
}

struct LoopbackInterface {
    fabric: Arc<Mutex<FabricInner>>,
    local: NetAddress,
    opener: Box<dyn ConnectionOpener>,
    /// Last observed opener state; advanced by `poll`.
    channel: OpenState,
    /// Requests sent before the channel handshake finished.
    queued: Vec<QueuedSend>,
    ready: Vec<NetworkEvent>,
    pending: Vec<PendingTimeout>,
}

impl LoopbackInterface {
    fn dispatch(&mut self, peer: NetAddress, attempt: u32, bytes: &[u8], deadline: Instant) {
        let mut inner = self.fabric.lock().unwrap_or_else(|e| e.into_inner());
        let action = match inner.handlers.get_mut(&peer) {
            Some(handler) => handler(bytes),
            None => SimAction::PortClosed,
        };
        drop(inner);

        match action {
            SimAction::Reply(reply) => self.ready.push(NetworkEvent::Reply {
                attempt,
                from: peer,
                bytes: reply,
            }),
            SimAction::Drop => self.pending.push(PendingTimeout { attempt, deadline }),
            SimAction::PortClosed => self.ready.push(NetworkEvent::Failure {
                attempt,
                reason: NetworkReason::NoSuchPort,
            }),
        }
    }
}

impl NetworkInterface for LoopbackInterface {
    fn local_addr(&self) -> NetAddress {
        self.local
    }

    fn send_request(
        &mut self,
        peer: NetAddress,
        attempt: u32,
        bytes: Vec<u8>,
        timeout: Duration,
        now: Instant,
    ) -> Result<(), LoginError> {
        let deadline = now + timeout;
        match self.channel {
            OpenState::Ready => self.dispatch(peer, attempt, &bytes, deadline),
            OpenState::Opening => self.queued.push(QueuedSend {
                peer,
                attempt,
                bytes,
                deadline,
            }),
            OpenState::Failed(reason) => self.ready.push(NetworkEvent::Failure {
                attempt,
                reason,
            }),
        }
        Ok(())
    }

    fn poll(&mut self, now: Instant) -> Vec<NetworkEvent> {
        if self.channel == OpenState::Opening {
            self.channel = self.opener.poll_open(now);
            let queued = std::mem::take(&mut self.queued);
            match self.channel {
                OpenState::Ready => {
                    for send in queued {
                        self.dispatch(send.peer, send.attempt, &send.bytes, send.deadline);
                    }
                }
                OpenState::Failed(reason) => {
                    for send in queued {
                        self.ready.push(NetworkEvent::Failure {
                            attempt: send.attempt,
                            reason,
                        });
                    }
                }
                OpenState::Opening => self.queued = queued,
            }
        }

        let mut events = std::mem::take(&mut self.ready);
        let mut i = 0;
        while i < self.pending.len() {
            if now >= self.pending[i].deadline {
                let expired = self.pending.swap_remove(i);
                events.push(NetworkEvent::Failure {
                    attempt: expired.attempt,
                    reason: NetworkReason::Timeout,
                });
            } else {
                i += 1;
            }
        }
        events
    }

    fn cancel_requests(&mut self) {
        self.opener.cancel();
        self.queued.clear();
        self.ready.clear();
        self.pending.clear();
    }
}
