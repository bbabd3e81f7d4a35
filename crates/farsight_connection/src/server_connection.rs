//! Shared connection state threaded through the login machinery.
//!
//! Owns the pieces every attempt needs access to: the retry policy, the
//! network factory and the primary interface, the challenge registry and
//! executor, the params cipher, and the session key as it evolves across
//! the two login phases.

use std::sync::Arc;

use farsight_wire::SessionKey;

use crate::challenge::ChallengeFactoryRegistry;
use crate::config::{LoginConfig, TransportKind};
use crate::error::LoginError;
use crate::network::{NetworkFactory, NetworkInterface};
use crate::params::ParamsCipher;
use crate::task::ChallengeExecutor;

pub struct ServerConnection {
    config: LoginConfig,
    network: Box<dyn NetworkFactory>,
    registry: Arc<ChallengeFactoryRegistry>,
    executor: Box<dyn ChallengeExecutor>,
    cipher: Arc<dyn ParamsCipher>,
    /// Primary interface, shared by login-application attempts. Taken by
    /// the first base-application attempt and replaced by the winner's.
    interface: Option<Box<dyn NetworkInterface>>,
    session_key: SessionKey,
    /// Interfaces belonging to finished attempts, held until the handler
    /// completes so late packets have somewhere to die quietly.
    condemned: Vec<Box<dyn NetworkInterface>>,
}

impl ServerConnection {
    pub fn new(
        config: LoginConfig,
        network: Box<dyn NetworkFactory>,
        registry: Arc<ChallengeFactoryRegistry>,
        executor: Box<dyn ChallengeExecutor>,
        cipher: Arc<dyn ParamsCipher>,
    ) -> Self {
        Self {
            config,
            network,
            registry,
            executor,
            cipher,
            interface: None,
            session_key: 0,
            condemned: Vec::new(),
        }
    }

    pub fn config(&self) -> &LoginConfig {
        &self.config
    }

    pub fn registry(&self) -> &ChallengeFactoryRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &dyn ChallengeExecutor {
        self.executor.as_ref()
    }

    pub fn cipher(&self) -> &dyn ParamsCipher {
        self.cipher.as_ref()
    }

    pub fn session_key(&self) -> SessionKey {
        self.session_key
    }

    pub fn set_session_key(&mut self, key: SessionKey) {
        self.session_key = key;
    }

    pub fn transport(&self) -> TransportKind {
        self.config.transport
    }

    /// The primary interface, opening it on first use.
    pub fn interface(&mut self) -> Result<&mut dyn NetworkInterface, LoginError> {
        if self.interface.is_none() {
            self.interface = Some(self.network.open_interface(self.config.transport)?);
        }
        // Populated just above.
        match self.interface.as_deref_mut() {
            Some(iface) => Ok(iface),
            None => unreachable!(),
        }
    }

    pub fn has_interface(&self) -> bool {
        self.interface.is_some()
    }

    /// Steals the primary interface, leaving the slot empty.
    pub fn take_interface(&mut self) -> Option<Box<dyn NetworkInterface>> {
        self.interface.take()
    }

    /// Installs `iface` as the primary interface, condemning any previous
    /// occupant.
    pub fn adopt_interface(&mut self, iface: Box<dyn NetworkInterface>) {
        if let Some(old) = self.interface.replace(iface) {
            self.condemned.push(old);
        }
    }

    /// A fresh interface on a new local port.
    pub fn fresh_interface(&mut self) -> Result<Box<dyn NetworkInterface>, LoginError> {
        self.network.open_interface(self.config.transport)
    }

    /// Parks a dead attempt's interface until [`reap_condemned`].
    ///
    /// [`reap_condemned`]: Self::reap_condemned
    pub fn condemn_interface(&mut self, mut iface: Box<dyn NetworkInterface>) {
        iface.cancel_requests();
        self.condemned.push(iface);
    }

    pub fn reap_condemned(&mut self) {
        self.condemned.clear();
    }
}
