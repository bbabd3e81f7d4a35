//! In-process login and base applications.
//!
//! Server-side halves of the login protocol, small enough to run inside a
//! test or the demo binary. They speak the same wire layout the real
//! cluster would and plug straight into a [`LoopbackFabric`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use farsight_wire::{
    BinaryReader, BinaryWriter, LogOnStatus, LoginReplyRecord, NetAddress, ProtocolVersion,
    SessionKey,
};

use crate::challenge::{ChallengeFactoryRegistry, LoginChallenge};
use crate::error::LoginError;
use crate::loopback::{LoopbackFabric, SimAction};
use crate::params::{LogOnParams, ParamsCipher};

/// A complete failure reply: status byte plus a message string.
pub fn failure_reply(status: LogOnStatus, message: &str) -> Vec<u8> {
    let mut w = BinaryWriter::new();
    w.write_u8(status as u8);
    w.write_string(message);
    w.into_bytes()
}

/// Simulated login application: checks the protocol version, optionally
/// issues and verifies a challenge, validates credentials, and hands out
/// the base application address with a session key.
pub struct SimLoginApp {
    registry: Arc<ChallengeFactoryRegistry>,
    cipher: Arc<dyn ParamsCipher>,
    accounts: HashMap<String, String>,
    challenge_type: Option<String>,
    outstanding: Option<Box<dyn LoginChallenge>>,
    base_app_addr: NetAddress,
    session_key: SessionKey,
}

impl SimLoginApp {
    pub fn new(
        registry: Arc<ChallengeFactoryRegistry>,
        cipher: Arc<dyn ParamsCipher>,
        base_app_addr: NetAddress,
        session_key: SessionKey,
    ) -> Self {
        Self {
            registry,
            cipher,
            accounts: HashMap::new(),
            challenge_type: None,
            outstanding: None,
            base_app_addr,
            session_key,
        }
    }

    pub fn add_account(&mut self, username: impl Into<String>, password: impl Into<String>) {
        self.accounts.insert(username.into(), password.into());
    }

    /// Makes the first request of each session come back as a challenge.
    pub fn require_challenge(&mut self, challenge_type: impl Into<String>) {
        self.challenge_type = Some(challenge_type.into());
    }

    pub fn handle(&mut self, bytes: &[u8]) -> Vec<u8> {
        match self.try_handle(bytes) {
            Ok(reply) => reply,
            Err(err) => failure_reply(LogOnStatus::ConnectionFailed, &err.to_string()),
        }
    }

    fn try_handle(&mut self, bytes: &[u8]) -> Result<Vec<u8>, LoginError> {
        let mut r = BinaryReader::new(bytes);
        let version = ProtocolVersion::read(&mut r)?;
        if !ProtocolVersion::CURRENT.supports(version) {
            return Ok(failure_reply(
                LogOnStatus::BadProtocolVersion,
                &format!("server requires protocol {}", ProtocolVersion::CURRENT),
            ));
        }

        let has_response = r.read_u8()? == 1;
        if let Some(challenge_type) = self.challenge_type.clone() {
            if !has_response {
                let challenge = self.registry.get(&challenge_type)?.create();
                let mut w = BinaryWriter::new();
                w.write_u8(LogOnStatus::ChallengeIssued as u8);
                w.write_string(&challenge_type);
                challenge.write_challenge(&mut w)?;
                self.outstanding = Some(challenge);
                return Ok(w.into_bytes());
            }
            let responded_type = r.read_string()?;
            let Some(challenge) = self.outstanding.as_ref() else {
                return Ok(failure_reply(
                    LogOnStatus::ChallengeError,
                    "no challenge outstanding",
                ));
            };
            if responded_type != challenge.challenge_type()
                || !challenge.verify_response(&mut r)?
            {
                return Ok(failure_reply(
                    LogOnStatus::ChallengeError,
                    "challenge response rejected",
                ));
            }
        } else if has_response {
            return Ok(failure_reply(
                LogOnStatus::ChallengeError,
                "unexpected challenge response",
            ));
        }

        let params = LogOnParams::read_sealed(&mut r, self.cipher.as_ref())?;
        match self.accounts.get(&params.username) {
            None => Ok(failure_reply(LogOnStatus::UnknownUser, "no such account")),
            Some(password) if *password != params.password => {
                Ok(failure_reply(LogOnStatus::InvalidPassword, "wrong password"))
            }
            Some(_) => {
                let mut w = BinaryWriter::new();
                w.write_u8(LogOnStatus::LoggedOn as u8);
                LoginReplyRecord {
                    server_addr: self.base_app_addr,
                    session_key: self.session_key,
                }
                .write(&mut w);
                Ok(w.into_bytes())
            }
        }
    }

    /// Binds this application to `addr` on the fabric, returning a handle
    /// for further configuration.
    pub fn bind(self, fabric: &LoopbackFabric, addr: NetAddress) -> Arc<Mutex<Self>> {
        let sim = Arc::new(Mutex::new(self));
        let handler = Arc::clone(&sim);
        fabric.bind(addr, move |bytes| {
            let mut sim = handler.lock().unwrap_or_else(|e| e.into_inner());
            SimAction::Reply(sim.handle(bytes))
        });
        sim
    }
}

/// Simulated base application: validates the session key issued by the
/// login application and grants the key the session will run under.
pub struct SimBaseApp {
    expected_key: SessionKey,
    granted_key: SessionKey,
}

impl SimBaseApp {
    pub fn new(expected_key: SessionKey, granted_key: SessionKey) -> Self {
        Self {
            expected_key,
            granted_key,
        }
    }

    pub fn handle(&mut self, bytes: &[u8]) -> Vec<u8> {
        match self.try_handle(bytes) {
            Ok(reply) => reply,
            Err(err) => failure_reply(LogOnStatus::ConnectionFailed, &err.to_string()),
        }
    }

    fn try_handle(&mut self, bytes: &[u8]) -> Result<Vec<u8>, LoginError> {
        let mut r = BinaryReader::new(bytes);
        let key = r.read_u32()?;
        let _username = r.read_string()?;
        if key != self.expected_key {
            return Ok(failure_reply(
                LogOnStatus::LoginNotAllowed,
                "session key not recognised",
            ));
        }
        let mut w = BinaryWriter::new();
        w.write_u8(LogOnStatus::LoggedOn as u8);
        w.write_u32(self.granted_key);
        Ok(w.into_bytes())
    }

    pub fn bind(self, fabric: &LoopbackFabric, addr: NetAddress) -> Arc<Mutex<Self>> {
        let sim = Arc::new(Mutex::new(self));
        let handler = Arc::clone(&sim);
        fabric.bind(addr, move |bytes| {
            let mut sim = handler.lock().unwrap_or_else(|e| e.into_inner());
            SimAction::Reply(sim.handle(bytes))
        });
        sim
    }
}
