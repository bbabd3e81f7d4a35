//! The two-phase login state machine.
//!
//! Phase one talks to the login application: present credentials, solve any
//! challenge it issues, and receive the base application's address plus a
//! session key. Phase two presents that key to the base application, whose
//! reply carries the key the rest of the session runs under. Each phase
//! sends up to `num_requests` attempts spaced `retry_interval` apart, and
//! the first successful reply wins.
//!
//! The handler is tick-driven: callers pump [`LoginHandler::poll`] with the
//! current time and it does everything else, including draining the
//! background challenge executor.

use std::time::Instant;

use crossbeam_channel::{Receiver, TryRecvError};
use tracing::{debug, error, info, warn};

use farsight_wire::{
    BinaryReader, BinaryWriter, LogOnStatus, LoginReplyRecord, NetAddress, ProtocolVersion,
    WireError,
};

use crate::challenge::LoginChallenge;
use crate::error::LoginError;
use crate::network::{NetworkEvent, NetworkReason};
use crate::params::LogOnParams;
use crate::request::LoginRequest;
use crate::server_connection::ServerConnection;
use crate::task::ChallengeOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoginPhase {
    LoginApp,
    BaseApp,
}

/// Invoked exactly once, when the handler reaches a terminal status.
pub type CompletionCallback = Box<dyn FnOnce(LogOnStatus, Option<LoginReplyRecord>) + Send>;

pub struct LoginHandler {
    params: LogOnParams,
    phase: LoginPhase,
    status: LogOnStatus,
    login_app_addr: NetAddress,
    base_app_addr: NetAddress,
    reply_record: Option<LoginReplyRecord>,
    /// Attempts sent in the current phase. Reset on phase change and after
    /// a challenge is solved.
    attempts_made: u32,
    children: Vec<LoginRequest>,
    retry_deadline: Option<Instant>,
    challenge_rx: Option<Receiver<ChallengeOutcome>>,
    /// Solved challenge whose response rides on subsequent login requests.
    challenge_response: Option<Box<dyn LoginChallenge>>,
    received_no_such_port: bool,
    done: bool,
    on_complete: Option<CompletionCallback>,
}

impl LoginHandler {
    pub fn new(params: LogOnParams, login_app_addr: NetAddress) -> Self {
        Self {
            params,
            phase: LoginPhase::LoginApp,
            status: LogOnStatus::Pending,
            login_app_addr,
            base_app_addr: NetAddress::NONE,
            reply_record: None,
            attempts_made: 0,
            children: Vec::new(),
            retry_deadline: None,
            challenge_rx: None,
            challenge_response: None,
            received_no_such_port: false,
            done: false,
            on_complete: None,
        }
    }

    /// Begins the full two-phase login against the login application.
    pub fn start(&mut self, conn: &mut ServerConnection, now: Instant) -> Result<(), LoginError> {
        if self.done {
            return Err(LoginError::AlreadyFinished);
        }
        Self::check_config(conn)?;
        self.send_next_request(conn, now)
    }

    /// Skips the login application and attaches straight to a base
    /// application with an already-issued session key. Used after offload,
    /// when the cluster moves a client between base applications.
    pub fn start_with_base_addr(
        &mut self,
        conn: &mut ServerConnection,
        base_app_addr: NetAddress,
        session_key: u32,
        now: Instant,
    ) -> Result<(), LoginError> {
        if self.done {
            return Err(LoginError::AlreadyFinished);
        }
        Self::check_config(conn)?;
        self.phase = LoginPhase::BaseApp;
        self.base_app_addr = base_app_addr;
        conn.set_session_key(session_key);
        self.send_next_request(conn, now)
    }

    fn check_config(conn: &ServerConnection) -> Result<(), LoginError> {
        if conn.config().num_requests == 0 {
            return Err(LoginError::Config(
                "num_requests must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn status(&self) -> LogOnStatus {
        self.status
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn base_app_addr(&self) -> NetAddress {
        self.base_app_addr
    }

    pub fn reply_record(&self) -> Option<LoginReplyRecord> {
        self.reply_record
    }

    pub fn received_no_such_port(&self) -> bool {
        self.received_no_such_port
    }

    pub fn set_completion_callback(&mut self, cb: CompletionCallback) {
        self.on_complete = Some(cb);
    }

    /// Advances the state machine to `now`: drains network events and the
    /// challenge executor, and fires the retry timer.
    pub fn poll(&mut self, conn: &mut ServerConnection, now: Instant) -> Result<(), LoginError> {
        if self.done {
            return Ok(());
        }

        self.poll_challenge(conn, now)?;
        if self.done {
            return Ok(());
        }

        let mut events: Vec<NetworkEvent> = Vec::new();
        if conn.has_interface() {
            events.extend(conn.interface()?.poll(now));
        }
        for child in &mut self.children {
            events.extend(child.poll(now));
        }
        for event in events {
            if self.done {
                break;
            }
            match event {
                NetworkEvent::Reply {
                    attempt,
                    from,
                    bytes,
                } => {
                    if let Err(err) = self.handle_reply(conn, attempt, from, &bytes, now) {
                        warn!(attempt, %err, "discarding malformed login reply");
                        self.handle_failure(conn, attempt, NetworkReason::Corrupted);
                    }
                }
                NetworkEvent::Failure { attempt, reason } => {
                    self.handle_failure(conn, attempt, reason);
                }
            }
        }
        if self.done {
            return Ok(());
        }

        if let Some(deadline) = self.retry_deadline {
            if now >= deadline {
                self.retry_deadline = None;
                self.send_next_request(conn, now)?;
            }
        }
        Ok(())
    }

    fn poll_challenge(
        &mut self,
        conn: &mut ServerConnection,
        now: Instant,
    ) -> Result<(), LoginError> {
        let Some(rx) = &self.challenge_rx else {
            return Ok(());
        };
        match rx.try_recv() {
            Ok(outcome) => {
                self.challenge_rx = None;
                match outcome.result {
                    Ok(solved) => {
                        info!(
                            challenge = solved.challenge_type(),
                            "challenge solved, retrying login"
                        );
                        self.challenge_response = Some(solved);
                        self.attempts_made = 0;
                        self.send_next_request(conn, now)?;
                    }
                    Err(err) => {
                        warn!(%err, "challenge solve failed");
                        self.fail(conn, LogOnStatus::ChallengeError);
                    }
                }
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                self.challenge_rx = None;
                self.fail(conn, LogOnStatus::ChallengeError);
            }
        }
        Ok(())
    }

    fn send_next_request(
        &mut self,
        conn: &mut ServerConnection,
        now: Instant,
    ) -> Result<(), LoginError> {
        if self.done {
            return Ok(());
        }
        let max_attempts = conn.config().num_requests;
        if self.attempts_made >= max_attempts {
            return Ok(());
        }
        self.attempts_made += 1;
        let attempt = self.attempts_made;
        let bytes = self.build_request(conn)?;
        let timeout = conn.config().timeout();
        let request = match self.phase {
            LoginPhase::LoginApp => LoginRequest::start_shared(
                attempt,
                self.login_app_addr,
                conn,
                bytes,
                timeout,
                now,
            )?,
            LoginPhase::BaseApp => {
                // The first attempt takes over the primary interface so the
                // base application sees the port the login ran on; retries
                // get their own, and the winner's becomes the session
                // channel.
                let iface = if attempt == 1 {
                    match conn.take_interface() {
                        Some(iface) => iface,
                        None => conn.fresh_interface()?,
                    }
                } else {
                    conn.fresh_interface()?
                };
                LoginRequest::start_owned(attempt, self.base_app_addr, iface, bytes, timeout, now)?
            }
        };
        debug!(attempt, phase = ?self.phase, peer = %request.peer(), "sent login request");
        self.children.push(request);
        self.retry_deadline = if self.attempts_made < max_attempts {
            Some(now + conn.config().retry_interval())
        } else {
            None
        };
        Ok(())
    }

    fn build_request(&self, conn: &ServerConnection) -> Result<Vec<u8>, LoginError> {
        let mut w = BinaryWriter::new();
        match self.phase {
            LoginPhase::LoginApp => {
                ProtocolVersion::CURRENT.write(&mut w);
                match &self.challenge_response {
                    Some(challenge) => {
                        w.write_u8(1);
                        w.write_string(challenge.challenge_type());
                        challenge.write_response(&mut w)?;
                    }
                    None => w.write_u8(0),
                }
                self.params.write_sealed(&mut w, conn.cipher())?;
            }
            LoginPhase::BaseApp => {
                w.write_u32(conn.session_key());
                w.write_string(&self.params.username);
            }
        }
        Ok(w.into_bytes())
    }

    fn handle_reply(
        &mut self,
        conn: &mut ServerConnection,
        attempt: u32,
        from: NetAddress,
        bytes: &[u8],
        now: Instant,
    ) -> Result<(), LoginError> {
        // Replies for attempts we no longer track are stale.
        if !self
            .children
            .iter()
            .any(|c| c.attempt() == attempt && !c.is_finished())
        {
            debug!(attempt, "ignoring reply for a finished attempt");
            return Ok(());
        }
        let mut r = BinaryReader::new(bytes);
        let status = LogOnStatus::from_u8(r.read_u8()?)?;
        match self.phase {
            LoginPhase::LoginApp => self.handle_login_app_reply(conn, status, &mut r, now),
            LoginPhase::BaseApp => self.handle_base_app_reply(conn, attempt, from, status, &mut r),
        }
    }

    fn handle_login_app_reply(
        &mut self,
        conn: &mut ServerConnection,
        status: LogOnStatus,
        r: &mut BinaryReader<'_>,
        now: Instant,
    ) -> Result<(), LoginError> {
        match status {
            LogOnStatus::ChallengeIssued => {
                let challenge_type = r.read_string()?;
                let challenge = conn.registry().read_challenge(&challenge_type, r)?;
                info!(challenge = %challenge_type, "login application issued a challenge");
                self.finish_children(conn);
                conn.interface()?.cancel_requests();
                self.retry_deadline = None;
                self.challenge_rx = Some(conn.executor().execute(challenge));
                Ok(())
            }
            LogOnStatus::LoggedOn => {
                let record = LoginReplyRecord::read(r)?;
                if record.session_key == 0 || record.session_key == conn.session_key() {
                    warn!(
                        key = record.session_key,
                        "rejecting invalid session key from login application"
                    );
                    self.fail(conn, LogOnStatus::ConnectionFailed);
                    return Ok(());
                }
                conn.set_session_key(record.session_key);
                self.base_app_addr = record.server_addr;
                self.reply_record = Some(record);
                info!(base_app = %record.server_addr, "login accepted, attaching to base application");
                self.finish_children(conn);
                conn.interface()?.cancel_requests();
                self.phase = LoginPhase::BaseApp;
                self.attempts_made = 0;
                self.retry_deadline = None;
                self.send_next_request(conn, now)
            }
            status if status.is_failure() => {
                let message = r.read_string().unwrap_or_default();
                if !message.is_empty() {
                    warn!(%status, message, "login refused");
                }
                self.fail(conn, status);
                Ok(())
            }
            other => Err(WireError::UnknownStatus(other as u8).into()),
        }
    }

    fn handle_base_app_reply(
        &mut self,
        conn: &mut ServerConnection,
        attempt: u32,
        from: NetAddress,
        status: LogOnStatus,
        r: &mut BinaryReader<'_>,
    ) -> Result<(), LoginError> {
        match status {
            LogOnStatus::LoggedOn => {
                let key = r.read_u32()?;
                if key == 0 || key == conn.session_key() {
                    warn!(key, "rejecting invalid session key from base application");
                    self.fail(conn, LogOnStatus::ConnectionFailed);
                    return Ok(());
                }
                conn.set_session_key(key);
                if let Some(pos) = self.children.iter().position(|c| c.attempt() == attempt) {
                    let mut winner = self.children.remove(pos);
                    if let Some(iface) = winner.take_interface() {
                        conn.adopt_interface(iface);
                    }
                    winner.finish(conn);
                }
                info!(base_app = %from, "attached to base application");
                self.status = LogOnStatus::LoggedOn;
                self.complete(conn);
                Ok(())
            }
            status if status.is_failure() => {
                let message = r.read_string().unwrap_or_default();
                if !message.is_empty() {
                    warn!(%status, message, "base application refused attach");
                }
                self.fail(conn, status);
                Ok(())
            }
            other => Err(WireError::UnknownStatus(other as u8).into()),
        }
    }

    fn handle_failure(
        &mut self,
        conn: &mut ServerConnection,
        attempt: u32,
        reason: NetworkReason,
    ) {
        if self.done {
            return;
        }
        if reason == NetworkReason::NoSuchPort {
            self.received_no_such_port = true;
        }
        if let Some(pos) = self.children.iter().position(|c| c.attempt() == attempt) {
            let mut child = self.children.remove(pos);
            child.finish(conn);
        }
        debug!(attempt, ?reason, "login attempt failed");

        let exhausted = self.attempts_made >= conn.config().num_requests
            && self.children.is_empty()
            && self.challenge_rx.is_none()
            && self.retry_deadline.is_none();
        if exhausted {
            self.attempts_exhausted(conn);
        }
    }

    fn attempts_exhausted(&mut self, conn: &mut ServerConnection) {
        let peer = match self.phase {
            LoginPhase::LoginApp => self.login_app_addr,
            LoginPhase::BaseApp => self.base_app_addr,
        };
        if self.received_no_such_port {
            error!(%peer, "server port is closed");
        } else {
            error!(%peer, attempts = self.attempts_made, "no response from server");
        }
        if self.phase == LoginPhase::BaseApp
            && self.login_app_addr.subnet() != self.base_app_addr.subnet()
        {
            warn!(
                login_app = %self.login_app_addr,
                base_app = %self.base_app_addr,
                "base application is on a different subnet than the login application; \
                 check the cluster's external address mapping"
            );
        }
        self.fail(conn, LogOnStatus::ConnectionFailed);
    }

    fn fail(&mut self, conn: &mut ServerConnection, status: LogOnStatus) {
        self.status = status;
        self.complete(conn);
    }

    fn complete(&mut self, conn: &mut ServerConnection) {
        if self.done {
            return;
        }
        self.done = true;
        self.retry_deadline = None;
        self.challenge_rx = None;
        self.finish_children(conn);
        if !conn.has_interface() {
            // The first base-application attempt took over the primary
            // interface; leave the connection with a usable one.
            if let Err(err) = conn.interface() {
                warn!(%err, "could not reopen the primary interface");
            }
        }
        conn.reap_condemned();
        if self.status.succeeded() {
            info!(session_key = conn.session_key(), "login complete");
        } else {
            warn!(status = %self.status, "login failed");
        }
        if let Some(cb) = self.on_complete.take() {
            cb(self.status, self.reply_record);
        }
    }

    fn finish_children(&mut self, conn: &mut ServerConnection) {
        let mut children = std::mem::take(&mut self.children);
        for child in &mut children {
            child.finish(conn);
        }
    }
}

impl Drop for LoginHandler {
    fn drop(&mut self) {
        if !self.done {
            warn!("login handler dropped before completion");
        }
    }
}
