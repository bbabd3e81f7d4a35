//! # Farsight Connection - Client Login Pipeline
//!
//! The client side of connecting to a Farsight cluster: a login application
//! authenticates the account and hands out the address of a base
//! application, which the client then attaches to with a session key. Both
//! phases retry over unreliable transport, and the login application may
//! interpose a proof-of-work challenge before answering at all.
//!
//! ## Core Components
//!
//! * **LoginHandler** - The retrying two-phase state machine
//! * **LoginRequest** - One in-flight attempt with its own interface
//! * **Challenges** - Cuckoo-cycle proof of work plus test variants, behind
//!   an explicit factory registry
//! * **Network traits** - Transport-agnostic interface/channel seams with
//!   an in-memory loopback implementation for tests and demos
//!
//! Everything is tick-driven: callers pump [`LoginHandler::poll`] with the
//! current time; no threads are required except the optional background
//! challenge executor.
//!
//! [`LoginHandler::poll`]: handler::LoginHandler::poll

pub mod challenge;
pub mod config;
pub mod handler;
pub mod loopback;
pub mod network;
pub mod params;
pub mod request;
pub mod server_connection;
pub mod sim;
pub mod task;

mod error;

pub use challenge::{ChallengeFactory, ChallengeFactoryRegistry, LoginChallenge};
pub use config::{ChallengeConfig, LoginConfig, TransportKind};
pub use error::LoginError;
pub use handler::LoginHandler;
pub use network::{
    ConnectionOpener, NetworkEvent, NetworkFactory, NetworkInterface, NetworkReason, OpenState,
};
pub use params::{LogOnParams, NullCipher, ParamsCipher, PskCipher};
pub use request::LoginRequest;
pub use server_connection::ServerConnection;
pub use task::{ChallengeExecutor, ChallengeOutcome, InlineExecutor, ThreadExecutor};
