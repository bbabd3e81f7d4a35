//! Login status codes shared by client and server.

use std::fmt;

use crate::error::WireError;

/// Outcome of a login attempt, as carried in login replies and surfaced to
/// application code through the login handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogOnStatus {
    /// No attempt has completed yet.
    NotSet = 0,
    /// Fully logged on to the base application.
    LoggedOn = 1,
    /// An attempt is in flight.
    Pending = 2,
    ConnectionFailed = 3,
    DnsLookupFailed = 4,
    UnknownUser = 5,
    InvalidPassword = 6,
    AlreadyLoggedIn = 7,
    BadProtocolVersion = 8,
    /// A challenge round failed, locally or at the server.
    ChallengeError = 9,
    Cancelled = 10,
    RateLimited = 11,
    LoginNotAllowed = 12,
    /// Reply discriminator: the server issued a challenge instead of a
    /// verdict. Never a terminal status.
    ChallengeIssued = 13,
}

impl LogOnStatus {
    pub fn from_u8(v: u8) -> Result<Self, WireError> {
        Ok(match v {
            0 => Self::NotSet,
            1 => Self::LoggedOn,
            2 => Self::Pending,
            3 => Self::ConnectionFailed,
            4 => Self::DnsLookupFailed,
            5 => Self::UnknownUser,
            6 => Self::InvalidPassword,
            7 => Self::AlreadyLoggedIn,
            8 => Self::BadProtocolVersion,
            9 => Self::ChallengeError,
            10 => Self::Cancelled,
            11 => Self::RateLimited,
            12 => Self::LoginNotAllowed,
            13 => Self::ChallengeIssued,
            other => return Err(WireError::UnknownStatus(other)),
        })
    }

    /// True only for a completed, successful logon.
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::LoggedOn)
    }

    /// True for any terminal failure code.
    pub fn is_failure(&self) -> bool {
        !matches!(
            self,
            Self::NotSet | Self::LoggedOn | Self::Pending | Self::ChallengeIssued
        )
    }
}

impl fmt::Display for LogOnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotSet => "not set",
            Self::LoggedOn => "logged on",
            Self::Pending => "pending",
            Self::ConnectionFailed => "connection failed",
            Self::DnsLookupFailed => "DNS lookup failed",
            Self::UnknownUser => "unknown user",
            Self::InvalidPassword => "invalid password",
            Self::AlreadyLoggedIn => "already logged in",
            Self::BadProtocolVersion => "bad protocol version",
            Self::ChallengeError => "challenge error",
            Self::Cancelled => "cancelled",
            Self::RateLimited => "rate limited",
            Self::LoginNotAllowed => "login not allowed",
            Self::ChallengeIssued => "challenge issued",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_byte_round_trip() {
        for v in 0..=13u8 {
            let status = LogOnStatus::from_u8(v).unwrap();
            assert_eq!(status as u8, v);
        }
        assert!(LogOnStatus::from_u8(200).is_err());
    }

    #[test]
    fn test_classification() {
        assert!(LogOnStatus::LoggedOn.succeeded());
        assert!(!LogOnStatus::Pending.is_failure());
        assert!(!LogOnStatus::ChallengeIssued.is_failure());
        assert!(LogOnStatus::InvalidPassword.is_failure());
        assert!(LogOnStatus::Cancelled.is_failure());
    }
}
