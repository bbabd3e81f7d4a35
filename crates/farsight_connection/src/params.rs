//! Login parameters and their sealing.

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::RngCore;

use farsight_wire::{BinaryReader, BinaryWriter};

use crate::error::LoginError;

/// Account credentials presented to the login application.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogOnParams {
    pub username: String,
    pub password: String,
}

impl LogOnParams {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Serializes and seals the credentials into the stream.
    pub fn write_sealed(
        &self,
        w: &mut BinaryWriter,
        cipher: &dyn ParamsCipher,
    ) -> Result<(), LoginError> {
        let mut plain = BinaryWriter::new();
        plain.write_string(&self.username);
        plain.write_string(&self.password);
        let sealed = cipher.seal(plain.as_bytes())?;
        w.write_blob(&sealed);
        Ok(())
    }

    /// Opens and deserializes sealed credentials.
    pub fn read_sealed(
        r: &mut BinaryReader<'_>,
        cipher: &dyn ParamsCipher,
    ) -> Result<Self, LoginError> {
        let sealed = r.read_blob()?;
        let plain = cipher.open(sealed)?;
        let mut pr = BinaryReader::new(&plain);
        Ok(Self {
            username: pr.read_string()?,
            password: pr.read_string()?,
        })
    }
}

/// Seals login parameters for the wire.
///
/// The production deployment runs a pre-shared-key AEAD; the null variant
/// exists for tests and plaintext-acceptable environments.
pub trait ParamsCipher: Send + Sync {
    fn seal(&self, plain: &[u8]) -> Result<Vec<u8>, LoginError>;
    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, LoginError>;
}

/// Passthrough cipher.
#[derive(Debug, Default)]
pub struct NullCipher;

impl ParamsCipher for NullCipher {
    fn seal(&self, plain: &[u8]) -> Result<Vec<u8>, LoginError> {
        Ok(plain.to_vec())
    }

    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, LoginError> {
        Ok(sealed.to_vec())
    }
}

/// ChaCha20-Poly1305 under a pre-shared 32-byte key. The random nonce is
/// prepended to the ciphertext.
pub struct PskCipher {
    key: [u8; 32],
}

const NONCE_LEN: usize = 12;

impl PskCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key))
    }
}

impl ParamsCipher for PskCipher {
    fn seal(&self, plain: &[u8]) -> Result<Vec<u8>, LoginError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ct = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce), plain)
            .map_err(|e| LoginError::Cipher(e.to_string()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, LoginError> {
        if sealed.len() < NONCE_LEN {
            return Err(LoginError::Cipher("sealed blob too short".to_string()));
        }
        let (nonce, ct) = sealed.split_at(NONCE_LEN);
        self.cipher()
            .decrypt(Nonce::from_slice(nonce), ct)
            .map_err(|e| LoginError::Cipher(e.to_string()))
    }
}
