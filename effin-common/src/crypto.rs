//! Crypto helpers
//!
//! - [`id_digest`]: one-way, fixed-length reference to a transaction id, used in
//!   index metadata instead of the raw id
//! - [`LedgerCipher`]: AES-256-GCM authenticated encryption for ledger lines and
//!   vector tokens. Tokens are `base64(nonce || ciphertext)`.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Hex characters kept from the SHA-256 digest
pub const ID_DIGEST_LEN: usize = 12;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Short hex digest of a transaction id
pub fn id_digest(id: &str) -> String {
    let hash = Sha256::digest(id.as_bytes());
    let mut hex = format!("{:x}", hash);
    hex.truncate(ID_DIGEST_LEN);
    hex
}

/// Authenticated cipher for at-rest ledger data
#[derive(Clone)]
pub struct LedgerCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for LedgerCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LedgerCipher(..)")
    }
}

impl LedgerCipher {
    /// Build a cipher from a base64-encoded 32-byte key
    pub fn from_base64_key(key_b64: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(key_b64.trim())
            .map_err(|e| Error::Crypto(format!("ledger key is not valid base64: {}", e)))?;
        Self::from_key_bytes(&bytes)
    }

    pub fn from_key_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_LEN {
            return Err(Error::Crypto(format!(
                "ledger key must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            )));
        }
        let key = Key::<Aes256Gcm>::from_slice(bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Generate a fresh random key, base64-encoded
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        STANDARD.encode(key)
    }

    /// Encrypt bytes into a base64 token
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| Error::Crypto("encryption failed".to_string()))?;

        let mut token = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(token))
    }

    /// Decrypt a base64 token produced by [`LedgerCipher::encrypt`]
    pub fn decrypt(&self, token: &str) -> Result<Vec<u8>> {
        let raw = STANDARD
            .decode(token.trim())
            .map_err(|e| Error::Crypto(format!("token is not valid base64: {}", e)))?;
        if raw.len() <= NONCE_LEN {
            return Err(Error::Crypto("token too short".to_string()));
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Crypto("decryption failed (wrong key or corrupted token)".to_string()))
    }

    /// Encrypt a float32 vector (little-endian bytes)
    pub fn encrypt_vector(&self, vector: &[f32]) -> Result<String> {
        let bytes: Vec<u8> = vector.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.encrypt(&bytes)
    }

    pub fn decrypt_vector(&self, token: &str) -> Result<Vec<f32>> {
        let bytes = self.decrypt(token)?;
        if bytes.len() % 4 != 0 {
            return Err(Error::Crypto(format!(
                "vector payload length {} is not a multiple of 4",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}
