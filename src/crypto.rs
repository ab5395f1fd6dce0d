// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

//! At-rest protection for bank account numbers.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fmt;
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption failed")]
    Encrypt,
    #[error("ciphertext is malformed")]
    Malformed,
    #[error("decryption failed")]
    Decrypt,
}

/// AES-256-GCM with a random nonce per value. Output is
/// `base64(nonce || ciphertext)`.
#[derive(Clone)]
pub struct AccountCipher {
    cipher: Aes256Gcm,
}

impl AccountCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CipherError> {
        let raw = STANDARD.decode(encoded).map_err(|_| CipherError::Malformed)?;
        if raw.len() <= NONCE_LEN {
            return Err(CipherError::Malformed);
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::Malformed)
    }
}

impl fmt::Debug for AccountCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccountCipher(..)")
    }
}

/// Last four characters of a normalised account number.
pub fn last4(account_number: &str) -> String {
    let chars: Vec<char> = account_number.chars().collect();
    let start = chars.len().saturating_sub(4);
    chars[start..].iter().collect()
}

/// The only form in which an account number leaves the service.
pub fn mask_account_number(last4: &str) -> String {
    format!("****{last4}")
}
