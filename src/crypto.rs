// MIT License - Copyright (c) 2026 Peter Wright
// AES-CBC content encryption for SIA DC-09 accounts

use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::debug;

use crate::constants::{AES_BLOCK_SIZE, PAD_SEPARATOR};

/// DC-09 encrypts with a zero IV; freshness comes from the timestamp.
const ZERO_IV: [u8; AES_BLOCK_SIZE] = [0u8; AES_BLOCK_SIZE];

/// Why a ciphertext could not be turned into content.
///
/// Messages are deliberately vague: they are logged next to the account
/// id and must not leak plaintext.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("key must be 16, 24 or 32 hex characters")]
    InvalidKey,
    #[error("ciphertext is not hex")]
    NotHex,
    #[error("ciphertext is not a whole number of blocks")]
    BadLength,
    #[error("plaintext is not printable ASCII")]
    NotAscii,
    #[error("plaintext has no pad separator")]
    MissingSeparator,
}

/// Per-account AES engine.
///
/// The key is the ASCII text of the configured key: 16, 24 or 32
/// characters select AES-128, AES-192 or AES-256.
#[derive(Clone)]
pub struct AccountCipher {
    key: Vec<u8>,
}

impl std::fmt::Debug for AccountCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountCipher")
            .field("bits", &(self.key.len() * 8))
            .finish()
    }
}

impl AccountCipher {
    pub fn new(key: &str) -> Result<Self, CryptoError> {
        if !matches!(key.len(), 16 | 24 | 32) || !key.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CryptoError::InvalidKey);
        }
        Ok(Self {
            key: key.as_bytes().to_vec(),
        })
    }

    /// Key size in bits.
    pub fn bits(&self) -> usize {
        self.key.len() * 8
    }

    /// Encrypt whole blocks in place.
    fn encrypt_blocks(&self, buf: &mut [u8]) -> Result<(), CryptoError> {
        let len = buf.len();
        let ok = match self.key.len() {
            16 => cbc::Encryptor::<Aes128>::new_from_slices(&self.key, &ZERO_IV)
                .map(|c| c.encrypt_padded_mut::<NoPadding>(buf, len).is_ok()),
            24 => cbc::Encryptor::<Aes192>::new_from_slices(&self.key, &ZERO_IV)
                .map(|c| c.encrypt_padded_mut::<NoPadding>(buf, len).is_ok()),
            32 => cbc::Encryptor::<Aes256>::new_from_slices(&self.key, &ZERO_IV)
                .map(|c| c.encrypt_padded_mut::<NoPadding>(buf, len).is_ok()),
            _ => return Err(CryptoError::InvalidKey),
        };
        match ok {
            Ok(true) => Ok(()),
            Ok(false) => Err(CryptoError::BadLength),
            Err(_) => Err(CryptoError::InvalidKey),
        }
    }

    /// Decrypt whole blocks in place.
    fn decrypt_blocks(&self, buf: &mut [u8]) -> Result<(), CryptoError> {
        let ok = match self.key.len() {
            16 => cbc::Decryptor::<Aes128>::new_from_slices(&self.key, &ZERO_IV)
                .map(|c| c.decrypt_padded_mut::<NoPadding>(buf).is_ok()),
            24 => cbc::Decryptor::<Aes192>::new_from_slices(&self.key, &ZERO_IV)
                .map(|c| c.decrypt_padded_mut::<NoPadding>(buf).is_ok()),
            32 => cbc::Decryptor::<Aes256>::new_from_slices(&self.key, &ZERO_IV)
                .map(|c| c.decrypt_padded_mut::<NoPadding>(buf).is_ok()),
            _ => return Err(CryptoError::InvalidKey),
        };
        match ok {
            Ok(true) => Ok(()),
            Ok(false) => Err(CryptoError::BadLength),
            Err(_) => Err(CryptoError::InvalidKey),
        }
    }

    /// Encrypt content for the wire: a random alphanumeric pad and `|` are
    /// prepended so the plaintext fills whole blocks, and the ciphertext is
    /// returned as upper-case hex.
    pub fn encrypt_content(&self, content: &str) -> String {
        let used = (content.len() + 1) % AES_BLOCK_SIZE;
        let pad_len = (AES_BLOCK_SIZE - used) % AES_BLOCK_SIZE;
        let pad: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(pad_len)
            .map(char::from)
            .collect();

        let mut buf = format!("{}{}{}", pad, PAD_SEPARATOR, content).into_bytes();
        // The pad makes the plaintext a whole number of blocks.
        if let Err(e) = self.encrypt_blocks(&mut buf) {
            debug!("Encryption failed: {}", e);
        }
        hex::encode_upper(buf)
    }

    /// Decrypt hex ciphertext and return the content after the pad
    /// separator.
    ///
    /// Decrypting with the wrong key yields bytes that are (for all
    /// practical purposes) never printable ASCII containing the separator,
    /// so a wrong key surfaces as an error rather than a bogus message.
    pub fn decrypt_content(&self, hex_text: &str) -> Result<String, CryptoError> {
        let mut buf = hex::decode(hex_text.trim_end()).map_err(|_| CryptoError::NotHex)?;
        if buf.is_empty() || buf.len() % AES_BLOCK_SIZE != 0 {
            return Err(CryptoError::BadLength);
        }
        self.decrypt_blocks(&mut buf)?;

        if !buf.iter().all(|b| (0x20..0x7F).contains(b)) {
            return Err(CryptoError::NotAscii);
        }
        let text = String::from_utf8(buf).map_err(|_| CryptoError::NotAscii)?;
        let pos = text
            .find(PAD_SEPARATOR)
            .ok_or(CryptoError::MissingSeparator)?;
        Ok(text[pos + 1..].to_string())
    }
}
