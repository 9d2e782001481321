//! AES-256-GCM encryption/decryption
//!
//! Provides authenticated encryption for backup archives using AES-256-GCM.
//! Each encryption generates a fresh random 96-bit nonce, stored in front of
//! the ciphertext: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.

use std::fmt;
use std::fs;
use std::path::Path;

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{NixEnvError, NixEnvResult};
use crate::storage::atomic::{atomic_rename, with_suffix};

/// Size of the AES-GCM nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of the GCM authentication tag in bytes
const TAG_SIZE: usize = 16;

/// A 32-byte AES-256 key, zeroed on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Build a key from raw bytes; the length must be exactly 32
    pub fn from_slice(bytes: &[u8]) -> NixEnvResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(NixEnvError::Encryption(format!(
                "Invalid key length: expected {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    /// Generate a random key
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Decode a base64 key
    pub fn from_base64(encoded: &str) -> NixEnvResult<Self> {
        use base64::{engine::general_purpose::STANDARD, Engine};
        let mut bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| NixEnvError::Encryption(format!("Invalid key encoding: {}", e)))?;
        let key = Self::from_slice(&bytes);
        bytes.zeroize();
        key
    }

    /// Encode the key as base64
    pub fn to_base64(&self) -> String {
        use base64::{engine::general_purpose::STANDARD, Engine};
        STANDARD.encode(self.key)
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

/// Encrypt plaintext with a fresh nonce
pub fn encrypt_bytes(plaintext: &[u8], key: &EncryptionKey) -> NixEnvResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| NixEnvError::Encryption(format!("Failed to create cipher: {}", e)))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| NixEnvError::Encryption(format!("Encryption failed: {}", e)))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt `nonce || ciphertext`; fails if authentication fails
pub fn decrypt_bytes(data: &[u8], key: &EncryptionKey) -> NixEnvResult<Vec<u8>> {
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(NixEnvError::Encryption(format!(
            "Encrypted data too short: {} bytes",
            data.len()
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| NixEnvError::Encryption(format!("Failed to create cipher: {}", e)))?;

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher.decrypt(nonce, ciphertext).map_err(|_| {
        NixEnvError::Encryption("Decryption failed: invalid key or corrupted data".to_string())
    })
}

/// Encrypt the file at `src` into `dst`
///
/// `dst` is written through a temp file and renamed into place.
pub fn encrypt_file(src: &Path, dst: &Path, key: &EncryptionKey) -> NixEnvResult<()> {
    let plaintext = fs::read(src)
        .map_err(|e| NixEnvError::Io(format!("Failed to read {}: {}", src.display(), e)))?;
    let ciphertext = encrypt_bytes(&plaintext, key)?;
    write_then_rename(dst, &ciphertext)
}

/// Decrypt the file at `src` into `dst`
///
/// Nothing is written unless authentication succeeds.
pub fn decrypt_file(src: &Path, dst: &Path, key: &EncryptionKey) -> NixEnvResult<()> {
    let data = fs::read(src)
        .map_err(|e| NixEnvError::Io(format!("Failed to read {}: {}", src.display(), e)))?;
    let plaintext = decrypt_bytes(&data, key)?;
    write_then_rename(dst, &plaintext)
}

fn write_then_rename(dst: &Path, contents: &[u8]) -> NixEnvResult<()> {
    let tmp = with_suffix(dst, ".tmp");
    let result = (|| {
        let mut file = fs::File::create(&tmp)
            .map_err(|e| NixEnvError::Io(format!("Failed to create {}: {}", tmp.display(), e)))?;
        std::io::Write::write_all(&mut file, contents)
            .map_err(|e| NixEnvError::Io(format!("Failed to write {}: {}", tmp.display(), e)))?;
        file.sync_all()
            .map_err(|e| NixEnvError::Io(format!("Failed to sync {}: {}", tmp.display(), e)))?;
        atomic_rename(&tmp, dst)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}
