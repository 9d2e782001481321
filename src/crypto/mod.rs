//! Cryptographic functions for nixenv
//!
//! Provides AES-256-GCM encryption of backup archives and the key providers
//! that supply the 32-byte key.

pub mod encryption;
pub mod keys;

pub use encryption::{decrypt_bytes, decrypt_file, encrypt_bytes, encrypt_file, EncryptionKey};
pub use keys::{EphemeralKey, FileKey, KeyProvider, SystemKeyring};
