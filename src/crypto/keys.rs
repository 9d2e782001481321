//! Encryption key sources
//!
//! The backup engine never looks a key up on its own; it is handed a
//! `KeyProvider` at construction. Three providers exist:
//!
//! - [`SystemKeyring`]: the OS credential store (Secret Service / keyutils,
//!   macOS Keychain, Windows Credential Manager)
//! - [`FileKey`]: a key file holding 32 raw bytes or their base64 encoding
//! - [`EphemeralKey`]: an in-memory key, for tests and one-shot runs

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{NixEnvError, NixEnvResult};

use super::encryption::{EncryptionKey, KEY_SIZE};

/// Default keyring service name
pub const KEYRING_SERVICE: &str = "nixenv";

/// Default keyring account name
pub const KEYRING_ACCOUNT: &str = "backup-key";

/// Supplies the key used to encrypt and decrypt backups
pub trait KeyProvider {
    /// Load the 32-byte key
    fn load_key(&self) -> NixEnvResult<EncryptionKey>;

    /// Human-readable description for logs and messages
    fn describe(&self) -> String;
}

/// Key stored in the system keyring as base64
#[derive(Debug, Clone)]
pub struct SystemKeyring {
    service: String,
    account: String,
}

impl SystemKeyring {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> NixEnvResult<keyring::Entry> {
        keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| NixEnvError::Encryption(format!("Keyring unavailable: {}", e)))
    }

    /// Store a key in the keyring, replacing any previous one
    pub fn store_key(&self, key: &EncryptionKey) -> NixEnvResult<()> {
        self.entry()?
            .set_password(&key.to_base64())
            .map_err(|e| NixEnvError::Encryption(format!("Failed to store key in keyring: {}", e)))
    }
}

impl Default for SystemKeyring {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE, KEYRING_ACCOUNT)
    }
}

impl KeyProvider for SystemKeyring {
    fn load_key(&self) -> NixEnvResult<EncryptionKey> {
        match self.entry()?.get_password() {
            Ok(encoded) => EncryptionKey::from_base64(&encoded),
            Err(keyring::Error::NoEntry) => Err(NixEnvError::NotFound {
                entity_type: "Keyring entry",
                identifier: format!("{}/{}", self.service, self.account),
            }),
            Err(e) => Err(NixEnvError::Encryption(format!(
                "Failed to read key from keyring: {}",
                e
            ))),
        }
    }

    fn describe(&self) -> String {
        format!("system keyring ({}/{})", self.service, self.account)
    }
}

/// Key read from a file
#[derive(Debug, Clone)]
pub struct FileKey {
    path: PathBuf,
}

impl FileKey {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a fresh random key to `path` (base64, mode 0600 on Unix)
    ///
    /// Refuses to overwrite an existing file.
    pub fn generate(path: impl Into<PathBuf>) -> NixEnvResult<Self> {
        let path = path.into();
        if path.exists() {
            return Err(NixEnvError::AlreadyExists {
                entity_type: "Key file",
                identifier: path.display().to_string(),
            });
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let key = EncryptionKey::generate();
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&path).map_err(|e| {
            NixEnvError::Io(format!("Failed to create key file {}: {}", path.display(), e))
        })?;
        writeln!(file, "{}", key.to_base64())
            .and_then(|_| file.sync_all())
            .map_err(|e| {
                NixEnvError::Io(format!("Failed to write key file {}: {}", path.display(), e))
            })?;

        debug!("Generated key file {}", path.display());
        Ok(Self { path })
    }
}

impl KeyProvider for FileKey {
    fn load_key(&self) -> NixEnvResult<EncryptionKey> {
        let bytes = fs::read(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                NixEnvError::NotFound {
                    entity_type: "Key file",
                    identifier: self.path.display().to_string(),
                }
            } else {
                NixEnvError::Io(format!("Failed to read key file {}: {}", self.path.display(), e))
            }
        })?;

        if bytes.len() == KEY_SIZE {
            return EncryptionKey::from_slice(&bytes);
        }

        let text = String::from_utf8(bytes).map_err(|_| {
            NixEnvError::Encryption(format!(
                "Key file {} is neither {} raw bytes nor base64",
                self.path.display(),
                KEY_SIZE
            ))
        })?;
        EncryptionKey::from_base64(&text)
    }

    fn describe(&self) -> String {
        format!("key file {}", self.path.display())
    }
}

/// Key held only in memory
#[derive(Debug, Clone)]
pub struct EphemeralKey {
    key: EncryptionKey,
}

impl EphemeralKey {
    /// Generate a random in-memory key
    pub fn new() -> Self {
        Self {
            key: EncryptionKey::generate(),
        }
    }

    pub fn with_key(key: EncryptionKey) -> Self {
        Self { key }
    }
}

impl Default for EphemeralKey {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyProvider for EphemeralKey {
    fn load_key(&self) -> NixEnvResult<EncryptionKey> {
        Ok(self.key.clone())
    }

    fn describe(&self) -> String {
        "ephemeral key".to_string()
    }
}
