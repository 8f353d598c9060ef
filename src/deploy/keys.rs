//! Deploy key decryption and installation
//!
//! The encrypted deploy key lives in the source repository; the symmetric key
//! that decrypts it comes from a CI secret. The decrypted private key is
//! written to a `0600` file inside a temporary directory and only ever
//! referenced through `GIT_SSH_COMMAND`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::info;
use tempfile::TempDir;

use crate::DeployResult;
use crate::operations::Secret;

/// Decrypts an encrypted deploy key file
pub trait KeyDecryptor: Send + Sync {
    /// Decrypt `ciphertext` with `key`, returning the plaintext or a reason.
    ///
    /// The reason must not contain key material.
    fn decrypt(&self, ciphertext: &[u8], key: &Secret) -> Result<Vec<u8>, String>;
}

/// Fernet (AES-128-CBC + HMAC-SHA256) token decryption
#[derive(Debug, Clone, Copy, Default)]
pub struct FernetDecryptor;

impl KeyDecryptor for FernetDecryptor {
    fn decrypt(&self, ciphertext: &[u8], key: &Secret) -> Result<Vec<u8>, String> {
        let fernet = fernet::Fernet::new(key.expose().trim())
            .ok_or_else(|| "the encryption key is not a valid Fernet key".to_string())?;
        let token = std::str::from_utf8(ciphertext)
            .map_err(|_| "the key file is not a Fernet token".to_string())?;
        fernet
            .decrypt(token.trim())
            .map_err(|_| "the key file does not decrypt with this encryption key".to_string())
    }
}

/// A decrypted private key installed in a private temporary directory.
///
/// The directory and the key are deleted when this is dropped.
#[derive(Debug)]
pub struct KeyStore {
    _dir: TempDir,
    key_path: PathBuf,
}

impl KeyStore {
    pub fn install(private_key: &[u8]) -> DeployResult<Self> {
        let dir = tempfile::Builder::new().prefix("docs-deploy-key").tempdir()?;
        let key_path = dir.path().join("id_deploy");

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&key_path)?;
        file.write_all(private_key)?;
        // ssh refuses keys without a final newline
        if !private_key.ends_with(b"\n") {
            file.write_all(b"\n")?;
        }
        file.sync_all()?;

        info!("Installed deploy key");
        Ok(Self {
            _dir: dir,
            key_path,
        })
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Value for `GIT_SSH_COMMAND` that authenticates with this key only
    pub fn ssh_command(&self) -> String {
        format!(
            "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new -o LogLevel=ERROR",
            shell_escape::escape(self.key_path.to_string_lossy())
        )
    }
}
