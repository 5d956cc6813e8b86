//! Master-key lifecycle
//!
//! The 256-bit master key lives in a file next to the database, wrapped
//! with AES-256-GCM under a key-wrapping key that the OS keychain holds.
//! File layout is the ASCII tag `vxk1:` followed by base64(IV ‖ tag ‖
//! ciphertext). A file without the tag is a legacy plaintext blob
//! (base64 of the raw key); it is read once, rewrapped, and rewritten.
//!
//! The file is created with owner-only permissions. If the OS keychain is
//! unavailable, initialization fails and startup must abort — there is no
//! fallback that would leave the key readable.

use std::fs;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use restbench_keychain::KeychainProvider;
use tracing::info;

use crate::cipher::{FieldCipher, MasterKey};
use crate::error::{CryptoError, Result};

/// Version tag of a keystore-wrapped master-key file.
const KEY_FILE_VERSION_TAG: &str = "vxk1:";

/// File name under the user-data directory.
const KEY_FILE_NAME: &str = "master.key";

/// Keychain entry holding the base64-encoded key-wrapping key.
const WRAP_KEY_ENTRY: &str = "master-wrap-key";

/// Master-key store bound to a user-data directory
pub struct MasterKeyStore {
    path: PathBuf,
}

impl MasterKeyStore {
    pub fn new(user_data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: user_data_dir.as_ref().join(KEY_FILE_NAME),
        }
    }

    /// Path of the master-key file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Establishes the master key and returns a cipher bound to it.
    ///
    /// First run generates a fresh key, wraps it, and writes the file.
    /// Subsequent runs unwrap the existing file. A legacy plaintext file is
    /// rewrapped in place exactly once.
    pub fn init_encryption(&self, keychain: &dyn KeychainProvider) -> Result<FieldCipher> {
        let wrap_cipher = self.wrap_cipher(keychain)?;

        let master = if self.path.exists() {
            let content = fs::read_to_string(&self.path)?;
            let content = content.trim();
            if let Some(b64) = content.strip_prefix(KEY_FILE_VERSION_TAG) {
                let key_bytes = wrap_cipher.decrypt(&format!("gcm:{}", b64))?;
                MasterKey::from_bytes(&key_bytes)?
            } else {
                // Legacy plaintext blob: rewrap once and rewrite.
                let raw = BASE64
                    .decode(content)
                    .map_err(|e| CryptoError::MalformedCiphertext(e.to_string()))?;
                let master = MasterKey::from_bytes(&raw)?;
                self.write_wrapped(&wrap_cipher, &master)?;
                info!("Rewrapped legacy master key file");
                master
            }
        } else {
            let master = MasterKey::generate();
            self.write_wrapped(&wrap_cipher, &master)?;
            info!(path = %self.path.display(), "Generated new master key");
            master
        };

        Ok(FieldCipher::new(master))
    }

    /// Resolves the key-wrapping key from the OS keychain, creating it on
    /// first use.
    fn wrap_cipher(&self, keychain: &dyn KeychainProvider) -> Result<FieldCipher> {
        let wrap_key = match keychain.get_entry(WRAP_KEY_ENTRY) {
            Ok(secret) => {
                let raw = BASE64
                    .decode(secret.as_bytes())
                    .map_err(|e| CryptoError::MalformedCiphertext(e.to_string()))?;
                MasterKey::from_bytes(&raw)?
            }
            Err(restbench_keychain::KeychainError::EntryNotFound(_)) => {
                let key = MasterKey::generate();
                let encoded = BASE64.encode(key.as_bytes());
                keychain.set_entry(WRAP_KEY_ENTRY, encoded.as_bytes())?;
                key
            }
            Err(e) => return Err(e.into()),
        };
        Ok(FieldCipher::new(wrap_key))
    }

    fn write_wrapped(&self, wrap_cipher: &FieldCipher, master: &MasterKey) -> Result<()> {
        let blob = wrap_cipher.encrypt(master.as_bytes())?;
        let b64 = blob
            .strip_prefix("gcm:")
            .expect("encrypt always emits the gcm prefix");
        let content = format!("{}{}", KEY_FILE_VERSION_TAG, b64);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, content)?;
        set_owner_only(&self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) -> Result<()> {
    // Windows ACLs default to the owning user for files under the profile
    // directory; no mode bits to set.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use restbench_keychain::MockKeychain;

    #[test]
    fn test_first_init_creates_wrapped_file() {
        let dir = tempfile::tempdir().unwrap();
        let keychain = MockKeychain::new();
        let store = MasterKeyStore::new(dir.path());

        let cipher = store.init_encryption(&keychain).unwrap();
        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.starts_with(KEY_FILE_VERSION_TAG));

        // The same key comes back on the next init.
        let cipher2 = store.init_encryption(&keychain).unwrap();
        let blob = cipher.encrypt(b"probe").unwrap();
        assert_eq!(cipher2.decrypt(&blob).unwrap(), b"probe");
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = MasterKeyStore::new(dir.path());
        store.init_encryption(&MockKeychain::new()).unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_legacy_plaintext_file_rewrapped() {
        let dir = tempfile::tempdir().unwrap();
        let keychain = MockKeychain::new();
        let store = MasterKeyStore::new(dir.path());

        let legacy_key = [5u8; 32];
        fs::write(store.path(), BASE64.encode(legacy_key)).unwrap();

        let cipher = store.init_encryption(&keychain).unwrap();

        // File is now wrapped and still yields the same key.
        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.starts_with(KEY_FILE_VERSION_TAG));

        let direct = FieldCipher::new(MasterKey::from_bytes(&legacy_key).unwrap());
        let blob = direct.encrypt(b"probe").unwrap();
        assert_eq!(cipher.decrypt(&blob).unwrap(), b"probe");
    }

    #[test]
    fn test_keychain_unavailable_aborts() {
        struct DeadKeychain;
        impl KeychainProvider for DeadKeychain {
            fn set_entry(&self, _: &str, _: &[u8]) -> restbench_keychain::Result<()> {
                Err(restbench_keychain::KeychainError::Unavailable("no bus".into()))
            }
            fn get_entry(
                &self,
                _: &str,
            ) -> restbench_keychain::Result<restbench_keychain::KeychainSecret> {
                Err(restbench_keychain::KeychainError::Unavailable("no bus".into()))
            }
            fn delete_entry(&self, _: &str) -> restbench_keychain::Result<()> {
                Err(restbench_keychain::KeychainError::Unavailable("no bus".into()))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store = MasterKeyStore::new(dir.path());
        assert!(matches!(
            store.init_encryption(&DeadKeychain),
            Err(CryptoError::Keychain(_))
        ));
    }
}
