use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{bail, Context, Result};
use ratchetstore_crypto::{generate_salt, MasterSecret};
use ratchetstore_crypto::master::SALT_LEN;
use tracing::info;

/// Environment variable holding the passphrase that unlocks the store.
pub const PASSPHRASE_ENV: &str = "RATCHETSTORE_PASSPHRASE";

pub const SALT_FILE: &str = "master.salt";

/// Derive the master secret from the passphrase in the environment and
/// the salt kept next to the records.
pub fn unlock(sessions_dir: &Path) -> Result<MasterSecret> {
    let passphrase = std::env::var(PASSPHRASE_ENV)
        .with_context(|| format!("{} is not set", PASSPHRASE_ENV))?;
    if passphrase.is_empty() {
        bail!("{} is empty", PASSPHRASE_ENV);
    }
    let salt = load_or_create_salt(sessions_dir)?;
    Ok(MasterSecret::from_passphrase(&passphrase, &salt))
}

/// Read `<dir>/master.salt`, creating it with a fresh salt on first use.
pub fn load_or_create_salt(dir: &Path) -> Result<[u8; SALT_LEN]> {
    let path = dir.join(SALT_FILE);
    match fs::read(&path) {
        Ok(bytes) => <[u8; SALT_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
            anyhow::anyhow!(
                "{} is {} bytes, expected {}",
                path.display(),
                bytes.len(),
                SALT_LEN
            )
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            let salt = generate_salt().context("failed to generate salt")?;
            fs::write(&path, salt)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "created master salt");
            Ok(salt)
        }
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salt_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_or_create_salt(dir.path()).unwrap();
        let second = load_or_create_salt(dir.path()).unwrap();
        assert_eq!(first, second);
        assert!(dir.path().join(SALT_FILE).exists());
    }

    #[test]
    fn short_salt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SALT_FILE), [1u8; 4]).unwrap();
        assert!(load_or_create_salt(dir.path()).is_err());
    }
}
