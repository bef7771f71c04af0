use std::fs;
use std::path::{Path, PathBuf};

use glint_common::{Error, Result};
use rand::RngCore;
use tracing::info;

const UNIQUE_ID_FILE: &str = "uniqueid.dat";
const UNIQUE_ID_LEN: usize = 16;

/// Persistent client identity kept in the key directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub unique_id: String,
    pub key_dir: PathBuf,
}

impl ClientIdentity {
    /// Loads the identity from `key_dir`, creating the directory and a fresh
    /// id on first run.
    pub fn load_or_init(key_dir: &Path) -> Result<Self> {
        let path = key_dir.join(UNIQUE_ID_FILE);
        if path.is_file() {
            let raw = fs::read_to_string(&path)?;
            let unique_id = raw.trim().to_string();
            validate_unique_id(&unique_id)?;
            return Ok(Self {
                unique_id,
                key_dir: key_dir.to_path_buf(),
            });
        }

        fs::create_dir_all(key_dir)?;
        let unique_id = generate_unique_id();
        fs::write(&path, &unique_id)?;
        info!("created client identity in {}", key_dir.display());
        Ok(Self {
            unique_id,
            key_dir: key_dir.to_path_buf(),
        })
    }
}

fn generate_unique_id() -> String {
    let mut bytes = [0u8; UNIQUE_ID_LEN / 2];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn validate_unique_id(id: &str) -> Result<()> {
    if id.len() != UNIQUE_ID_LEN || hex::decode(id).is_err() {
        return Err(Error::config(format!(
            "{UNIQUE_ID_FILE} must hold {UNIQUE_ID_LEN} hex characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glint_common::now_us;

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("glint-identity-{tag}-{}", now_us()))
    }

    #[test]
    fn test_init_then_reload_keeps_id() {
        let dir = scratch_dir("reload");
        let first = ClientIdentity::load_or_init(&dir).unwrap();
        assert_eq!(first.unique_id.len(), UNIQUE_ID_LEN);

        let second = ClientIdentity::load_or_init(&dir).unwrap();
        assert_eq!(first, second);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_corrupt_id_is_rejected() {
        let dir = scratch_dir("corrupt");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(UNIQUE_ID_FILE), "not-hex").unwrap();

        let err = ClientIdentity::load_or_init(&dir).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_generated_ids_are_hex() {
        let id = generate_unique_id();
        assert!(validate_unique_id(&id).is_ok());
    }
}
