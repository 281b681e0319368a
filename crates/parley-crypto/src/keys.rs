use std::fs;
use std::path::Path;

use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

/// Generate a random 256-bit key for AES-256-GCM.
pub fn generate_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

/// Load the at-rest key from `path`, generating and persisting a fresh one
/// on first start. The file holds the key base64-encoded on a single line.
pub fn load_or_generate(path: &Path) -> Result<[u8; 32]> {
    if path.exists() {
        let encoded = fs::read_to_string(path)
            .with_context(|| format!("reading key file {}", path.display()))?;
        return key_from_base64(encoded.trim());
    }

    let key = generate_key();
    fs::write(path, key_to_base64(&key))
        .with_context(|| format!("writing key file {}", path.display()))?;
    Ok(key)
}

pub fn key_to_base64(key: &[u8; 32]) -> String {
    BASE64.encode(key)
}

pub fn key_from_base64(encoded: &str) -> Result<[u8; 32]> {
    let bytes = BASE64.decode(encoded)?;
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("invalid key length"))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_roundtrip() {
        let key = generate_key();
        let encoded = key_to_base64(&key);
        assert_eq!(key_from_base64(&encoded).unwrap(), key);
    }

    #[test]
    fn load_or_generate_is_stable() {
        let dir = std::env::temp_dir().join(format!("parley-key-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("parley.key");

        let first = load_or_generate(&path).unwrap();
        let second = load_or_generate(&path).unwrap();
        assert_eq!(first, second);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn rejects_short_key() {
        assert!(key_from_base64(&BASE64.encode([0u8; 16])).is_err());
    }
}
