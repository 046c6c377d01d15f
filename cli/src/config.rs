use anyhow::{Context, Result};
use directories::ProjectDirs;
use sha2::{Digest, Sha256};
use std::fmt::Write;
use std::path::PathBuf;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_USER: &str = "local";

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
    pub gemini: GeminiSettings,
    pub default_user: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an environment lookup. `PANTRY_DATA_DIR` overrides the
    /// platform data directory.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = match var("PANTRY_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => ProjectDirs::from("", "", "pantry")
                .context("Could not determine home directory")?
                .data_dir()
                .to_path_buf(),
        };
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = data_dir.join("pantry.db");

        Ok(Config {
            db_path,
            data_dir,
            gemini: GeminiSettings {
                api_key: var("GEMINI_API_KEY"),
                model: var("PANTRY_GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
                base_url: var("PANTRY_GEMINI_URL")
                    .unwrap_or_else(|| DEFAULT_GEMINI_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
            },
            default_user: var("PANTRY_USER").unwrap_or_else(|| DEFAULT_USER.to_string()),
        })
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut acc: String, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
}

/// A fresh API token: 32 random bytes, hex encoded.
pub fn generate_token() -> String {
    use rand::Rng;

    let bytes: [u8; 32] = rand::rng().random();
    to_hex(&bytes)
}

/// Tokens are stored only as their SHA-256 digest.
pub fn hash_token(token: &str) -> String {
    to_hex(&Sha256::digest(token.trim().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> (Config, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        env.insert(
            "PANTRY_DATA_DIR".to_string(),
            dir.path().join("data").display().to_string(),
        );
        let config = Config::from_lookup(|k| env.get(k).cloned()).unwrap();
        (config, dir)
    }

    #[test]
    fn test_defaults() {
        let (config, dir) = config_with(&[]);
        assert!(config.data_dir.exists());
        assert_eq!(config.db_path, dir.path().join("data").join("pantry.db"));
        assert_eq!(config.gemini.api_key, None);
        assert_eq!(config.gemini.model, DEFAULT_GEMINI_MODEL);
        assert_eq!(config.gemini.base_url, DEFAULT_GEMINI_URL);
        assert_eq!(config.default_user, DEFAULT_USER);
    }

    #[test]
    fn test_overrides() {
        let (config, _dir) = config_with(&[
            ("GEMINI_API_KEY", " abc "),
            ("PANTRY_GEMINI_MODEL", "gemini-2.0-flash"),
            ("PANTRY_GEMINI_URL", "http://127.0.0.1:9999/"),
            ("PANTRY_USER", "me@example.com"),
        ]);
        assert_eq!(config.gemini.api_key.as_deref(), Some("abc"));
        assert_eq!(config.gemini.model, "gemini-2.0-flash");
        assert_eq!(config.gemini.base_url, "http://127.0.0.1:9999");
        assert_eq!(config.default_user, "me@example.com");
    }

    #[test]
    fn test_blank_key_is_unset() {
        let (config, _dir) = config_with(&[("GEMINI_API_KEY", "  ")]);
        assert_eq!(config.gemini.api_key, None);
    }

    #[test]
    fn test_tokens() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        assert_eq!(hash_token(&a), hash_token(&format!("{a}\n")));
        assert_ne!(hash_token(&a), hash_token(&b));
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
