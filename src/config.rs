//! Reader configuration
//!
//! Loaded from JSON. Every field has a default, so `{}` is a valid
//! configuration and reproduces the built-in behavior.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::auth::{self, DEFAULT_LOCAL_CHALLENGE};
use crate::crypto::{CipherError, TdesKey, BLOCK_SIZE};
use crate::transport::RESPONSE_TIMEOUT;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Extra key #{index} is invalid: {source}")]
    InvalidKey {
        index: usize,
        #[source]
        source: CipherError,
    },

    #[error("Extra password #{index} must be 8 hex digits, got {value:?}")]
    InvalidPassword { index: usize, value: String },
}

/// Settings shared by every operation of a [`crate::Reader`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Per-exchange timeout handed to the transport
    pub timeout_ms: u64,
    /// RndA sent during Ultralight C authentication
    #[serde(with = "hex")]
    pub local_challenge: [u8; BLOCK_SIZE],
    /// Ultralight C keys (hex) tried after the built-in list
    pub extra_keys: Vec<String>,
    /// EV1 / NTAG passwords (hex) tried after the built-in list
    pub extra_passwords: Vec<String>,
    /// Run the AUTH_START and zero-length write probes during classification
    pub magic_probes: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            timeout_ms: RESPONSE_TIMEOUT.as_millis() as u64,
            local_challenge: DEFAULT_LOCAL_CHALLENGE,
            extra_keys: Vec::new(),
            extra_passwords: Vec::new(),
            magic_probes: true,
        }
    }
}

impl ReaderConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Built-in keys followed by the configured extras
    pub fn candidate_keys(&self) -> Result<Vec<TdesKey>, ConfigError> {
        let mut keys = auth::default_keys();
        for (index, hex_key) in self.extra_keys.iter().enumerate() {
            let key = TdesKey::from_hex(hex_key)
                .map_err(|source| ConfigError::InvalidKey { index, source })?;
            keys.push(key);
        }
        Ok(keys)
    }

    /// Built-in passwords followed by the configured extras
    pub fn candidate_passwords(&self) -> Result<Vec<[u8; 4]>, ConfigError> {
        let mut passwords: Vec<[u8; 4]> = auth::DEFAULT_PASSWORDS.iter().map(|p| p.pwd).collect();
        for (index, value) in self.extra_passwords.iter().enumerate() {
            let mut pwd = [0u8; 4];
            hex::decode_to_slice(value, &mut pwd).map_err(|_| ConfigError::InvalidPassword {
                index,
                value: value.clone(),
            })?;
            passwords.push(pwd);
        }
        Ok(passwords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_is_default() {
        let config = ReaderConfig::from_json("{}").unwrap();
        assert_eq!(config, ReaderConfig::default());
        assert_eq!(config.timeout(), Duration::from_millis(1500));
        assert!(config.magic_probes);
    }

    #[test]
    fn test_extras_follow_defaults() {
        let config = ReaderConfig::from_json(
            r#"{
                "local_challenge": "0102030405060708",
                "extra_keys": ["00112233445566778899aabbccddeeff0011223344556677"],
                "extra_passwords": ["DEADBEEF"]
            }"#,
        )
        .unwrap();
        assert_eq!(config.local_challenge, [1, 2, 3, 4, 5, 6, 7, 8]);

        let keys = config.candidate_keys().unwrap();
        assert_eq!(keys.len(), 8);
        assert_eq!(keys[7].len(), 24);

        let passwords = config.candidate_passwords().unwrap();
        assert_eq!(passwords.len(), 4);
        assert_eq!(passwords[3], [0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_invalid_extras() {
        let config = ReaderConfig {
            extra_keys: vec!["abcd".into()],
            extra_passwords: vec!["xyz".into()],
            ..Default::default()
        };
        assert!(matches!(
            config.candidate_keys(),
            Err(ConfigError::InvalidKey { index: 0, .. })
        ));
        assert!(matches!(
            config.candidate_passwords(),
            Err(ConfigError::InvalidPassword { index: 0, .. })
        ));
    }
}
