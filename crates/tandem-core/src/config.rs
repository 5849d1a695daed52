//! Configuration system for Tandem.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $TANDEM_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/tandem/config.toml
//!   3. ~/.config/tandem/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::chunk::HEADER_LEN;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TandemConfig {
    pub rendezvous: RendezvousConfig,
    pub chunking: ChunkingConfig,
    pub calls: CallsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendezvousConfig {
    /// Give up on a handshake after this many seconds.
    pub handshake_timeout_secs: u64,
    /// Whether this device nominates the path once authenticated.
    pub nominator: bool,
    /// Largest frame accepted from a rendezvous transport.
    pub max_frame_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Total chunk size including the 9-byte header.
    pub chunk_size: usize,
    /// How often partial messages are garbage collected.
    pub gc_interval_secs: u64,
    /// Partial messages idle longer than this are dropped.
    pub gc_max_age_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallsConfig {
    /// SFU base URL. Empty = taken from the call start message.
    pub sfu_base_url: String,
    pub join_timeout_secs: u64,
    pub peek_timeout_secs: u64,
    /// Period of the sealed call state refresh sent by the lowest participant.
    pub state_update_interval_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: 30,
            nominator: true,
            max_frame_bytes: 1 << 20, // 1 MiB
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 16 * 1024,
            gc_interval_secs: 30,
            gc_max_age_secs: 60,
        }
    }
}

impl Default for CallsConfig {
    fn default() -> Self {
        Self {
            sfu_base_url: String::new(),
            join_timeout_secs: 20,
            peek_timeout_secs: 5,
            state_update_interval_secs: 10,
        }
    }
}

impl RendezvousConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

impl ChunkingConfig {
    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    pub fn gc_max_age(&self) -> Duration {
        Duration::from_secs(self.gc_max_age_secs)
    }
}

impl CallsConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }

    pub fn peek_timeout(&self) -> Duration {
        Duration::from_secs(self.peek_timeout_secs)
    }

    pub fn state_update_interval(&self) -> Duration {
        Duration::from_secs(self.state_update_interval_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("tandem")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid setting {0}: {1}")]
    Invalid(&'static str, String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TandemConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            TandemConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("TANDEM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&TandemConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings the protocol cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunking.chunk_size <= HEADER_LEN {
            return Err(ConfigError::Invalid(
                "chunking.chunk_size",
                format!("must exceed the {HEADER_LEN}-byte header"),
            ));
        }
        if self.rendezvous.max_frame_bytes < self.chunking.chunk_size {
            return Err(ConfigError::Invalid(
                "rendezvous.max_frame_bytes",
                "must be at least chunking.chunk_size".into(),
            ));
        }
        Ok(())
    }

    /// Apply TANDEM_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("TANDEM_RENDEZVOUS__NOMINATOR") {
            self.rendezvous.nominator = v == "true" || v == "1";
        }
        if let Some(Ok(v)) = lookup("TANDEM_RENDEZVOUS__HANDSHAKE_TIMEOUT_SECS").map(|v| v.parse()) {
            self.rendezvous.handshake_timeout_secs = v;
        }
        if let Some(Ok(v)) = lookup("TANDEM_CHUNKING__CHUNK_SIZE").map(|v| v.parse()) {
            self.chunking.chunk_size = v;
        }
        if let Some(v) = lookup("TANDEM_CALLS__SFU_BASE_URL") {
            self.calls.sfu_base_url = v;
        }
        if let Some(Ok(v)) = lookup("TANDEM_CALLS__PEEK_TIMEOUT_SECS").map(|v| v.parse()) {
            self.calls.peek_timeout_secs = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = TandemConfig::default();
        config.validate().unwrap();
        assert!(config.rendezvous.nominator);
        assert_eq!(config.calls.state_update_interval(), Duration::from_secs(10));
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config = TandemConfig::from_toml("[chunking]\nchunk_size = 1200\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 1200);
        assert_eq!(config.chunking.gc_max_age_secs, 60);
        assert_eq!(config.rendezvous.handshake_timeout_secs, 30);
    }

    #[test]
    fn overrides_apply_and_ignore_garbage() {
        let env: HashMap<&str, &str> = [
            ("TANDEM_RENDEZVOUS__NOMINATOR", "false"),
            ("TANDEM_CHUNKING__CHUNK_SIZE", "not-a-number"),
            ("TANDEM_CALLS__SFU_BASE_URL", "https://sfu.example"),
        ]
        .into_iter()
        .collect();
        let mut config = TandemConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert!(!config.rendezvous.nominator);
        assert_eq!(config.chunking.chunk_size, 16 * 1024);
        assert_eq!(config.calls.sfu_base_url, "https://sfu.example");
    }

    #[test]
    fn tiny_chunk_size_is_rejected() {
        let mut config = TandemConfig::default();
        config.chunking.chunk_size = HEADER_LEN;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid("chunking.chunk_size", _))
        ));
    }

    #[test]
    fn write_default_if_missing_creates_file() {
        let tmp = std::env::temp_dir().join(format!("tandem-config-test-{}", std::process::id()));
        let config_path = tmp.join("config.toml");
        std::fs::create_dir_all(&tmp).unwrap();

        unsafe {
            std::env::set_var("TANDEM_CONFIG", config_path.to_str().unwrap());
        }

        let path = TandemConfig::write_default_if_missing().expect("write_default_if_missing failed");
        assert!(path.exists());

        let config = TandemConfig::load().expect("load should succeed");
        assert_eq!(config.chunking.chunk_size, 16 * 1024);

        unsafe {
            std::env::remove_var("TANDEM_CONFIG");
        }
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
