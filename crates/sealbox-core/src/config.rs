use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use sealbox_crypto::{KeyParams, DEFAULT_PBKDF2_ITERATIONS, DEFAULT_RSA_BITS};

use crate::error::{SealboxError, SealboxResult};

/// Top-level client configuration (loaded from sealbox.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SealboxConfig {
    pub client: ClientConfig,
    pub storage: StorageConfig,
    pub crypto: CryptoConfig,
    pub index: IndexConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// OpenDAL backend: "fs" or "memory"
    pub backend: String,
    /// Root directory for the fs backend
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// PBKDF2-HMAC-SHA256 iterations for new registrations.
    /// Existing users keep the count stored with their key bundle.
    pub pbkdf2_iterations: u32,
    /// RSA modulus size for new registrations
    pub rsa_bits: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Upper bound on chain hops per search
    pub max_hops: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "fs".into(),
            root: PathBuf::from("~/.local/share/sealbox"),
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
            rsa_bits: DEFAULT_RSA_BITS,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { max_hops: 10_000 }
    }
}

impl From<&CryptoConfig> for KeyParams {
    fn from(cfg: &CryptoConfig) -> Self {
        KeyParams {
            pbkdf2_iterations: cfg.pbkdf2_iterations,
            rsa_bits: cfg.rsa_bits,
        }
    }
}

impl StorageConfig {
    /// The storage root with a leading `~` expanded against `$HOME`.
    pub fn resolved_root(&self) -> PathBuf {
        expand_tilde(&self.root)
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

impl SealboxConfig {
    /// Load a config file. A missing file is not an error: defaults are used.
    pub fn load(path: &Path) -> SealboxResult<Self> {
        if !path.exists() {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SealboxError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SealboxResult<()> {
        if self.crypto.pbkdf2_iterations == 0 {
            return Err(SealboxError::Config(
                "crypto.pbkdf2_iterations must be non-zero".into(),
            ));
        }
        if self.crypto.rsa_bits < 2048 {
            return Err(SealboxError::Config(format!(
                "crypto.rsa_bits must be at least 2048, got {}",
                self.crypto.rsa_bits
            )));
        }
        if self.index.max_hops == 0 {
            return Err(SealboxError::Config("index.max_hops must be non-zero".into()));
        }
        match self.storage.backend.as_str() {
            "fs" | "memory" => Ok(()),
            other => Err(SealboxError::Config(format!(
                "unknown storage backend: {other} (expected fs or memory)"
            ))),
        }
    }
}
