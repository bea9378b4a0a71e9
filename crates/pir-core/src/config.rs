//! JSON configuration

use crate::prf::{DEFAULT_KEY, KEY_SIZE};
use crate::{Error, Params, Result, DEFAULT_LAMBDA};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_lambda() -> u32 {
    DEFAULT_LAMBDA
}

fn default_prf_key() -> String {
    hex::encode(DEFAULT_KEY)
}

/// Deployment configuration, as written in a JSON file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PirConfig {
    pub log_n: u32,
    pub entry_bytes: usize,
    #[serde(default = "default_lambda")]
    pub lambda: u32,
    /// Hex-encoded AES-128 key shared by client and servers
    #[serde(default = "default_prf_key")]
    pub prf_key: String,
}

impl PirConfig {
    pub fn new(log_n: u32, entry_bytes: usize) -> Self {
        Self {
            log_n,
            entry_bytes,
            lambda: DEFAULT_LAMBDA,
            prf_key: default_prf_key(),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn params(&self) -> Result<Params> {
        Params::with_lambda(self.log_n, self.entry_bytes, self.lambda)
    }

    pub fn prf_key(&self) -> Result<[u8; KEY_SIZE]> {
        let bytes = hex::decode(&self.prf_key)
            .map_err(|e| Error::InvalidConfiguration(format!("prf_key: {e}")))?;
        bytes.try_into().map_err(|_| {
            Error::InvalidConfiguration(format!("prf_key must be {KEY_SIZE} bytes"))
        })
    }
}
