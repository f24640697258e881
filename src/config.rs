//! Runtime configuration.
//!
//! Uses Figment to merge built-in defaults, an optional `nsfc.toml` in the working directory
//! and `NSFC_*` environment variables. The decryption key is read from the raw `NSFC_DES_KEY`
//! variable so that an all-digit key is never reinterpreted as a number.

use std::{env, ffi::OsString, time::Duration};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{cipher::DesKey, retry::RetryPolicy, warn_time, Result};

pub const DEFAULT_BASE_URL: &str = "https://kd.nsfc.cn";
pub const CONFIG_FILE: &str = "nsfc.toml";
pub const KEY_ENV_VAR: &str = "NSFC_DES_KEY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub tesseract: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 20,
            retry_attempts: 3,
            retry_base_delay_ms: 1000,
            tesseract: "tesseract".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub settings: Settings,
    pub key: DesKey,
}

impl Config {
    /// Loads settings and validates the decryption key. A key of the wrong length fails here.
    pub fn load() -> Result<Self> {
        let settings = Self::figment(Figment::new().merge(Toml::file(CONFIG_FILE))).extract()?;
        let key = key_from_env(env::var_os(KEY_ENV_VAR))?;
        Ok(Self { settings, key })
    }

    fn figment(files: Figment) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(files)
            .merge(Env::prefixed("NSFC_").ignore(&["des_key"]))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.settings.retry_attempts,
            Duration::from_millis(self.settings.retry_base_delay_ms),
        )
    }
}

/// The raw bytes of the variable are checked, whether or not they are valid UTF-8.
fn key_from_env(raw: Option<OsString>) -> Result<DesKey> {
    match raw {
        Some(raw) if !raw.is_empty() => DesKey::new(raw.as_encoded_bytes()),
        _ => {
            warn_time!("Using hard-coded DES key; set {KEY_ENV_VAR} to override");
            Ok(DesKey::default())
        }
    }
}
