//! File-backed configuration store for live-edit environments.
//!
//! `config/runtime-config.json` wins when it exists; otherwise the store
//! bootstraps from `LEDGER_ACCOUNT_<ALIAS>_*` environment variables so a
//! fresh deployment works from a .env file alone. Writes are atomic
//! (temp file + rename). Reads are cached by file mtime and handed out as
//! immutable `Arc` snapshots.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::warn;

use super::{normalize_alias, AccountConfig, RuntimeConfig};
use crate::error::{AppError, AppResult};

const ACCOUNT_ENV_PREFIX: &str = "LEDGER_ACCOUNT_";
const CPM_ENV_PREFIX: &str = "LEDGER_MASTER_ACCOUNT_";

pub struct ConfigStore {
    path: PathBuf,
    cache: Mutex<Option<CacheEntry>>,
}

struct CacheEntry {
    mtime: Option<SystemTime>,
    config: Arc<RuntimeConfig>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    /// One consistent snapshot. Callers hold the returned `Arc` for the
    /// whole request; a concurrent `save` only affects later snapshots.
    pub fn snapshot(&self) -> AppResult<Arc<RuntimeConfig>> {
        let mut cache = self.cache.lock();

        if self.path.exists() {
            let mtime = fs::metadata(&self.path)?.modified().ok();
            if let Some(entry) = cache.as_ref() {
                if entry.mtime.is_some() && entry.mtime == mtime {
                    return Ok(entry.config.clone());
                }
            }
            let raw = fs::read_to_string(&self.path)?;
            let config: RuntimeConfig = serde_json::from_str(&raw)
                .map_err(|e| AppError::Config(format!("invalid runtime config: {}", e)))?;
            let config = Arc::new(config);
            *cache = Some(CacheEntry {
                mtime,
                config: config.clone(),
            });
            return Ok(config);
        }

        // No runtime file yet: bootstrap from the environment.
        if let Some(entry) = cache.as_ref() {
            if entry.mtime.is_none() {
                return Ok(entry.config.clone());
            }
        }
        let config = Arc::new(Self::from_env());
        *cache = Some(CacheEntry {
            mtime: None,
            config: config.clone(),
        });
        Ok(config)
    }

    /// Persist a new runtime config and refresh the cache.
    pub fn save(&self, config: &RuntimeConfig) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        atomic_write_json(&self.path, config)?;
        let mtime = fs::metadata(&self.path)?.modified().ok();
        *self.cache.lock() = Some(CacheEntry {
            mtime,
            config: Arc::new(config.clone()),
        });
        Ok(())
    }

    fn from_env() -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        if let Ok(master) = std::env::var("LEDGER_MASTER_ACCOUNT_ALIAS") {
            let master = normalize_alias(&master);
            if !master.is_empty() {
                config.master_account_alias = master;
            }
        }

        let mut accounts: HashMap<String, AccountConfig> = HashMap::new();
        for (key, value) in std::env::vars() {
            let Some(rest) = key.strip_prefix(ACCOUNT_ENV_PREFIX) else {
                continue;
            };
            let Some(alias) = rest.strip_suffix("_ACCOUNT_ID") else {
                continue;
            };
            let alias = normalize_alias(alias);
            if alias.is_empty() {
                continue;
            }
            let var = |suffix: &str| {
                std::env::var(format!("{}{}_{}", ACCOUNT_ENV_PREFIX, alias, suffix))
                    .unwrap_or_default()
                    .trim()
                    .to_string()
            };
            let country = {
                let v = var("COUNTRY").to_uppercase();
                if v.is_empty() {
                    None
                } else {
                    Some(v)
                }
            };
            accounts.insert(
                alias.clone(),
                AccountConfig {
                    account_id: value.trim().to_string(),
                    secret_key: var("SECRET_KEY"),
                    publishable_key: var("PUBLISHABLE_KEY"),
                    webhook_signing_secret: var("WEBHOOK_SIGNING_SECRET"),
                    country,
                },
            );
        }
        config.accounts = accounts;

        for (key, value) in std::env::vars() {
            let Some(rest) = key.strip_prefix(CPM_ENV_PREFIX) else {
                continue;
            };
            let Some(alias) = rest.strip_suffix("_CPM") else {
                continue;
            };
            let alias = normalize_alias(alias);
            if !alias.is_empty() && !value.trim().is_empty() {
                config
                    .master_custom_payment_methods
                    .insert(alias, value.trim().to_string());
            }
        }

        if config.accounts.is_empty() {
            warn!("no accounts configured (no runtime-config.json and no LEDGER_ACCOUNT_* env)");
        }
        config
    }
}

fn atomic_write_json(path: &Path, config: &RuntimeConfig) -> AppResult<()> {
    let tmp = path.with_extension("json.tmp");
    let mut body = serde_json::to_string_pretty(config)
        .map_err(|e| AppError::Config(format!("failed to serialize config: {}", e)))?;
    body.push('\n');
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
