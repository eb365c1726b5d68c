//! Credentials configuration for the control plane
//!
//! Credentials load from `RELAY_API_TOKEN`/`RELAY_ACCOUNT_ID` environment
//! variables, an explicit path, `edgerelay.json` in the working directory,
//! or `~/.edgerelay.json`, in that order. The endpoint registry file lives
//! alongside the config but is owned by `relay-core::EndpointStore`.

use relay_core::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

const CONFIG_FILE: &str = "edgerelay.json";
const HOME_CONFIG_FILE: &str = ".edgerelay.json";

// Values written by scaffolding tools that must not pass validation.
const PLACEHOLDERS: &[&str] = &[
    "your_cloudflare_api_token_here",
    "your_cloudflare_account_id_here",
];

#[derive(Debug, Deserialize, Serialize)]
struct ConfigFile {
    cloudflare: CloudflareSection,
}

#[derive(Debug, Deserialize, Serialize)]
struct CloudflareSection {
    #[serde(default)]
    api_token: String,
    #[serde(default)]
    account_id: String,
}

/// Validated control plane credentials.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub api_token: String,
    pub account_id: String,
    /// Path the credentials were read from, when file-based.
    pub source: Option<PathBuf>,
}

impl RelayConfig {
    /// Load credentials, preferring the environment over config files.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let (Ok(api_token), Ok(account_id)) = (
            std::env::var("RELAY_API_TOKEN"),
            std::env::var("RELAY_ACCOUNT_ID"),
        ) {
            debug!("Using credentials from environment");
            return Self::validated(api_token, account_id, None);
        }

        for path in Self::candidate_paths(explicit) {
            if path.exists() {
                debug!("Loading credentials from {}", path.display());
                return Self::from_file(&path);
            }
        }

        Err(CoreError::Configuration(
            "no credentials found; set RELAY_API_TOKEN/RELAY_ACCOUNT_ID or create edgerelay.json".to_string(),
        ))
    }

    /// Parse and validate a specific config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: ConfigFile = serde_json::from_str(&raw)?;
        Self::validated(
            file.cloudflare.api_token,
            file.cloudflare.account_id,
            Some(path.to_path_buf()),
        )
    }

    fn candidate_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(path) = explicit {
            paths.push(path.to_path_buf());
        }
        paths.push(PathBuf::from(CONFIG_FILE));
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(Path::new(&home).join(HOME_CONFIG_FILE));
        }
        paths
    }

    fn validated(api_token: String, account_id: String, source: Option<PathBuf>) -> Result<Self> {
        let api_token = api_token.trim().to_string();
        let account_id = account_id.trim().to_string();

        for (name, value) in [("api_token", &api_token), ("account_id", &account_id)] {
            if value.is_empty() || value.len() <= 10 || PLACEHOLDERS.contains(&value.as_str()) {
                return Err(CoreError::Configuration(format!(
                    "cloudflare.{} is missing or a placeholder",
                    name
                )));
            }
        }

        Ok(Self { api_token, account_id, source })
    }

    /// Where the registry file lives: next to the config when file-based,
    /// otherwise the working directory.
    pub fn store_path(&self) -> PathBuf {
        match &self.source {
            Some(path) => path.with_file_name("endpoints.json"),
            None => PathBuf::from("endpoints.json"),
        }
    }
}
