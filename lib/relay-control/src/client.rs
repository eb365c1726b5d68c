//! Authenticated client for the Workers management API

use crate::{RelayConfig, WORKER_SCRIPT};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use relay_core::{ControlPlane, CoreError, DeployedScript, Result};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com/client/v4";

/// Deployed scripts are named `relay-<unix-ts>-<suffix>`; the prefix scopes
/// list/cleanup to endpoints this system owns.
pub const ENDPOINT_PREFIX: &str = "relay-";

const API_TIMEOUT: Duration = Duration::from_secs(30);
const DEPLOY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct ApiResponse<T> {
    #[serde(default)]
    success: bool,
    result: Option<T>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct SubdomainResult {
    subdomain: Option<String>,
}

#[derive(Deserialize)]
struct ScriptResult {
    id: String,
    created_on: Option<String>,
}

/// Thin authenticated wrapper over the Workers management API.
pub struct CloudflareClient {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
    account_id: String,
    // workers.dev subdomain, fetched once per client
    subdomain: OnceCell<String>,
}

impl CloudflareClient {
    pub fn new(config: &RelayConfig) -> Result<Self> {
        Self::with_base_url(config, DEFAULT_BASE_URL)
    }

    /// Point the client at a different management API base (tests).
    pub fn with_base_url(config: &RelayConfig, base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .map_err(|e| control_err("building HTTP client", e))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            account_id: config.account_id.clone(),
            subdomain: OnceCell::new(),
        })
    }

    fn scripts_url(&self) -> String {
        format!("{}/accounts/{}/workers/scripts", self.base_url, self.account_id)
    }

    /// The account's workers.dev subdomain, falling back to the lowercase
    /// account id when the subdomain route is unavailable.
    async fn subdomain(&self) -> String {
        self.subdomain
            .get_or_init(|| async {
                let url = format!("{}/accounts/{}/workers/subdomain", self.base_url, self.account_id);
                let response = self.http.get(&url).bearer_auth(&self.api_token).send().await;
                if let Ok(response) = response {
                    if response.status().is_success() {
                        if let Ok(api) = response.json::<ApiResponse<SubdomainResult>>().await {
                            if let Some(SubdomainResult { subdomain: Some(s) }) = api.result {
                                return s;
                            }
                        }
                    }
                }
                debug!("Subdomain lookup failed, using account id");
                self.account_id.to_lowercase()
            })
            .await
            .clone()
    }

    /// Verify an API response and extract its `result`.
    async fn check<T: DeserializeOwned>(&self, response: reqwest::Response, context: &str) -> Result<T> {
        let status = response.status();
        let body = response.text().await.map_err(|e| control_err(context, e))?;

        if !status.is_success() {
            return Err(CoreError::ControlPlane(format!(
                "{} returned {}: {}",
                context,
                status,
                truncate(&body)
            )));
        }

        let api: ApiResponse<T> = serde_json::from_str(&body).map_err(|e| control_err(context, e))?;
        if !api.success {
            let reason = api
                .errors
                .first()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "unknown API error".to_string());
            return Err(CoreError::ControlPlane(format!("{}: {}", context, reason)));
        }

        api.result
            .ok_or_else(|| CoreError::ControlPlane(format!("{}: empty result", context)))
    }

    /// Best-effort workers.dev route enablement; deployment stands without it.
    async fn enable_subdomain(&self, name: &str) {
        let url = format!("{}/{}/subdomain", self.scripts_url(), name);
        let result = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&serde_json::json!({ "enabled": true }))
            .send()
            .await;
        if let Err(e) = result {
            debug!("Could not enable workers.dev route for {}: {}", name, e);
        }
    }
}

#[async_trait]
impl ControlPlane for CloudflareClient {
    async fn deploy(&self) -> Result<DeployedScript> {
        let name = generate_endpoint_name();
        let url = format!("{}/{}", self.scripts_url(), name);

        let metadata = serde_json::json!({
            "body_part": "script",
            "main_module": "worker.js",
        })
        .to_string();

        let form = Form::new()
            .part(
                "metadata",
                Part::text(metadata)
                    .mime_str("application/json")
                    .map_err(|e| control_err("deploy metadata", e))?,
            )
            .part(
                "script",
                Part::text(WORKER_SCRIPT)
                    .file_name("worker.js")
                    .mime_str("application/javascript")
                    .map_err(|e| control_err("deploy script", e))?,
            );

        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.api_token)
            .multipart(form)
            .timeout(DEPLOY_TIMEOUT)
            .send()
            .await
            .map_err(|e| control_err("deploy", e))?;

        self.check::<serde_json::Value>(response, "deploy").await?;
        self.enable_subdomain(&name).await;

        let public_url = workers_dev_url(&name, &self.subdomain().await);
        info!("Deployed {} at {}", name, public_url);

        Ok(DeployedScript {
            id: name,
            public_url,
            created_at: Some(Utc::now()),
        })
    }

    async fn list_deployed(&self) -> Result<Vec<DeployedScript>> {
        let response = self
            .http
            .get(&self.scripts_url())
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| control_err("list", e))?;

        let scripts: Vec<ScriptResult> = self.check(response, "list").await?;
        let subdomain = self.subdomain().await;

        let deployed = scripts
            .into_iter()
            .filter(|s| is_relay_script(&s.id))
            .map(|s| DeployedScript {
                public_url: workers_dev_url(&s.id, &subdomain),
                created_at: s
                    .created_on
                    .as_deref()
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                    .map(|dt| dt.with_timezone(&Utc)),
                id: s.id,
            })
            .collect();
        Ok(deployed)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let url = format!("{}/{}", self.scripts_url(), id);
        let response = self
            .http
            .delete(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| control_err("delete", e))?;

        let status = response.status();
        // 404 means already gone, which is the state we wanted
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            debug!("Deleted script {} ({})", id, status);
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            warn!("Delete of {} failed with {}", id, status);
            Err(CoreError::ControlPlane(format!(
                "delete {} returned {}: {}",
                id,
                status,
                truncate(&body)
            )))
        }
    }
}

/// Unique script name: prefix, creation timestamp, random suffix.
pub fn generate_endpoint_name() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6).map(|_| rng.gen_range(b'a'..=b'z') as char).collect();
    format!("{}{}-{}", ENDPOINT_PREFIX, Utc::now().timestamp(), suffix)
}

/// Whether a deployed script belongs to this system.
pub fn is_relay_script(id: &str) -> bool {
    id.starts_with(ENDPOINT_PREFIX)
}

fn workers_dev_url(name: &str, subdomain: &str) -> String {
    format!("https://{}.{}.workers.dev", name, subdomain)
}

fn control_err(context: &str, e: impl std::fmt::Display) -> CoreError {
    CoreError::ControlPlane(format!("{}: {}", context, e))
}

fn truncate(body: &str) -> &str {
    // Cut on a char boundary; API error bodies are not always ASCII.
    match body.char_indices().nth(200) {
        Some((i, _)) => &body[..i],
        None => body,
    }
}
