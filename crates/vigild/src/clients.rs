use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use vigil_core::{ClientError, ConsoleClient, Coordinator, WorkerClient, WorkerStatus};

use crate::config::Config;

pub fn http_client(config: &Config) -> Result<Client> {
    Client::builder()
        .timeout(config.http_timeout())
        .user_agent(concat!("vigild/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

fn classify(err: reqwest::Error) -> ClientError {
    if err.is_connect() {
        ClientError::Connect(err.to_string())
    } else {
        ClientError::Other(anyhow::Error::new(err))
    }
}

#[derive(Deserialize)]
struct AgentOnline {
    #[serde(default)]
    is_online: Option<bool>,
}

/// Coordinator API client.
#[derive(Clone)]
pub struct ServerClient {
    client: Client,
    server_url: Option<String>,
    access_token: Option<String>,
}

impl ServerClient {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            server_url: config.server_url.clone(),
            access_token: config.access_token.clone(),
        }
    }
}

#[async_trait]
impl Coordinator for ServerClient {
    async fn is_agent_online(&self) -> Result<Option<bool>> {
        let Some(server_url) = &self.server_url else {
            anyhow::bail!("Coordinator URL is not configured");
        };
        let url = format!("{}/api/v2/agent/", server_url.trim_end_matches('/'));

        let mut req = self.client.get(&url).query(&[("fields", "is_online")]);
        if let Some(token) = &self.access_token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.context("Failed to connect to coordinator")?;
        if !resp.status().is_success() {
            anyhow::bail!("Coordinator returned error: {}", resp.status());
        }

        let body: AgentOnline = resp
            .json()
            .await
            .context("Failed to parse coordinator response")?;
        Ok(body.is_online)
    }
}

/// Client for the worker's local status endpoint.
#[derive(Clone)]
pub struct WorkerStatusClient {
    client: Client,
    url: String,
}

impl WorkerStatusClient {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            url: config.worker_status_url.clone(),
        }
    }
}

#[async_trait]
impl WorkerClient for WorkerStatusClient {
    async fn get_status(&self) -> Result<WorkerStatus, ClientError> {
        let resp = self.client.get(&self.url).send().await.map_err(classify)?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            debug!("Worker responded HTTP{}: {}", status.as_u16(), message);
            return Err(ClientError::Status {
                code: status.as_u16(),
                message,
            });
        }

        resp.json()
            .await
            .context("Failed to parse worker status")
            .map_err(ClientError::Other)
    }
}

/// Plain GET against the console.
#[derive(Clone)]
pub struct ConsoleProbe {
    client: Client,
    url: String,
}

impl ConsoleProbe {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            url: config.console_url.clone(),
        }
    }
}

#[async_trait]
impl ConsoleClient for ConsoleProbe {
    async fn probe(&self) -> Result<u16, ClientError> {
        let resp = self.client.get(&self.url).send().await.map_err(classify)?;
        Ok(resp.status().as_u16())
    }
}
