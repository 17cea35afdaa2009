use reqwest::Client;
use serde::Serialize;
use tracing::warn;

use vigil_core::{AlertLevel, Alerts};

use crate::config::Config;

#[derive(Debug, Clone, Serialize)]
struct AlertPayload {
    agent_id: String,
    level: &'static str,
    message: String,
}

/// Posts alerts to a webhook without waiting for delivery. With no webhook
/// configured, alerts only reach the log.
pub struct WebhookAlerts {
    client: Client,
    url: Option<String>,
    agent_id: String,
}

impl WebhookAlerts {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            url: config.alert_webhook_url.clone(),
            agent_id: config.agent_id.clone(),
        }
    }

    fn send(&self, level: AlertLevel, message: String) {
        let Some(url) = self.url.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to deliver alert: {}", message);
            return;
        };

        let client = self.client.clone();
        let payload = AlertPayload {
            agent_id: self.agent_id.clone(),
            level: level.as_str(),
            message,
        };
        runtime.spawn(async move {
            match client.post(&url).json(&payload).send().await {
                Ok(resp) if !resp.status().is_success() => {
                    warn!("Alert webhook returned {}", resp.status());
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to deliver alert: {}", e),
            }
        });
    }
}

impl Alerts for WebhookAlerts {
    fn capture_message(&self, level: AlertLevel, message: &str) {
        self.send(level, message.to_string());
    }

    fn capture_error(&self, context: &str, err: &anyhow::Error) {
        self.send(AlertLevel::Error, format!("{}: {:#}", context, err));
    }
}
