use async_trait::async_trait;
use serde_json::json;

/// Where refresh progress and failures get reported.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn info(&self, message: &str);
    async fn error(&self, message: &str);
}

/// Posts messages to a Discord webhook. Delivery failures are logged only.
pub struct DiscordNotifier {
    http: reqwest::Client,
    webhook_url: String,
}

impl DiscordNotifier {
    pub fn new(webhook_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            webhook_url: webhook_url.to_string(),
        }
    }

    async fn post(&self, content: String) {
        let body = json!({ "content": content });
        match self.http.post(&self.webhook_url).json(&body).send().await {
            Ok(resp) if !resp.status().is_success() => {
                tracing::warn!("Discord webhook rejected message: {}", resp.status());
            }
            Err(e) => tracing::warn!("Failed to send Discord notification: {}", e),
            Ok(_) => {}
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn info(&self, message: &str) {
        tracing::info!("{}", message);
        self.post(format!("**{}**", message)).await;
    }

    async fn error(&self, message: &str) {
        tracing::error!("{}", message);
        self.post(format!(":x: **{}**", message)).await;
    }
}

/// Used when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    async fn error(&self, message: &str) {
        tracing::error!("{}", message);
    }
}
