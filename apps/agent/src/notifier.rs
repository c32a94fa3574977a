use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, warn};

/// Outbound channel to the node operator
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, message: &str) -> Result<()>;
}

/// Writes notifications to the log only
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<()> {
        error!(title, message, "operator notification");
        Ok(())
    }
}

#[derive(Serialize)]
struct NotificationBody {
    message: String,
}

/// Posts notifications as JSON to an operator endpoint
pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
    node_id: u64,
}

impl HttpNotifier {
    pub const NODE_HEADER: &'static str = "X-Node-Id";

    pub fn new(url: impl Into<String>, node_id: u64) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, url: url.into(), node_id })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<()> {
        let body = NotificationBody { message: format!("{title}: {message}") };

        let response = self
            .client
            .post(&self.url)
            .header(Self::NODE_HEADER, self.node_id.to_string())
            .json(&body)
            .send()
            .await?;

        if let Err(e) = response.error_for_status_ref() {
            warn!(url = %self.url, error = %e, "notification endpoint refused message");
            return Err(e.into());
        }
        Ok(())
    }
}

/// Send through `notifier`, logging instead of failing when delivery fails.
pub async fn notify_operator(notifier: &dyn Notifier, title: &str, message: &str) {
    if let Err(e) = notifier.notify(title, message).await {
        error!(title, message, error = %e, "failed to notify operator");
    }
}
