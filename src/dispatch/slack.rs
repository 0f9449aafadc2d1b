use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tracing::{error, info};

use super::Dispatcher;
use crate::types::{AlertMessage, SlackPayload};

pub struct SlackDispatcher {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackDispatcher {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Dispatcher for SlackDispatcher {
    async fn send(&self, msg: &AlertMessage) -> Result<bool> {
        let payload = build_slack_payload(msg);
        send_to_slack(&self.client, &self.webhook_url, &payload).await?;
        info!("Sent: [{}] to Slack", msg.title.replace('\n', " "));
        Ok(true)
    }
}

pub fn build_slack_payload(msg: &AlertMessage) -> SlackPayload {
    let mut blocks: Vec<serde_json::Value> = Vec::new();

    // Header blocks are plain text only.
    blocks.push(serde_json::json!({
        "type": "header",
        "text": {"type": "plain_text", "text": msg.title.replace("**", "")}
    }));

    blocks.push(serde_json::json!({
        "type": "section",
        "text": {"type": "mrkdwn", "text": to_mrkdwn(&msg.text)}
    }));

    if !msg.address.is_empty() {
        blocks.push(serde_json::json!({
            "type": "context",
            "elements": [
                {"type": "mrkdwn", "text": format!("<{}|View pod monitoring>", msg.address)}
            ]
        }));
    }

    SlackPayload {
        text: Some(msg.title.replace("**", "")),
        blocks,
    }
}

// Slack mrkdwn uses single asterisks for bold.
fn to_mrkdwn(text: &str) -> String {
    text.replace("**", "*")
}

pub async fn send_to_slack(client: &reqwest::Client, webhook_url: &str, payload: &SlackPayload) -> Result<()> {
    let res = client
        .post(webhook_url)
        .json(payload)
        .send()
        .await
        .context("Failed to send Slack request")?;
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        error!("Slack webhook failed: {} - {}", status, body);
        return Err(anyhow!("Slack webhook returned non-success status"));
    }
    Ok(())
}
