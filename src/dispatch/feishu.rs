use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, info, warn};

use super::Dispatcher;
use crate::types::{AlertMessage, FeishuPayload};

/// Feishu custom-bot webhook. Messages go to `{webhook_url}/{robot}`.
pub struct FeishuDispatcher {
    webhook_url: String,
    default_robot: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct FeishuResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

impl FeishuDispatcher {
    pub fn new(webhook_url: impl Into<String>, default_robot: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into().trim_end_matches('/').to_string(),
            default_robot: default_robot.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn robot_url(&self, msg: &AlertMessage) -> String {
        let robot = msg.robot.as_deref().unwrap_or(&self.default_robot);
        format!("{}/{}", self.webhook_url, robot)
    }
}

#[async_trait]
impl Dispatcher for FeishuDispatcher {
    async fn send(&self, msg: &AlertMessage) -> Result<bool> {
        let payload = build_feishu_payload(msg);
        let res = self
            .client
            .post(self.robot_url(msg))
            .json(&payload)
            .send()
            .await
            .context("Failed to send Feishu request")?;

        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        if !status.is_success() {
            error!("Feishu webhook failed: {} - {}", status, body);
            return Err(anyhow!("Feishu webhook returned non-success status"));
        }

        // The bot API answers 200 with a non-zero code on rejected messages.
        match serde_json::from_str::<FeishuResponse>(&body) {
            Ok(resp) if resp.code != 0 => {
                error!("Feishu rejected message: {} - {}", resp.code, resp.msg);
                return Ok(false);
            }
            Ok(_) => {}
            Err(e) => warn!("Feishu webhook answered {} with a non-JSON body ({}): {}", status, e, body),
        }

        info!("Sent: [{}] to Feishu", msg.title.replace('\n', " "));
        Ok(true)
    }
}

pub fn build_feishu_payload(msg: &AlertMessage) -> FeishuPayload {
    let mut elements = vec![
        serde_json::json!({
            "tag": "markdown",
            "content": msg.title,
            "text_align": "left",
            "text_size": "normal_v2"
        }),
        serde_json::json!({"tag": "hr"}),
        serde_json::json!({
            "tag": "markdown",
            "content": msg.text,
            "text_align": "left",
            "text_size": "normal_v2"
        }),
    ];

    if !msg.address.is_empty() {
        elements.push(serde_json::json!({
            "tag": "button",
            "text": {"tag": "plain_text", "content": "查看Pod监控"},
            "type": "primary_text",
            "size": "medium",
            "behaviors": [
                {"type": "open_url", "default_url": msg.address}
            ]
        }));
    }

    let card = serde_json::json!({
        "schema": "2.0",
        "config": {"update_multi": true},
        "header": {
            "title": {"tag": "plain_text", "content": "Pod Crash Notify"},
            "template": "red"
        },
        "body": {
            "direction": "vertical",
            "elements": elements
        }
    });

    FeishuPayload {
        msg_type: "interactive",
        card,
    }
}
