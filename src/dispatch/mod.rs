// Chat backends the reconciler can deliver alerts through
pub mod feishu;
pub mod slack;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::types::{AlertMessage, Config, NotifyChannel};

pub use feishu::FeishuDispatcher;
pub use slack::SlackDispatcher;

/// Delivers an alert to a chat backend.
///
/// `Ok(true)` means the backend accepted the message. `Ok(false)` and `Err`
/// both mean it was not delivered; callers must not treat either as a send.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, msg: &AlertMessage) -> Result<bool>;
}

pub fn build_dispatcher(cfg: &Config) -> Result<Arc<dyn Dispatcher>> {
    match cfg.notify_channel {
        NotifyChannel::Feishu => {
            let robot = cfg
                .feishu_robot
                .clone()
                .ok_or_else(|| anyhow!("FEISHU_ROBOT is required for the feishu channel"))?;
            Ok(Arc::new(FeishuDispatcher::new(cfg.feishu_webhook_url.clone(), robot)))
        }
        NotifyChannel::Slack => {
            let url = cfg
                .slack_webhook_url
                .clone()
                .ok_or_else(|| anyhow!("SLACK_WEBHOOK_URL is required for the slack channel"))?;
            Ok(Arc::new(SlackDispatcher::new(url)))
        }
    }
}
