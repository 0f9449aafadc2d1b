use anyhow::{anyhow, Context, Result};
use chrono::TimeDelta;
use std::collections::HashMap;
use tracing::{info, warn};
use crate::types::{Config, NotifyChannel};

pub const DEFAULT_FEISHU_WEBHOOK_URL: &str = "https://open.feishu.cn/open-apis/bot/v2/hook";
pub const DEFAULT_MUTE_SECONDS: i64 = 600;
pub const DEFAULT_CRASH_REASON: &str = "CrashLoopBackOff";

/// Trait for abstracting environment variable access
pub trait EnvironmentProvider {
    fn get_var(&self, key: &str) -> Option<String>;
}

/// Production implementation using std::env
pub struct SystemEnvironment;

impl EnvironmentProvider for SystemEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Mock implementation for testing
#[derive(Debug, Default)]
pub struct MockEnvironment {
    vars: HashMap<String, String>,
}

impl MockEnvironment {
    pub fn new() -> Self {
        Self {
            vars: HashMap::new(),
        }
    }

    pub fn set_var<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_var<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.set_var(key, value);
        self
    }
}

impl EnvironmentProvider for MockEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn load_config() -> Result<Config> {
    load_config_with_env(&SystemEnvironment)
}

pub fn load_config_with_env<E: EnvironmentProvider>(env: &E) -> Result<Config> {
    let notify_channel = match env
        .get_var("NOTIFY_CHANNEL")
        .map(|v| v.trim().to_lowercase())
        .as_deref()
    {
        None | Some("") | Some("feishu") => NotifyChannel::Feishu,
        Some("slack") => NotifyChannel::Slack,
        Some(other) => return Err(anyhow!("NOTIFY_CHANNEL must be feishu or slack, got {}", other)),
    };

    let feishu_webhook_url = non_empty(env, "FEISHU_WEBHOOK_URL")
        .unwrap_or_else(|| DEFAULT_FEISHU_WEBHOOK_URL.to_string());
    let feishu_robot = non_empty(env, "FEISHU_ROBOT");
    let slack_webhook_url = non_empty(env, "SLACK_WEBHOOK_URL");

    match notify_channel {
        NotifyChannel::Feishu if feishu_robot.is_none() => {
            return Err(anyhow!("FEISHU_ROBOT must be provided when NOTIFY_CHANNEL is feishu"));
        }
        NotifyChannel::Slack if slack_webhook_url.is_none() => {
            return Err(anyhow!("SLACK_WEBHOOK_URL must be provided when NOTIFY_CHANNEL is slack"));
        }
        _ => {}
    }

    let cluster_name = non_empty(env, "CLUSTER_NAME").unwrap_or_else(|| {
        warn!("CLUSTER_NAME is not set, default: none");
        "none".to_string()
    });
    let cluster_id = non_empty(env, "CLUSTER_ID").unwrap_or_else(|| {
        warn!("CLUSTER_ID is not set, default: none");
        "none".to_string()
    });
    let monitor_url_template = non_empty(env, "MONITOR_URL_TEMPLATE");

    let namespaces = split_list(env.get_var("NAMESPACES").unwrap_or_default());

    let worker_count: usize = env.get_var("WORKER_COUNT")
        .unwrap_or_else(|| "1".to_string())
        .trim()
        .parse()
        .context("Invalid WORKER_COUNT")?;
    if worker_count == 0 {
        return Err(anyhow!("WORKER_COUNT must be at least 1"));
    }

    let crash_recency_seconds: i64 = env.get_var("CRASH_RECENCY_SECONDS")
        .unwrap_or_else(|| "600".to_string())
        .trim()
        .parse()
        .context("Invalid CRASH_RECENCY_SECONDS")?;
    if crash_recency_seconds < 0 {
        return Err(anyhow!("CRASH_RECENCY_SECONDS must not be negative"));
    }
    TimeDelta::try_seconds(crash_recency_seconds).context("Invalid CRASH_RECENCY_SECONDS: out of range")?;

    let mut crash_reasons = split_list(env.get_var("CRASH_REASONS").unwrap_or_default());
    if crash_reasons.is_empty() {
        crash_reasons.push(DEFAULT_CRASH_REASON.to_string());
    }

    let mute_sweep_seconds: u64 = env.get_var("MUTE_SWEEP_SECONDS")
        .unwrap_or_else(|| "300".to_string())
        .trim()
        .parse::<u64>()
        .unwrap_or(300)
        .max(1);

    let mute_retention_factor: i32 = env.get_var("MUTE_RETENTION_FACTOR")
        .unwrap_or_else(|| "3".to_string())
        .trim()
        .parse::<i32>()
        .unwrap_or(3)
        .max(1);

    // The retention (window times factor) must fit a TimeDelta as well.
    let mute_seconds = match env.get_var("MUTE_SECONDS").map(|v| v.trim().parse::<i64>()) {
        Some(Ok(secs))
            if secs >= 0
                && TimeDelta::try_seconds(secs)
                    .and_then(|w| w.checked_mul(mute_retention_factor))
                    .is_some() =>
        {
            secs
        }
        _ => {
            warn!("MUTE_SECONDS is not set or invalid, default: {}", DEFAULT_MUTE_SECONDS);
            DEFAULT_MUTE_SECONDS
        }
    };

    let max_retries: u32 = env.get_var("MAX_RETRIES")
        .unwrap_or_else(|| "5".to_string())
        .trim()
        .parse()
        .unwrap_or(5);

    info!(
        "notifier config: channel={:?}, cluster={}, mute_seconds={}, workers={}",
        notify_channel, cluster_name, mute_seconds, worker_count
    );

    Ok(Config {
        notify_channel,
        feishu_webhook_url,
        feishu_robot,
        slack_webhook_url,
        cluster_name,
        cluster_id,
        monitor_url_template,
        namespaces,
        mute_seconds,
        worker_count,
        crash_recency_seconds,
        crash_reasons,
        mute_sweep_seconds,
        mute_retention_factor,
        max_retries,
    })
}

fn non_empty<E: EnvironmentProvider>(env: &E, key: &str) -> Option<String> {
    env.get_var(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn split_list(raw: String) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
