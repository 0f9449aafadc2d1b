use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyChannel {
    Feishu,
    Slack,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub notify_channel: NotifyChannel,
    pub feishu_webhook_url: String,
    pub feishu_robot: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub cluster_name: String,
    pub cluster_id: String,
    pub monitor_url_template: Option<String>,
    pub namespaces: Vec<String>,
    pub mute_seconds: i64,
    pub worker_count: usize,
    pub crash_recency_seconds: i64,
    pub crash_reasons: Vec<String>,
    pub mute_sweep_seconds: u64,
    pub mute_retention_factor: i32,
    pub max_retries: u32,
}

/// Stable key of a pod: `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PodIdentity {
    pub namespace: String,
    pub name: String,
}

impl PodIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerCrashSignal {
    pub container_name: String,
    pub exit_code: Option<i32>,
    pub restart_count: i32,
    pub waiting_reason: Option<String>,
    pub last_termination_time: Option<DateTime<Utc>>,
    pub termination_reason: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrashDecision {
    pub should_notify: bool,
    pub reason: String,
    pub severity: Severity,
    /// Crash-worthy signals only; empty when `should_notify` is false.
    pub signals: Vec<ContainerCrashSignal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MuteEntry {
    pub key: PodIdentity,
    pub last_sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertMessage {
    pub title: String,
    pub text: String,
    pub address: String,
    /// Feishu robot that overrides the configured default for this pod.
    pub robot: Option<String>,
}

#[derive(Serialize)]
pub struct SlackPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub blocks: Vec<serde_json::Value>,
}

#[derive(Serialize)]
pub struct FeishuPayload {
    pub msg_type: &'static str,
    pub card: serde_json::Value,
}
