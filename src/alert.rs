use chrono::SecondsFormat;
use k8s_openapi::api::core::v1::Pod;

use crate::types::{AlertMessage, Config, CrashDecision, PodIdentity};

/// Pod annotation that routes a pod's alerts to a different Feishu robot.
pub const ROBOT_ANNOTATION: &str = "pod-crash-notifier/feishu-robot";

/// Cluster-level context stamped onto every alert.
#[derive(Debug, Clone, Default)]
pub struct AlertContext {
    pub cluster_name: String,
    pub cluster_id: String,
    pub monitor_url_template: Option<String>,
}

impl AlertContext {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            cluster_name: cfg.cluster_name.clone(),
            cluster_id: cfg.cluster_id.clone(),
            monitor_url_template: cfg.monitor_url_template.clone(),
        }
    }

    pub fn monitor_address(&self, key: &PodIdentity) -> String {
        self.monitor_url_template
            .as_deref()
            .map(|tmpl| {
                tmpl.replace("{cluster_id}", &self.cluster_id)
                    .replace("{namespace}", &key.namespace)
                    .replace("{pod}", &key.name)
            })
            .unwrap_or_default()
    }

    pub fn build_message(&self, key: &PodIdentity, decision: &CrashDecision, pod: &Pod) -> AlertMessage {
        let title = format!(
            "**[{}] {} pod {} crashed**",
            decision.severity.label(),
            self.cluster_name,
            key
        );

        let mut lines = vec![
            format!("**Cluster:** {}", self.cluster_name),
            format!("**Namespace:** {}", key.namespace),
            format!("**Pod:** {}", key.name),
        ];
        if let Some(node) = pod.spec.as_ref().and_then(|s| s.node_name.as_ref()) {
            lines.push(format!("**Node:** {}", node));
        }
        for s in &decision.signals {
            let state = s
                .waiting_reason
                .as_deref()
                .or(s.termination_reason.as_deref())
                .unwrap_or("Error");
            let mut line = format!("**Container:** {} - {} (restarts: {}", s.container_name, state, s.restart_count);
            if let Some(code) = s.exit_code {
                line.push_str(&format!(", exit {}", code));
            }
            if let Some(t) = s.last_termination_time {
                line.push_str(&format!(", last: {}", t.to_rfc3339_opts(SecondsFormat::Secs, true)));
            }
            line.push(')');
            if let Some(msg) = s.message.as_deref().filter(|m| !m.is_empty()) {
                line.push_str(&format!("\n> {}", msg));
            }
            lines.push(line);
        }

        let robot = pod
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(ROBOT_ANNOTATION))
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        AlertMessage {
            title,
            text: lines.join("\n"),
            address: self.monitor_address(key),
            robot,
        }
    }
}
