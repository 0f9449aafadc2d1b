use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use tracing::debug;

use crate::types::{Config, ContainerCrashSignal, CrashDecision, Severity};

/// Configurable crash-worthiness predicate.
#[derive(Debug, Clone)]
pub struct CrashPolicy {
    pub crash_loop_reasons: Vec<String>,
    pub recency_window: Duration,
}

impl Default for CrashPolicy {
    fn default() -> Self {
        Self {
            crash_loop_reasons: vec!["CrashLoopBackOff".to_string()],
            recency_window: Duration::minutes(10),
        }
    }
}

impl CrashPolicy {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let recency_window = Duration::try_seconds(cfg.crash_recency_seconds)
            .filter(|w| *w >= Duration::zero())
            .context("Invalid crash recency window")?;
        Ok(Self {
            crash_loop_reasons: cfg.crash_reasons.clone(),
            recency_window,
        })
    }

    pub fn is_crash_loop(&self, signal: &ContainerCrashSignal) -> bool {
        signal
            .waiting_reason
            .as_deref()
            .map_or(false, |r| self.crash_loop_reasons.iter().any(|c| c == r))
    }

    /// Non-zero exit that finished within the recency window. A termination
    /// without a timestamp is treated as historical.
    pub fn is_recent_failure(&self, signal: &ContainerCrashSignal, now: DateTime<Utc>) -> bool {
        match (signal.exit_code, signal.last_termination_time) {
            (Some(code), Some(finished)) if code != 0 => now - finished <= self.recency_window,
            _ => false,
        }
    }

    pub fn is_crash_worthy(&self, signal: &ContainerCrashSignal, now: DateTime<Utc>) -> bool {
        self.is_crash_loop(signal) || self.is_recent_failure(signal, now)
    }

    /// One decision per pod, however many containers are crash-worthy.
    pub fn classify(&self, signals: &[ContainerCrashSignal], now: DateTime<Utc>) -> CrashDecision {
        let culprits: Vec<ContainerCrashSignal> = signals
            .iter()
            .filter(|s| self.is_crash_worthy(s, now))
            .cloned()
            .collect();

        if culprits.is_empty() {
            return CrashDecision {
                should_notify: false,
                reason: "no crash-worthy containers".to_string(),
                severity: Severity::Info,
                signals: Vec::new(),
            };
        }

        let severity = if culprits.iter().any(|s| self.is_crash_loop(s)) {
            Severity::Critical
        } else {
            Severity::Warning
        };
        let reason = culprits
            .iter()
            .map(describe_signal)
            .collect::<Vec<_>>()
            .join("; ");

        CrashDecision {
            should_notify: true,
            reason,
            severity,
            signals: culprits,
        }
    }
}

/// Signals for every init and regular container status of `pod`.
/// Statuses without a container name are skipped.
pub fn crash_signals(pod: &Pod) -> Vec<ContainerCrashSignal> {
    let Some(status) = pod.status.as_ref() else {
        return Vec::new();
    };
    status
        .init_container_statuses
        .iter()
        .flatten()
        .chain(status.container_statuses.iter().flatten())
        .filter_map(|cs| {
            let signal = signal_from_status(cs);
            if signal.is_none() {
                debug!("skipping container status without a name");
            }
            signal
        })
        .collect()
}

pub fn signal_from_status(cs: &ContainerStatus) -> Option<ContainerCrashSignal> {
    if cs.name.trim().is_empty() {
        return None;
    }

    let waiting = cs.state.as_ref().and_then(|s| s.waiting.as_ref());
    // A container that is terminated right now reports there, otherwise the
    // previous run lives in lastState.
    let terminated = cs
        .state
        .as_ref()
        .and_then(|s| s.terminated.as_ref())
        .or_else(|| cs.last_state.as_ref().and_then(|s| s.terminated.as_ref()));

    Some(ContainerCrashSignal {
        container_name: cs.name.clone(),
        exit_code: terminated.map(|t| t.exit_code),
        restart_count: cs.restart_count,
        waiting_reason: waiting.and_then(|w| w.reason.clone()),
        last_termination_time: terminated.and_then(|t| t.finished_at.as_ref().map(|f| f.0)),
        termination_reason: terminated.and_then(|t| t.reason.clone()),
        message: waiting
            .and_then(|w| w.message.clone())
            .or_else(|| terminated.and_then(|t| t.message.clone())),
    })
}

fn describe_signal(s: &ContainerCrashSignal) -> String {
    let state = s
        .waiting_reason
        .clone()
        .or_else(|| s.termination_reason.clone())
        .unwrap_or_else(|| "Error".to_string());
    let code = s.exit_code.map(|c| format!(", exit {}", c)).unwrap_or_default();
    format!("[{}] {} (restarts {}{})", s.container_name, state, s.restart_count, code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateTerminated, ContainerStateWaiting, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn waiting(name: &str, reason: &str, restarts: i32) -> ContainerStatus {
        ContainerStatus {
            name: name.to_string(),
            restart_count: restarts,
            state: Some(ContainerState {
                waiting: Some(ContainerStateWaiting {
                    reason: Some(reason.to_string()),
                    message: Some("back-off restarting failed container".to_string()),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn last_terminated(name: &str, exit_code: i32, finished: DateTime<Utc>) -> ContainerStatus {
        ContainerStatus {
            name: name.to_string(),
            restart_count: 1,
            last_state: Some(ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code,
                    reason: Some("Error".to_string()),
                    finished_at: Some(Time(finished)),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod_with(statuses: Vec<ContainerStatus>) -> Pod {
        Pod {
            status: Some(PodStatus {
                container_statuses: Some(statuses),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_crash_loop_is_critical() {
        let now = Utc::now();
        let pod = pod_with(vec![waiting("app", "CrashLoopBackOff", 7)]);
        let decision = CrashPolicy::default().classify(&crash_signals(&pod), now);

        assert!(decision.should_notify);
        assert_eq!(decision.severity, Severity::Critical);
        assert!(decision.reason.contains("[app] CrashLoopBackOff (restarts 7)"));
    }

    #[test]
    fn test_recent_nonzero_exit_is_warning() {
        let now = Utc::now();
        let pod = pod_with(vec![last_terminated("app", 137, now - Duration::minutes(2))]);
        let decision = CrashPolicy::default().classify(&crash_signals(&pod), now);

        assert!(decision.should_notify);
        assert_eq!(decision.severity, Severity::Warning);
        assert!(decision.reason.contains("exit 137"));
    }

    #[test]
    fn test_old_or_clean_exit_is_ignored() {
        let now = Utc::now();
        let policy = CrashPolicy::default();

        let old = pod_with(vec![last_terminated("app", 1, now - Duration::hours(3))]);
        assert!(!policy.classify(&crash_signals(&old), now).should_notify);

        let clean = pod_with(vec![last_terminated("app", 0, now)]);
        let decision = policy.classify(&crash_signals(&clean), now);
        assert!(!decision.should_notify);
        assert_eq!(decision.severity, Severity::Info);
        assert!(decision.signals.is_empty());
    }

    #[test]
    fn test_other_waiting_reasons_ignored_unless_configured() {
        let now = Utc::now();
        let pod = pod_with(vec![waiting("app", "ImagePullBackOff", 0)]);
        assert!(!CrashPolicy::default().classify(&crash_signals(&pod), now).should_notify);

        let policy = CrashPolicy {
            crash_loop_reasons: vec!["ImagePullBackOff".to_string()],
            ..Default::default()
        };
        assert!(policy.classify(&crash_signals(&pod), now).should_notify);
    }

    #[test]
    fn test_one_decision_for_mixed_containers() {
        let now = Utc::now();
        let healthy = ContainerStatus {
            name: "sidecar".to_string(),
            ready: true,
            ..Default::default()
        };
        let pod = pod_with(vec![healthy, waiting("app", "CrashLoopBackOff", 3)]);
        let decision = CrashPolicy::default().classify(&crash_signals(&pod), now);

        assert!(decision.should_notify);
        assert_eq!(decision.signals.len(), 1);
        assert_eq!(decision.signals[0].container_name, "app");
    }

    #[test]
    fn test_malformed_status_skipped() {
        let now = Utc::now();
        let nameless = waiting("", "CrashLoopBackOff", 1);
        let pod = pod_with(vec![nameless, waiting("app", "CrashLoopBackOff", 1)]);

        let signals = crash_signals(&pod);
        assert_eq!(signals.len(), 1);
        assert!(CrashPolicy::default().classify(&signals, now).should_notify);

        assert!(crash_signals(&Pod::default()).is_empty());
    }

    #[test]
    fn test_terminated_without_timestamp_not_recent() {
        let mut cs = last_terminated("app", 2, Utc::now());
        cs.last_state.as_mut().unwrap().terminated.as_mut().unwrap().finished_at = None;
        let signal = signal_from_status(&cs).unwrap();

        assert_eq!(signal.exit_code, Some(2));
        assert!(!CrashPolicy::default().is_recent_failure(&signal, Utc::now()));
    }

    #[test]
    fn test_init_containers_included() {
        let now = Utc::now();
        let pod = Pod {
            status: Some(PodStatus {
                init_container_statuses: Some(vec![waiting("migrate", "CrashLoopBackOff", 4)]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let decision = CrashPolicy::default().classify(&crash_signals(&pod), now);
        assert!(decision.should_notify);
        assert_eq!(decision.signals[0].container_name, "migrate");
    }

    #[test]
    fn test_policy_from_config() {
        let env = crate::config::MockEnvironment::new()
            .with_var("FEISHU_ROBOT", "robot-1")
            .with_var("CRASH_RECENCY_SECONDS", "60");
        let mut cfg = crate::config::load_config_with_env(&env).unwrap();

        let policy = CrashPolicy::from_config(&cfg).unwrap();
        assert_eq!(policy.recency_window, Duration::seconds(60));

        cfg.crash_recency_seconds = i64::MAX;
        assert!(CrashPolicy::from_config(&cfg).is_err());
        cfg.crash_recency_seconds = -600;
        assert!(CrashPolicy::from_config(&cfg).is_err());
    }
}
