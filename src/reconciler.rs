use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::alert::AlertContext;
use crate::classify::{crash_signals, CrashPolicy};
use crate::dispatch::Dispatcher;
use crate::error::ReconcileError;
use crate::kubernetes::PodSource;
use crate::mute::MuteCache;
use crate::types::PodIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The pod was deleted before it could be reconciled.
    PodGone,
    Healthy,
    Suppressed,
    Notified,
    /// Dispatch failed; nothing was recorded so the pod stays eligible.
    DispatchFailed,
}

/// Decides, for one pod at a time, whether a crash alert goes out.
pub struct Reconciler {
    source: Arc<dyn PodSource>,
    dispatcher: Arc<dyn Dispatcher>,
    mute: Arc<MuteCache>,
    policy: CrashPolicy,
    context: AlertContext,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn PodSource>,
        dispatcher: Arc<dyn Dispatcher>,
        mute: Arc<MuteCache>,
        policy: CrashPolicy,
        context: AlertContext,
    ) -> Self {
        Self {
            source,
            dispatcher,
            mute,
            policy,
            context,
        }
    }

    pub fn mute_cache(&self) -> &Arc<MuteCache> {
        &self.mute
    }

    pub async fn reconcile(
        &self,
        key: &PodIdentity,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let pod = match self.source.get_pod(key).await {
            Ok(Some(pod)) => pod,
            Ok(None) => {
                debug!("pod {} no longer exists, nothing to do", key);
                return Ok(ReconcileOutcome::PodGone);
            }
            Err(source) => {
                warn!("failed to fetch pod {}: {}", key, source);
                return Err(ReconcileError::Fetch {
                    key: key.to_string(),
                    source,
                });
            }
        };

        let decision = self.policy.classify(&crash_signals(&pod), now);
        if !decision.should_notify {
            return Ok(ReconcileOutcome::Healthy);
        }

        let Some(claim) = self.mute.claim(key, now) else {
            debug!("alert for {} muted: {}", key, decision.reason);
            return Ok(ReconcileOutcome::Suppressed);
        };

        info!("pod {} crashed: {}", key, decision.reason);
        let msg = self.context.build_message(key, &decision, &pod);
        match self.dispatcher.send(&msg).await {
            Ok(true) => {
                claim.commit(now);
                Ok(ReconcileOutcome::Notified)
            }
            Ok(false) => {
                error!("alert for {} was not delivered", key);
                Ok(ReconcileOutcome::DispatchFailed)
            }
            Err(e) => {
                error!("alert for {} failed: {:#}", key, e);
                Ok(ReconcileOutcome::DispatchFailed)
            }
        }
    }
}
