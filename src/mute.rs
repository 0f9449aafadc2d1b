//! Per-pod notification suppression.
//!
//! At most one notification per [`PodIdentity`] is let through per mute
//! window. Reconcilers go through [`MuteCache::claim`], which performs the
//! suppression check and reserves the key under one lock, so two concurrent
//! reconciliations of the same pod cannot both send.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::types::{MuteEntry, PodIdentity};

pub struct MuteCache {
    window: Duration,
    state: Mutex<MuteState>,
}

#[derive(Default)]
struct MuteState {
    last_sent: HashMap<PodIdentity, DateTime<Utc>>,
    claimed: HashSet<PodIdentity>,
}

impl MuteState {
    fn suppressed(&self, key: &PodIdentity, now: DateTime<Utc>, window: Duration) -> bool {
        self.last_sent
            .get(key)
            .map_or(false, |last| now - *last < window)
    }
}

impl MuteCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(MuteState::default()),
        }
    }

    pub fn from_seconds(seconds: i64) -> Result<Self> {
        match Duration::try_seconds(seconds) {
            Some(window) if seconds >= 0 => Ok(Self::new(window)),
            _ => Err(anyhow!("mute window of {}s is out of range", seconds)),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn should_suppress(&self, key: &PodIdentity, now: DateTime<Utc>) -> bool {
        self.state.lock().suppressed(key, now, self.window)
    }

    pub fn record_sent(&self, key: &PodIdentity, now: DateTime<Utc>) {
        self.state.lock().last_sent.insert(key.clone(), now);
    }

    /// Reserves `key` for sending, or `None` if it is muted or another
    /// reconciliation already holds it. Dropping the claim without
    /// [`MuteClaim::commit`] releases the key and records nothing.
    ///
    /// A caller turned away by a held claim is not retried if the holder's
    /// send then fails; the work queue never hands one key to two workers at
    /// once, so this only matters for callers outside the controller.
    pub fn claim(&self, key: &PodIdentity, now: DateTime<Utc>) -> Option<MuteClaim<'_>> {
        let mut state = self.state.lock();
        if state.claimed.contains(key) || state.suppressed(key, now, self.window) {
            return None;
        }
        state.claimed.insert(key.clone());
        Some(MuteClaim {
            cache: self,
            key: key.clone(),
            sent_at: None,
        })
    }

    pub fn entry(&self, key: &PodIdentity) -> Option<MuteEntry> {
        self.state.lock().last_sent.get(key).map(|last| MuteEntry {
            key: key.clone(),
            last_sent_at: *last,
        })
    }

    /// Drops entries whose last send is older than `retention`.
    pub fn sweep(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let mut state = self.state.lock();
        let before = state.last_sent.len();
        state.last_sent.retain(|_, last| now - *last <= retention);
        let removed = before - state.last_sent.len();
        if removed > 0 {
            debug!("mute sweep removed {} stale entries", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.state.lock().last_sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, key: &PodIdentity, sent_at: Option<DateTime<Utc>>) {
        let mut state = self.state.lock();
        state.claimed.remove(key);
        if let Some(at) = sent_at {
            state.last_sent.insert(key.clone(), at);
        }
    }
}

/// Exclusive right to notify for one pod, obtained from [`MuteCache::claim`].
pub struct MuteClaim<'a> {
    cache: &'a MuteCache,
    key: PodIdentity,
    sent_at: Option<DateTime<Utc>>,
}

impl MuteClaim<'_> {
    pub fn key(&self) -> &PodIdentity {
        &self.key
    }

    /// Records a successful send at `now` and releases the claim.
    pub fn commit(mut self, now: DateTime<Utc>) {
        self.sent_at = Some(now);
    }
}

impl Drop for MuteClaim<'_> {
    fn drop(&mut self) {
        self.cache.release(&self.key, self.sent_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn key() -> PodIdentity {
        PodIdentity::new("ns", "a")
    }

    #[test]
    fn test_unknown_key_not_suppressed() {
        let cache = MuteCache::from_seconds(600).unwrap();
        assert!(!cache.should_suppress(&key(), t(0)));
        assert!(cache.entry(&key()).is_none());
    }

    #[test]
    fn test_window_boundaries() {
        let cache = MuteCache::from_seconds(600).unwrap();
        cache.record_sent(&key(), t(0));

        assert!(cache.should_suppress(&key(), t(1)));
        assert!(cache.should_suppress(&key(), t(599)));
        assert!(!cache.should_suppress(&key(), t(600)));
        assert!(!cache.should_suppress(&key(), t(650)));
        assert!(!cache.should_suppress(&PodIdentity::new("ns", "b"), t(1)));
    }

    #[test]
    fn test_record_sent_overwrites() {
        let cache = MuteCache::from_seconds(600).unwrap();
        cache.record_sent(&key(), t(0));
        cache.record_sent(&key(), t(650));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.entry(&key()).unwrap().last_sent_at, t(650));
        assert!(cache.should_suppress(&key(), t(700)));
    }

    #[test]
    fn test_claim_commit_records_send() {
        let cache = MuteCache::from_seconds(600).unwrap();
        let claim = cache.claim(&key(), t(0)).unwrap();
        assert_eq!(claim.key(), &key());
        claim.commit(t(0));

        assert_eq!(cache.entry(&key()).unwrap().last_sent_at, t(0));
        assert!(cache.claim(&key(), t(300)).is_none());
        assert!(cache.claim(&key(), t(650)).is_some());
    }

    #[test]
    fn test_dropped_claim_records_nothing() {
        let cache = MuteCache::from_seconds(600).unwrap();
        {
            let _claim = cache.claim(&key(), t(0)).unwrap();
        }
        assert!(cache.is_empty());
        assert!(cache.claim(&key(), t(1)).is_some());
    }

    #[test]
    fn test_claim_is_exclusive() {
        let cache = MuteCache::from_seconds(600).unwrap();
        let first = cache.claim(&key(), t(0));
        assert!(first.is_some());
        assert!(cache.claim(&key(), t(0)).is_none());
        assert!(cache.claim(&PodIdentity::new("ns", "b"), t(0)).is_some());

        drop(first);
        assert!(cache.claim(&key(), t(0)).is_some());
    }

    #[test]
    fn test_from_seconds_rejects_out_of_range() {
        assert_eq!(MuteCache::from_seconds(0).unwrap().window(), Duration::zero());
        assert!(MuteCache::from_seconds(-1).is_err());
        assert!(MuteCache::from_seconds(i64::MAX).is_err());
    }

    #[test]
    fn test_sweep_removes_only_stale_entries() {
        let cache = MuteCache::from_seconds(600).unwrap();
        cache.record_sent(&PodIdentity::new("ns", "old"), t(0));
        cache.record_sent(&PodIdentity::new("ns", "fresh"), t(1500));

        let removed = cache.sweep(t(2000), Duration::seconds(1800));
        assert_eq!(removed, 1);
        assert!(cache.entry(&PodIdentity::new("ns", "old")).is_none());
        assert!(cache.entry(&PodIdentity::new("ns", "fresh")).is_some());
    }
}
