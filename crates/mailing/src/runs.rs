//! RunStore: the one-shot dispatch trigger owned by each newsletter.
//!
//! At most one run exists per newsletter. Rescheduling swaps the old run
//! for a new one under the write lock; claiming a due run disables it
//! before anyone dispatches, so within one process a run triggers one
//! dispatch. A run that was claimed but never marked complete is re-armed
//! when the store is loaded again, so a crash mid-dispatch fires it again
//! rather than dropping it.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tb_domain::trace::TraceEvent;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::model::{Newsletter, Run};
use crate::persist;

pub struct RunStore {
    /// Keyed by newsletter id.
    inner: RwLock<HashMap<Uuid, Run>>,
    persist_path: PathBuf,
    persist_lock: Mutex<()>,
}

impl RunStore {
    pub fn new(state_path: &std::path::Path) -> Self {
        let persist_path = state_path.join("runs.json");
        let mut store = Self {
            inner: RwLock::new(HashMap::new()),
            persist_path,
            persist_lock: Mutex::new(()),
        };
        store.load();
        store
    }

    fn load(&mut self) {
        let Ok(data) = std::fs::read_to_string(&self.persist_path) else {
            return;
        };
        let runs = match serde_json::from_str::<Vec<Run>>(&data) {
            Ok(runs) => runs,
            Err(e) => {
                tracing::warn!(error = %e, path = %self.persist_path.display(), "ignoring unreadable runs file");
                return;
            }
        };
        let mut rearmed = 0usize;
        let map: HashMap<Uuid, Run> = runs
            .into_iter()
            .map(|mut r| {
                if r.is_interrupted() {
                    r.enabled = true;
                    r.fired_at = None;
                    rearmed += 1;
                    tracing::warn!(
                        newsletter_id = %r.newsletter_id,
                        run_id = %r.id,
                        "run was claimed but never completed, re-arming"
                    );
                }
                (r.newsletter_id, r)
            })
            .collect();
        tracing::info!(count = map.len(), rearmed, "loaded runs from disk");
        self.inner = RwLock::new(map);
    }

    async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let mut runs: Vec<Run> = self.inner.read().await.values().cloned().collect();
        runs.sort_by_key(|r| (r.fire_at, r.newsletter_id));
        if let Err(e) = persist::write_snapshot(&self.persist_path, &runs).await {
            tracing::warn!(error = %e, path = %self.persist_path.display(), "failed to persist runs");
        }
    }

    pub async fn get(&self, newsletter_id: &Uuid) -> Option<Run> {
        self.inner.read().await.get(newsletter_id).cloned()
    }

    pub async fn list(&self) -> Vec<Run> {
        let mut runs: Vec<Run> = self.inner.read().await.values().cloned().collect();
        runs.sort_by_key(|r| r.fire_at);
        runs
    }

    /// Create the run for a newly created newsletter. Nothing is scheduled
    /// when the newsletter has already finished.
    pub async fn schedule_new(&self, newsletter: &Newsletter, now: DateTime<Utc>) -> Option<Run> {
        if newsletter.finish <= now {
            tracing::debug!(
                newsletter_id = %newsletter.id,
                finish = %newsletter.finish,
                "newsletter already finished, no run scheduled"
            );
            return None;
        }
        Some(self.replace(newsletter, now, "replaced on create").await)
    }

    /// Discard any existing run and create a fresh one at the newsletter's
    /// current start. Unconditional: staleness is decided at dispatch time.
    pub async fn reschedule(&self, newsletter: &Newsletter, now: DateTime<Utc>) -> Run {
        self.replace(newsletter, now, "rescheduled").await
    }

    async fn replace(&self, newsletter: &Newsletter, now: DateTime<Utc>, reason: &str) -> Run {
        let run = Run::for_newsletter(newsletter, now);
        let previous = self
            .inner
            .write()
            .await
            .insert(newsletter.id, run.clone());
        self.persist().await;

        if let Some(old) = previous {
            TraceEvent::RunDiscarded {
                newsletter_id: newsletter.id,
                run_id: old.id,
                reason: reason.into(),
            }
            .emit();
        }
        TraceEvent::RunScheduled {
            newsletter_id: newsletter.id,
            run_id: run.id,
            fire_at: run.fire_at.to_rfc3339(),
        }
        .emit();
        run
    }

    /// Drop the newsletter's run, fired or not.
    pub async fn cancel(&self, newsletter_id: &Uuid) -> Option<Run> {
        let removed = self.inner.write().await.remove(newsletter_id);
        if let Some(run) = &removed {
            self.persist().await;
            TraceEvent::RunDiscarded {
                newsletter_id: *newsletter_id,
                run_id: run.id,
                reason: "newsletter deleted".into(),
            }
            .emit();
        }
        removed
    }

    /// Claim every enabled run whose fire time has been reached. Claimed
    /// runs are disabled and persisted before they are returned.
    pub async fn claim_due(&self, now: DateTime<Utc>) -> Vec<Run> {
        let mut map = self.inner.write().await;
        let mut claimed: Vec<Run> = map
            .values_mut()
            .filter(|r| r.is_due(&now))
            .map(|r| {
                r.enabled = false;
                r.fired_at = Some(now);
                r.clone()
            })
            .collect();
        drop(map);

        if claimed.is_empty() {
            return claimed;
        }
        self.persist().await;

        claimed.sort_by_key(|r| r.fire_at);
        for run in &claimed {
            TraceEvent::RunFired {
                newsletter_id: run.newsletter_id,
                run_id: run.id,
                late_by_ms: (now - run.fire_at).num_milliseconds(),
            }
            .emit();
        }
        claimed
    }

    /// Record that the dispatch for `run_id` returned. Ignored when the
    /// newsletter has since been rescheduled or deleted.
    pub async fn complete(&self, newsletter_id: &Uuid, run_id: &Uuid, now: DateTime<Utc>) -> bool {
        let updated = match self.inner.write().await.get_mut(newsletter_id) {
            Some(run) if run.id == *run_id => {
                run.completed_at = Some(now);
                true
            }
            _ => false,
        };
        if updated {
            self.persist().await;
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentFilter;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 10, day, hour, 0, 0).unwrap()
    }

    fn newsletter(start: DateTime<Utc>, finish: DateTime<Utc>) -> Newsletter {
        Newsletter::new(start, finish, "promo", SegmentFilter::default(), at(1, 0))
    }

    #[tokio::test]
    async fn create_schedules_one_enabled_run_at_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        let n = newsletter(at(1, 0), at(2, 0));

        let run = store.schedule_new(&n, at(1, 0) - chrono::Duration::days(1)).await.unwrap();
        assert_eq!(run.fire_at, n.start);
        assert!(run.enabled);
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn finished_newsletter_gets_no_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        let n = newsletter(at(1, 0), at(2, 0));

        assert!(store.schedule_new(&n, at(3, 0)).await.is_none());
        assert!(store.get(&n.id).await.is_none());
    }

    #[tokio::test]
    async fn reschedule_replaces_the_existing_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        let mut n = newsletter(at(1, 0), at(2, 0));
        let first = store.schedule_new(&n, at(1, 0) - chrono::Duration::hours(1)).await.unwrap();

        n.start = at(1, 6);
        let second = store.reschedule(&n, at(1, 0)).await;

        assert_ne!(first.id, second.id);
        assert_eq!(second.fire_at, at(1, 6));
        let runs = store.list().await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, second.id);
    }

    #[tokio::test]
    async fn reschedule_ignores_finish() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        let n = newsletter(at(1, 0), at(2, 0));
        let run = store.reschedule(&n, at(5, 0)).await;
        assert!(run.enabled);
    }

    #[tokio::test]
    async fn claim_is_one_shot() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        let n = newsletter(at(1, 0), at(2, 0));
        store.schedule_new(&n, at(1, 0) - chrono::Duration::hours(1)).await;

        assert!(store.claim_due(at(1, 0) - chrono::Duration::minutes(1)).await.is_empty());

        let claimed = store.claim_due(at(1, 0)).await;
        assert_eq!(claimed.len(), 1);
        assert!(!claimed[0].enabled);
        assert_eq!(claimed[0].fired_at, Some(at(1, 0)));

        assert!(store.claim_due(at(1, 12)).await.is_empty());
    }

    #[tokio::test]
    async fn completed_run_stays_fired_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let n = newsletter(at(1, 0), at(2, 0));
        {
            let store = RunStore::new(dir.path());
            store.schedule_new(&n, at(1, 0) - chrono::Duration::hours(1)).await;
            let claimed = store.claim_due(at(1, 1)).await;
            assert!(store.complete(&n.id, &claimed[0].id, at(1, 2)).await);
        }
        let store = RunStore::new(dir.path());
        let run = store.get(&n.id).await.unwrap();
        assert!(!run.enabled);
        assert_eq!(run.completed_at, Some(at(1, 2)));
        assert!(store.claim_due(at(1, 3)).await.is_empty());
    }

    #[tokio::test]
    async fn interrupted_claim_is_rearmed_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        let n = newsletter(at(1, 0), at(2, 0));
        let first_id = {
            let store = RunStore::new(dir.path());
            store.schedule_new(&n, at(1, 0) - chrono::Duration::hours(1)).await;
            let claimed = store.claim_due(at(1, 1)).await;
            assert_eq!(claimed.len(), 1);
            claimed[0].id
        };

        let store = RunStore::new(dir.path());
        let run = store.get(&n.id).await.unwrap();
        assert!(run.enabled);
        assert!(run.fired_at.is_none());

        let again = store.claim_due(at(1, 2)).await;
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].id, first_id);
    }

    #[tokio::test]
    async fn completing_a_replaced_run_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        let n = newsletter(at(1, 0), at(2, 0));
        store.schedule_new(&n, at(1, 0) - chrono::Duration::hours(1)).await;
        let claimed = store.claim_due(at(1, 1)).await;
        let fresh = store.reschedule(&n, at(1, 1)).await;

        assert!(!store.complete(&n.id, &claimed[0].id, at(1, 2)).await);
        assert_eq!(store.get(&n.id).await.unwrap().id, fresh.id);
        assert!(store.get(&n.id).await.unwrap().completed_at.is_none());
    }

    #[tokio::test]
    async fn cancel_removes_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        let n = newsletter(at(1, 0), at(2, 0));
        store.schedule_new(&n, at(1, 0) - chrono::Duration::hours(1)).await;

        assert!(store.cancel(&n.id).await.is_some());
        assert!(store.cancel(&n.id).await.is_none());
        assert!(store.claim_due(at(1, 1)).await.is_empty());
    }
}
