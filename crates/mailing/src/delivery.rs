//! Delivery store: one record per message attempt, with a strict
//! `ongoing -> {success, failure, canceled}` state machine.
//!
//! Every create and status change is appended to `deliveries.jsonl`; on
//! load the last line for an id wins. Cascading deletes mark the store
//! dirty and the periodic flush rewrites the file compacted.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::model::{Delivery, DeliveryStatus};
use crate::stats::{self, DeliveryStats};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("delivery not found: {0}")]
    NotFound(u64),
    #[error("delivery {id} is already {status}")]
    AlreadyTerminal { id: u64, status: DeliveryStatus },
    #[error("{0} is not a terminal status")]
    NotTerminal(DeliveryStatus),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Delivery events (for SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryEvent {
    Created { delivery: Delivery },
    StatusChanged {
        id: u64,
        newsletter_id: Uuid,
        status: DeliveryStatus,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DeliveryStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Ledger {
    next_id: u64,
    items: BTreeMap<u64, Delivery>,
}

pub struct DeliveryStore {
    inner: RwLock<Ledger>,
    persist_path: PathBuf,
    event_tx: broadcast::Sender<DeliveryEvent>,
    /// Set when the JSONL file holds superseded or deleted records.
    dirty: AtomicBool,
}

impl DeliveryStore {
    pub fn new(state_path: &Path) -> Self {
        let persist_path = state_path.join("deliveries.jsonl");
        let (event_tx, _) = broadcast::channel(256);

        let mut store = Self {
            inner: RwLock::new(Ledger {
                next_id: 1,
                items: BTreeMap::new(),
            }),
            persist_path,
            event_tx,
            dirty: AtomicBool::new(false),
        };
        store.load();
        store
    }

    fn load(&mut self) {
        let Ok(data) = std::fs::read_to_string(&self.persist_path) else {
            return;
        };
        let mut items = BTreeMap::new();
        let mut lines = 0usize;
        for line in data.lines() {
            match serde_json::from_str::<Delivery>(line) {
                Ok(d) => {
                    lines += 1;
                    items.insert(d.id, d);
                }
                Err(e) => tracing::warn!(error = %e, "skipping malformed delivery line"),
            }
        }
        let next_id = items.keys().next_back().map_or(1, |id| id + 1);
        let count = items.len();
        if lines > count {
            self.dirty.store(true, Ordering::Relaxed);
        }
        self.inner = RwLock::new(Ledger { next_id, items });
        if count > 0 {
            tracing::info!(count, next_id, "loaded deliveries from disk");
        }
    }

    fn append(&self, delivery: &Delivery) {
        let res = (|| -> std::io::Result<()> {
            if let Some(parent) = self.persist_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_string(delivery)?;
            let mut f = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.persist_path)?;
            writeln!(f, "{json}")
        })();
        if let Err(e) = res {
            // The in-memory ledger stays authoritative; the next flush
            // rewrites the whole file.
            self.dirty.store(true, Ordering::Relaxed);
            tracing::warn!(delivery_id = delivery.id, error = %e, "failed to append delivery");
        }
    }

    fn rewrite_jsonl(path: &Path, deliveries: &[Delivery]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("jsonl.tmp");
        let res = (|| -> std::io::Result<()> {
            let mut f = std::io::BufWriter::new(std::fs::File::create(&tmp)?);
            for d in deliveries {
                writeln!(f, "{}", serde_json::to_string(d)?)?;
            }
            f.flush()
        })();
        match res {
            Ok(()) => std::fs::rename(&tmp, path),
            Err(e) => {
                let _ = std::fs::remove_file(&tmp);
                Err(e)
            }
        }
    }

    /// Allocate the next id and record an `ongoing` delivery.
    pub async fn create(
        &self,
        newsletter_id: Uuid,
        customer_id: Uuid,
        run_id: Option<Uuid>,
    ) -> Delivery {
        let now = Utc::now();
        let mut ledger = self.inner.write().await;
        let id = ledger.next_id;
        ledger.next_id += 1;
        let delivery = Delivery {
            id,
            newsletter_id,
            customer_id,
            run_id,
            status: DeliveryStatus::Ongoing,
            created_at: now,
            updated_at: now,
        };
        ledger.items.insert(id, delivery.clone());
        self.append(&delivery);
        drop(ledger);

        let _ = self.event_tx.send(DeliveryEvent::Created {
            delivery: delivery.clone(),
        });
        delivery
    }

    /// Move an `ongoing` delivery to a terminal status. Terminal deliveries
    /// never change again.
    pub async fn finalize(&self, id: u64, status: DeliveryStatus) -> Result<Delivery, DeliveryError> {
        if !status.is_terminal() {
            return Err(DeliveryError::NotTerminal(status));
        }
        let mut ledger = self.inner.write().await;
        let delivery = ledger.items.get_mut(&id).ok_or(DeliveryError::NotFound(id))?;
        if delivery.status.is_terminal() {
            return Err(DeliveryError::AlreadyTerminal {
                id,
                status: delivery.status,
            });
        }
        delivery.status = status;
        delivery.updated_at = Utc::now();
        let d = delivery.clone();
        self.append(&d);
        self.dirty.store(true, Ordering::Relaxed);
        drop(ledger);

        tracing::debug!(delivery_id = id, newsletter_id = %d.newsletter_id, status = %status, "delivery finalized");
        let _ = self.event_tx.send(DeliveryEvent::StatusChanged {
            id,
            newsletter_id: d.newsletter_id,
            status,
        });
        Ok(d)
    }

    pub async fn get(&self, id: u64) -> Option<Delivery> {
        self.inner.read().await.items.get(&id).cloned()
    }

    /// Deliveries of one newsletter, most recent first.
    pub async fn list_by_newsletter(
        &self,
        newsletter_id: &Uuid,
        limit: usize,
        offset: usize,
    ) -> (Vec<Delivery>, usize) {
        let ledger = self.inner.read().await;
        let matching: Vec<&Delivery> = ledger
            .items
            .values()
            .filter(|d| d.newsletter_id == *newsletter_id)
            .collect();
        let total = matching.len();
        let items = matching
            .into_iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        (items, total)
    }

    pub async fn stats_for(&self, newsletter_id: &Uuid) -> DeliveryStats {
        let ledger = self.inner.read().await;
        DeliveryStats::tally(
            ledger
                .items
                .values()
                .filter(|d| d.newsletter_id == *newsletter_id),
        )
    }

    pub async fn stats_by_newsletter(&self) -> HashMap<Uuid, DeliveryStats> {
        stats::project(self.inner.read().await.items.values())
    }

    pub async fn delete_by_newsletter(&self, newsletter_id: &Uuid) -> usize {
        self.delete_where(|d| d.newsletter_id == *newsletter_id).await
    }

    pub async fn delete_by_customer(&self, customer_id: &Uuid) -> usize {
        self.delete_where(|d| d.customer_id == *customer_id).await
    }

    async fn delete_where(&self, pred: impl Fn(&Delivery) -> bool) -> usize {
        let mut ledger = self.inner.write().await;
        let before = ledger.items.len();
        ledger.items.retain(|_, d| !pred(d));
        let removed = before - ledger.items.len();
        if removed > 0 {
            self.dirty.store(true, Ordering::Relaxed);
        }
        removed
    }

    /// Rewrite `deliveries.jsonl` from memory if anything changed since the
    /// last rewrite. Returns whether a rewrite happened.
    ///
    /// The ledger stays read-locked until the new file is in place, so a
    /// concurrent `create` or `finalize` appends to the rewritten file rather
    /// than to the one being replaced.
    pub async fn flush_if_dirty(&self) -> bool {
        let ledger = self.inner.read().await;
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return false;
        }
        let snapshot: Vec<Delivery> = ledger.items.values().cloned().collect();
        let path = self.persist_path.clone();
        let res = tokio::task::spawn_blocking(move || Self::rewrite_jsonl(&path, &snapshot)).await;
        drop(ledger);
        match res {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                self.dirty.store(true, Ordering::Relaxed);
                tracing::warn!(error = %e, "failed to rewrite deliveries");
                false
            }
            Err(e) => {
                self.dirty.store(true, Ordering::Relaxed);
                tracing::warn!(error = %e, "delivery flush task panicked");
                false
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.event_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ids_are_sequential() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeliveryStore::new(dir.path());
        let n = Uuid::new_v4();
        let a = store.create(n, Uuid::new_v4(), None).await;
        let b = store.create(n, Uuid::new_v4(), None).await;
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(a.status, DeliveryStatus::Ongoing);
    }

    #[tokio::test]
    async fn terminal_status_is_immutable() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeliveryStore::new(dir.path());
        let d = store.create(Uuid::new_v4(), Uuid::new_v4(), None).await;

        store.finalize(d.id, DeliveryStatus::Success).await.unwrap();
        let err = store.finalize(d.id, DeliveryStatus::Failure).await.unwrap_err();
        assert_eq!(
            err,
            DeliveryError::AlreadyTerminal {
                id: d.id,
                status: DeliveryStatus::Success
            }
        );
        assert_eq!(store.get(d.id).await.unwrap().status, DeliveryStatus::Success);
    }

    #[tokio::test]
    async fn finalize_rejects_ongoing_and_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeliveryStore::new(dir.path());
        let d = store.create(Uuid::new_v4(), Uuid::new_v4(), None).await;

        assert_eq!(
            store.finalize(d.id, DeliveryStatus::Ongoing).await.unwrap_err(),
            DeliveryError::NotTerminal(DeliveryStatus::Ongoing)
        );
        assert_eq!(
            store.finalize(99, DeliveryStatus::Success).await.unwrap_err(),
            DeliveryError::NotFound(99)
        );
    }

    #[tokio::test]
    async fn reload_keeps_latest_status_and_next_id() {
        let dir = tempfile::tempdir().unwrap();
        let n = Uuid::new_v4();
        {
            let store = DeliveryStore::new(dir.path());
            let d = store.create(n, Uuid::new_v4(), None).await;
            store.create(n, Uuid::new_v4(), None).await;
            store.finalize(d.id, DeliveryStatus::Canceled).await.unwrap();
        }
        let store = DeliveryStore::new(dir.path());
        assert_eq!(store.get(1).await.unwrap().status, DeliveryStatus::Canceled);
        assert_eq!(store.get(2).await.unwrap().status, DeliveryStatus::Ongoing);
        let next = store.create(n, Uuid::new_v4(), None).await;
        assert_eq!(next.id, 3);
    }

    #[tokio::test]
    async fn cascade_delete_and_flush_compacts() {
        let dir = tempfile::tempdir().unwrap();
        let keep = Uuid::new_v4();
        let drop_me = Uuid::new_v4();
        {
            let store = DeliveryStore::new(dir.path());
            store.create(keep, Uuid::new_v4(), None).await;
            store.create(drop_me, Uuid::new_v4(), None).await;
            store.create(drop_me, Uuid::new_v4(), None).await;

            assert_eq!(store.delete_by_newsletter(&drop_me).await, 2);
            assert!(store.flush_if_dirty().await);
            assert!(!store.flush_if_dirty().await);
        }
        let data = std::fs::read_to_string(dir.path().join("deliveries.jsonl")).unwrap();
        assert_eq!(data.lines().count(), 1);
        let store = DeliveryStore::new(dir.path());
        let (items, total) = store.list_by_newsletter(&keep, 10, 0).await;
        assert_eq!(total, 1);
        assert_eq!(items[0].id, 1);
    }

    #[tokio::test]
    async fn delete_by_customer_only_touches_that_customer() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeliveryStore::new(dir.path());
        let n = Uuid::new_v4();
        let gone = Uuid::new_v4();
        store.create(n, gone, None).await;
        store.create(n, Uuid::new_v4(), None).await;

        assert_eq!(store.delete_by_customer(&gone).await, 1);
        let (_, total) = store.list_by_newsletter(&n, 10, 0).await;
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn list_is_most_recent_first_and_paginated() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeliveryStore::new(dir.path());
        let n = Uuid::new_v4();
        for _ in 0..5 {
            store.create(n, Uuid::new_v4(), None).await;
        }
        let (items, total) = store.list_by_newsletter(&n, 2, 1).await;
        assert_eq!(total, 5);
        let ids: Vec<u64> = items.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![4, 3]);
    }

    #[tokio::test]
    async fn events_are_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeliveryStore::new(dir.path());
        let mut rx = store.subscribe();
        let d = store.create(Uuid::new_v4(), Uuid::new_v4(), None).await;
        store.finalize(d.id, DeliveryStatus::Failure).await.unwrap();

        assert!(matches!(rx.recv().await.unwrap(), DeliveryEvent::Created { .. }));
        match rx.recv().await.unwrap() {
            DeliveryEvent::StatusChanged { id, status, .. } => {
                assert_eq!(id, d.id);
                assert_eq!(status, DeliveryStatus::Failure);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn appends_racing_a_flush_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(DeliveryStore::new(dir.path()));
        let n = Uuid::new_v4();

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    let d = store.create(n, Uuid::new_v4(), None).await;
                    store.finalize(d.id, DeliveryStatus::Success).await.unwrap();
                }
            })
        };
        while !writer.is_finished() {
            store.flush_if_dirty().await;
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        // No final flush: whatever was appended after the last rewrite
        // must still be in the file.
        let reloaded = DeliveryStore::new(dir.path());
        let stats = reloaded.stats_for(&n).await;
        assert_eq!(stats.success, 200);
        assert_eq!(stats.ongoing, 0);
    }
}
