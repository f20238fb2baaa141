//! Directory: customers, newsletters and their memberships, persisted as a
//! single JSON document.
//!
//! All three collections live behind one lock so a membership recomputation
//! sees a consistent view of both sides and cannot interleave with another
//! writer. Writes to `directory.json` go through a separate persist lock and
//! always serialize the state current at write time, so a slower writer can
//! never put an older snapshot over a newer one.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::model::{Customer, Newsletter};
use crate::persist;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Directory (in-memory state)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
pub struct Directory {
    customers: BTreeMap<Uuid, Customer>,
    newsletters: BTreeMap<Uuid, Newsletter>,
    /// newsletter id -> member customer ids
    by_newsletter: BTreeMap<Uuid, BTreeSet<Uuid>>,
    /// customer id -> newsletter ids it belongs to
    by_customer: BTreeMap<Uuid, BTreeSet<Uuid>>,
}

/// On-disk shape of the directory.
#[derive(Serialize, Deserialize, Default)]
struct Snapshot {
    customers: Vec<Customer>,
    newsletters: Vec<Newsletter>,
    /// `(newsletter_id, customer_id)` pairs.
    memberships: Vec<(Uuid, Uuid)>,
}

impl Directory {
    // ── customers ───────────────────────────────────────────────────

    pub fn customer(&self, id: &Uuid) -> Option<&Customer> {
        self.customers.get(id)
    }

    pub fn customer_mut(&mut self, id: &Uuid) -> Option<&mut Customer> {
        self.customers.get_mut(id)
    }

    pub fn customers(&self) -> impl Iterator<Item = &Customer> {
        self.customers.values()
    }

    /// True if a customer other than `exclude` already uses `phone`.
    pub fn phone_taken(&self, phone: &str, exclude: Option<&Uuid>) -> bool {
        self.customers
            .values()
            .any(|c| c.phone == phone && exclude.map_or(true, |id| c.id != *id))
    }

    pub fn insert_customer(&mut self, customer: Customer) {
        self.customers.insert(customer.id, customer);
    }

    /// Remove a customer together with all of its memberships.
    pub fn remove_customer(&mut self, id: &Uuid) -> Option<Customer> {
        let customer = self.customers.remove(id)?;
        for newsletter_id in self.by_customer.remove(id).unwrap_or_default() {
            if let Some(members) = self.by_newsletter.get_mut(&newsletter_id) {
                members.remove(id);
            }
        }
        Some(customer)
    }

    // ── newsletters ─────────────────────────────────────────────────

    pub fn newsletter(&self, id: &Uuid) -> Option<&Newsletter> {
        self.newsletters.get(id)
    }

    pub fn newsletter_mut(&mut self, id: &Uuid) -> Option<&mut Newsletter> {
        self.newsletters.get_mut(id)
    }

    pub fn newsletters(&self) -> impl Iterator<Item = &Newsletter> {
        self.newsletters.values()
    }

    pub fn insert_newsletter(&mut self, newsletter: Newsletter) {
        self.newsletters.insert(newsletter.id, newsletter);
    }

    /// Remove a newsletter together with all of its memberships.
    pub fn remove_newsletter(&mut self, id: &Uuid) -> Option<Newsletter> {
        let newsletter = self.newsletters.remove(id)?;
        for customer_id in self.by_newsletter.remove(id).unwrap_or_default() {
            if let Some(joined) = self.by_customer.get_mut(&customer_id) {
                joined.remove(id);
            }
        }
        Some(newsletter)
    }

    // ── memberships ─────────────────────────────────────────────────

    /// Returns `false` when the pair was already a member.
    pub fn add_membership(&mut self, newsletter_id: Uuid, customer_id: Uuid) -> bool {
        let added = self
            .by_newsletter
            .entry(newsletter_id)
            .or_default()
            .insert(customer_id);
        self.by_customer
            .entry(customer_id)
            .or_default()
            .insert(newsletter_id);
        added
    }

    /// Returns `false` when the pair was not a member.
    pub fn remove_membership(&mut self, newsletter_id: &Uuid, customer_id: &Uuid) -> bool {
        let removed = self
            .by_newsletter
            .get_mut(newsletter_id)
            .map_or(false, |m| m.remove(customer_id));
        if let Some(joined) = self.by_customer.get_mut(customer_id) {
            joined.remove(newsletter_id);
        }
        removed
    }

    pub fn is_member(&self, newsletter_id: &Uuid, customer_id: &Uuid) -> bool {
        self.by_newsletter
            .get(newsletter_id)
            .map_or(false, |m| m.contains(customer_id))
    }

    /// Member customer ids of a newsletter, ordered by id.
    pub fn member_ids(&self, newsletter_id: &Uuid) -> Vec<Uuid> {
        self.by_newsletter
            .get(newsletter_id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Member customers of a newsletter, ordered by customer id.
    pub fn members(&self, newsletter_id: &Uuid) -> Vec<Customer> {
        self.by_newsletter
            .get(newsletter_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.customers.get(id))
            .cloned()
            .collect()
    }

    /// Newsletters a customer currently belongs to.
    pub fn newsletter_ids_of(&self, customer_id: &Uuid) -> Vec<Uuid> {
        self.by_customer
            .get(customer_id)
            .map(|n| n.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn membership_count(&self) -> usize {
        self.by_newsletter.values().map(BTreeSet::len).sum()
    }

    // ── persistence shape ───────────────────────────────────────────

    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            customers: self.customers.values().cloned().collect(),
            newsletters: self.newsletters.values().cloned().collect(),
            memberships: self
                .by_newsletter
                .iter()
                .flat_map(|(n, members)| members.iter().map(move |c| (*n, *c)))
                .collect(),
        }
    }

    fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut dir = Self::default();
        for c in snapshot.customers {
            dir.insert_customer(c);
        }
        for n in snapshot.newsletters {
            dir.insert_newsletter(n);
        }
        for (newsletter_id, customer_id) in snapshot.memberships {
            // Drop dangling pairs left behind by a partial write.
            if dir.newsletters.contains_key(&newsletter_id)
                && dir.customers.contains_key(&customer_id)
            {
                dir.add_membership(newsletter_id, customer_id);
            }
        }
        dir
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DirectoryStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DirectoryStore {
    inner: RwLock<Directory>,
    persist_path: PathBuf,
    persist_lock: Mutex<()>,
}

impl DirectoryStore {
    pub fn new(state_path: &std::path::Path) -> Self {
        let persist_path = state_path.join("directory.json");
        let mut store = Self {
            inner: RwLock::new(Directory::default()),
            persist_path,
            persist_lock: Mutex::new(()),
        };
        store.load();
        store
    }

    fn load(&mut self) {
        if let Ok(data) = std::fs::read_to_string(&self.persist_path) {
            match serde_json::from_str::<Snapshot>(&data) {
                Ok(snapshot) => {
                    let dir = Directory::from_snapshot(snapshot);
                    tracing::info!(
                        customers = dir.customers.len(),
                        newsletters = dir.newsletters.len(),
                        memberships = dir.membership_count(),
                        "loaded directory from disk"
                    );
                    self.inner = RwLock::new(dir);
                }
                Err(e) => {
                    tracing::warn!(error = %e, path = %self.persist_path.display(), "ignoring unreadable directory file");
                }
            }
        }
    }

    async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.inner.read().await.to_snapshot();
        if let Err(e) = persist::write_snapshot(&self.persist_path, &snapshot).await {
            tracing::warn!(error = %e, path = %self.persist_path.display(), "failed to persist directory");
        }
    }

    /// Run `f` against a shared view of the directory.
    pub async fn read<T>(&self, f: impl FnOnce(&Directory) -> T) -> T {
        f(&*self.inner.read().await)
    }

    /// Run `f` under the write lock. On `Ok` the new state is persisted;
    /// on `Err` nothing is written, so `f` must not leave partial changes
    /// behind when it fails.
    pub async fn mutate<T, E>(
        &self,
        f: impl FnOnce(&mut Directory) -> Result<T, E>,
    ) -> Result<T, E> {
        let out = {
            let mut dir = self.inner.write().await;
            f(&mut dir)?
        };
        self.persist().await;
        Ok(out)
    }

    pub async fn customer(&self, id: &Uuid) -> Option<Customer> {
        self.inner.read().await.customer(id).cloned()
    }

    pub async fn list_customers(&self) -> Vec<Customer> {
        self.inner.read().await.customers().cloned().collect()
    }

    pub async fn newsletter(&self, id: &Uuid) -> Option<Newsletter> {
        self.inner.read().await.newsletter(id).cloned()
    }

    pub async fn list_newsletters(&self) -> Vec<Newsletter> {
        self.inner.read().await.newsletters().cloned().collect()
    }

    /// Newsletter plus its member customers, read under one lock.
    pub async fn recipients(&self, newsletter_id: &Uuid) -> Option<(Newsletter, Vec<Customer>)> {
        let dir = self.inner.read().await;
        let newsletter = dir.newsletter(newsletter_id)?.clone();
        let members = dir.members(newsletter_id);
        Some((newsletter, members))
    }
}
