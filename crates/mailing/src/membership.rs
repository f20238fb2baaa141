//! Membership synchronizer.
//!
//! Keeps the customer/newsletter association in line with the segment
//! matcher. Customer-side changes can both add and remove memberships;
//! newsletter saves only ever add. Editing a newsletter's filters never
//! purges members that stopped matching.

use tb_domain::trace::TraceEvent;
use uuid::Uuid;

use crate::directory::Directory;
use crate::segment::{matches, SegmentKey};

/// Rows touched by one synchronization pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub added: usize,
    pub removed: usize,
}

impl SyncOutcome {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

/// Join a freshly created customer to every newsletter it matches.
pub fn on_customer_created(dir: &mut Directory, customer_id: &Uuid) -> SyncOutcome {
    let Some(key) = dir.customer(customer_id).map(|c| c.segment_key()) else {
        return SyncOutcome::default();
    };
    let outcome = SyncOutcome {
        added: join_matching(dir, customer_id, &key),
        removed: 0,
    };
    report(Some(*customer_id), None, outcome);
    outcome
}

/// Recompute a customer's memberships after its operator code or tag
/// changed from `before` to `after`.
///
/// Leaves every newsletter the old pair matched but the new pair does not,
/// then joins every newsletter the new pair matches.
pub fn on_customer_updated(
    dir: &mut Directory,
    customer_id: &Uuid,
    before: &SegmentKey,
    after: &SegmentKey,
) -> SyncOutcome {
    if dir.customer(customer_id).is_none() {
        return SyncOutcome::default();
    }

    let stale: Vec<Uuid> = dir
        .newsletter_ids_of(customer_id)
        .into_iter()
        .filter(|nid| {
            dir.newsletter(nid)
                .map_or(false, |n| matches(before, &n.filter) && !matches(after, &n.filter))
        })
        .collect();

    let mut outcome = SyncOutcome::default();
    for nid in &stale {
        if dir.remove_membership(nid, customer_id) {
            outcome.removed += 1;
        }
    }
    outcome.added = join_matching(dir, customer_id, after);

    report(Some(*customer_id), None, outcome);
    outcome
}

/// Add every matching customer to a newsletter. Used for both create and
/// update; existing members are never removed here.
pub fn on_newsletter_saved(dir: &mut Directory, newsletter_id: &Uuid) -> SyncOutcome {
    let Some(filter) = dir.newsletter(newsletter_id).map(|n| n.filter.clone()) else {
        return SyncOutcome::default();
    };
    let matching: Vec<Uuid> = dir
        .customers()
        .filter(|c| matches(&c.segment_key(), &filter))
        .map(|c| c.id)
        .collect();

    let mut outcome = SyncOutcome::default();
    for cid in matching {
        if dir.add_membership(*newsletter_id, cid) {
            outcome.added += 1;
        }
    }

    report(None, Some(*newsletter_id), outcome);
    outcome
}

fn join_matching(dir: &mut Directory, customer_id: &Uuid, key: &SegmentKey) -> usize {
    let matching: Vec<Uuid> = dir
        .newsletters()
        .filter(|n| matches(key, &n.filter))
        .map(|n| n.id)
        .collect();
    matching
        .into_iter()
        .filter(|nid| dir.add_membership(*nid, *customer_id))
        .count()
}

fn report(customer_id: Option<Uuid>, newsletter_id: Option<Uuid>, outcome: SyncOutcome) {
    if outcome.is_noop() {
        return;
    }
    TraceEvent::MembershipChanged {
        customer_id,
        newsletter_id,
        added: outcome.added,
        removed: outcome.removed,
    }
    .emit();
}
