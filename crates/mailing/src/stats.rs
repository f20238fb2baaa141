//! Delivery outcome counts per newsletter, computed on demand.

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use crate::model::{Delivery, DeliveryStatus, Newsletter};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub success: usize,
    pub ongoing: usize,
    pub failure: usize,
    pub canceled: usize,
}

impl DeliveryStats {
    pub fn record(&mut self, status: DeliveryStatus) {
        match status {
            DeliveryStatus::Success => self.success += 1,
            DeliveryStatus::Ongoing => self.ongoing += 1,
            DeliveryStatus::Failure => self.failure += 1,
            DeliveryStatus::Canceled => self.canceled += 1,
        }
    }

    pub fn tally<'a>(deliveries: impl IntoIterator<Item = &'a Delivery>) -> Self {
        let mut stats = Self::default();
        for d in deliveries {
            stats.record(d.status);
        }
        stats
    }

    pub fn total(&self) -> usize {
        self.success + self.ongoing + self.failure + self.canceled
    }
}

/// Group deliveries by newsletter and count their statuses.
pub fn project<'a>(deliveries: impl IntoIterator<Item = &'a Delivery>) -> HashMap<Uuid, DeliveryStats> {
    let mut out: HashMap<Uuid, DeliveryStats> = HashMap::new();
    for d in deliveries {
        out.entry(d.newsletter_id).or_default().record(d.status);
    }
    out
}

/// A newsletter with its delivery counts, serialized flat.
#[derive(Debug, Clone, Serialize)]
pub struct NewsletterStats {
    #[serde(flatten)]
    pub newsletter: Newsletter,
    #[serde(flatten)]
    pub deliveries: DeliveryStats,
}

impl NewsletterStats {
    /// Pair every newsletter with its counts; newsletters without
    /// deliveries report zeros.
    pub fn collect(
        newsletters: Vec<Newsletter>,
        by_newsletter: &HashMap<Uuid, DeliveryStats>,
    ) -> Vec<Self> {
        newsletters
            .into_iter()
            .map(|n| {
                let deliveries = by_newsletter.get(&n.id).copied().unwrap_or_default();
                Self {
                    newsletter: n,
                    deliveries,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentFilter;
    use chrono::Utc;

    const CYCLE: [DeliveryStatus; 4] = [
        DeliveryStatus::Success,
        DeliveryStatus::Failure,
        DeliveryStatus::Ongoing,
        DeliveryStatus::Canceled,
    ];

    fn delivery(id: u64, newsletter_id: Uuid, status: DeliveryStatus) -> Delivery {
        let now = Utc::now();
        Delivery {
            id,
            newsletter_id,
            customer_id: Uuid::new_v4(),
            run_id: None,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn ten_cycled_statuses() {
        let n = Uuid::new_v4();
        let deliveries: Vec<Delivery> = (0..10)
            .map(|i| delivery(i as u64 + 1, n, CYCLE[i % 4]))
            .collect();

        let stats = DeliveryStats::tally(&deliveries);
        assert_eq!(
            stats,
            DeliveryStats {
                success: 3,
                ongoing: 2,
                failure: 3,
                canceled: 2
            }
        );
        assert_eq!(stats.total(), 10);
    }

    #[test]
    fn projection_separates_newsletters() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let deliveries = vec![
            delivery(1, a, DeliveryStatus::Success),
            delivery(2, a, DeliveryStatus::Success),
            delivery(3, b, DeliveryStatus::Canceled),
        ];
        let by = project(&deliveries);
        assert_eq!(by[&a].success, 2);
        assert_eq!(by[&b].canceled, 1);
        assert_eq!(by[&b].success, 0);
    }

    #[test]
    fn newsletter_stats_flatten_counts() {
        let now = Utc::now();
        let n = Newsletter::new(now, now, "t", SegmentFilter::default(), now);
        let rows = NewsletterStats::collect(vec![n.clone()], &HashMap::new());
        let json = serde_json::to_value(&rows[0]).unwrap();
        assert_eq!(json["id"], serde_json::json!(n.id));
        assert_eq!(json["success"], 0);
        assert_eq!(json["canceled"], 0);
        assert_eq!(json["text"], "t");
    }
}
