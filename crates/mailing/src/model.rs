//! Entity types: customers, newsletters, deliveries and dispatch runs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::segment::{SegmentFilter, SegmentKey};

pub const DEFAULT_TIMEZONE: &str = "Europe/Moscow";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Customer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    /// `7XXXXXXXXXX`, unique across customers.
    pub phone: String,
    pub operator_code: String,
    pub tag: String,
    /// IANA timezone name.
    pub timezone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(
        phone: impl Into<String>,
        operator_code: impl Into<String>,
        tag: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            phone: phone.into(),
            operator_code: operator_code.into(),
            tag: tag.into(),
            timezone: DEFAULT_TIMEZONE.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn segment_key(&self) -> SegmentKey {
        SegmentKey::new(self.operator_code.clone(), self.tag.clone())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Newsletter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Newsletter {
    pub id: Uuid,
    pub start: DateTime<Utc>,
    /// Always later than `start`.
    pub finish: DateTime<Utc>,
    pub text: String,
    #[serde(flatten)]
    pub filter: SegmentFilter,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Newsletter {
    pub fn new(
        start: DateTime<Utc>,
        finish: DateTime<Utc>,
        text: impl Into<String>,
        filter: SegmentFilter,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            start,
            finish,
            text: text.into(),
            filter,
            created_at: now,
            updated_at: now,
        }
    }

    /// A newsletter is over once `finish` lies strictly in the past.
    pub fn has_finished(&self, now: &DateTime<Utc>) -> bool {
        self.finish < *now
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Delivery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Ongoing,
    Success,
    Failure,
    Canceled,
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Ongoing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ongoing => "ongoing",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message to one customer on behalf of one newsletter run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    /// Sequential; the transport addresses messages by this number.
    pub id: u64,
    pub newsletter_id: Uuid,
    pub customer_id: Uuid,
    #[serde(default)]
    pub run_id: Option<Uuid>,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One-shot dispatch trigger owned by a newsletter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub newsletter_id: Uuid,
    /// The newsletter's `start` when the run was (re)created.
    pub fire_at: DateTime<Utc>,
    /// Cleared when the run is claimed; a disabled run never fires again.
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub fired_at: Option<DateTime<Utc>>,
    /// Set once the dispatch for this run has returned.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn for_newsletter(newsletter: &Newsletter, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            newsletter_id: newsletter.id,
            fire_at: newsletter.start,
            enabled: true,
            created_at: now,
            fired_at: None,
            completed_at: None,
        }
    }

    pub fn is_due(&self, now: &DateTime<Utc>) -> bool {
        self.enabled && self.fire_at <= *now
    }

    /// Claimed, but the process stopped before the dispatch returned.
    pub fn is_interrupted(&self) -> bool {
        !self.enabled && self.fired_at.is_some() && self.completed_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&DeliveryStatus::Canceled).unwrap();
        assert_eq!(json, "\"canceled\"");
        let back: DeliveryStatus = serde_json::from_str("\"success\"").unwrap();
        assert_eq!(back, DeliveryStatus::Success);
    }

    #[test]
    fn only_ongoing_is_non_terminal() {
        assert!(!DeliveryStatus::Ongoing.is_terminal());
        assert!(DeliveryStatus::Success.is_terminal());
        assert!(DeliveryStatus::Failure.is_terminal());
        assert!(DeliveryStatus::Canceled.is_terminal());
    }

    #[test]
    fn newsletter_filter_is_flattened() {
        let now = Utc.with_ymd_and_hms(2023, 10, 1, 0, 0, 0).unwrap();
        let mut filter = SegmentFilter::default();
        filter.operator_codes.insert("990".into());
        filter.tags.insert("gamer".into());
        let n = Newsletter::new(now, now + chrono::Duration::days(1), "hi", filter, now);
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["operator_codes"][0], "990");
        assert_eq!(json["tags"][0], "gamer");
    }

    #[test]
    fn run_fires_at_start_and_is_due_once_reached() {
        let start = Utc.with_ymd_and_hms(2023, 10, 1, 0, 0, 0).unwrap();
        let n = Newsletter::new(
            start,
            start + chrono::Duration::days(1),
            "hi",
            SegmentFilter::default(),
            start - chrono::Duration::days(1),
        );
        let mut run = Run::for_newsletter(&n, start - chrono::Duration::days(1));
        assert_eq!(run.fire_at, start);
        assert!(run.enabled);
        assert!(!run.is_due(&(start - chrono::Duration::seconds(1))));
        assert!(run.is_due(&start));
        run.enabled = false;
        assert!(!run.is_due(&start));
    }

    #[test]
    fn finished_only_after_finish() {
        let start = Utc.with_ymd_and_hms(2023, 10, 1, 0, 0, 0).unwrap();
        let finish = start + chrono::Duration::days(1);
        let n = Newsletter::new(start, finish, "hi", SegmentFilter::default(), start);
        assert!(!n.has_finished(&finish));
        assert!(n.has_finished(&(finish + chrono::Duration::seconds(1))));
    }
}
