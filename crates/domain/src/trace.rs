use serde::Serialize;
use uuid::Uuid;

/// Structured trace events emitted across all TextBlast crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    MembershipChanged {
        customer_id: Option<Uuid>,
        newsletter_id: Option<Uuid>,
        added: usize,
        removed: usize,
    },
    RunScheduled {
        newsletter_id: Uuid,
        run_id: Uuid,
        fire_at: String,
    },
    RunDiscarded {
        newsletter_id: Uuid,
        run_id: Uuid,
        reason: String,
    },
    RunFired {
        newsletter_id: Uuid,
        run_id: Uuid,
        late_by_ms: i64,
    },
    TransportCall {
        delivery_id: u64,
        delivered: bool,
        timed_out: bool,
        duration_ms: u64,
    },
    DispatchCompleted {
        newsletter_id: Uuid,
        run_id: Option<Uuid>,
        recipients: usize,
        success: usize,
        failure: usize,
        canceled: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "tb_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_event_tag() {
        let ev = TraceEvent::TransportCall {
            delivery_id: 7,
            delivered: false,
            timed_out: true,
            duration_ms: 5000,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "TransportCall");
        assert_eq!(json["delivery_id"], 7);
        assert_eq!(json["timed_out"], true);
    }
}
