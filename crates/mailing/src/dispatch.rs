//! Dispatch engine: turns one run of a newsletter into one delivery per
//! current member.
//!
//! Each member gets an `ongoing` delivery first. If the newsletter has
//! finished by the time that member is processed the delivery is canceled
//! without touching the transport; otherwise the transport decides between
//! success and failure. Nothing is retried.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tb_domain::config::{DispatchConfig, TransportConfig};
use tb_domain::trace::TraceEvent;
use tb_domain::{Error, Result};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::delivery::DeliveryStore;
use crate::directory::DirectoryStore;
use crate::model::{Customer, DeliveryStatus, Newsletter};
use crate::runs::RunStore;
use crate::stats::DeliveryStats;
use crate::transport::MessageTransport;

/// Source of "now" for staleness checks.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub newsletter_id: Uuid,
    pub run_id: Option<Uuid>,
    pub recipients: usize,
    /// Members not recorded because the newsletter was deleted mid-run.
    pub skipped: usize,
    #[serde(flatten)]
    pub outcome: DeliveryStats,
}

pub struct DispatchEngine {
    directory: Arc<DirectoryStore>,
    deliveries: Arc<DeliveryStore>,
    transport: Arc<dyn MessageTransport>,
    clock: Clock,
    send_timeout: Duration,
    max_concurrent: usize,
}

impl DispatchEngine {
    pub fn new(
        directory: Arc<DirectoryStore>,
        deliveries: Arc<DeliveryStore>,
        transport: Arc<dyn MessageTransport>,
        transport_cfg: &TransportConfig,
        dispatch_cfg: &DispatchConfig,
    ) -> Self {
        Self {
            directory,
            deliveries,
            transport,
            clock: Arc::new(Utc::now),
            send_timeout: Duration::from_millis(transport_cfg.timeout_ms.max(1)),
            max_concurrent: dispatch_cfg.clamped().max_concurrent,
        }
    }

    /// Replace the wall clock, e.g. with a fixed instant in tests.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Dispatch a newsletter to its current members.
    ///
    /// Fails with `NotFound` when the newsletter no longer exists; in that
    /// case no deliveries are created. Transport problems never fail the
    /// run, they only show up as `failure` deliveries.
    pub async fn run(&self, newsletter_id: Uuid, run_id: Option<Uuid>) -> Result<DispatchReport> {
        let (newsletter, members) = self
            .directory
            .recipients(&newsletter_id)
            .await
            .ok_or_else(|| Error::not_found("newsletter", newsletter_id))?;

        tracing::info!(
            newsletter_id = %newsletter_id,
            run_id = ?run_id,
            recipients = members.len(),
            "dispatch started"
        );

        let recipients = members.len();
        let statuses: Vec<Option<DeliveryStatus>> = stream::iter(members)
            .map(|customer| self.deliver_one(&newsletter, customer, run_id))
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut outcome = DeliveryStats::default();
        let mut skipped = 0;
        for status in statuses {
            match status {
                Some(status) => outcome.record(status),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::info!(newsletter_id = %newsletter_id, skipped, "newsletter deleted during dispatch");
        }

        TraceEvent::DispatchCompleted {
            newsletter_id,
            run_id,
            recipients,
            success: outcome.success,
            failure: outcome.failure,
            canceled: outcome.canceled,
        }
        .emit();

        Ok(DispatchReport {
            newsletter_id,
            run_id,
            recipients,
            skipped,
            outcome,
        })
    }

    async fn deliver_one(
        &self,
        newsletter: &Newsletter,
        customer: Customer,
        run_id: Option<Uuid>,
    ) -> Option<DeliveryStatus> {
        if !self.newsletter_exists(&newsletter.id).await {
            return None;
        }
        let delivery = self
            .deliveries
            .create(newsletter.id, customer.id, run_id)
            .await;

        let now = (self.clock)();
        let status = if newsletter.has_finished(&now) {
            tracing::debug!(
                delivery_id = delivery.id,
                newsletter_id = %newsletter.id,
                finish = %newsletter.finish,
                "newsletter finished, canceling delivery"
            );
            DeliveryStatus::Canceled
        } else {
            self.send(delivery.id, &customer.phone, &newsletter.text).await
        };

        if let Err(e) = self.deliveries.finalize(delivery.id, status).await {
            // The delivery can vanish mid-run when its customer or
            // newsletter is deleted.
            tracing::warn!(delivery_id = delivery.id, error = %e, "could not record delivery status");
        }

        // A delete that landed between the check above and `create` has
        // already purged its deliveries; drop the stragglers it missed.
        if !self.newsletter_exists(&newsletter.id).await {
            self.deliveries.delete_by_newsletter(&newsletter.id).await;
            return None;
        }
        Some(status)
    }

    async fn newsletter_exists(&self, id: &Uuid) -> bool {
        self.directory.read(|d| d.newsletter(id).is_some()).await
    }

    async fn send(&self, delivery_id: u64, phone: &str, text: &str) -> DeliveryStatus {
        let started = Instant::now();
        let result =
            tokio::time::timeout(self.send_timeout, self.transport.send(delivery_id, phone, text))
                .await;
        let (delivered, timed_out) = match result {
            Ok(delivered) => (delivered, false),
            Err(_) => (false, true),
        };

        TraceEvent::TransportCall {
            delivery_id,
            delivered,
            timed_out,
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();

        if delivered {
            DeliveryStatus::Success
        } else {
            DeliveryStatus::Failure
        }
    }

    /// Claim every due run and dispatch each one on its own task. A run is
    /// marked complete once its dispatch returns, whether or not it found
    /// the newsletter.
    pub async fn fire_due(
        self: &Arc<Self>,
        runs: &Arc<RunStore>,
        now: DateTime<Utc>,
    ) -> Vec<JoinHandle<Result<DispatchReport>>> {
        runs.claim_due(now)
            .await
            .into_iter()
            .map(|run| {
                let engine = Arc::clone(self);
                let runs = Arc::clone(runs);
                tokio::spawn(async move {
                    let res = engine.run(run.newsletter_id, Some(run.id)).await;
                    runs.complete(&run.newsletter_id, &run.id, (engine.clock)()).await;
                    match &res {
                        Ok(report) => tracing::info!(
                            newsletter_id = %run.newsletter_id,
                            run_id = %run.id,
                            success = report.outcome.success,
                            failure = report.outcome.failure,
                            canceled = report.outcome.canceled,
                            "run dispatched"
                        ),
                        Err(e) => tracing::warn!(
                            newsletter_id = %run.newsletter_id,
                            run_id = %run.id,
                            error = %e,
                            "run aborted"
                        ),
                    }
                    res
                })
            })
            .collect()
    }
}
