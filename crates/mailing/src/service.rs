//! MailingService: entity writes and the side effects they trigger.
//!
//! Every write validates against the merged state, mutates the directory,
//! runs the membership synchronizer with explicit before/after values and
//! keeps the run scheduler in step with newsletter timing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tb_domain::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::delivery::DeliveryStore;
use crate::directory::{Directory, DirectoryStore};
use crate::membership;
use crate::model::{Customer, Delivery, Newsletter, Run};
use crate::runs::RunStore;
use crate::stats::NewsletterStats;
use crate::validation::{CustomerDraft, FieldErrors, NewsletterDraft};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    Invalid(FieldErrors),
    #[error(transparent)]
    Domain(#[from] Error),
}

impl From<FieldErrors> for ServiceError {
    fn from(e: FieldErrors) -> Self {
        Self::Invalid(e)
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// A newsletter with its current recipients and run.
#[derive(Debug, Clone, Serialize)]
pub struct NewsletterDetail {
    #[serde(flatten)]
    pub newsletter: Newsletter,
    pub recipients: Vec<Customer>,
    pub run: Option<Run>,
}

pub struct MailingService {
    directory: Arc<DirectoryStore>,
    runs: Arc<RunStore>,
    deliveries: Arc<DeliveryStore>,
    /// Serializes newsletter writes so the directory and the run store
    /// observe updates in the same order.
    newsletter_writes: Mutex<()>,
}

impl MailingService {
    pub fn new(
        directory: Arc<DirectoryStore>,
        runs: Arc<RunStore>,
        deliveries: Arc<DeliveryStore>,
    ) -> Self {
        Self {
            directory,
            runs,
            deliveries,
            newsletter_writes: Mutex::new(()),
        }
    }

    pub fn directory(&self) -> &Arc<DirectoryStore> {
        &self.directory
    }

    pub fn runs(&self) -> &Arc<RunStore> {
        &self.runs
    }

    pub fn deliveries(&self) -> &Arc<DeliveryStore> {
        &self.deliveries
    }

    // ── customers ───────────────────────────────────────────────────

    pub async fn list_customers(&self) -> Vec<Customer> {
        self.directory.list_customers().await
    }

    pub async fn get_customer(&self, id: &Uuid) -> ServiceResult<Customer> {
        self.directory
            .customer(id)
            .await
            .ok_or_else(|| Error::not_found("customer", id).into())
    }

    pub async fn create_customer(
        &self,
        draft: CustomerDraft,
        now: DateTime<Utc>,
    ) -> ServiceResult<Customer> {
        let fields = draft.resolve(None)?;
        self.directory
            .mutate(|dir| -> ServiceResult<Customer> {
                ensure_phone_free(dir, &fields.phone, None)?;
                let mut customer =
                    Customer::new(fields.phone, fields.operator_code, fields.tag, now);
                customer.timezone = fields.timezone;
                let id = customer.id;
                dir.insert_customer(customer.clone());
                membership::on_customer_created(dir, &id);
                tracing::info!(customer_id = %id, "customer created");
                Ok(customer)
            })
            .await
    }

    pub async fn update_customer(
        &self,
        id: &Uuid,
        draft: CustomerDraft,
        now: DateTime<Utc>,
    ) -> ServiceResult<Customer> {
        self.directory
            .mutate(|dir| -> ServiceResult<Customer> {
                let current = dir
                    .customer(id)
                    .ok_or_else(|| Error::not_found("customer", id))?;
                let before = current.segment_key();
                let fields = draft.resolve(Some(current))?;
                ensure_phone_free(dir, &fields.phone, Some(id))?;

                let Some(customer) = dir.customer_mut(id) else {
                    return Err(Error::not_found("customer", id).into());
                };
                customer.phone = fields.phone;
                customer.operator_code = fields.operator_code;
                customer.tag = fields.tag;
                customer.timezone = fields.timezone;
                customer.updated_at = now;
                let updated = customer.clone();

                let after = updated.segment_key();
                if before != after {
                    membership::on_customer_updated(dir, id, &before, &after);
                }
                Ok(updated)
            })
            .await
    }

    /// Delete a customer, its memberships and its deliveries.
    pub async fn delete_customer(&self, id: &Uuid) -> ServiceResult<Customer> {
        let removed = self
            .directory
            .mutate(|dir| {
                dir.remove_customer(id)
                    .ok_or_else(|| ServiceError::from(Error::not_found("customer", id)))
            })
            .await?;
        let deliveries = self.deliveries.delete_by_customer(id).await;
        tracing::info!(customer_id = %id, deliveries, "customer deleted");
        Ok(removed)
    }

    // ── newsletters ─────────────────────────────────────────────────

    pub async fn list_newsletters(&self) -> Vec<Newsletter> {
        self.directory.list_newsletters().await
    }

    pub async fn newsletter_detail(&self, id: &Uuid) -> ServiceResult<NewsletterDetail> {
        let (newsletter, recipients) = self
            .directory
            .recipients(id)
            .await
            .ok_or_else(|| Error::not_found("newsletter", id))?;
        let run = self.runs.get(id).await;
        Ok(NewsletterDetail {
            newsletter,
            recipients,
            run,
        })
    }

    /// Create a newsletter, join matching customers and schedule its run
    /// unless it has already finished.
    pub async fn create_newsletter(
        &self,
        draft: NewsletterDraft,
        now: DateTime<Utc>,
    ) -> ServiceResult<Newsletter> {
        let fields = draft.resolve(None)?;
        let _guard = self.newsletter_writes.lock().await;

        let newsletter = self
            .directory
            .mutate(|dir| {
                let n = Newsletter::new(fields.start, fields.finish, fields.text, fields.filter, now);
                let id = n.id;
                dir.insert_newsletter(n.clone());
                membership::on_newsletter_saved(dir, &id);
                Ok::<_, ServiceError>(n)
            })
            .await?;

        self.runs.schedule_new(&newsletter, now).await;
        tracing::info!(newsletter_id = %newsletter.id, start = %newsletter.start, "newsletter created");
        Ok(newsletter)
    }

    /// Update a newsletter. Matching customers are (re)added on every save;
    /// a change to start or finish replaces the run.
    pub async fn update_newsletter(
        &self,
        id: &Uuid,
        draft: NewsletterDraft,
        now: DateTime<Utc>,
    ) -> ServiceResult<Newsletter> {
        let _guard = self.newsletter_writes.lock().await;

        let (newsletter, timing_changed) = self
            .directory
            .mutate(|dir| -> ServiceResult<(Newsletter, bool)> {
                let current = dir
                    .newsletter(id)
                    .ok_or_else(|| Error::not_found("newsletter", id))?;
                let fields = draft.resolve(Some(current))?;
                let timing_changed =
                    fields.start != current.start || fields.finish != current.finish;

                let Some(n) = dir.newsletter_mut(id) else {
                    return Err(Error::not_found("newsletter", id).into());
                };
                n.start = fields.start;
                n.finish = fields.finish;
                n.text = fields.text;
                n.filter = fields.filter;
                n.updated_at = now;
                let updated = n.clone();

                membership::on_newsletter_saved(dir, id);
                Ok((updated, timing_changed))
            })
            .await?;

        if timing_changed {
            self.runs.reschedule(&newsletter, now).await;
        }
        Ok(newsletter)
    }

    /// Delete a newsletter with its run, memberships and deliveries.
    pub async fn delete_newsletter(&self, id: &Uuid) -> ServiceResult<Newsletter> {
        let _guard = self.newsletter_writes.lock().await;
        let removed = self
            .directory
            .mutate(|dir| {
                dir.remove_newsletter(id)
                    .ok_or_else(|| ServiceError::from(Error::not_found("newsletter", id)))
            })
            .await?;
        self.runs.cancel(id).await;
        let deliveries = self.deliveries.delete_by_newsletter(id).await;
        tracing::info!(newsletter_id = %id, deliveries, "newsletter deleted");
        Ok(removed)
    }

    // ── deliveries & stats ──────────────────────────────────────────

    pub async fn newsletter_deliveries(
        &self,
        id: &Uuid,
        limit: usize,
        offset: usize,
    ) -> ServiceResult<(Vec<Delivery>, usize)> {
        if self.directory.newsletter(id).await.is_none() {
            return Err(Error::not_found("newsletter", id).into());
        }
        Ok(self.deliveries.list_by_newsletter(id, limit, offset).await)
    }

    pub async fn stats(&self, id: &Uuid) -> ServiceResult<NewsletterStats> {
        let newsletter = self
            .directory
            .newsletter(id)
            .await
            .ok_or_else(|| Error::not_found("newsletter", id))?;
        let deliveries = self.deliveries.stats_for(id).await;
        Ok(NewsletterStats {
            newsletter,
            deliveries,
        })
    }

    pub async fn stats_all(&self) -> Vec<NewsletterStats> {
        let newsletters = self.directory.list_newsletters().await;
        let by_newsletter = self.deliveries.stats_by_newsletter().await;
        NewsletterStats::collect(newsletters, &by_newsletter)
    }
}

fn ensure_phone_free(dir: &Directory, phone: &str, exclude: Option<&Uuid>) -> ServiceResult<()> {
    if dir.phone_taken(phone, exclude) {
        return Err(Error::Conflict(format!("phone {phone} is already registered")).into());
    }
    Ok(())
}
