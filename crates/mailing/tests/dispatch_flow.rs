//! End-to-end: customers and a newsletter go in through the service, the
//! run is claimed, the engine dispatches through a scripted transport and
//! the stats reflect every outcome.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use tb_domain::config::{DispatchConfig, TransportConfig};
use tb_mailing::validation::{CustomerDraft, NewsletterDraft};
use tb_mailing::{
    DeliveryStatus, DeliveryStore, DirectoryStore, DispatchEngine, MailingService,
    MessageTransport, RunStore,
};
use uuid::Uuid;

/// Answers per phone number; unknown phones are accepted. Records every
/// call in order.
#[derive(Default)]
struct ScriptedTransport {
    answers: HashMap<String, bool>,
    calls: Mutex<Vec<(u64, String, String)>>,
}

#[async_trait]
impl MessageTransport for ScriptedTransport {
    async fn send(&self, delivery_id: u64, phone: &str, text: &str) -> bool {
        self.calls
            .lock()
            .push((delivery_id, phone.to_string(), text.to_string()));
        self.answers.get(phone).copied().unwrap_or(true)
    }
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 10, day, hour, 0, 0).unwrap()
}

fn phone(i: usize) -> String {
    format!("7999000000{i}")
}

struct World {
    _dir: tempfile::TempDir,
    service: MailingService,
    runs: Arc<RunStore>,
    engine: Arc<DispatchEngine>,
    transport: Arc<ScriptedTransport>,
}

fn world(transport: ScriptedTransport, now: DateTime<Utc>) -> World {
    let dir = tempfile::tempdir().unwrap();
    let directory = Arc::new(DirectoryStore::new(dir.path()));
    let runs = Arc::new(RunStore::new(dir.path()));
    let deliveries = Arc::new(DeliveryStore::new(dir.path()));
    let transport = Arc::new(transport);

    let engine = DispatchEngine::new(
        directory.clone(),
        deliveries.clone(),
        transport.clone(),
        &TransportConfig::default(),
        &DispatchConfig::default(),
    )
    .with_clock(Arc::new(move || now));

    World {
        _dir: dir,
        service: MailingService::new(directory, runs.clone(), deliveries),
        runs,
        engine: Arc::new(engine),
        transport,
    }
}

/// Ten customers, operator codes 990/991/992 by `i % 3`, tag "gamer" when
/// `i % 3 == 0` and "programmer" otherwise.
async fn seed_customers(service: &MailingService) -> Vec<Uuid> {
    let mut ids = Vec::new();
    for i in 0..10 {
        let draft = CustomerDraft {
            phone: Some(phone(i)),
            operator_code: Some(format!("99{}", i % 3)),
            tag: Some(if i % 3 == 0 { "gamer" } else { "programmer" }.into()),
            timezone: None,
        };
        ids.push(service.create_customer(draft, at(1, 0)).await.unwrap().id);
    }
    ids
}

fn gamer_newsletter() -> NewsletterDraft {
    NewsletterDraft {
        start: Some(at(1, 0)),
        finish: Some(at(2, 0)),
        text: Some("new release for 990 gamers".into()),
        operator_codes: Some(["990".to_string()].into_iter().collect()),
        tags: Some(["gamer".to_string()].into_iter().collect()),
    }
}

#[tokio::test]
async fn scheduled_run_reaches_exactly_the_segment() {
    let mut transport = ScriptedTransport::default();
    transport.answers.insert(phone(6), false);
    let w = world(transport, at(1, 0));

    let customers = seed_customers(&w.service).await;
    let created = at(1, 0) - Duration::days(1);
    let n = w
        .service
        .create_newsletter(gamer_newsletter(), created)
        .await
        .unwrap();

    let detail = w.service.newsletter_detail(&n.id).await.unwrap();
    let mut recipients: Vec<Uuid> = detail.recipients.iter().map(|c| c.id).collect();
    recipients.sort();
    let mut expected: Vec<Uuid> = [0, 3, 6, 9].iter().map(|&i| customers[i]).collect();
    expected.sort();
    assert_eq!(recipients, expected);

    let run = detail.run.expect("run scheduled");
    assert!(run.enabled);
    assert_eq!(run.fire_at, at(1, 0));

    // Not due yet.
    assert!(w.engine.fire_due(&w.runs, at(1, 0) - Duration::minutes(1)).await.is_empty());

    let handles = w.engine.fire_due(&w.runs, at(1, 0)).await;
    assert_eq!(handles.len(), 1);
    let mut reports = Vec::new();
    for h in handles {
        reports.push(h.await.unwrap().unwrap());
    }
    let report = &reports[0];
    assert_eq!(report.run_id, Some(run.id));
    assert_eq!(report.recipients, 4);
    assert_eq!(report.outcome.success, 3);
    assert_eq!(report.outcome.failure, 1);

    let calls = w.transport.calls.lock().clone();
    assert_eq!(calls.len(), 4);
    let mut called: Vec<String> = calls.iter().map(|(_, p, _)| p.clone()).collect();
    called.sort();
    assert_eq!(called, vec![phone(0), phone(3), phone(6), phone(9)]);
    assert!(calls.iter().all(|(_, _, t)| t == "new release for 990 gamers"));

    let stats = w.service.stats(&n.id).await.unwrap();
    assert_eq!(stats.deliveries.success, 3);
    assert_eq!(stats.deliveries.failure, 1);
    assert_eq!(stats.deliveries.ongoing, 0);
    assert_eq!(stats.deliveries.canceled, 0);

    // One-shot: a later tick does nothing.
    assert!(w.engine.fire_due(&w.runs, at(1, 12)).await.is_empty());
    assert_eq!(w.transport.calls.lock().len(), 4);

    // The finished dispatch is recorded, so a restart does not re-fire it.
    let fired = w.runs.get(&n.id).await.unwrap();
    assert_eq!(fired.completed_at, Some(at(1, 0)));
    let reloaded = RunStore::new(w._dir.path());
    assert!(reloaded.claim_due(at(1, 12)).await.is_empty());
}

#[tokio::test]
async fn late_run_cancels_every_delivery() {
    let late = at(3, 0);
    let w = world(ScriptedTransport::default(), late);
    seed_customers(&w.service).await;
    let n = w
        .service
        .create_newsletter(gamer_newsletter(), at(1, 0) - Duration::days(1))
        .await
        .unwrap();

    let handles = w.engine.fire_due(&w.runs, late).await;
    assert_eq!(handles.len(), 1);
    for h in handles {
        let report = h.await.unwrap().unwrap();
        assert_eq!(report.outcome.canceled, 4);
    }

    assert!(w.transport.calls.lock().is_empty());
    let (items, total) = w.service.newsletter_deliveries(&n.id, 50, 0).await.unwrap();
    assert_eq!(total, 4);
    assert!(items.iter().all(|d| d.status == DeliveryStatus::Canceled));
}

#[tokio::test]
async fn run_for_deleted_newsletter_never_fires() {
    let w = world(ScriptedTransport::default(), at(1, 0));
    seed_customers(&w.service).await;
    let n = w
        .service
        .create_newsletter(gamer_newsletter(), at(1, 0) - Duration::days(1))
        .await
        .unwrap();

    w.service.delete_newsletter(&n.id).await.unwrap();

    assert!(w.engine.fire_due(&w.runs, at(1, 0)).await.is_empty());
    assert!(w.transport.calls.lock().is_empty());
    assert!(w.service.stats_all().await.is_empty());
}

#[tokio::test]
async fn rescheduled_newsletter_fires_at_the_new_start() {
    let w = world(ScriptedTransport::default(), at(1, 6));
    seed_customers(&w.service).await;
    let created = at(1, 0) - Duration::days(1);
    let n = w
        .service
        .create_newsletter(gamer_newsletter(), created)
        .await
        .unwrap();

    let later = NewsletterDraft {
        start: Some(at(1, 6)),
        ..NewsletterDraft::default()
    };
    w.service.update_newsletter(&n.id, later, created).await.unwrap();

    assert!(w.engine.fire_due(&w.runs, at(1, 0)).await.is_empty());
    let handles = w.engine.fire_due(&w.runs, at(1, 6)).await;
    assert_eq!(handles.len(), 1);
    for h in handles {
        assert_eq!(h.await.unwrap().unwrap().outcome.success, 4);
    }
}

#[tokio::test]
async fn stats_cover_every_newsletter() {
    let w = world(ScriptedTransport::default(), at(1, 0));
    seed_customers(&w.service).await;
    let created = at(1, 0) - Duration::days(1);
    let gamers = w
        .service
        .create_newsletter(gamer_newsletter(), created)
        .await
        .unwrap();
    let nobody = w
        .service
        .create_newsletter(
            NewsletterDraft {
                operator_codes: Some(["903".to_string()].into_iter().collect()),
                ..gamer_newsletter()
            },
            created,
        )
        .await
        .unwrap();

    for h in w.engine.fire_due(&w.runs, at(1, 0)).await {
        h.await.unwrap().unwrap();
    }

    let all = w.service.stats_all().await;
    assert_eq!(all.len(), 2);
    let by_id: HashMap<Uuid, _> = all.iter().map(|s| (s.newsletter.id, s.deliveries)).collect();
    assert_eq!(by_id[&gamers.id].success, 4);
    assert_eq!(by_id[&nobody.id].total(), 0);
}
