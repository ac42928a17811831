//! Subscription delivery queue behaviour.

mod common;

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use reportflow::domain::{DeliveryConfig, DeliveryStatus, NewSubscription, ScheduleDefinition};
use reportflow::store::{tables, InMemoryStore};

use common::{harness, record_events, sales_report, sample_tables, utc, GatedLoader, Harness, RecordingChannel};

fn webhook(url: &str) -> DeliveryConfig {
    DeliveryConfig::Webhook {
        url: url.to_string(),
        headers: BTreeMap::new(),
    }
}

async fn setup(store: Arc<InMemoryStore>) -> (Harness, String) {
    let h = harness(
        store,
        Arc::new(GatedLoader::new(sample_tables())),
        utc(2024, 1, 1, 10, 0),
    );
    let report_id = h.service.register_report(sales_report()).await.unwrap();
    (h, report_id)
}

#[tokio::test]
async fn test_email_without_recipients_is_rejected() {
    let store = Arc::new(InMemoryStore::new());
    let (h, report_id) = setup(store.clone()).await;

    let err = h
        .service
        .create_subscription(NewSubscription::new(
            "Weekly sales",
            &report_id,
            "u1",
            ScheduleDefinition::weekly(1, "08:00"),
            DeliveryConfig::email(Vec::<String>::new()),
        ))
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert_eq!(store.count(tables::SUBSCRIPTIONS), 0);
    assert!(h.service.subscriptions().list_subscriptions().is_empty());
}

#[tokio::test]
async fn test_queue_delivers_in_order_without_overlap() {
    let (h, report_id) = setup(Arc::new(InMemoryStore::new())).await;
    let hook = Arc::new(RecordingChannel::gated());
    h.channels.register("webhook", hook.clone());

    let mut ids = Vec::new();
    for url in ["https://a.example/hook", "https://b.example/hook", "https://c.example/hook"] {
        let sub = h
            .service
            .create_subscription(NewSubscription::new(
                url,
                &report_id,
                "u1",
                ScheduleDefinition::daily("08:00"),
                webhook(url),
            ))
            .await
            .unwrap();
        ids.push(sub.id);
    }

    let manager = h.service.subscriptions().clone();
    let first = ids[0].clone();
    let drainer = tokio::spawn(async move { manager.deliver_now(&first).await });
    hook.entered.notified().await;

    // A drain is in progress, so these only enqueue.
    h.service.deliver_now(&ids[1]).await.unwrap();
    h.service.deliver_now(&ids[2]).await.unwrap();
    let stats = h.service.get_subscription_stats().await.unwrap();
    assert_eq!(stats.queued, 2);
    assert!(stats.draining);

    hook.release.notify_one();
    drainer.await.unwrap().unwrap();

    assert_eq!(
        hook.targets(),
        vec!["https://a.example/hook", "https://b.example/hook", "https://c.example/hook"]
    );
    assert_eq!(hook.max_in_flight.load(Ordering::SeqCst), 1);

    let stats = h.service.get_subscription_stats().await.unwrap();
    assert_eq!((stats.queued, stats.draining), (0, false));
    assert_eq!((stats.delivered, stats.errors), (3, 0));
}

#[tokio::test]
async fn test_failed_delivery_is_recorded_and_rescheduled() {
    let (h, report_id) = setup(Arc::new(InMemoryStore::new())).await;
    let events = record_events(&h.bus);

    let sub = h
        .service
        .create_subscription(NewSubscription::new(
            "Nightly upload",
            &report_id,
            "u1",
            ScheduleDefinition::daily("08:00"),
            DeliveryConfig::Ftp {
                host: "ftp.example.com".into(),
                path: "/reports".into(),
                username: None,
            },
        ))
        .await
        .unwrap();
    assert_eq!(sub.next_delivery, Some(utc(2024, 1, 2, 8, 0)));

    h.clock.set(utc(2024, 1, 2, 8, 0));
    assert_eq!(h.service.subscriptions().run_due_deliveries().await, 1);

    let sub = h.service.subscriptions().get_subscription(&sub.id).await.unwrap().unwrap();
    assert_eq!(sub.error_count, 1);
    assert_eq!(sub.delivery_count, 0);
    assert!(sub.enabled);
    assert_eq!(sub.next_delivery, Some(utc(2024, 1, 3, 8, 0)));

    let history = h
        .service
        .subscriptions()
        .get_delivery_history(&sub.id, None)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, DeliveryStatus::Failed);
    assert!(history[0].error.as_deref().is_some_and(|e| e.contains("ftp")));

    assert!(events.lock().iter().any(|e| e == "delivery.failed"));
    assert_eq!(h.service.subscriptions().run_due_deliveries().await, 0);
}

#[tokio::test]
async fn test_one_failure_does_not_stop_the_sweep() {
    let (h, report_id) = setup(Arc::new(InMemoryStore::new())).await;
    let hook = Arc::new(RecordingChannel::default());
    h.channels.register("webhook", hook.clone());

    let failing = h
        .service
        .create_subscription(NewSubscription::new(
            "Archive",
            &report_id,
            "u1",
            ScheduleDefinition::daily("07:00"),
            DeliveryConfig::Storage {
                bucket: "archive".into(),
                prefix: None,
            },
        ))
        .await
        .unwrap();
    let working = h
        .service
        .create_subscription(NewSubscription::new(
            "Hook",
            &report_id,
            "u2",
            ScheduleDefinition::daily("08:00"),
            webhook("https://hooks.example/sales"),
        ))
        .await
        .unwrap();

    h.clock.set(utc(2024, 1, 2, 9, 0));
    assert_eq!(h.service.subscriptions().run_due_deliveries().await, 2);

    let failing = h.service.subscriptions().get_subscription(&failing.id).await.unwrap().unwrap();
    let working = h.service.subscriptions().get_subscription(&working.id).await.unwrap().unwrap();
    assert_eq!((failing.error_count, failing.delivery_count), (1, 0));
    assert_eq!((working.error_count, working.delivery_count), (0, 1));
    assert_eq!(working.last_delivery, Some(utc(2024, 1, 2, 9, 0)));

    let delivered = hook.delivered.lock().clone();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].1, "Hook: Sales");

    let stats = h.service.get_subscription_stats().await.unwrap();
    assert_eq!(stats.history_rows, 2);
}

#[tokio::test]
async fn test_deleting_report_disables_subscriptions() {
    let (h, report_id) = setup(Arc::new(InMemoryStore::new())).await;
    let sub = h
        .service
        .create_subscription(NewSubscription::new(
            "Hook",
            &report_id,
            "u1",
            ScheduleDefinition::daily("08:00"),
            webhook("https://hooks.example/sales"),
        ))
        .await
        .unwrap();

    h.service.delete_report(&report_id).await.unwrap();

    let sub = h.service.subscriptions().get_subscription(&sub.id).await.unwrap().unwrap();
    assert!(!sub.enabled);
    assert_eq!(sub.next_delivery, None);
    h.clock.set(utc(2024, 1, 2, 9, 0));
    assert_eq!(h.service.subscriptions().run_due_deliveries().await, 0);
}

async fn hold_first_webhook(h: &Harness, report_id: &str) -> (Arc<RecordingChannel>, String) {
    let hook = Arc::new(RecordingChannel::gated());
    h.channels.register("webhook", hook.clone());
    let sub = h
        .service
        .create_subscription(NewSubscription::new(
            "Hook",
            report_id,
            "u1",
            ScheduleDefinition::daily("08:00"),
            webhook("https://hooks.example/sales"),
        ))
        .await
        .unwrap();
    (hook, sub.id)
}

#[tokio::test]
async fn test_disable_during_delivery_sticks() {
    let (h, report_id) = setup(Arc::new(InMemoryStore::new())).await;
    let (hook, id) = hold_first_webhook(&h, &report_id).await;

    let manager = h.service.subscriptions().clone();
    let target = id.clone();
    let delivering = tokio::spawn(async move { manager.deliver_now(&target).await });
    hook.entered.notified().await;

    h.service.subscriptions().disable_subscription(&id).await.unwrap();
    hook.release.notify_one();
    delivering.await.unwrap().unwrap();

    let sub = h.service.subscriptions().get_subscription(&id).await.unwrap().unwrap();
    assert!(!sub.enabled);
    assert_eq!(sub.next_delivery, None);
    assert_eq!(sub.delivery_count, 1);
    assert_eq!(sub.last_delivery, Some(utc(2024, 1, 1, 10, 0)));

    h.clock.set(utc(2024, 1, 2, 9, 0));
    assert_eq!(h.service.subscriptions().run_due_deliveries().await, 0);
}

#[tokio::test]
async fn test_delete_during_delivery_keeps_only_history() {
    let store = Arc::new(InMemoryStore::new());
    let (h, report_id) = setup(store.clone()).await;
    let (hook, id) = hold_first_webhook(&h, &report_id).await;

    let manager = h.service.subscriptions().clone();
    let target = id.clone();
    let delivering = tokio::spawn(async move { manager.deliver_now(&target).await });
    hook.entered.notified().await;

    h.service.subscriptions().delete_subscription(&id).await.unwrap();
    hook.release.notify_one();
    delivering.await.unwrap().unwrap();

    assert!(h.service.subscriptions().get_subscription(&id).await.unwrap().is_none());
    assert_eq!(store.count(tables::SUBSCRIPTIONS), 0);
    assert!(h.service.subscriptions().list_subscriptions().is_empty());

    let history = h
        .service
        .subscriptions()
        .get_delivery_history(&id, None)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, DeliveryStatus::Success);
}
