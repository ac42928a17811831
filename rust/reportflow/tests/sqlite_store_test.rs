//! Persistence across service restarts on a SQLite file.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use reportflow::domain::{DeliveryConfig, ExecutionStatus, NewSubscription, Parameters, ScheduleDefinition};
use reportflow::scheduler::ScheduleOptions;
use reportflow::store::{DurableStore, SqliteStore};

use common::{harness, sales_report, sample_tables, utc, GatedLoader, RecordingChannel};

async fn open(dir: &TempDir) -> Arc<SqliteStore> {
    Arc::new(SqliteStore::new(dir.path().join("reportflow.db")).await.unwrap())
}

#[tokio::test]
async fn test_documents_round_trip_through_file() {
    let dir = TempDir::new().unwrap();
    {
        let store = open(&dir).await;
        store.upsert("reports", "r-1", json!({"id": "r-1", "name": "Sales"})).await.unwrap();
        store.upsert("reports", "r-2", json!({"id": "r-2", "name": "Costs"})).await.unwrap();
        assert!(store.delete("reports", "r-2").await.unwrap());
    }

    let store = open(&dir).await;
    let doc = store.get("reports", "r-1").await.unwrap().unwrap();
    assert_eq!(doc["name"], "Sales");
    assert!(store.get("reports", "r-2").await.unwrap().is_none());
    assert_eq!(store.list("reports").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = TempDir::new().unwrap();

    let (report_id, schedule_id, subscription_id) = {
        let h = harness(
            open(&dir).await,
            Arc::new(GatedLoader::new(sample_tables())),
            utc(2024, 1, 1, 10, 0),
        );
        let hook = Arc::new(RecordingChannel::default());
        h.channels.register("webhook", hook);

        let report_id = h.service.register_report(sales_report()).await.unwrap();
        let schedule_id = h
            .service
            .schedule_report(&report_id, ScheduleDefinition::daily("09:00"), ScheduleOptions::default())
            .await
            .unwrap();
        let subscription = h
            .service
            .create_subscription(NewSubscription::new(
                "Hook",
                &report_id,
                "u1",
                ScheduleDefinition::daily("08:00"),
                DeliveryConfig::Webhook {
                    url: "https://hooks.example/sales".into(),
                    headers: BTreeMap::new(),
                },
            ))
            .await
            .unwrap();
        h.service.deliver_now(&subscription.id).await.unwrap();
        (report_id, schedule_id, subscription.id)
    };

    let h = harness(
        open(&dir).await,
        Arc::new(GatedLoader::new(sample_tables())),
        utc(2024, 1, 1, 12, 0),
    );
    let summary = h.service.init().await.unwrap();
    assert_eq!((summary.reports, summary.schedules, summary.subscriptions), (1, 1, 1));

    let report = h.service.get_report(&report_id).await.unwrap().unwrap();
    assert_eq!(report.name, "Sales");

    let job = h.service.scheduler().get_job(&schedule_id).await.unwrap().unwrap();
    assert_eq!(job.next_run, Some(utc(2024, 1, 2, 9, 0)));
    assert_eq!(h.service.get_schedule_stats().await.unwrap().armed, 1);

    let subscription = h
        .service
        .subscriptions()
        .get_subscription(&subscription_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subscription.delivery_count, 1);
    let history = h
        .service
        .subscriptions()
        .get_delivery_history(&subscription_id, None)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);

    h.service.dispose().await;
}

#[tokio::test]
async fn test_interrupted_execution_is_failed_on_init() {
    let dir = TempDir::new().unwrap();

    let execution_id = {
        let loader = Arc::new(GatedLoader::new(sample_tables()).gated());
        let h = harness(open(&dir).await, loader.clone(), utc(2024, 1, 1, 10, 0));
        let report_id = h.service.register_report(sales_report()).await.unwrap();
        let id = h.service.execute_async(&report_id, &Parameters::new()).await.unwrap();
        loader.entered.notified().await;
        // Never released: the run is still in flight when the service goes away.
        id
    };

    let h = harness(
        open(&dir).await,
        Arc::new(GatedLoader::new(sample_tables())),
        utc(2024, 1, 1, 11, 0),
    );
    h.service.init().await.unwrap();

    let execution = h.service.get_execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error.as_deref(), Some("interrupted by restart"));
    assert_eq!(execution.completed_at, Some(utc(2024, 1, 1, 11, 0)));
}
