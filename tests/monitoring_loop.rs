//! Monitoring Loop Tests
//!
//! Drives the ingestion and alert jobs end to end against the in-memory
//! series store and a recording notifier, with an injected clock.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tempfile::tempdir;

use fermwatch::config::StaticSettings;
use fermwatch::ingest::WatermarkSource;
use fermwatch::jobs::{AlertJob, IngestionJob, MonitorState};
use fermwatch::notify::RecordingNotifier;
use fermwatch::store::{RangeQuery, WritePoint};
use fermwatch::{
    AlertPolicy, AnomalyStatus, BatchSettings, CheckName, CheckStatus, Ingestor, Job, MemoryStore,
    MonitorConfig, SeriesStore, WatermarkStore,
};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 14, 6, 0, 0).unwrap()
}

/// Raw gateway samples every 10 minutes over `[start, start + hours]`.
async fn seed_raw(store: &MemoryStore, hours: i64, gravity: impl Fn(i64) -> f64) {
    let points = (0..=hours * 6)
        .map(|i| {
            WritePoint::new("sensor_data", start() + Duration::minutes(i * 10))
                .tag("Color", "BLACK")
                .field("SG", gravity(i))
                .field("Temp", 68.0)
        })
        .collect();
    store.write(points).await.unwrap();
}

/// Settings with alerts allowed around the clock.
fn settings() -> StaticSettings {
    StaticSettings::default()
        .with("batch_name", "Oktoberfest")
        .with("alert_start_time", "00:00")
        .with("alert_end_time", "00:00")
}

async fn calibrated_count(store: &MemoryStore, now: DateTime<Utc>) -> usize {
    let q = RangeQuery::new("calibrated_readings", Duration::days(30), now).field("sg");
    store.query(&q).await.unwrap().iter().map(|t| t.records.len()).sum()
}

#[tokio::test]
async fn stalled_batch_alerts_once_per_cooldown() {
    let store = Arc::new(MemoryStore::new());
    seed_raw(&store, 24, |_| 1.040).await;
    let now = start() + Duration::hours(24);

    let cfg = MonitorConfig::default();
    let state = Arc::new(MonitorState::default());
    let notifier = Arc::new(RecordingNotifier::new());
    let provider = Arc::new(settings());

    let ingest = IngestionJob::new(Ingestor::new(store.clone(), &cfg, None), provider.clone(), state.clone());
    ingest.run(now).await.unwrap();
    assert_eq!(calibrated_count(&store, now).await, 24 * 6 + 1);

    let alerts = AlertJob::new(
        &cfg,
        AlertPolicy::from_config(&cfg.alerts, notifier.clone()),
        store.clone(),
        provider,
        state.clone(),
    );
    alerts.run(now).await.unwrap();

    let report = state.report.load_full().unwrap();
    let stall = report.check(CheckName::Stall).unwrap();
    assert_eq!(stall.status, CheckStatus::Stalled);
    assert!(stall.alert_sent);
    assert_eq!(report.check(CheckName::SignalLoss).unwrap().status, CheckStatus::Normal);
    assert_eq!(report.check(CheckName::Runaway).unwrap().status, CheckStatus::Normal);
    assert_eq!(report.anomaly_status, AnomalyStatus::Critical);

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].0.contains("Oktoberfest"));

    // five minutes later the condition persists, the cooldown holds
    alerts.run(now + Duration::minutes(5)).await.unwrap();
    assert_eq!(notifier.sent().len(), 1);
    let report = state.report.load_full().unwrap();
    assert_eq!(report.check(CheckName::Stall).unwrap().status, CheckStatus::Stalled);
    assert!(!report.check(CheckName::Stall).unwrap().alert_sent);
}

#[tokio::test]
async fn unreachable_store_yields_error_results_not_a_failed_job() {
    let store = Arc::new(MemoryStore::new());
    let cfg = MonitorConfig::default();
    let state = Arc::new(MonitorState::default());
    let notifier = Arc::new(RecordingNotifier::new());
    let alerts = AlertJob::new(
        &cfg,
        AlertPolicy::from_config(&cfg.alerts, notifier.clone()),
        store.clone(),
        Arc::new(settings()),
        state.clone(),
    );

    store.set_unavailable(true);
    alerts.run(start()).await.unwrap();

    let report = state.report.load_full().unwrap();
    assert_eq!(report.checks.len(), 5);
    assert!(report.checks.values().all(|c| c.status == CheckStatus::Error));
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn watermark_survives_restart() {
    let dir = tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    seed_raw(&store, 2, |i| 1.050 - 0.0002 * i as f64).await;
    let now = start() + Duration::hours(2);
    let cfg = MonitorConfig::default();
    let batch = BatchSettings::default();

    {
        let persistence = WatermarkStore::open(dir.path().join("state.db")).unwrap();
        let mut ingestor = Ingestor::new(store.clone(), &cfg, Some(persistence));
        assert_eq!(ingestor.restore(now).await.unwrap(), WatermarkSource::Unset);
        let report = ingestor.run_cycle(&batch, now).await.unwrap();
        assert_eq!(report.written, 13);
    }

    let persistence = WatermarkStore::open(dir.path().join("state.db")).unwrap();
    let mut ingestor = Ingestor::new(store.clone(), &cfg, Some(persistence));
    assert_eq!(ingestor.restore(now).await.unwrap(), WatermarkSource::Persisted);
    assert_eq!(ingestor.watermark().get(), Some(now));
    assert_eq!(ingestor.run_cycle(&batch, now).await.unwrap().written, 0);
    assert_eq!(calibrated_count(&store, now).await, 13);
}

#[tokio::test]
async fn watermark_never_moves_backwards_across_cycles() {
    let store = Arc::new(MemoryStore::new());
    let cfg = MonitorConfig::default();
    let batch = BatchSettings::default();
    let mut ingestor = Ingestor::new(store.clone(), &cfg, None);

    let mut last = None;
    for hour in 1..=6 {
        seed_raw(&store, hour, |i| 1.060 - 0.0005 * i as f64).await;
        let now = start() + Duration::hours(hour);
        let report = ingestor.run_cycle(&batch, now).await.unwrap();
        assert!(report.watermark >= last);
        last = report.watermark;
    }
    assert_eq!(calibrated_count(&store, start() + Duration::hours(6)).await, 6 * 6 + 1);
}

#[tokio::test]
async fn test_mode_simulates_and_skips_alerts() {
    let store = Arc::new(MemoryStore::new());
    let cfg = MonitorConfig::default();
    let state = Arc::new(MonitorState::default());
    let notifier = Arc::new(RecordingNotifier::new());
    let provider = Arc::new(settings().with("test_mode", "true"));

    let ingest = IngestionJob::new(Ingestor::new(store.clone(), &cfg, None), provider.clone(), state.clone());
    let alerts = AlertJob::new(
        &cfg,
        AlertPolicy::from_config(&cfg.alerts, notifier.clone()),
        store.clone(),
        provider,
        state.clone(),
    );

    for minute in 0..3 {
        let now = start() + Duration::minutes(minute);
        ingest.run(now).await.unwrap();
        alerts.run(now).await.unwrap();
    }

    let q = RangeQuery::new("test_readings", Duration::hours(1), start() + Duration::minutes(3)).field("sg");
    let readings: usize = store.query(&q).await.unwrap().iter().map(|t| t.records.len()).sum();
    assert_eq!(readings, 3);
    assert!(state.settings.load().test_mode);
    assert!(state.report.load_full().is_none());
    assert!(notifier.sent().is_empty());
}
