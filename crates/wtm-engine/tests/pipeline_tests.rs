//! End-to-end pipeline scenarios through the assembled engine

use std::sync::Arc;
use std::time::Duration;
use wtm_common::{ApDescriptor, ClientDescriptor, Config, DisconnectReason, RoamGrade, RoamTrigger};
use wtm_engine::{Engine, MemoryStore, StaticIdentityProvider};

const MAC: &str = "aa:bb:cc:dd:ee:01";

fn ap(ssid: &str) -> ApDescriptor {
    ApDescriptor {
        ssid: ssid.to_string(),
        bssid: "00:11:22:33:44:55".to_string(),
        channel: 36,
        band: "5g".to_string(),
        max_clients: 30,
    }
}

fn client(mac: &str, rssi: i32) -> ClientDescriptor {
    ClientDescriptor {
        mac_address: mac.to_string(),
        rssi: Some(rssi),
        ..ClientDescriptor::default()
    }
}

async fn engine_with(config: Config) -> Arc<Engine> {
    Engine::new(
        config,
        Arc::new(StaticIdentityProvider::default()),
        Some(Arc::new(MemoryStore::default())),
    )
    .await
    .unwrap()
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

#[tokio::test]
async fn normal_roam_closes_session_and_confirms_event() {
    let engine = engine_with(Config::default()).await;
    engine.start().await.unwrap();

    let t0 = now_ms();
    engine
        .process_wifi_clients("ap-1", "wlan0", &ap("corp"), &[client(MAC, -75)], t0)
        .await
        .unwrap();
    engine
        .process_wifi_clients("ap-2", "wlan0", &ap("corp"), &[client(MAC, -55)], t0 + 800)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    // Session on the old AP closed with reason roamed, new one open.
    let history = engine.tracker().client_history(MAC).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].device_id, "ap-1");
    assert_eq!(history[0].disconnect_reason, Some(DisconnectReason::Roamed));
    assert!(engine.tracker().active_session(MAC, "ap-2").await.is_some());

    // Exactly one confirmed roaming event, well classified.
    let events = engine.roaming_detector().roaming_events(MAC).await;
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.trigger, RoamTrigger::BetterSignal);
    assert_eq!(event.grade, RoamGrade::Excellent);
    assert!(event.confidence >= 0.7, "confidence {}", event.confidence);
    assert!(!event.anomalous);

    // No anomaly cases from a single clean roam.
    assert!(engine.anomaly().active_cases().await.is_empty());

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn ping_pong_produces_no_events_but_an_anomaly_case() {
    let mut config = Config::default();
    config.roaming.min_roaming_gap_ms = 2_000;
    config.anomaly.min_samples_for_baseline = 3;
    let engine = engine_with(config).await;
    engine.start().await.unwrap();

    let t0 = now_ms();
    for (device, rssi, offset) in [
        ("ap-1", -70, 0u64),
        ("ap-2", -68, 500),
        ("ap-1", -70, 1_000),
        ("ap-2", -68, 1_500),
    ] {
        engine
            .process_wifi_clients(device, "wlan0", &ap("corp"), &[client(MAC, rssi)], t0 + offset)
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    // All oscillating transitions were rejected by inference.
    assert_eq!(engine.roaming_detector().stats().await.events_classified, 0);
    let (evaluated, confirmed, _, _) = engine.inference().counters();
    assert_eq!(evaluated, 3);
    assert_eq!(confirmed, 0);

    // The raw transition history still shows the oscillation and the
    // anomaly detector turns it into a ping-pong case.
    engine.anomaly().run_detection_once().await;
    let cases = engine.anomaly().active_cases().await;
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0].anomaly_type, wtm_common::AnomalyType::PingPong);
    assert!(cases[0].occurrence_count >= 1);

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn degrading_snapshots_raise_quality_alert() {
    let engine = engine_with(Config::default()).await;

    let quality = engine.quality();
    quality.monitor_connection("ap-1", MAC).await;
    for overall in [0.9, 0.85, 0.8, 0.75, 0.7] {
        quality
            .record_snapshot(
                "ap-1",
                MAC,
                wtm_quality::QualitySnapshot {
                    timestamp: chrono::Utc::now(),
                    overall,
                    signal: overall,
                    throughput: 0.0,
                    latency: 0.0,
                    stability: overall,
                },
            )
            .await
            .unwrap();
    }
    quality.run_trend_analysis_once().await;

    let metrics = quality.connection_metrics("ap-1", MAC).await.unwrap();
    let trend = metrics.trend.unwrap();
    assert_eq!(trend.direction, wtm_quality::TrendDirection::Degrading);
    assert!((trend.slope + 0.05).abs() < 1e-9);
    assert!(trend.confidence > 0.9);

    let alerts = engine.alerts().active_alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, wtm_common::AlertType::QualityDegraded);
    assert!(alerts[0].severity >= wtm_common::Severity::Warning);
}

#[tokio::test]
async fn lifecycle_rejects_double_start_and_stop() {
    let engine = engine_with(Config::default()).await;
    engine.start().await.unwrap();
    assert!(engine.is_running());
    assert!(engine.start().await.is_err());

    engine.stop().await.unwrap();
    assert!(!engine.is_running());
    assert!(engine.stop().await.is_err());

    // A stopped engine can start again.
    engine.start().await.unwrap();
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn ingest_feeds_topology_graph() {
    let engine = engine_with(Config::default()).await;
    engine.start().await.unwrap();

    let t0 = now_ms();
    engine
        .process_wifi_clients(
            "ap-1",
            "wlan0",
            &ap("corp"),
            &[client(MAC, -60), client("aa:bb:cc:dd:ee:02", -65)],
            t0,
        )
        .await
        .unwrap();

    // ConnectionAdded events flow through the bus into the rebuild
    // handler.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let graph = engine.topology_graph().await;
    assert!(graph.node_count() >= 3, "nodes: {}", graph.node_count());
    assert!(graph.edge_count() >= 2);
    let (path, _) = graph.shortest_path(MAC, "aa:bb:cc:dd:ee:02").unwrap();
    assert_eq!(path.len(), 3, "clients connect through their AP");

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn malformed_descriptors_never_fail_the_batch() {
    let engine = engine_with(Config::default()).await;
    let t0 = now_ms();
    let batch = [
        client("not-a-mac", -60),
        client(MAC, -60),
        ClientDescriptor {
            mac_address: "aa:bb:cc:dd:ee:03".to_string(),
            ..ClientDescriptor::default()
        },
    ];
    let summary = engine
        .process_wifi_clients("ap-1", "wlan0", &ap("corp"), &batch, t0)
        .await
        .unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 2);
    assert_eq!(engine.stats().await.collector.processing_errors, 2);
}

#[tokio::test]
async fn bounded_histories_hold_under_sustained_ingest() {
    let mut config = Config::default();
    config.collector.max_signal_samples = 10;
    config.sessions.max_sessions_per_client = 5;
    let engine = engine_with(config).await;
    engine.start().await.unwrap();

    let t0 = now_ms();
    for i in 0..50u64 {
        // Alternate APs to churn sessions while accumulating samples.
        let device = if (i / 5) % 2 == 0 { "ap-1" } else { "ap-2" };
        engine
            .process_wifi_clients(device, "wlan0", &ap("corp"), &[client(MAC, -60)], t0 + i * 10_000)
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(engine.collector().signal_history(MAC).await.len() <= 10);
    assert!(engine.tracker().client_history(MAC).await.len() <= 5);

    engine.stop().await.unwrap();
}
