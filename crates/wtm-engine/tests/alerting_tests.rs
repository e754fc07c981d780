//! Alert dedup, escalation and suppression scenarios

use chrono::{Duration, Utc};
use std::sync::Arc;
use wtm_alerting::{AlertManager, AlertSuppression, EscalationChain, EscalationStep, NotificationChannel};
use wtm_common::{AlertRequest, AlertType, AlertingConfig, Error, Severity};

const MAC: &str = "aa:bb:cc:dd:ee:01";

fn quality_request() -> AlertRequest {
    AlertRequest::new(
        AlertType::QualityDegraded,
        Severity::Warning,
        "ap-1",
        MAC,
        "quality degrading",
        "trend slope negative",
    )
}

#[tokio::test]
async fn ten_identical_creates_merge_into_one_alert() {
    let manager = AlertManager::new(AlertingConfig::default());

    let first = manager.create_alert(quality_request()).await.unwrap();
    for _ in 0..9 {
        let merged = manager.create_alert(quality_request()).await.unwrap();
        assert_eq!(merged.id, first.id);
    }

    let active = manager.active_alerts().await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].frequency, 10);

    // One fanout executed: a single notification record for the
    // original creation, none for the merges.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let alert = manager.alert(&first.id).await.unwrap();
    assert_eq!(alert.notifications.len(), 1);

    let stats = manager.stats().await;
    assert_eq!(stats.total_alerts, 1);
    assert_eq!(stats.merged_duplicates, 9);
    assert_eq!(
        stats.active_alerts as u64 + stats.resolved_alerts + stats.closed_alerts,
        stats.total_alerts - stats.suppressed_alerts
    );
}

#[tokio::test]
async fn two_step_escalation_walks_to_completion() {
    let manager = AlertManager::new(AlertingConfig::default());
    manager
        .set_escalation_chain(
            Severity::Critical,
            EscalationChain::new(vec![
                EscalationStep {
                    delay_secs: 0,
                    targets: vec![NotificationChannel::Log],
                    actions: vec![],
                },
                EscalationStep {
                    delay_secs: 0,
                    targets: vec![NotificationChannel::Log],
                    actions: vec![],
                },
            ]),
        )
        .await;

    let alert = manager
        .create_alert(AlertRequest::new(
            AlertType::DeviceOffline,
            Severity::Critical,
            "ap-1",
            MAC,
            "AP unreachable",
            "no telemetry for five minutes",
        ))
        .await
        .unwrap();

    // Step one.
    manager.run_escalation_check_once().await;
    let after_first = manager.alert(&alert.id).await.unwrap();
    assert_eq!(after_first.escalation_level, 1);
    assert!(after_first.escalated);

    // Step two completes the chain.
    manager.run_escalation_check_once().await;
    let after_second = manager.alert(&alert.id).await.unwrap();
    assert_eq!(after_second.escalation_level, 2);
    let escalation = manager.escalation(&alert.id).await.unwrap();
    assert!(escalation.completed);

    let stats = manager.stats().await;
    assert_eq!(stats.escalated_alerts, 1);
    // Both steps delivered their notifications.
    assert!(stats.notifications_sent >= 2);
}

#[tokio::test]
async fn acknowledged_but_unresolved_alert_still_escalates() {
    let manager = AlertManager::new(AlertingConfig::default());
    manager
        .set_escalation_chain(
            Severity::Critical,
            EscalationChain::new(vec![EscalationStep {
                delay_secs: 0,
                targets: vec![NotificationChannel::Log],
                actions: vec![],
            }]),
        )
        .await;

    let alert = manager
        .create_alert(AlertRequest::new(
            AlertType::DeviceOffline,
            Severity::Critical,
            "ap-1",
            MAC,
            "AP unreachable",
            "no telemetry",
        ))
        .await
        .unwrap();
    manager.acknowledge_alert(&alert.id, "operator").await.unwrap();

    manager.run_escalation_check_once().await;
    let escalated = manager.alert(&alert.id).await.unwrap();
    assert_eq!(escalated.escalation_level, 1);
}

#[tokio::test]
async fn suppression_blocks_creation_for_the_hour() {
    let manager = AlertManager::new(AlertingConfig::default());
    let now = Utc::now();
    manager
        .add_suppression(
            AlertSuppression::new(
                "planned maintenance",
                [AlertType::QualityDegraded],
                now,
                now + Duration::hours(1),
            )
            .for_mac(MAC),
        )
        .await;

    let err = manager.create_alert(quality_request()).await.unwrap_err();
    assert!(matches!(err, Error::Suppressed(_)));

    let stats = manager.stats().await;
    assert_eq!(stats.suppressed_alerts, 1);
    assert_eq!(stats.active_alerts, 0);
    assert_eq!(
        stats.active_alerts as u64 + stats.resolved_alerts + stats.closed_alerts,
        stats.total_alerts - stats.suppressed_alerts
    );

    // A different type for the same client is not suppressed.
    let other = AlertRequest::new(
        AlertType::WeakSignal,
        Severity::Warning,
        "ap-1",
        MAC,
        "weak signal",
        "rssi low",
    );
    assert!(manager.create_alert(other).await.is_ok());
}

#[tokio::test]
async fn removed_suppression_lets_alerts_through_again() {
    let manager = AlertManager::new(AlertingConfig::default());
    let now = Utc::now();
    let suppression_id = manager
        .add_suppression(AlertSuppression::new(
            "quiet",
            [AlertType::QualityDegraded],
            now,
            now + Duration::hours(1),
        ))
        .await;

    assert!(manager.create_alert(quality_request()).await.is_err());
    manager.remove_suppression(&suppression_id).await.unwrap();
    assert!(manager.create_alert(quality_request()).await.is_ok());
}

#[tokio::test]
async fn dedup_key_includes_device_and_mac() {
    let manager = AlertManager::new(AlertingConfig::default());
    manager.create_alert(quality_request()).await.unwrap();

    // Same type, different client: a separate alert.
    let other_client = AlertRequest::new(
        AlertType::QualityDegraded,
        Severity::Warning,
        "ap-1",
        "aa:bb:cc:dd:ee:02",
        "quality degrading",
        "trend slope negative",
    );
    manager.create_alert(other_client).await.unwrap();

    // Same type and client, different device: also separate.
    let other_device = AlertRequest::new(
        AlertType::QualityDegraded,
        Severity::Warning,
        "ap-2",
        MAC,
        "quality degrading",
        "trend slope negative",
    );
    manager.create_alert(other_device).await.unwrap();

    assert_eq!(manager.active_alerts().await.len(), 3);
    assert_eq!(manager.stats().await.total_alerts, 3);
}
