//! Alert manager component

use crate::alert::{Alert, AlertStatus};
use crate::escalation::{AlertEscalation, EscalationChain};
use crate::notify::{
    EmailTransport, LogTransport, NotificationChannel, NotificationRecord, NotificationStatus,
    NotificationTransport, SlackTransport, WebhookTransport,
};
use crate::rules::{AlertRule, EvaluationContext, RuleAction, RuleContextProvider};
use crate::suppression::AlertSuppression;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};
use wtm_common::{
    AlertRequest, AlertType, AlertingConfig, BlobStore, Error, EventPriority, EventType, Mac,
    NetworkEvent, Result, Severity,
};

const STORE_NAMESPACE: &str = "alerts";

/// Manager counters exposed through stats
///
/// Conservation law: `active + resolved + closed == total - suppressed`.
#[derive(Debug, Clone, Default)]
pub struct AlertStats {
    pub total_alerts: u64,
    pub active_alerts: usize,
    pub resolved_alerts: u64,
    pub closed_alerts: u64,
    pub suppressed_alerts: u64,
    pub escalated_alerts: u64,
    pub merged_duplicates: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub rules_fired: u64,
}

#[derive(Default)]
struct ManagerState {
    active: HashMap<String, Alert>,
    history: VecDeque<Alert>,
    suppressions: Vec<AlertSuppression>,
    escalations: HashMap<String, AlertEscalation>,
    rules: Vec<AlertRule>,
    default_chains: HashMap<Severity, EscalationChain>,
    previous_metrics: HashMap<String, f64>,
}

/// Alerting system component
pub struct AlertManager {
    config: AlertingConfig,
    state: Arc<RwLock<ManagerState>>,
    transports: Arc<RwLock<HashMap<&'static str, Arc<dyn NotificationTransport>>>>,
    channels: RwLock<Vec<NotificationChannel>>,
    rule_context: RwLock<Option<Arc<dyn RuleContextProvider>>>,
    event_tx: RwLock<Option<mpsc::Sender<NetworkEvent>>>,
    store: RwLock<Option<Arc<dyn BlobStore>>>,
    total_alerts: AtomicU64,
    resolved_alerts: AtomicU64,
    closed_alerts: AtomicU64,
    suppressed_alerts: AtomicU64,
    escalated_alerts: AtomicU64,
    merged_duplicates: AtomicU64,
    notifications_sent: Arc<AtomicU64>,
    notifications_failed: Arc<AtomicU64>,
    rules_fired: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl AlertManager {
    pub fn new(config: AlertingConfig) -> Arc<Self> {
        let timeout = std::time::Duration::from_secs(config.notification_timeout_secs);
        let mut transports: HashMap<&'static str, Arc<dyn NotificationTransport>> = HashMap::new();
        transports.insert("log", Arc::new(LogTransport));
        transports.insert("email", Arc::new(EmailTransport));
        if let Ok(webhook) = WebhookTransport::new(timeout) {
            transports.insert("webhook", Arc::new(webhook));
        }
        if let Ok(slack) = SlackTransport::new(timeout) {
            transports.insert("slack", Arc::new(slack));
        }

        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(AlertManager {
            config,
            state: Arc::new(RwLock::new(ManagerState::default())),
            transports: Arc::new(RwLock::new(transports)),
            channels: RwLock::new(vec![NotificationChannel::Log]),
            rule_context: RwLock::new(None),
            event_tx: RwLock::new(None),
            store: RwLock::new(None),
            total_alerts: AtomicU64::new(0),
            resolved_alerts: AtomicU64::new(0),
            closed_alerts: AtomicU64::new(0),
            suppressed_alerts: AtomicU64::new(0),
            escalated_alerts: AtomicU64::new(0),
            merged_duplicates: AtomicU64::new(0),
            notifications_sent: Arc::new(AtomicU64::new(0)),
            notifications_failed: Arc::new(AtomicU64::new(0)),
            rules_fired: AtomicU64::new(0),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Replace or add a notification transport
    pub async fn register_transport(&self, transport: Arc<dyn NotificationTransport>) {
        self.transports.write().await.insert(transport.kind(), transport);
    }

    /// Set the notification channels fanned out to
    pub async fn set_channels(&self, channels: Vec<NotificationChannel>) {
        *self.channels.write().await = channels;
    }

    /// Attach the rule evaluation context provider
    pub async fn set_rule_context(&self, provider: Arc<dyn RuleContextProvider>) {
        *self.rule_context.write().await = Some(provider);
    }

    /// Attach a sender for alert events
    pub async fn set_event_sender(&self, tx: mpsc::Sender<NetworkEvent>) {
        *self.event_tx.write().await = Some(tx);
    }

    /// Attach a blob store for best-effort alert persistence
    pub async fn set_store(&self, store: Arc<dyn BlobStore>) {
        *self.store.write().await = Some(store);
    }

    /// Register a default escalation chain for a severity
    pub async fn set_escalation_chain(&self, severity: Severity, chain: EscalationChain) {
        self.state.write().await.default_chains.insert(severity, chain);
    }

    /// Launch the escalation, notification-retry and rule loops
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return Err(Error::Lifecycle("alert manager already running".to_string()));
        }
        info!("Starting alert manager");

        {
            let manager = self.clone();
            let mut shutdown = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                let mut ticker = interval(std::time::Duration::from_secs(
                    manager.config.escalation_check_interval_secs,
                ));
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        _ = ticker.tick() => manager.run_escalation_check_once().await,
                    }
                }
            }));
        }
        {
            let manager = self.clone();
            let mut shutdown = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                let mut ticker = interval(std::time::Duration::from_secs(
                    manager.config.notification_retry_interval_secs,
                ));
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        _ = ticker.tick() => manager.run_notification_retry_once().await,
                    }
                }
            }));
        }
        {
            let manager = self.clone();
            let mut shutdown = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                let mut ticker = interval(std::time::Duration::from_secs(
                    manager.config.alert_processing_interval_secs,
                ));
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        _ = ticker.tick() => manager.run_rule_evaluation_once().await,
                    }
                }
            }));
        }
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let mut handles = self.handles.lock().await;
        if handles.is_empty() {
            return Err(Error::Lifecycle("alert manager not running".to_string()));
        }
        let _ = self.shutdown_tx.send(true);
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        let _ = self.shutdown_tx.send(false);
        info!("Alert manager stopped");
        Ok(())
    }

    /// Create an alert, subject to suppression and dedup merge
    pub async fn create_alert(&self, request: AlertRequest) -> Result<Alert> {
        self.create_alert_with_chain(request, None).await
    }

    async fn create_alert_with_chain(
        &self,
        request: AlertRequest,
        chain_override: Option<EscalationChain>,
    ) -> Result<Alert> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        // Suppression check precedes everything else.
        let suppressed = state
            .suppressions
            .iter()
            .any(|s| s.matches(request.alert_type, &request.device_id, &request.mac, now));
        if suppressed {
            self.total_alerts.fetch_add(1, Ordering::Relaxed);
            self.suppressed_alerts.fetch_add(1, Ordering::Relaxed);
            debug!(
                alert_type = request.alert_type.as_str(),
                mac = %request.mac,
                "Alert suppressed"
            );
            return Err(Error::Suppressed(format!(
                "{} for {} is under suppression",
                request.alert_type.as_str(),
                request.mac
            )));
        }

        // Dedup: merge into a recent active alert with the same key.
        let duplicate_window = Duration::seconds(self.config.duplicate_window_secs as i64);
        let existing = state.active.values_mut().find(|a| {
            a.alert_type == request.alert_type
                && a.device_id == request.device_id
                && a.mac == request.mac
                && a.status.is_active()
                && now - a.last_occurrence < duplicate_window
        });
        if let Some(alert) = existing {
            alert.merge_occurrence(now);
            self.merged_duplicates.fetch_add(1, Ordering::Relaxed);
            let merged = alert.clone();
            drop(state);
            self.persist_alert(&merged).await;
            return Ok(merged);
        }

        if state.active.len() >= self.config.max_active_alerts {
            return Err(Error::ResourceExhausted(format!(
                "active alert cap of {} reached",
                self.config.max_active_alerts
            )));
        }

        let alert = Alert::new(
            request.alert_type,
            request.severity,
            &request.device_id,
            &request.mac,
            &request.title,
            &request.description,
            request.context,
            now,
        );
        self.total_alerts.fetch_add(1, Ordering::Relaxed);

        // Escalation chain: explicit override first, then the default
        // chain registered for this severity.
        if self.config.enable_escalation {
            let chain = chain_override.or_else(|| state.default_chains.get(&alert.severity).cloned());
            if let Some(chain) = chain {
                if let Some(escalation) = AlertEscalation::for_alert(&alert.id, chain, now) {
                    state.escalations.insert(alert.id.clone(), escalation);
                }
            }
        }

        state.active.insert(alert.id.clone(), alert.clone());
        drop(state);

        info!(
            alert_id = %alert.id,
            alert_type = alert.alert_type.as_str(),
            severity = alert.severity.as_str(),
            "Alert created"
        );
        self.dispatch_notifications(&alert).await;
        self.emit_alert_event(&alert).await;
        self.persist_alert(&alert).await;
        Ok(alert)
    }

    /// Pick fanout channels by severity: critical reaches mail and
    /// chat, error reaches mail, warning reaches chat
    async fn fanout_channels(&self, severity: Severity) -> Vec<NotificationChannel> {
        let configured = self.channels.read().await;
        let mut selected: Vec<NotificationChannel> = configured
            .iter()
            .filter(|c| matches!(c, NotificationChannel::Log))
            .cloned()
            .collect();
        for channel in configured.iter() {
            let include = match severity {
                Severity::Critical => channel.is_mail() || channel.is_chat(),
                Severity::Error => channel.is_mail(),
                Severity::Warning => channel.is_chat(),
                Severity::Info => false,
            };
            if include {
                selected.push(channel.clone());
            }
        }
        selected
    }

    /// Fan an alert out to its channels on a background task
    async fn dispatch_notifications(&self, alert: &Alert) {
        let channels = self.fanout_channels(alert.severity).await;
        if channels.is_empty() {
            return;
        }

        let now = Utc::now();
        let records: Vec<NotificationRecord> = channels
            .iter()
            .map(|c| NotificationRecord::new(&alert.id, c.clone(), now))
            .collect();
        {
            let mut state = self.state.write().await;
            if let Some(stored) = state.active.get_mut(&alert.id) {
                stored.notifications.extend(records.clone());
            }
        }

        let manager_state = self.state.clone();
        let transports = self.transports.clone();
        let sent_counter = self.notifications_sent.clone();
        let failed_counter = self.notifications_failed.clone();
        let alert = alert.clone();
        tokio::spawn(async move {
            for record in records {
                let transport = {
                    let registry = transports.read().await;
                    registry.get(record.channel.transport_kind()).cloned()
                };
                let outcome = match transport {
                    Some(transport) => transport.send(&record.channel, &alert).await,
                    None => Err(Error::Transport(format!(
                        "no transport registered for {}",
                        record.channel.transport_kind()
                    ))),
                };

                let now = Utc::now();
                let mut state = manager_state.write().await;
                if let Some(stored) = state.active.get_mut(&alert.id) {
                    if let Some(stored_record) =
                        stored.notifications.iter_mut().find(|r| r.id == record.id)
                    {
                        match outcome {
                            Ok(()) => {
                                stored_record.mark_sent(now);
                                sent_counter.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                stored_record.mark_failed(&e.to_string(), now);
                                failed_counter.fetch_add(1, Ordering::Relaxed);
                                warn!("Notification delivery failed: {}", e);
                            }
                        }
                    }
                }
            }
        });
    }

    async fn emit_alert_event(&self, alert: &Alert) {
        if let Some(tx) = self.event_tx.read().await.as_ref() {
            let priority = match alert.severity {
                Severity::Critical => EventPriority::Critical,
                Severity::Error => EventPriority::High,
                Severity::Warning => EventPriority::Normal,
                Severity::Info => EventPriority::Low,
            };
            let event = NetworkEvent::new(EventType::AlertRaised, "alerting", &alert.device_id)
                .with_priority(priority)
                .with_reason(alert.alert_type.as_str())
                .with_metadata("alert_id", serde_json::Value::String(alert.id.clone()))
                .with_metadata("mac", serde_json::Value::String(alert.mac.clone()));
            let _ = tx.try_send(event);
        }
    }

    /// Acknowledge an open alert
    pub async fn acknowledge_alert(&self, alert_id: &str, actor: &str) -> Result<Alert> {
        let mut state = self.state.write().await;
        let alert = state
            .active
            .get_mut(alert_id)
            .ok_or_else(|| Error::NotFound(format!("alert {alert_id}")))?;
        if alert.status != AlertStatus::Open {
            return Err(Error::Alert(format!(
                "alert {alert_id} cannot be acknowledged from {:?}",
                alert.status
            )));
        }
        alert.status = AlertStatus::Acknowledged;
        alert.acknowledged_by = Some(actor.to_string());
        alert.acknowledged_at = Some(Utc::now());
        Ok(alert.clone())
    }

    /// Move an acknowledged alert into in-progress
    pub async fn start_progress(&self, alert_id: &str) -> Result<Alert> {
        let mut state = self.state.write().await;
        let alert = state
            .active
            .get_mut(alert_id)
            .ok_or_else(|| Error::NotFound(format!("alert {alert_id}")))?;
        if alert.status != AlertStatus::Acknowledged {
            return Err(Error::Alert(format!(
                "alert {alert_id} cannot start progress from {:?}",
                alert.status
            )));
        }
        alert.status = AlertStatus::InProgress;
        Ok(alert.clone())
    }

    /// Resolve an active alert, halting its escalation
    pub async fn resolve_alert(&self, alert_id: &str) -> Result<Alert> {
        let resolved = {
            let mut state = self.state.write().await;
            let mut alert = state
                .active
                .remove(alert_id)
                .ok_or_else(|| Error::NotFound(format!("alert {alert_id}")))?;
            alert.status = AlertStatus::Resolved;
            alert.resolved_at = Some(Utc::now());
            if let Some(escalation) = state.escalations.get_mut(alert_id) {
                escalation.mark_resolved();
            }
            Self::push_history(&mut state, alert.clone(), self.config.max_history);
            alert
        };
        self.resolved_alerts.fetch_add(1, Ordering::Relaxed);
        self.persist_alert(&resolved).await;
        Ok(resolved)
    }

    /// Close a resolved alert
    pub async fn close_alert(&self, alert_id: &str) -> Result<Alert> {
        let mut state = self.state.write().await;
        let alert = state
            .history
            .iter_mut()
            .find(|a| a.id == alert_id)
            .ok_or_else(|| Error::NotFound(format!("resolved alert {alert_id}")))?;
        if alert.status != AlertStatus::Resolved {
            return Err(Error::Alert(format!(
                "alert {alert_id} cannot close from {:?}",
                alert.status
            )));
        }
        alert.status = AlertStatus::Closed;
        self.resolved_alerts.fetch_sub(1, Ordering::Relaxed);
        self.closed_alerts.fetch_add(1, Ordering::Relaxed);
        Ok(alert.clone())
    }

    fn push_history(state: &mut ManagerState, alert: Alert, cap: usize) {
        if state.history.len() >= cap {
            state.history.pop_front();
        }
        state.history.push_back(alert);
    }

    pub async fn add_suppression(&self, suppression: AlertSuppression) -> String {
        let id = suppression.id.clone();
        self.state.write().await.suppressions.push(suppression);
        id
    }

    pub async fn remove_suppression(&self, suppression_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let before = state.suppressions.len();
        state.suppressions.retain(|s| s.id != suppression_id);
        if state.suppressions.len() == before {
            return Err(Error::NotFound(format!("suppression {suppression_id}")));
        }
        Ok(())
    }

    pub async fn add_rule(&self, rule: AlertRule) -> String {
        let id = rule.id.clone();
        self.state.write().await.rules.push(rule);
        id
    }

    pub async fn remove_rule(&self, rule_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let before = state.rules.len();
        state.rules.retain(|r| r.id != rule_id);
        if state.rules.len() == before {
            return Err(Error::NotFound(format!("rule {rule_id}")));
        }
        Ok(())
    }

    /// One escalation advancement pass
    pub async fn run_escalation_check_once(&self) {
        let now = Utc::now();
        let due: Vec<(String, crate::escalation::EscalationStep)> = {
            let mut state = self.state.write().await;
            // Expired absolute suppressions leave with the same sweep.
            state.suppressions.retain(|s| !s.expired(now));

            let mut due = Vec::new();
            let mut first_escalations = 0u64;
            for escalation in state.escalations.values_mut() {
                if !escalation.due(now) {
                    continue;
                }
                if let Some(step) = escalation.pending_step().cloned() {
                    if escalation.level == 0 {
                        first_escalations += 1;
                    }
                    escalation.advance(now);
                    due.push((escalation.alert_id.clone(), step));
                }
            }
            for (alert_id, _) in &due {
                let level = state
                    .escalations
                    .get(alert_id)
                    .map(|e| e.level)
                    .unwrap_or_default();
                if let Some(alert) = state.active.get_mut(alert_id) {
                    alert.escalation_level = level;
                    alert.escalated = true;
                }
            }
            self.escalated_alerts.fetch_add(first_escalations, Ordering::Relaxed);
            due
        };

        for (alert_id, step) in due {
            let alert = self.state.read().await.active.get(&alert_id).cloned();
            let Some(alert) = alert else { continue };
            info!(
                alert_id = %alert_id,
                level = alert.escalation_level,
                "Escalating alert"
            );
            for channel in &step.targets {
                self.send_step_notification(&alert, channel).await;
            }
            for action in &step.actions {
                self.execute_action(action, &alert).await;
            }
        }
    }

    async fn send_step_notification(&self, alert: &Alert, channel: &NotificationChannel) {
        let transport = {
            let registry = self.transports.read().await;
            registry.get(channel.transport_kind()).cloned()
        };
        let now = Utc::now();
        let mut record = NotificationRecord::new(&alert.id, channel.clone(), now);
        match transport {
            Some(transport) => match transport.send(channel, alert).await {
                Ok(()) => {
                    record.mark_sent(now);
                    self.notifications_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    record.mark_failed(&e.to_string(), now);
                    self.notifications_failed.fetch_add(1, Ordering::Relaxed);
                }
            },
            None => {
                record.mark_failed("transport missing", now);
                self.notifications_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        let mut state = self.state.write().await;
        if let Some(stored) = state.active.get_mut(&alert.id) {
            stored.notifications.push(record);
        }
    }

    async fn execute_action(&self, action: &RuleAction, alert: &Alert) {
        match action {
            RuleAction::Notify { channels } => {
                for channel in channels {
                    self.send_step_notification(alert, channel).await;
                }
            }
            RuleAction::Escalate => {
                debug!(alert_id = %alert.id, "Escalate action is implicit in the chain");
            }
            RuleAction::LogEvent => {
                info!(alert_id = %alert.id, "Rule action: log event for {}", alert.title);
            }
            RuleAction::CreateTicket { queue } => {
                info!(alert_id = %alert.id, queue = %queue, "Rule action: ticket requested");
            }
            RuleAction::ExecuteScript { name } => {
                info!(alert_id = %alert.id, script = %name, "Rule action: script execution requested");
            }
        }
    }

    /// One retry pass over failed notification records
    pub async fn run_notification_retry_once(&self) {
        let now = Utc::now();
        let retry_age = Duration::seconds(self.config.notification_retry_interval_secs as i64);
        let retries: Vec<(String, NotificationRecord)> = {
            let mut state = self.state.write().await;
            let mut retries = Vec::new();
            for alert in state.active.values_mut() {
                for record in alert.notifications.iter_mut() {
                    let eligible = record.status == NotificationStatus::Failed
                        && record.attempts <= self.config.notification_retries
                        && matches!(record.last_attempt, Some(t) if now - t >= retry_age);
                    if eligible {
                        record.status = NotificationStatus::Retrying;
                        retries.push((alert.id.clone(), record.clone()));
                    }
                }
            }
            retries
        };

        for (alert_id, record) in retries {
            let alert = self.state.read().await.active.get(&alert_id).cloned();
            let Some(alert) = alert else { continue };
            let transport = {
                let registry = self.transports.read().await;
                registry.get(record.channel.transport_kind()).cloned()
            };
            let outcome = match transport {
                Some(transport) => transport.send(&record.channel, &alert).await,
                None => Err(Error::Transport("transport missing".to_string())),
            };

            let now = Utc::now();
            let mut state = self.state.write().await;
            if let Some(stored) = state.active.get_mut(&alert_id) {
                if let Some(stored_record) = stored.notifications.iter_mut().find(|r| r.id == record.id)
                {
                    match outcome {
                        Ok(()) => {
                            stored_record.mark_sent(now);
                            self.notifications_sent.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            stored_record.mark_failed(&e.to_string(), now);
                            self.notifications_failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }
        }
    }

    /// One rule evaluation pass
    pub async fn run_rule_evaluation_once(&self) {
        let provider = self.rule_context.read().await.clone();
        let Some(provider) = provider else { return };

        let timeout = std::time::Duration::from_secs(self.config.processing_timeout_secs);
        let context = match tokio::time::timeout(timeout, provider.evaluation_context()).await {
            Ok(context) => context,
            Err(_) => {
                warn!("Rule evaluation context timed out");
                return;
            }
        };

        let now = Utc::now();
        let fired: Vec<(AlertRequest, Option<EscalationChain>, Vec<RuleAction>)> = {
            let mut state = self.state.write().await;
            let previous = std::mem::take(&mut state.previous_metrics);
            let mut fired = Vec::new();
            for rule in state.rules.iter_mut() {
                if !rule.enabled {
                    continue;
                }
                if !rule.conditions_hold(&context, &previous) || !rule.may_fire(now) {
                    continue;
                }
                rule.record_fired(now);
                self.rules_fired.fetch_add(1, Ordering::Relaxed);
                debug!(rule = %rule.name, "Alert rule fired");
                let request = AlertRequest::new(
                    rule.alert_type,
                    rule.severity,
                    "system",
                    "",
                    &rule.name,
                    &format!("rule '{}' conditions held", rule.name),
                );
                fired.push((request, rule.escalation_chain.clone(), rule.actions.clone()));
            }
            state.previous_metrics = context.metrics.clone();
            fired
        };

        for (request, chain, actions) in fired {
            match self.create_alert_with_chain(request, chain).await {
                Ok(alert) => {
                    for action in &actions {
                        self.execute_action(action, &alert).await;
                    }
                }
                Err(Error::Suppressed(_)) => {}
                Err(e) => warn!("Rule-driven alert creation failed: {}", e),
            }
        }
    }

    /// Deep copy of one alert, active or historical
    pub async fn alert(&self, alert_id: &str) -> Option<Alert> {
        let state = self.state.read().await;
        state
            .active
            .get(alert_id)
            .cloned()
            .or_else(|| state.history.iter().find(|a| a.id == alert_id).cloned())
    }

    /// Deep copy of all active alerts
    pub async fn active_alerts(&self) -> Vec<Alert> {
        self.state.read().await.active.values().cloned().collect()
    }

    /// Active alerts for one client
    pub async fn alerts_for_mac(&self, mac: &Mac) -> Vec<Alert> {
        self.state
            .read()
            .await
            .active
            .values()
            .filter(|a| &a.mac == mac)
            .cloned()
            .collect()
    }

    /// Deep copy of resolved and closed alerts, oldest first
    pub async fn alert_history(&self) -> Vec<Alert> {
        self.state.read().await.history.iter().cloned().collect()
    }

    /// Current escalation state for an alert
    pub async fn escalation(&self, alert_id: &str) -> Option<AlertEscalation> {
        self.state.read().await.escalations.get(alert_id).cloned()
    }

    pub async fn stats(&self) -> AlertStats {
        AlertStats {
            total_alerts: self.total_alerts.load(Ordering::Relaxed),
            active_alerts: self.state.read().await.active.len(),
            resolved_alerts: self.resolved_alerts.load(Ordering::Relaxed),
            closed_alerts: self.closed_alerts.load(Ordering::Relaxed),
            suppressed_alerts: self.suppressed_alerts.load(Ordering::Relaxed),
            escalated_alerts: self.escalated_alerts.load(Ordering::Relaxed),
            merged_duplicates: self.merged_duplicates.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            rules_fired: self.rules_fired.load(Ordering::Relaxed),
        }
    }

    async fn persist_alert(&self, alert: &Alert) {
        let Some(store) = self.store.read().await.clone() else {
            return;
        };
        let key = alert.id.clone();
        match serde_json::to_vec(alert) {
            Ok(blob) => {
                tokio::spawn(async move {
                    if let Err(e) = store.put(STORE_NAMESPACE, &key, blob).await {
                        warn!("Best-effort alert persistence failed: {}", e);
                    }
                });
            }
            Err(e) => warn!("Alert serialization failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::EscalationStep;
    use wtm_common::AlertType;

    const MAC: &str = "aa:bb:cc:dd:ee:01";

    fn request() -> AlertRequest {
        AlertRequest::new(
            AlertType::QualityDegraded,
            Severity::Warning,
            "ap-1",
            MAC,
            "quality degrading",
            "slope negative",
        )
    }

    #[tokio::test]
    async fn duplicate_creates_merge_not_new_alert() {
        let manager = AlertManager::new(AlertingConfig::default());
        let first = manager.create_alert(request()).await.unwrap();
        for _ in 0..9 {
            manager.create_alert(request()).await.unwrap();
        }

        let active = manager.active_alerts().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, first.id);
        assert_eq!(active[0].frequency, 10);

        let stats = manager.stats().await;
        assert_eq!(stats.total_alerts, 1);
        assert_eq!(stats.merged_duplicates, 9);
    }

    #[tokio::test]
    async fn suppression_returns_error_and_counts() {
        let manager = AlertManager::new(AlertingConfig::default());
        let now = Utc::now();
        manager
            .add_suppression(
                AlertSuppression::new(
                    "maintenance",
                    [AlertType::QualityDegraded],
                    now - Duration::minutes(1),
                    now + Duration::hours(1),
                )
                .for_mac(MAC),
            )
            .await;

        let err = manager.create_alert(request()).await.unwrap_err();
        assert!(matches!(err, Error::Suppressed(_)));
        let stats = manager.stats().await;
        assert_eq!(stats.suppressed_alerts, 1);
        assert_eq!(stats.active_alerts, 0);
        // Conservation: active + resolved + closed == total - suppressed.
        assert_eq!(
            stats.active_alerts as u64 + stats.resolved_alerts + stats.closed_alerts,
            stats.total_alerts - stats.suppressed_alerts
        );
    }

    #[tokio::test]
    async fn lifecycle_walks_forward_only() {
        let manager = AlertManager::new(AlertingConfig::default());
        let alert = manager.create_alert(request()).await.unwrap();

        assert!(manager.start_progress(&alert.id).await.is_err());
        manager.acknowledge_alert(&alert.id, "operator").await.unwrap();
        manager.start_progress(&alert.id).await.unwrap();
        let resolved = manager.resolve_alert(&alert.id).await.unwrap();
        assert_eq!(resolved.status, AlertStatus::Resolved);

        let closed = manager.close_alert(&alert.id).await.unwrap();
        assert_eq!(closed.status, AlertStatus::Closed);

        let stats = manager.stats().await;
        assert_eq!(stats.active_alerts, 0);
        assert_eq!(stats.resolved_alerts, 0);
        assert_eq!(stats.closed_alerts, 1);
        assert_eq!(
            stats.active_alerts as u64 + stats.resolved_alerts + stats.closed_alerts,
            stats.total_alerts - stats.suppressed_alerts
        );
    }

    #[tokio::test]
    async fn resolved_alert_does_not_block_new_creation() {
        let manager = AlertManager::new(AlertingConfig::default());
        let first = manager.create_alert(request()).await.unwrap();
        manager.resolve_alert(&first.id).await.unwrap();

        let second = manager.create_alert(request()).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(manager.stats().await.total_alerts, 2);
    }

    #[tokio::test]
    async fn active_cap_returns_resource_exhausted() {
        let config = AlertingConfig {
            max_active_alerts: 1,
            ..AlertingConfig::default()
        };
        let manager = AlertManager::new(config);
        manager.create_alert(request()).await.unwrap();

        let other = AlertRequest::new(
            AlertType::WeakSignal,
            Severity::Warning,
            "ap-2",
            "aa:bb:cc:dd:ee:02",
            "weak",
            "weak",
        );
        let err = manager.create_alert(other).await.unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)));
    }

    #[tokio::test]
    async fn escalation_advances_due_steps() {
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
                        delay_secs: 3600,
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
                "ap down",
                "no heartbeat",
            ))
            .await
            .unwrap();

        manager.run_escalation_check_once().await;

        let escalated = manager.alert(&alert.id).await.unwrap();
        assert_eq!(escalated.escalation_level, 1);
        assert!(escalated.escalated);
        assert_eq!(manager.stats().await.escalated_alerts, 1);

        // The second step is an hour out, a second pass does nothing.
        manager.run_escalation_check_once().await;
        let unchanged = manager.alert(&alert.id).await.unwrap();
        assert_eq!(unchanged.escalation_level, 1);
    }

    #[tokio::test]
    async fn resolution_stops_escalation() {
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
                "ap down",
                "no heartbeat",
            ))
            .await
            .unwrap();
        manager.resolve_alert(&alert.id).await.unwrap();
        manager.run_escalation_check_once().await;

        let escalation = manager.escalation(&alert.id).await.unwrap();
        assert!(escalation.resolved);
        assert_eq!(escalation.level, 0);
        assert_eq!(manager.stats().await.escalated_alerts, 0);
    }

    #[tokio::test]
    async fn rule_evaluation_fires_and_respects_cooldown() {
        use crate::rules::{RuleCondition, ThresholdOp};
        use async_trait::async_trait;

        struct StaticContext;

        #[async_trait]
        impl RuleContextProvider for StaticContext {
            async fn evaluation_context(&self) -> EvaluationContext {
                let mut metrics = HashMap::new();
                metrics.insert("failed_aps".to_string(), 3.0);
                EvaluationContext {
                    metrics,
                    flags: Default::default(),
                }
            }
        }

        let manager = AlertManager::new(AlertingConfig::default());
        manager.set_rule_context(Arc::new(StaticContext)).await;
        manager
            .add_rule(
                AlertRule::new("failed-aps", AlertType::DeviceOffline, Severity::Error)
                    .with_condition(RuleCondition::MetricThreshold {
                        metric: "failed_aps".to_string(),
                        op: ThresholdOp::Above,
                        value: 2.0,
                    }),
            )
            .await;

        manager.run_rule_evaluation_once().await;
        assert_eq!(manager.stats().await.rules_fired, 1);
        assert_eq!(manager.active_alerts().await.len(), 1);

        // Cooldown holds the rule on the immediate next pass.
        manager.run_rule_evaluation_once().await;
        assert_eq!(manager.stats().await.rules_fired, 1);
    }

    #[tokio::test]
    async fn notifications_recorded_for_new_alert() {
        let manager = AlertManager::new(AlertingConfig::default());
        let alert = manager.create_alert(request()).await.unwrap();

        // Give the fanout task a moment to run against the log channel.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let stored = manager.alert(&alert.id).await.unwrap();
        assert_eq!(stored.notifications.len(), 1);
        assert_eq!(stored.notifications[0].status, NotificationStatus::Sent);
    }
}
