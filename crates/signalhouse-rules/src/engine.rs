//! The rule engine: per-stream evaluation against live rules.
//!
//! The rules vector sits behind a read-write lock; evaluation clones the
//! matching subset so no lock is held across store I/O. Aggregates the
//! engine needs (error counts, span totals) are TTL counters in the shared
//! state store, never queries against the columnar store.

use crate::alert::Alert;
use crate::rule::{AlertRule, RuleType};
use crate::sinks::AlertSink;
use chrono::Utc;
use metrics::{counter, histogram};
use parking_lot::RwLock;
use signalhouse_core::{LogRecord, MetricPoint, Span};
use signalhouse_state::{StateError, StateStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// TTL for per-service rolling error counts (seconds).
const ERROR_COUNT_TTL: i64 = 60;

/// TTL for per-service span counters (seconds).
const SPAN_COUNT_TTL: i64 = 300;

pub struct RuleEngine {
    rules: RwLock<Vec<AlertRule>>,
    state: StateStore,
    sinks: Vec<Arc<dyn AlertSink>>,
    extra_labels: HashMap<String, String>,
}

impl RuleEngine {
    pub fn new(
        state: StateStore,
        sinks: Vec<Arc<dyn AlertSink>>,
        extra_labels: HashMap<String, String>,
    ) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            state,
            sinks,
            extra_labels,
        }
    }

    /// Swap in a freshly loaded rule set. Called at startup and by the
    /// periodic reload loop.
    pub fn replace_rules(&self, rules: Vec<AlertRule>) {
        let count = rules.len();
        *self.rules.write() = rules;
        debug!(count, "Rule set replaced");
    }

    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }

    fn rules_of_type(&self, rule_type: RuleType) -> Vec<AlertRule> {
        self.rules
            .read()
            .iter()
            .filter(|rule| rule.enabled && rule.rule_type == rule_type)
            .cloned()
            .collect()
    }

    /// Metric rules: operator against each point value.
    pub async fn evaluate_metrics(&self, points: &[MetricPoint]) {
        let rules = self.rules_of_type(RuleType::Metric);
        if rules.is_empty() || points.is_empty() {
            return;
        }

        let started = Instant::now();
        let mut errored = false;

        for rule in &rules {
            for point in points {
                if let Some(name) = &rule.condition.metric_name {
                    if name != &point.name {
                        continue;
                    }
                }
                if rule.condition.op.eval(point.value, rule.condition.threshold) {
                    if self
                        .handle_alert(rule, &point.service_name, &point.name, point.value)
                        .await
                        .is_err()
                    {
                        errored = true;
                    }
                }
            }
        }

        finish_evaluation("metric", rules.len(), errored, started);
    }

    /// Log rules: rolling per-service error counts against the threshold.
    pub async fn evaluate_logs(&self, logs: &[LogRecord]) {
        let rules = self.rules_of_type(RuleType::Log);
        if rules.is_empty() || logs.is_empty() {
            return;
        }

        let started = Instant::now();
        let mut errored = false;

        for (service, stats) in group_error_logs(logs) {
            let key = format!("error_count:{}", service);
            let total = match self
                .state
                .incr_with_ttl(&key, stats.errors, ERROR_COUNT_TTL)
                .await
            {
                Ok(total) => total,
                Err(e) => {
                    warn!(service, error = %e, "Failed to update rolling error count");
                    errored = true;
                    continue;
                }
            };

            for rule in &rules {
                // A min_severity filter makes the rule eligible only when the
                // batch carried at least one record at or above it
                if let Some(min) = rule.condition.min_severity {
                    if stats.max_severity < min {
                        continue;
                    }
                }
                if rule.condition.op.eval(total as f64, rule.condition.threshold) {
                    if self
                        .handle_alert(rule, &service, "error_count", total as f64)
                        .await
                        .is_err()
                    {
                        errored = true;
                    }
                }
            }
        }

        finish_evaluation("log", rules.len(), errored, started);
    }

    /// Trace rules: per-service error rate and average latency.
    pub async fn evaluate_traces(&self, spans: &[Span]) {
        let rules = self.rules_of_type(RuleType::Trace);
        if rules.is_empty() || spans.is_empty() {
            return;
        }

        let started = Instant::now();
        let mut errored = false;

        for (service, stats) in group_trace_stats(spans) {
            let totals = async {
                let total = self
                    .state
                    .incr_with_ttl(&format!("spans_total:{}", service), stats.spans, SPAN_COUNT_TTL)
                    .await?;
                let errors = self
                    .state
                    .incr_with_ttl(
                        &format!("spans_error:{}", service),
                        stats.errors,
                        SPAN_COUNT_TTL,
                    )
                    .await?;
                Ok::<_, StateError>((total, errors))
            };

            let (total, errors) = match totals.await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(service, error = %e, "Failed to update rolling span counters");
                    errored = true;
                    continue;
                }
            };

            let error_rate = if total > 0 {
                errors as f64 / total as f64 * 100.0
            } else {
                0.0
            };
            let avg_latency_ms = stats.avg_latency_ms();

            for rule in &rules {
                if let Some(threshold) = rule.condition.error_rate_threshold {
                    if error_rate > threshold
                        && self
                            .handle_alert(rule, &service, "error_rate", error_rate)
                            .await
                            .is_err()
                    {
                        errored = true;
                    }
                }

                if rule.condition.metric_name.as_deref() == Some("duration_ms")
                    && rule.condition.op.eval(avg_latency_ms, rule.condition.threshold)
                    && self
                        .handle_alert(rule, &service, "duration_ms", avg_latency_ms)
                        .await
                        .is_err()
                {
                    errored = true;
                }
            }
        }

        finish_evaluation("trace", rules.len(), errored, started);
    }

    /// Fire an alert once per (rule, entity) within the rule's `for` window.
    ///
    /// The window lives in the shared state store, so replicas de-duplicate
    /// against each other. Sink fan-out happens on detached tasks; a slow
    /// sink never stalls the ingest path.
    async fn handle_alert(
        &self,
        rule: &AlertRule,
        service: &str,
        metric_name: &str,
        value: f64,
    ) -> Result<(), StateError> {
        let key = format!("alert:{}:{}", rule.id, service);
        let ttl = rule.for_window.as_secs().max(1) as i64;

        if !self.state.set_nx_with_ttl(&key, ttl).await? {
            debug!(key, "Alert suppressed inside for-window");
            return Ok(());
        }

        let alert = Alert {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            severity: rule.severity,
            service: service.to_string(),
            metric_name: metric_name.to_string(),
            value,
            threshold: rule.condition.threshold,
            labels: merge_labels(&self.extra_labels, &rule.labels),
            annotations: rule.annotations.clone(),
            fired_at: Utc::now(),
        };

        info!(
            rule = %rule.id,
            service,
            metric = metric_name,
            value,
            severity = rule.severity.as_str(),
            "Alert firing"
        );
        counter!(
            "alerts_fired_total",
            1,
            "rule" => rule.id.clone(),
            "severity" => rule.severity.as_str()
        );

        for sink in &self.sinks {
            let sink = Arc::clone(sink);
            let alert = alert.clone();
            tokio::spawn(async move {
                if let Err(e) = sink.send(&alert).await {
                    warn!(sink = sink.name(), rule = %alert.rule_id, error = %e, "Alert delivery failed");
                }
            });
        }

        Ok(())
    }
}

fn finish_evaluation(rule_type: &'static str, rule_count: usize, errored: bool, started: Instant) {
    let status = if errored { "error" } else { "success" };
    counter!(
        "rules_evaluated_total",
        rule_count as u64,
        "type" => rule_type,
        "status" => status
    );
    histogram!(
        "rule_evaluation_latency_seconds",
        started.elapsed().as_secs_f64(),
        "type" => rule_type
    );
}

#[derive(Debug, Default, Clone, Copy)]
struct LogServiceStats {
    errors: i64,
    max_severity: i32,
}

/// Per-service count of error-class log records in one batch, plus the
/// highest severity seen for min_severity gating.
fn group_error_logs(logs: &[LogRecord]) -> HashMap<String, LogServiceStats> {
    let mut stats: HashMap<String, LogServiceStats> = HashMap::new();
    for log in logs {
        if log.is_error() {
            let entry = stats.entry(log.service_name.clone()).or_default();
            entry.errors += 1;
            entry.max_severity = entry.max_severity.max(log.severity);
        }
    }
    stats
}

#[derive(Debug, Default, Clone, Copy)]
struct TraceServiceStats {
    spans: i64,
    errors: i64,
    sum_duration_ns: u64,
}

impl TraceServiceStats {
    fn avg_latency_ms(&self) -> f64 {
        if self.spans == 0 {
            return 0.0;
        }
        self.sum_duration_ns as f64 / self.spans as f64 / 1_000_000.0
    }
}

/// Per-service span totals for one batch.
fn group_trace_stats(spans: &[Span]) -> HashMap<String, TraceServiceStats> {
    let mut stats: HashMap<String, TraceServiceStats> = HashMap::new();
    for span in spans {
        let entry = stats.entry(span.service_name.clone()).or_default();
        entry.spans += 1;
        if span.is_error() {
            entry.errors += 1;
        }
        entry.sum_duration_ns = entry.sum_duration_ns.saturating_add(span.duration_ns());
    }
    stats
}

fn merge_labels(
    extra: &HashMap<String, String>,
    rule_labels: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged = extra.clone();
    for (key, value) in rule_labels {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{CompareOp, RuleCondition, RuleSeverity};
    use signalhouse_core::types::AttrMap;
    use signalhouse_core::{SpanKind, SpanStatus};
    use std::time::Duration;

    fn engine() -> RuleEngine {
        let state = StateStore::new("redis://localhost:6379", "test").unwrap();
        RuleEngine::new(
            state,
            Vec::new(),
            HashMap::from([("cluster".to_string(), "dev".to_string())]),
        )
    }

    fn rule(rule_type: RuleType, enabled: bool) -> AlertRule {
        AlertRule {
            id: "r1".to_string(),
            name: "Rule".to_string(),
            rule_type,
            condition: RuleCondition {
                op: CompareOp::Gt,
                threshold: 1.0,
                metric_name: None,
                min_severity: None,
                error_rate_threshold: None,
            },
            severity: RuleSeverity::Warning,
            for_window: Duration::from_secs(300),
            labels: HashMap::new(),
            annotations: HashMap::new(),
            enabled,
        }
    }

    fn span(service: &str, duration_ns: u64, status: SpanStatus) -> Span {
        Span {
            trace_id: "0af7651916cd43dd8448eb211c80319c".to_string(),
            span_id: "b7ad6b7169203331".to_string(),
            parent_span_id: String::new(),
            name: "op".to_string(),
            kind: SpanKind::Server,
            start_ts: 0,
            end_ts: duration_ns,
            status,
            status_message: String::new(),
            service_name: service.to_string(),
            attributes: AttrMap::new(),
        }
    }

    fn log(service: &str, severity: i32) -> LogRecord {
        LogRecord {
            ts: 0,
            severity,
            severity_text: String::new(),
            body: String::new(),
            service_name: service.to_string(),
            trace_id: String::new(),
            span_id: String::new(),
            attributes: AttrMap::new(),
            pattern_hash: 0,
        }
    }

    #[test]
    fn test_replace_rules_and_type_filter() {
        let engine = engine();
        engine.replace_rules(vec![
            rule(RuleType::Metric, true),
            rule(RuleType::Metric, false),
            rule(RuleType::Log, true),
        ]);
        assert_eq!(engine.rule_count(), 3);
        assert_eq!(engine.rules_of_type(RuleType::Metric).len(), 1);
        assert_eq!(engine.rules_of_type(RuleType::Log).len(), 1);
        assert_eq!(engine.rules_of_type(RuleType::Trace).len(), 0);
    }

    #[test]
    fn test_group_error_logs_counts_per_service() {
        let logs = vec![
            log("web", 17),
            log("web", 21),
            log("web", 9),
            log("api", 17),
        ];
        let stats = group_error_logs(&logs);
        assert_eq!(stats.get("web").unwrap().errors, 2);
        assert_eq!(stats.get("web").unwrap().max_severity, 21);
        assert_eq!(stats.get("api").unwrap().errors, 1);
        assert_eq!(stats.len(), 2);
    }

    #[test]
    fn test_group_trace_stats() {
        let spans = vec![
            span("web", 1_000_000, SpanStatus::Ok),
            span("web", 3_000_000, SpanStatus::Error),
            span("api", 2_000_000, SpanStatus::Ok),
        ];
        let stats = group_trace_stats(&spans);

        let web = stats.get("web").unwrap();
        assert_eq!(web.spans, 2);
        assert_eq!(web.errors, 1);
        assert_eq!(web.avg_latency_ms(), 2.0);

        let api = stats.get("api").unwrap();
        assert_eq!(api.spans, 1);
        assert_eq!(api.errors, 0);
    }

    #[test]
    fn test_merge_labels_rule_wins() {
        let extra = HashMap::from([
            ("cluster".to_string(), "dev".to_string()),
            ("team".to_string(), "infra".to_string()),
        ]);
        let rule_labels = HashMap::from([("team".to_string(), "platform".to_string())]);
        let merged = merge_labels(&extra, &rule_labels);
        assert_eq!(merged.get("cluster").unwrap(), "dev");
        assert_eq!(merged.get("team").unwrap(), "platform");
    }

    #[test]
    fn test_avg_latency_empty_stats() {
        let stats = TraceServiceStats::default();
        assert_eq!(stats.avg_latency_ms(), 0.0);
    }
}
