//! The alert record handed to every sink.

use crate::rule::RuleSeverity;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub rule_id: String,
    pub rule_name: String,
    pub severity: RuleSeverity,
    pub service: String,
    pub metric_name: String,
    pub value: f64,
    pub threshold: f64,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub fired_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_serializes_to_json() {
        let alert = Alert {
            rule_id: "high-cpu".to_string(),
            rule_name: "High CPU".to_string(),
            severity: RuleSeverity::Critical,
            service: "web".to_string(),
            metric_name: "system.cpu.utilization".to_string(),
            value: 0.95,
            threshold: 0.9,
            labels: HashMap::from([("team".to_string(), "platform".to_string())]),
            annotations: HashMap::new(),
            fired_at: Utc::now(),
        };

        let json: serde_json::Value = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["rule_id"], "high-cpu");
        assert_eq!(json["severity"], "critical");
        assert_eq!(json["value"], 0.95);
        assert_eq!(json["labels"]["team"], "platform");
    }
}
