//! Alert rule model and YAML loading.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Which record stream feeds the rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Metric,
    Log,
    Trace,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Metric => "metric",
            RuleType::Log => "log",
            RuleType::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Ne,
}

impl CompareOp {
    pub fn eval(&self, value: f64, threshold: f64) -> bool {
        match self {
            CompareOp::Gt => value > threshold,
            CompareOp::Gte => value >= threshold,
            CompareOp::Lt => value < threshold,
            CompareOp::Lte => value <= threshold,
            CompareOp::Eq => value == threshold,
            CompareOp::Ne => value != threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    pub op: CompareOp,
    #[serde(default)]
    pub threshold: f64,
    /// Restricts metric rules to one metric; absent means every metric.
    /// Trace rules use the reserved name "duration_ms" for latency conditions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_name: Option<String>,
    /// Minimum severity number a log record must carry to count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_severity: Option<i32>,
    /// Error-rate percentage threshold for trace rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_rate_threshold: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSeverity {
    Info,
    Warning,
    Critical,
}

impl RuleSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleSeverity::Info => "info",
            RuleSeverity::Warning => "warning",
            RuleSeverity::Critical => "critical",
        }
    }

    /// Attachment color used by the chat sink.
    pub fn color(&self) -> &'static str {
        match self {
            RuleSeverity::Info => "#439fe0",
            RuleSeverity::Warning => "#f2c744",
            RuleSeverity::Critical => "#d00000",
        }
    }
}

fn default_for_window() -> Duration {
    Duration::from_secs(300)
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub condition: RuleCondition,
    pub severity: RuleSeverity,
    /// Minimum period between two firings for the same entity
    #[serde(rename = "for", with = "humantime_serde", default = "default_for_window")]
    pub for_window: Duration,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    rules: Vec<AlertRule>,
}

#[derive(Debug, Error)]
pub enum RuleLoadError {
    #[error("failed to read rules file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse rules file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
}

/// Load the rule list from a YAML file. Disabled rules are kept so the
/// engine can report them; evaluation skips them.
pub fn load_rules(path: &Path) -> Result<Vec<AlertRule>, RuleLoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| RuleLoadError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let file: RuleFile = serde_yaml::from_str(&text).map_err(|source| RuleLoadError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    Ok(file.rules)
}
