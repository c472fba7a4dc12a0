// signalhouse-rules - Real-time alert evaluation
//
// Evaluates alert rules against the decoded record stream without touching
// the columnar store. Rolling aggregates live in the shared state store as
// TTL counters; alert de-duplication is a SET NX with the rule's `for`
// window, so multiple gateway replicas converge.

mod alert;
mod engine;
mod rule;
mod sinks;

pub use alert::Alert;
pub use engine::RuleEngine;
pub use rule::{
    load_rules, AlertRule, CompareOp, RuleCondition, RuleLoadError, RuleSeverity, RuleType,
};
pub use sinks::{
    sink_http_client, AlertSink, AlertmanagerSink, SinkError, SlackSink, WebhookSink,
};
