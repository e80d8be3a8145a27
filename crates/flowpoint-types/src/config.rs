//! Engine configuration types.
//!
//! `EngineConfig` represents the `flowpoint.toml` that controls retry policy,
//! redelivery, worker sizing and initiated-flow context. All fields have
//! sensible defaults; per-flow-class overrides live under `[flows."<class>"]`.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::ContextProperties;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Retryable replies tolerated per outstanding request before the flow fails.
    pub max_retries: u32,
    /// How long an external request may stay unanswered before a wake-up resends it.
    pub resend_window_secs: u64,
    /// Upper bound on non-blocking resumes within one processing cycle.
    pub max_inline_resumes: u32,
    /// Times a worker reprocesses an event after a checkpoint version conflict.
    pub max_conflict_retries: u32,
    /// Extra publish attempts after a committed write before the events are
    /// handed back to the submitter.
    pub max_publish_retries: u32,
    /// Number of workers in the flow worker pool.
    pub worker_count: usize,
    /// Capacity of each worker's mailbox.
    pub mailbox_capacity: usize,
    /// Local platform properties that override wire values for initiated flows.
    pub initiated_context: ContextProperties,
    /// Per-flow-class policy overrides keyed by class name.
    pub flows: HashMap<String, FlowPolicyOverride>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            resend_window_secs: 30,
            max_inline_resumes: 1000,
            max_conflict_retries: 3,
            max_publish_retries: 3,
            worker_count: 8,
            mailbox_capacity: 256,
            initiated_context: ContextProperties::new(),
            flows: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Effective policy for a flow class: engine defaults with the class override applied.
    pub fn policy_for(&self, class_name: &str) -> FlowPolicy {
        let base = FlowPolicy {
            max_retries: self.max_retries,
            resend_window: Duration::from_secs(self.resend_window_secs),
        };
        match self.flows.get(class_name) {
            Some(o) => FlowPolicy {
                max_retries: o.max_retries.unwrap_or(base.max_retries),
                resend_window: o
                    .resend_window_secs
                    .map(Duration::from_secs)
                    .unwrap_or(base.resend_window),
            },
            None => base,
        }
    }
}

/// Optional per-class overrides of the engine-wide policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowPolicyOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resend_window_secs: Option<u64>,
}

/// Resolved policy for one flow, read at classification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowPolicy {
    pub max_retries: u32,
    pub resend_window: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.resend_window_secs, 30);
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.max_publish_retries, 3);
        assert!(config.flows.is_empty());
    }

    #[test]
    fn test_engine_config_deserialize_empty_uses_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_engine_config_deserialize_with_overrides() {
        let toml_str = r#"
max_retries = 3
worker_count = 2

[initiated_context]
"corda.initiator.account" = "treasury"

[flows."com.example.PaymentFlow"]
max_retries = 10

[flows."com.example.SlowFlow"]
resend_window_secs = 600
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.worker_count, 2);
        assert_eq!(
            config.initiated_context.get("corda.initiator.account"),
            Some("treasury")
        );

        let payment = config.policy_for("com.example.PaymentFlow");
        assert_eq!(payment.max_retries, 10);
        assert_eq!(payment.resend_window, Duration::from_secs(30));

        let slow = config.policy_for("com.example.SlowFlow");
        assert_eq!(slow.max_retries, 3);
        assert_eq!(slow.resend_window, Duration::from_secs(600));

        let other = config.policy_for("com.example.Other");
        assert_eq!(other.max_retries, 3);
    }
}
