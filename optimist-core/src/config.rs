//! Configuration types

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What to do when a mutation targets a key that is already mutating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Fail the second mutation immediately with a conflict error.
    #[default]
    Reject,
    /// Wait for the first mutation to settle and reconcile, then proceed.
    Queue,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::Reject => "reject",
            ConflictPolicy::Queue => "queue",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(ConflictPolicy::Reject),
            "queue" => Ok(ConflictPolicy::Queue),
            other => Err(ConfigError::InvalidValue {
                field: "conflict_policy".to_string(),
                value: other.to_string(),
                reason: "expected 'reject' or 'queue'".to_string(),
            }),
        }
    }
}

/// Cache behaviour knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Policy for a mutation that races an unsettled one on the same key.
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    /// Drop an idle entry once its last subscriber unsubscribes.
    #[serde(default = "default_discard_unsubscribed")]
    pub discard_unsubscribed: bool,
}

fn default_discard_unsubscribed() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::default(),
            discard_unsubscribed: default_discard_unsubscribed(),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Keep or drop idle entries after their last subscriber leaves.
    pub fn with_discard_unsubscribed(mut self, discard: bool) -> Self {
        self.discard_unsubscribed = discard;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.conflict_policy, ConflictPolicy::Reject);
        assert!(config.discard_unsubscribed);
    }

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::new()
            .with_conflict_policy(ConflictPolicy::Queue)
            .with_discard_unsubscribed(false);
        assert_eq!(config.conflict_policy, ConflictPolicy::Queue);
        assert!(!config.discard_unsubscribed);
    }

    #[test]
    fn test_conflict_policy_parse() {
        assert_eq!("reject".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Reject);
        assert_eq!(" Queue ".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Queue);
        assert!("merge".parse::<ConflictPolicy>().is_err());
    }

    #[test]
    fn test_cache_config_deserializes_with_defaults() {
        let config: CacheConfig = serde_json::from_str(r#"{"conflict_policy":"queue"}"#).unwrap();
        assert_eq!(config.conflict_policy, ConflictPolicy::Queue);
        assert!(config.discard_unsubscribed);

        let err = serde_json::from_str::<CacheConfig>(r#"{"unknown":1}"#);
        assert!(err.is_err());
    }
}
