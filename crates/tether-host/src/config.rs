use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_kernel::feedback::DEFAULT_MAX_NOTICES;
use tether_kernel::routing::NAVIGATION_KINDS;

use crate::error::InitError;
use crate::pipeline::{CANONICAL_ORDER, StageKind};

const ENV_ENVIRONMENT: &str = "TETHER_ENV";
const ENV_DEBOUNCE_MS: &str = "TETHER_STORAGE_DEBOUNCE_MS";
const ENV_SCHEMA_VERSION: &str = "TETHER_SCHEMA_VERSION";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Some(Environment::Production),
            "development" | "dev" | "test" => Some(Environment::Development),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    pub environment: Environment,
    /// Quiet period before a durable write.
    #[serde(rename = "storageDebounceMs", with = "duration_ms")]
    pub storage_debounce: Duration,
    pub storage_schema_version: u32,
    /// Key namespace of the snapshot record.
    pub storage_namespace: String,
    /// Root directory for the default filesystem engine.
    pub storage_dir: PathBuf,
    /// Intent kinds that never trigger a durable write.
    pub blacklisted_action_types: Vec<String>,
    pub logger: LoggerOptions,
    pub feedback: FeedbackOptions,
    pub offline: OfflineOptions,
    pub stages: Vec<StageKind>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            storage_debounce: Duration::from_millis(1000),
            storage_schema_version: 0,
            storage_namespace: "tether".into(),
            storage_dir: PathBuf::from("."),
            blacklisted_action_types: NAVIGATION_KINDS.iter().map(|k| k.to_string()).collect(),
            logger: LoggerOptions::default(),
            feedback: FeedbackOptions::default(),
            offline: OfflineOptions::default(),
            stages: CANONICAL_ORDER.to_vec(),
        }
    }
}

impl StoreConfig {
    /// Defaults overridden by `TETHER_ENV`, `TETHER_STORAGE_DEBOUNCE_MS` and
    /// `TETHER_SCHEMA_VERSION`; malformed values are rejected.
    pub fn from_env() -> Result<Self, InitError> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(ENV_ENVIRONMENT) {
            config.environment = Environment::parse(&raw)
                .ok_or_else(|| InitError::Config(format!("{ENV_ENVIRONMENT}: unknown environment '{raw}'")))?;
        }
        if let Ok(raw) = std::env::var(ENV_DEBOUNCE_MS) {
            let ms: u64 = raw
                .trim()
                .parse()
                .map_err(|e| InitError::Config(format!("{ENV_DEBOUNCE_MS}: {e}")))?;
            config.storage_debounce = Duration::from_millis(ms);
        }
        if let Ok(raw) = std::env::var(ENV_SCHEMA_VERSION) {
            config.storage_schema_version = raw
                .trim()
                .parse()
                .map_err(|e| InitError::Config(format!("{ENV_SCHEMA_VERSION}: {e}")))?;
        }
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self, InitError> {
        serde_json::from_str(raw).map_err(|e| InitError::Config(e.to_string()))
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

/// Options of the action logger. The logger is never installed in production.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerOptions {
    /// One line per intent instead of a before/after state dump.
    pub collapsed: bool,
    pub duration: bool,
    pub timestamp: bool,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            collapsed: true,
            duration: true,
            timestamp: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeedbackOptions {
    pub max_notices: usize,
    /// Lifetime of notices that do not specify one; `None` keeps them until dismissed.
    #[serde(rename = "defaultTtlMs", with = "duration_ms::option")]
    pub default_ttl: Option<Duration>,
    /// Schedule an expiry intent for every notice with a lifetime.
    pub auto_expire: bool,
}

impl Default for FeedbackOptions {
    fn default() -> Self {
        Self {
            max_notices: DEFAULT_MAX_NOTICES,
            default_ttl: Some(Duration::from_secs(4)),
            auto_expire: true,
        }
    }
}

/// Whether new allow-listed intents may overtake a draining queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayOrdering {
    #[default]
    Interleave,
    /// Queue new allow-listed intents behind the entries still waiting.
    Strict,
}

/// How a failed replay is classified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayFailurePolicy {
    /// Use the operation error's `retryable` flag.
    #[default]
    ByErrorKind,
    AlwaysPause,
    AlwaysSkip,
}

impl ReplayFailurePolicy {
    pub fn retryable(self, error: &crate::OperationError) -> bool {
        match self {
            ReplayFailurePolicy::ByErrorKind => error.retryable,
            ReplayFailurePolicy::AlwaysPause => true,
            ReplayFailurePolicy::AlwaysSkip => false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OfflineOptions {
    /// Intent kinds held back while disconnected.
    pub allow_list: Vec<String>,
    pub ordering: ReplayOrdering,
    pub failure_policy: ReplayFailurePolicy,
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = StoreConfig::default();
        assert_eq!(config.storage_debounce, Duration::from_millis(1000));
        assert_eq!(config.storage_schema_version, 0);
        assert!(config.blacklisted_action_types.iter().any(|k| k == "@@router/LOCATION_CHANGE"));
        assert_eq!(config.stages, CANONICAL_ORDER.to_vec());
        assert!(!config.is_production());
        assert!(config.logger.collapsed);
        assert!(config.logger.duration);
        assert!(!config.logger.timestamp);
    }

    #[test]
    fn json_overrides_only_named_fields() {
        let config = StoreConfig::from_json(
            r#"{
                "environment": "production",
                "storageDebounceMs": 250,
                "offline": { "allowList": ["todo/ADD"], "ordering": "strict" },
                "feedback": { "defaultTtlMs": null }
            }"#,
        )
        .unwrap();
        assert!(config.is_production());
        assert_eq!(config.storage_debounce, Duration::from_millis(250));
        assert_eq!(config.offline.allow_list, vec!["todo/ADD".to_string()]);
        assert_eq!(config.offline.ordering, ReplayOrdering::Strict);
        assert_eq!(config.feedback.default_ttl, None);
        assert_eq!(config.storage_namespace, "tether");
    }

    #[test]
    fn failure_policy_classification() {
        let transient = crate::OperationError::retryable("timeout");
        let fatal = crate::OperationError::new("rejected");
        assert!(ReplayFailurePolicy::ByErrorKind.retryable(&transient));
        assert!(!ReplayFailurePolicy::ByErrorKind.retryable(&fatal));
        assert!(ReplayFailurePolicy::AlwaysPause.retryable(&fatal));
        assert!(!ReplayFailurePolicy::AlwaysSkip.retryable(&transient));
    }
}
