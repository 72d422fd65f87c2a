use std::time::Duration;

/// Configuration of the metadata store.
///
/// Every field that influences apply (today: `retention_auto_create`) must be
/// identical on all meta nodes of a cluster, or their state machines diverge.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP bind address of this meta node.
    pub http_bind_address: String,

    /// Auto-create a default retention policy when a database is created
    /// without one.
    pub retention_auto_create: bool,

    /// How long a submitted command may wait for consensus before it's
    /// reported as retryable.
    #[serde(with = "humantime_serde")]
    pub apply_timeout: Duration,

    /// Number of applied log entries between snapshots.
    pub snapshot_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_bind_address: ":8091".to_string(),
            retention_auto_create: true,
            apply_timeout: Duration::from_secs(10),
            snapshot_threshold: 1024,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_config_defaults_and_overrides() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());

        let config: Config = serde_json::from_str(
            r#"{"retention_auto_create": false, "apply_timeout": "2s 500ms"}"#,
        )
        .unwrap();
        assert!(!config.retention_auto_create);
        assert_eq!(config.apply_timeout, Duration::from_millis(2500));
    }
}
