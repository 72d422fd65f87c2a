use std::path::PathBuf;
use std::time::Duration;

/// How much of collectd's packet security to require.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    /// Accept any packet; signatures are not checked.
    #[default]
    None,
    /// Require a valid signature (or encryption, which implies one).
    Sign,
    /// Require encryption.
    Encrypt,
}

/// How a multi-value value-list becomes points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiValueMode {
    /// One point per value, measurement `<plugin>_<dsname>`, field `value`.
    #[default]
    Split,
    /// One point per value-list, measurement `<plugin>`, one field per ds.
    Join,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_address: String,
    pub database: String,
    /// Empty routes to the database's default retention policy.
    pub retention_policy: String,
    pub batch_size: usize,
    pub batch_pending: usize,
    #[serde(with = "humantime_serde")]
    pub batch_duration: Duration,
    /// Socket receive buffer in bytes; zero keeps the OS default.
    pub read_buffer: usize,
    /// A types.db file, or a directory tree of them.
    pub typesdb: PathBuf,
    pub security_level: SecurityLevel,
    pub auth_file: PathBuf,
    pub parse_multi_value_plugin: MultiValueMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: ":25826".to_string(),
            database: "collectd".to_string(),
            retention_policy: String::new(),
            batch_size: 5000,
            batch_pending: 10,
            batch_duration: Duration::from_secs(10),
            read_buffer: 0,
            typesdb: PathBuf::from("/usr/share/collectd/types.db"),
            security_level: SecurityLevel::None,
            auth_file: PathBuf::from("/etc/collectd/auth_file"),
            parse_multi_value_plugin: MultiValueMode::Split,
        }
    }
}

impl Config {
    /// Reject configurations the service cannot start from.
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.bind_address.is_empty() {
            return Err(crate::Error::BindAddressRequired);
        }
        if self.database.is_empty() {
            return Err(crate::Error::DatabaseRequired);
        }
        if self.security_level != SecurityLevel::None && self.auth_file.as_os_str().is_empty() {
            return Err(crate::Error::AuthFileRequired);
        }
        if self.batch_size == 0 || self.batch_pending == 0 || self.batch_duration.is_zero() {
            return Err(crate::Error::BatchBoundsRequired);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults_and_overrides() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.validate().is_ok());

        let config: Config = serde_json::from_str(
            r#"{
                "bind_address": "127.0.0.1:12345",
                "batch_duration": "250ms",
                "security_level": "encrypt",
                "parse_multi_value_plugin": "join"
            }"#,
        )
        .unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:12345");
        assert_eq!(config.batch_duration, Duration::from_millis(250));
        assert_eq!(config.security_level, SecurityLevel::Encrypt);
        assert_eq!(config.parse_multi_value_plugin, MultiValueMode::Join);
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.database = String::new();
        assert!(matches!(
            config.validate(),
            Err(crate::Error::DatabaseRequired),
        ));

        let mut config = Config::default();
        config.bind_address = String::new();
        assert!(matches!(
            config.validate(),
            Err(crate::Error::BindAddressRequired),
        ));

        let mut config = Config::default();
        config.security_level = SecurityLevel::Sign;
        config.auth_file = PathBuf::new();
        assert!(matches!(
            config.validate(),
            Err(crate::Error::AuthFileRequired),
        ));
    }
}
