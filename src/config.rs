use crate::error::{BridgeError, BridgeResult};
use serde::Deserialize;

/// Environment variable prefix, e.g. `KBRIDGE_LOG_CHANNEL_CAPACITY=500`
pub const ENV_PREFIX: &str = "KBRIDGE";

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Byte the foreign library writes to the pipe on each 0 -> 1 queue transition
    pub edge_payload: u8,
    /// Bound of the channel carrying forwarded library log events
    pub log_channel_capacity: usize,
    /// Name prefix for background IO reader threads
    pub reader_thread_prefix: String,
    /// Route library logs to a dedicated queue and forward them at open
    pub forward_logs: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            edge_payload: 9,
            log_channel_capacity: 10000,
            reader_thread_prefix: "kbridge-io".to_string(),
            forward_logs: false,
        }
    }
}

impl BridgeConfig {
    /// Defaults overlaid by `KBRIDGE_*` environment variables
    pub fn from_env() -> BridgeResult<Self> {
        Self::from_source(
            config::Environment::with_prefix(ENV_PREFIX).try_parsing(true),
        )
    }

    /// Defaults overlaid by an arbitrary `config` source
    pub fn from_source<S>(source: S) -> BridgeResult<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let defaults = Self::default();
        let settings = config::Config::builder()
            .set_default("edge_payload", i64::from(defaults.edge_payload))?
            .set_default("log_channel_capacity", defaults.log_channel_capacity as i64)?
            .set_default("reader_thread_prefix", defaults.reader_thread_prefix)?
            .set_default("forward_logs", defaults.forward_logs)?
            .add_source(source)
            .build()?;

        let config: BridgeConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.log_channel_capacity == 0 {
            return Err(BridgeError::configuration(
                "log_channel_capacity must be greater than zero",
            ));
        }
        if self.reader_thread_prefix.is_empty() {
            return Err(BridgeError::configuration(
                "reader_thread_prefix must not be empty",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        assert_eq!(config.edge_payload, 9);
        assert_eq!(config.log_channel_capacity, 10000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_source_overrides_defaults() {
        let json = r#"{ "log_channel_capacity": 16, "forward_logs": true }"#;
        let config = BridgeConfig::from_source(File::from_str(json, FileFormat::Json)).unwrap();
        assert_eq!(config.log_channel_capacity, 16);
        assert!(config.forward_logs);
        assert_eq!(config.edge_payload, 9);
        assert_eq!(config.reader_thread_prefix, "kbridge-io");
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let json = r#"{ "log_channel_capacity": 0 }"#;
        let err = BridgeConfig::from_source(File::from_str(json, FileFormat::Json)).unwrap_err();
        assert!(matches!(err, BridgeError::Configuration { .. }));
    }
}
