use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid value for {var}: {value:?}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

/// Server settings, read from `ROOMD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7411,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(30),
            metrics_port: None,
        }
    }
}

fn parse<T: FromStr>(var: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|_| ConfigError { var, value: v }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset variables take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let metrics_port = match lookup("ROOMD_METRICS_PORT") {
            None => None,
            Some(v) => Some(parse("ROOMD_METRICS_PORT", Some(v), 0u16)?),
        };
        Ok(Self {
            bind: lookup("ROOMD_BIND").unwrap_or(defaults.bind),
            port: parse("ROOMD_PORT", lookup("ROOMD_PORT"), defaults.port)?,
            data_dir: lookup("ROOMD_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            max_connections: parse(
                "ROOMD_MAX_CONNECTIONS",
                lookup("ROOMD_MAX_CONNECTIONS"),
                defaults.max_connections,
            )?,
            compact_threshold: parse(
                "ROOMD_COMPACT_THRESHOLD",
                lookup("ROOMD_COMPACT_THRESHOLD"),
                defaults.compact_threshold,
            )?,
            compact_interval: Duration::from_secs(parse(
                "ROOMD_COMPACT_INTERVAL_SECS",
                lookup("ROOMD_COMPACT_INTERVAL_SECS"),
                defaults.compact_interval.as_secs(),
            )?),
            metrics_port,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roomd.wal")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = from(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.addr(), "0.0.0.0:7411");
        assert_eq!(config.wal_path(), PathBuf::from("./data/roomd.wal"));
    }

    #[test]
    fn overrides() {
        let config = from(&[
            ("ROOMD_PORT", "9000"),
            ("ROOMD_DATA_DIR", "/var/lib/roomd"),
            ("ROOMD_COMPACT_INTERVAL_SECS", "5"),
            ("ROOMD_METRICS_PORT", "9100"),
        ])
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/roomd"));
        assert_eq!(config.compact_interval, Duration::from_secs(5));
        assert_eq!(config.metrics_port, Some(9100));
    }

    #[test]
    fn bad_number_names_the_variable() {
        let err = from(&[("ROOMD_MAX_CONNECTIONS", "lots")]).unwrap_err();
        assert_eq!(err.var, "ROOMD_MAX_CONNECTIONS");
        assert!(err.to_string().contains("ROOMD_MAX_CONNECTIONS"));
    }
}
