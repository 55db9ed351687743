//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use skylink_core::codec::{DEFAULT_FIELD_WIDTH, PayloadLayout};
use skylink_core::protocol::{MAX_ERROR_RATE, SUPPORTED_QUBIT_COUNTS};
use skylink_core::{default_zones, ZoneSet};

/// Client configuration. File: ~/.config/skylink/config.toml or /etc/skylink/config.toml.
/// Env overrides: SKYLINK_KEY_EXCHANGE_URL, SKYLINK_STREAM_URL, SKYLINK_NAVIGATION_URL,
/// SKYLINK_NUM_QUBITS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Key-exchange, transmit and health backend (default http://localhost:5001).
    #[serde(default = "default_key_exchange_url")]
    pub key_exchange_url: String,
    /// Streaming transmission backend (default http://localhost:5003).
    #[serde(default = "default_stream_url")]
    pub stream_url: String,
    /// Flight tracking and prediction backend (default http://localhost:5002).
    #[serde(default = "default_navigation_url")]
    pub navigation_url: String,
    /// Qubits per key exchange; the backend accepts 10, 50 or 100.
    #[serde(default = "default_num_qubits")]
    pub num_qubits: u32,
    /// Bits per coordinate field.
    #[serde(default = "default_field_width")]
    pub field_width: u32,
    /// Keys at or above this error rate are refused.
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,
    /// Restricted zones as rings of [lat, lon]. Built-in zones when absent.
    #[serde(default)]
    pub zones: Option<Vec<Vec<[f64; 2]>>>,
}

fn default_key_exchange_url() -> String {
    "http://localhost:5001".to_string()
}
fn default_stream_url() -> String {
    "http://localhost:5003".to_string()
}
fn default_navigation_url() -> String {
    "http://localhost:5002".to_string()
}
fn default_num_qubits() -> u32 {
    50
}
fn default_field_width() -> u32 {
    DEFAULT_FIELD_WIDTH
}
fn default_max_error_rate() -> f64 {
    MAX_ERROR_RATE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            key_exchange_url: default_key_exchange_url(),
            stream_url: default_stream_url(),
            navigation_url: default_navigation_url(),
            num_qubits: default_num_qubits(),
            field_width: default_field_width(),
            max_error_rate: default_max_error_rate(),
            zones: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_QUBIT_COUNTS.contains(&self.num_qubits) {
            return Err(ConfigError::QubitCount(self.num_qubits));
        }
        if !(self.max_error_rate > 0.0 && self.max_error_rate <= 1.0) {
            return Err(ConfigError::ErrorRate(self.max_error_rate));
        }
        self.layout()?;
        self.zone_set()?;
        Ok(())
    }

    pub fn layout(&self) -> Result<PayloadLayout, ConfigError> {
        Ok(PayloadLayout::new(self.field_width)?)
    }

    /// Configured zones, or the built-in set.
    pub fn zone_set(&self) -> Result<ZoneSet, ConfigError> {
        match &self.zones {
            Some(rings) => Ok(ZoneSet::from_rings(rings)?),
            None => Ok(default_zones().clone()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid {var}: {value:?}")]
    Env { var: &'static str, value: String },
    #[error("num_qubits must be one of 10, 50, 100 (got {0})")]
    QubitCount(u32),
    #[error("max_error_rate must be in (0, 1] (got {0})")]
    ErrorRate(f64),
    #[error("invalid field_width: {0}")]
    Layout(#[from] skylink_core::EncodeError),
    #[error("invalid zones: {0}")]
    Zones(#[from] skylink_core::GeometryError),
}

/// Load config: explicit file if given, else the first file found on the search path,
/// else defaults; then env vars; then validate.
pub fn load(explicit: Option<&Path>) -> Result<(Config, Option<PathBuf>), ConfigError> {
    let (mut c, path) = match explicit {
        Some(p) => (load_file(p)?, Some(p.to_path_buf())),
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(p) => (load_file(&p)?, Some(p)),
            None => (Config::default(), None),
        },
    };
    apply_env(&mut c, |var| std::env::var(var).ok())?;
    c.validate()?;
    Ok((c, path))
}

fn apply_env(c: &mut Config, get: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
    if let Some(s) = get("SKYLINK_KEY_EXCHANGE_URL") {
        c.key_exchange_url = s;
    }
    if let Some(s) = get("SKYLINK_STREAM_URL") {
        c.stream_url = s;
    }
    if let Some(s) = get("SKYLINK_NAVIGATION_URL") {
        c.navigation_url = s;
    }
    if let Some(s) = get("SKYLINK_NUM_QUBITS") {
        c.num_qubits = s.parse().map_err(|_| ConfigError::Env {
            var: "SKYLINK_NUM_QUBITS",
            value: s.clone(),
        })?;
    }
    Ok(())
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/skylink/config.toml"));
    }
    out.push(PathBuf::from("/etc/skylink/config.toml"));
    out
}

fn load_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let c = Config::default();
        c.validate().unwrap();
        assert_eq!(c.layout().unwrap().total_width(), 65);
        assert_eq!(c.zone_set().unwrap().polygons().len(), 2);
    }

    #[test]
    fn file_overrides_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
stream_url = "http://sat.example:9000"
num_qubits = 100
zones = [[[0.0, 0.0], [0.0, 2.0], [2.0, 2.0], [2.0, 0.0]]]
"#
        )
        .unwrap();
        let (c, path) = load(Some(f.path())).unwrap();
        assert_eq!(path.as_deref(), Some(f.path()));
        assert_eq!(c.stream_url, "http://sat.example:9000");
        assert_eq!(c.key_exchange_url, "http://localhost:5001");
        assert_eq!(c.navigation_url, "http://localhost:5002");
        assert_eq!(c.num_qubits, 100);
        assert_eq!(c.zone_set().unwrap().polygons().len(), 1);
    }

    #[test]
    fn unknown_fields_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "proxy_port = 3128").unwrap();
        assert!(matches!(load(Some(f.path())), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(load(Some(&missing)), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let c = Config {
            num_qubits: 42,
            ..Config::default()
        };
        assert!(matches!(c.validate(), Err(ConfigError::QubitCount(42))));

        let c = Config {
            field_width: 0,
            ..Config::default()
        };
        assert!(matches!(c.validate(), Err(ConfigError::Layout(_))));

        let c = Config {
            max_error_rate: 0.0,
            ..Config::default()
        };
        assert!(matches!(c.validate(), Err(ConfigError::ErrorRate(_))));

        let c = Config {
            zones: Some(vec![vec![[95.0, 0.0], [0.0, 1.0], [1.0, 1.0]]]),
            ..Config::default()
        };
        assert!(matches!(c.validate(), Err(ConfigError::Zones(_))));
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SKYLINK_STREAM_URL", "http://override:1"),
            ("SKYLINK_NUM_QUBITS", "10"),
            ("SKYLINK_NAVIGATION_URL", "http://radar:5002"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        apply_env(&mut c, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(c.stream_url, "http://override:1");
        assert_eq!(c.num_qubits, 10);
        assert_eq!(c.navigation_url, "http://radar:5002");
        assert_eq!(c.key_exchange_url, "http://localhost:5001");

        let mut c = Config::default();
        let err = apply_env(&mut c, |k| (k == "SKYLINK_NUM_QUBITS").then(|| "many".to_string()));
        assert!(matches!(err, Err(ConfigError::Env { .. })));
    }
}
