use std::env;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TracestashError};

/// How spans are laid out in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// Zipkin v2 JSON, one span per event.
    Classic,
    /// OpenTelemetry records, flat or collector-shaped.
    Otel,
}

impl FromStr for Layout {
    type Err = TracestashError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "classic" | "zipkin" => Ok(Self::Classic),
            "otel" => Ok(Self::Otel),
            other => Err(TracestashError::Config(format!(
                "unknown layout {other:?}; expected classic, zipkin or otel"
            ))),
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classic => f.write_str("classic"),
            Self::Otel => f.write_str("otel"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub index_name: String,
    pub source: String,
    pub source_type: String,
    /// Source type of metric records written by the collector.
    pub metrics_source_type: String,
    pub layout: Layout,
    pub default_lookback: Duration,
    pub verify_tls: bool,
    pub request_timeout: Duration,
    pub collector_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            host: "localhost".to_string(),
            port: 8089,
            token: None,
            username: None,
            password: None,
            index_name: "zipkin".to_string(),
            source: "zipkin-server".to_string(),
            source_type: "span".to_string(),
            metrics_source_type: "mts".to_string(),
            layout: Layout::Otel,
            default_lookback: Duration::from_secs(60 * 60 * 24),
            verify_tls: true,
            request_timeout: Duration::from_secs(11),
            collector_addr: "127.0.0.1:4317".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// Username and password, only when no token is configured.
    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        if self.token.is_some() {
            return None;
        }
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    scheme: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    token: Option<String>,
    username: Option<String>,
    password: Option<String>,
    index_name: Option<String>,
    source: Option<String>,
    source_type: Option<String>,
    metrics_source_type: Option<String>,
    layout: Option<String>,
    default_lookback: Option<String>,
    verify_tls: Option<bool>,
    request_timeout: Option<String>,
    collector_addr: Option<String>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("TRACESTASH_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("tracestash/config.toml")
}

fn load_file_overrides(path: &PathBuf) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| TracestashError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| TracestashError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    let port = match env::var("TRACESTASH_SPLUNK_PORT") {
        Ok(v) => Some(v.parse::<u16>().map_err(|e| {
            TracestashError::Config(format!("bad TRACESTASH_SPLUNK_PORT in environment: {e}"))
        })?),
        Err(_) => None,
    };
    let verify_tls = match env::var("TRACESTASH_VERIFY_TLS") {
        Ok(v) => Some(parse_bool(&v).ok_or_else(|| {
            TracestashError::Config(format!(
                "bad TRACESTASH_VERIFY_TLS in environment: expected true or false (value={v})"
            ))
        })?),
        Err(_) => None,
    };

    Ok(ConfigOverrides {
        scheme: env::var("TRACESTASH_SPLUNK_SCHEME").ok(),
        host: env::var("TRACESTASH_SPLUNK_HOST").ok(),
        port,
        token: env::var("TRACESTASH_SPLUNK_TOKEN").ok(),
        username: env::var("TRACESTASH_SPLUNK_USERNAME").ok(),
        password: env::var("TRACESTASH_SPLUNK_PASSWORD").ok(),
        index_name: env::var("TRACESTASH_INDEX_NAME").ok(),
        source: env::var("TRACESTASH_SOURCE").ok(),
        source_type: env::var("TRACESTASH_SOURCE_TYPE").ok(),
        metrics_source_type: env::var("TRACESTASH_METRICS_SOURCE_TYPE").ok(),
        layout: env::var("TRACESTASH_LAYOUT").ok(),
        default_lookback: env::var("TRACESTASH_DEFAULT_LOOKBACK").ok(),
        verify_tls,
        request_timeout: env::var("TRACESTASH_REQUEST_TIMEOUT").ok(),
        collector_addr: env::var("TRACESTASH_COLLECTOR_ADDR").ok(),
    })
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.scheme {
        if v != "http" && v != "https" {
            return Err(TracestashError::Config(format!(
                "bad scheme in {source}: expected http or https (value={v})"
            )));
        }
        cfg.scheme = v;
    }
    if let Some(v) = overrides.host {
        cfg.host = v;
    }
    if let Some(v) = overrides.port {
        cfg.port = v;
    }
    if let Some(v) = overrides.token {
        cfg.token = normalize_token(&v);
    }
    if let Some(v) = overrides.username {
        cfg.username = Some(v);
    }
    if let Some(v) = overrides.password {
        cfg.password = Some(v);
    }
    if let Some(v) = overrides.index_name {
        cfg.index_name = v;
    }
    if let Some(v) = overrides.source {
        cfg.source = v;
    }
    if let Some(v) = overrides.source_type {
        cfg.source_type = v;
    }
    if let Some(v) = overrides.metrics_source_type {
        cfg.metrics_source_type = v;
    }
    if let Some(v) = overrides.layout {
        cfg.layout = v.parse().map_err(|e| {
            TracestashError::Config(format!("bad layout in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.default_lookback {
        cfg.default_lookback = humantime::parse_duration(&v).map_err(|e| {
            TracestashError::Config(format!("bad default_lookback in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.verify_tls {
        cfg.verify_tls = v;
    }
    if let Some(v) = overrides.request_timeout {
        cfg.request_timeout = humantime::parse_duration(&v).map_err(|e| {
            TracestashError::Config(format!("bad request_timeout in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.collector_addr {
        cfg.collector_addr = v;
    }
    Ok(())
}

/// `""` and `"_"` are placeholders for "no token".
fn normalize_token(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    match trimmed {
        "" | "_" => None,
        t => Some(t.to_string()),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_points_at_local_management_port() {
        let cfg = Config::default();
        assert_eq!(cfg.base_url(), "https://localhost:8089");
        assert_eq!(cfg.index_name, "zipkin");
        assert_eq!(cfg.layout, Layout::Otel);
        assert_eq!(cfg.default_lookback, Duration::from_secs(86_400));
        assert_eq!(cfg.metrics_source_type, "mts");
    }

    #[test]
    fn layout_parses_aliases() {
        assert_eq!("zipkin".parse::<Layout>().unwrap(), Layout::Classic);
        assert_eq!("Classic".parse::<Layout>().unwrap(), Layout::Classic);
        assert_eq!("otel".parse::<Layout>().unwrap(), Layout::Otel);
        assert!("jaeger".parse::<Layout>().is_err());
    }

    #[test]
    fn placeholder_tokens_mean_none() {
        assert_eq!(normalize_token("_"), None);
        assert_eq!(normalize_token("  "), None);
        assert_eq!(normalize_token("abc"), Some("abc".to_string()));
    }

    #[test]
    fn token_wins_over_basic_auth() {
        let mut cfg = Config {
            username: Some("admin".to_string()),
            password: Some("changeme".to_string()),
            ..Config::default()
        };
        assert_eq!(cfg.basic_auth(), Some(("admin", "changeme")));
        cfg.token = Some("t0k".to_string());
        assert_eq!(cfg.basic_auth(), None);
    }

    #[test]
    fn apply_file_overrides_updates_fields() {
        let mut cfg = Config::default();
        let file = ConfigOverrides {
            scheme: Some("http".to_string()),
            port: Some(18089),
            token: Some("_".to_string()),
            layout: Some("classic".to_string()),
            default_lookback: Some("2h".to_string()),
            request_timeout: Some("3s".to_string()),
            verify_tls: Some(false),
            ..ConfigOverrides::default()
        };

        apply_overrides(&mut cfg, file, "config file").unwrap();

        assert_eq!(cfg.base_url(), "http://localhost:18089");
        assert_eq!(cfg.token, None);
        assert_eq!(cfg.layout, Layout::Classic);
        assert_eq!(cfg.default_lookback, Duration::from_secs(7_200));
        assert_eq!(cfg.request_timeout, Duration::from_secs(3));
        assert!(!cfg.verify_tls);
    }

    #[test]
    fn bad_values_name_their_source() {
        let mut cfg = Config::default();
        let file = ConfigOverrides {
            default_lookback: Some("soon".to_string()),
            ..ConfigOverrides::default()
        };
        let err = apply_overrides(&mut cfg, file, "config file").unwrap_err();
        assert!(err.to_string().contains("config file"));
    }

    #[test]
    fn file_overrides_parse_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "host = \"splunk.internal\"\nindex_name = \"traces\"\nlayout = \"zipkin\"\n\
             metrics_source_type = \"otel:metrics\"\n",
        )
        .unwrap();

        let overrides = load_file_overrides(&path).unwrap().unwrap();
        let mut cfg = Config::default();
        apply_overrides(&mut cfg, overrides, "config file").unwrap();
        assert_eq!(cfg.host, "splunk.internal");
        assert_eq!(cfg.index_name, "traces");
        assert_eq!(cfg.layout, Layout::Classic);
        assert_eq!(cfg.metrics_source_type, "otel:metrics");

        assert!(load_file_overrides(&dir.path().join("missing.toml")).unwrap().is_none());
    }
}
