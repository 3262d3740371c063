use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::Path, path::PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    #[serde(default)]
    pub tariff: TariffConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Vendor device identifier
    pub id: String,
    /// LAN address of the plug, forwarded to the gateway
    pub address: Option<String>,
    /// Shared secret used by the gateway to talk to the plug
    pub local_key: Option<String>,
    /// Protocol version, e.g. "3.5"
    pub version: Option<String>,
    /// Base URL of the local gateway (e.g. "http://127.0.0.1:8888")
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:8888".into()
}

fn default_timeout_secs() -> u64 {
    5
}

impl DeviceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TariffConfig {
    /// Price per kWh, in BDT
    #[serde(default = "default_unit_price")]
    pub unit_price: f64,
}

fn default_unit_price() -> f64 {
    6.0
}

impl Default for TariffConfig {
    fn default() -> Self {
        Self {
            unit_price: default_unit_price(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_path")]
    pub path: PathBuf,
    /// Minimum spacing between persisted rows
    #[serde(default = "default_min_spacing_secs")]
    pub min_spacing_secs: u64,
}

fn default_history_path() -> PathBuf {
    PathBuf::from("energy_history.csv")
}

fn default_min_spacing_secs() -> u64 {
    60
}

/// Largest spacing that still fits a `chrono::Duration`.
const MAX_MIN_SPACING_SECS: u64 = (i64::MAX / 1000) as u64;

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
            min_spacing_secs: default_min_spacing_secs(),
        }
    }
}

impl HistoryConfig {
    pub fn min_spacing(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.min_spacing_secs as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    60
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Config {
    /// Load YAML from disk, substitute $(VAR)/${VAR} with env vars, then parse.
    /// Afterwards, if PLUG_GATEWAY_URL env is set, override `device.gateway_url`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let raw = fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, anyhow::Error> {
        let expanded = expand_env_placeholders(raw)?;
        let mut cfg: Self = serde_yaml::from_str(&expanded)?;

        if let Ok(url) = std::env::var("PLUG_GATEWAY_URL") {
            cfg.device.gateway_url = url;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        anyhow::ensure!(!self.device.id.trim().is_empty(), "device.id must be set");
        anyhow::ensure!(
            !self.device.gateway_url.trim().is_empty(),
            "device.gateway_url must be set"
        );
        anyhow::ensure!(
            self.device.timeout_secs > 0,
            "device.timeout_secs must be positive"
        );
        anyhow::ensure!(
            self.poll.interval_secs > 0,
            "poll.interval_secs must be positive"
        );
        anyhow::ensure!(
            (1..=MAX_MIN_SPACING_SECS).contains(&self.history.min_spacing_secs),
            "history.min_spacing_secs must be between 1 and {}",
            MAX_MIN_SPACING_SECS
        );
        anyhow::ensure!(
            self.tariff.unit_price.is_finite() && self.tariff.unit_price >= 0.0,
            "tariff.unit_price must be a non-negative number"
        );
        Ok(())
    }

    pub fn api_bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

/// Expand $(VAR) and ${VAR} placeholders using environment variables.
/// "$$" becomes a literal "$" (escape), so local keys containing '$' survive.
fn expand_env_placeholders(input: &str) -> Result<String, anyhow::Error> {
    use anyhow::Context;

    let mut out = String::with_capacity(input.len());
    let mut it = input.chars().peekable();

    while let Some(c) = it.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let close = match it.peek().copied() {
            Some('$') => {
                it.next();
                out.push('$');
                continue;
            }
            Some('(') => ')',
            Some('{') => '}',
            _ => {
                out.push('$');
                continue;
            }
        };
        it.next();
        let var = read_until(&mut it, close)
            .with_context(|| format!("unterminated env placeholder: missing '{}'", close))?;
        let val = std::env::var(&var)
            .with_context(|| format!("missing environment variable: {}", var))?;
        out.push_str(&val);
    }

    Ok(out)
}

/// Read characters until `end`, consuming the delimiter.
fn read_until<I>(it: &mut std::iter::Peekable<I>, end: char) -> Option<String>
where
    I: Iterator<Item = char>,
{
    let mut buf = String::new();
    for ch in it.by_ref() {
        if ch == end {
            return Some(buf);
        }
        buf.push(ch);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_braces_and_parens() {
        std::env::set_var("PEM_TEST_KEY", "s3cret");
        std::env::set_var("PEM_TEST_HOST", "192.168.68.107");

        let out = expand_env_placeholders("key: ${PEM_TEST_KEY}\nip: $(PEM_TEST_HOST)").unwrap();

        assert_eq!(out, "key: s3cret\nip: 192.168.68.107");
    }

    #[test]
    fn test_expand_escape_and_bare_dollar() {
        let out = expand_env_placeholders("a: $$x\nb: 5$").unwrap();
        assert_eq!(out, "a: $x\nb: 5$");
    }

    #[test]
    fn test_expand_unterminated() {
        assert!(expand_env_placeholders("key: ${NEVER_CLOSED").is_err());
    }

    #[test]
    fn test_expand_missing_variable() {
        assert!(expand_env_placeholders("key: ${PEM_TEST_SURELY_UNSET_VAR}").is_err());
    }

    #[test]
    fn test_defaults_applied() {
        let cfg: Config = serde_yaml::from_str("device:\n  id: plug-1\n").unwrap();

        assert_eq!(cfg.device.gateway_url, "http://127.0.0.1:8888");
        assert_eq!(cfg.device.timeout_secs, 5);
        assert_eq!(cfg.tariff.unit_price, 6.0);
        assert_eq!(cfg.history.path, PathBuf::from("energy_history.csv"));
        assert_eq!(cfg.history.min_spacing_secs, 60);
        assert_eq!(cfg.poll.interval_secs, 60);
        assert_eq!(cfg.api_bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_validate_rejects_negative_price() {
        let mut cfg: Config = serde_yaml::from_str("device:\n  id: plug-1\n").unwrap();
        cfg.tariff.unit_price = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_min_spacing() {
        let mut cfg: Config = serde_yaml::from_str("device:\n  id: plug-1\n").unwrap();

        cfg.history.min_spacing_secs = 0;
        assert!(cfg.validate().is_err());

        cfg.history.min_spacing_secs = u64::MAX;
        assert!(cfg.validate().is_err());

        cfg.history.min_spacing_secs = MAX_MIN_SPACING_SECS;
        assert!(cfg.validate().is_ok());
        assert!(cfg.history.min_spacing() > chrono::Duration::zero());
    }

    #[test]
    fn test_validate_rejects_blank_device_id() {
        let cfg: Config = serde_yaml::from_str("device:\n  id: \"  \"\n").unwrap();
        assert!(cfg.validate().is_err());
    }
}
