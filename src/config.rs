//! Bot configuration, loaded from TOML with environment overrides.

use crate::transport::{Endpoint, TlsTrust};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Polls closer together than this get the bot rate-limited.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// The watchdog fires after this many poll intervals without a response.
pub const WATCHDOG_FACTOR: u32 = 10;

/// Smallest chunk the upload loop will stream.
pub const MIN_UPLOAD_CHUNK: usize = 512;

pub const TOKEN_ENV: &str = "TELEPOLL_BOT_TOKEN";

/// How the transmit/receive cycle is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    /// Inline on a current-thread runtime, worker on a multi-thread one.
    #[default]
    Auto,
    /// Exchanges run on the caller's task.
    Inline,
    /// A spawned task owns the exchange cycle.
    Worker,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    /// PEM trust anchors; `~` and `$VARS` are expanded.
    #[serde(default)]
    pub ca_cert_path: Option<String>,

    /// Hex SHA-256 of the server leaf certificate.
    #[serde(default)]
    pub fingerprint: Option<String>,

    /// Skip certificate verification entirely.
    #[serde(default)]
    pub insecure: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BotConfig {
    #[serde(default)]
    pub token: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Server-side wait of `getUpdates`, 0 for short polling.
    #[serde(default)]
    pub long_poll_timeout_secs: u32,

    #[serde(default = "default_allowed_updates")]
    pub allowed_updates: Vec<String>,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Fixed address tried when the hostname cannot be reached.
    #[serde(default = "default_fallback_address")]
    pub fallback_address: Option<String>,

    /// When false the fixed address is tried first.
    #[serde(default = "default_true")]
    pub use_dns: bool,

    #[serde(default)]
    pub regime: Regime,

    #[serde(default = "default_upload_chunk_bytes")]
    pub upload_chunk_bytes: usize,

    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    #[serde(default)]
    pub tls: TlsConfig,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_allowed_updates() -> Vec<String> {
    vec!["message".to_string(), "callback_query".to_string()]
}

fn default_host() -> String {
    "api.telegram.org".to_string()
}

fn default_port() -> u16 {
    443
}

fn default_fallback_address() -> Option<String> {
    Some("149.154.167.220".to_string())
}

fn default_true() -> bool {
    true
}

fn default_upload_chunk_bytes() -> usize {
    4096
}

fn default_max_payload_bytes() -> usize {
    64 * 1024
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            poll_interval_ms: default_poll_interval_ms(),
            long_poll_timeout_secs: 0,
            allowed_updates: default_allowed_updates(),
            host: default_host(),
            port: default_port(),
            fallback_address: default_fallback_address(),
            use_dns: true,
            regime: Regime::Auto,
            upload_chunk_bytes: default_upload_chunk_bytes(),
            max_payload_bytes: default_max_payload_bytes(),
            tls: TlsConfig::default(),
        }
    }
}

impl BotConfig {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    /// `<config dir>/telepoll/config.toml` for the current platform.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "telepoll", "telepoll")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| anyhow::anyhow!("invalid bot config: {e}"))?;
        Ok(config)
    }

    /// Read, apply the token override from the environment and validate.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let mut config = Self::from_toml_str(&text)
            .map_err(|e| anyhow::anyhow!("{e} ({})", path.display()))?;
        config.apply_env();

        if let Err(errors) = config.validate() {
            anyhow::bail!("bot config errors:\n  {}", errors.join("\n  "));
        }
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.trim().is_empty() {
                self.token = token.trim().to_string();
            }
        }
    }

    /// Collect every semantic problem instead of stopping at the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.token.trim().is_empty() {
            errors.push(format!("token must not be empty (or set {TOKEN_ENV})"));
        } else if !self.token.contains(':') {
            errors.push("token should look like `<bot id>:<secret>`".to_string());
        }
        if self.host.trim().is_empty() {
            errors.push("host must not be empty".to_string());
        }
        if let Some(addr) = &self.fallback_address {
            if addr.parse::<IpAddr>().is_err() {
                errors.push(format!("fallback_address `{addr}` is not an IP address"));
            }
        }
        if self.allowed_updates.is_empty() {
            errors.push("allowed_updates must list at least one category".to_string());
        }
        if self.max_payload_bytes < 1024 {
            errors.push(format!(
                "max_payload_bytes must be at least 1024, got {}",
                self.max_payload_bytes
            ));
        }
        if self.tls.insecure && self.tls.fingerprint.is_some() {
            errors.push("tls.insecure and tls.fingerprint are mutually exclusive".to_string());
        }
        if let Some(fp) = &self.tls.fingerprint {
            if let Err(e) = TlsTrust::fingerprint_from_hex(fp) {
                errors.push(format!("tls.fingerprint: {e}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Configured interval, never below [`MIN_POLL_INTERVAL`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms).max(MIN_POLL_INTERVAL)
    }

    pub fn watchdog_interval(&self) -> Duration {
        self.poll_interval() * WATCHDOG_FACTOR
    }

    pub fn upload_chunk(&self) -> usize {
        self.upload_chunk_bytes.max(MIN_UPLOAD_CHUNK)
    }

    /// Endpoints in the order they are tried.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let host = Endpoint::Host {
            name: self.host.clone(),
            port: self.port,
        };
        let fixed = self
            .fallback_address
            .as_deref()
            .and_then(|a| a.parse::<IpAddr>().ok())
            .map(|ip| Endpoint::Address(SocketAddr::new(ip, self.port)));

        match (self.use_dns, fixed) {
            (true, Some(fixed)) => vec![host, fixed],
            (false, Some(fixed)) => vec![fixed, host],
            (_, None) => vec![host],
        }
    }

    /// Resolve the trust settings, reading the CA file if one is configured.
    pub fn tls_trust(&self) -> anyhow::Result<TlsTrust> {
        if self.tls.insecure {
            return Ok(TlsTrust::Insecure);
        }
        if let Some(fp) = &self.tls.fingerprint {
            return Ok(TlsTrust::fingerprint_from_hex(fp)?);
        }
        if let Some(path) = &self.tls.ca_cert_path {
            let expanded = shellexpand::full(path)
                .map_err(|e| anyhow::anyhow!("cannot expand tls.ca_cert_path: {e}"))?
                .into_owned();
            let pem = std::fs::read(&expanded)
                .map_err(|e| anyhow::anyhow!("failed to read CA file {expanded}: {e}"))?;
            return Ok(TlsTrust::CaPem(pem));
        }
        Ok(TlsTrust::WebPkiRoots)
    }
}
