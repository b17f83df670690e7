//! Scheduler and HTTP transport configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::traffic::FALLBACK_ESTIMATE_BYTES;

/// Scheduler settings. Missing fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval of the safety-net admission pass.
    pub admission_interval_ms: u64,
    /// Interval at which changed traffic records are persisted.
    pub flush_interval_ms: u64,
    /// JSON traffic store location; in-memory when unset.
    pub store_path: Option<PathBuf>,
    /// Size estimate for identities that never completed.
    pub fallback_estimate_bytes: u64,
    /// EWMA weight of new bandwidth samples; the latest sample wins when unset.
    pub bandwidth_smoothing: Option<f64>,
    /// Settings of the bundled HTTP transport.
    pub http: HttpConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            admission_interval_ms: 2000,
            flush_interval_ms: 5000,
            store_path: None,
            fallback_estimate_bytes: FALLBACK_ESTIMATE_BYTES,
            bandwidth_smoothing: None,
            http: HttpConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Loads a TOML or JSON config, chosen by file extension, and validates it.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: SchedulerConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects zero intervals and smoothing weights outside (0, 1].
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.admission_interval_ms == 0 {
            anyhow::bail!("admission_interval_ms must be positive");
        }
        if self.flush_interval_ms == 0 {
            anyhow::bail!("flush_interval_ms must be positive");
        }
        if let Some(alpha) = self.bandwidth_smoothing {
            if !(alpha > 0.0 && alpha <= 1.0) {
                anyhow::bail!("bandwidth_smoothing must be in (0, 1], got {}", alpha);
            }
        }
        Ok(())
    }

    /// Admission interval as a `Duration`.
    pub fn admission_interval(&self) -> Duration {
        Duration::from_millis(self.admission_interval_ms.max(1))
    }

    /// Flush interval as a `Duration`.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

/// Settings for [`HttpTransport`](crate::http::HttpTransport).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Connect timeout.
    pub connect_timeout_secs: u64,
    /// Whole-transfer timeout.
    pub request_timeout_secs: u64,
    /// Headers sent with every request.
    pub default_headers: BTreeMap<String, String>,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            request_timeout_secs: 120,
            default_headers: BTreeMap::new(),
            user_agent: format!("netsched/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}
