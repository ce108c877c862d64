//! Engine configuration: TOML loading, defaults, and validation.
//!
//! Every key is optional; an empty file yields [`EngineConfig::default`].
//!
//! ```toml
//! page_size = 1000
//! debounce = "500ms"
//! min_fetch_period = "10m"
//! fetch_period_divisor = 4
//! min_lookback = "20m"
//! lookback_spans = 2
//! dedupe_append = true
//! endpoint = "https://gateway.example/"
//!
//! [export]
//! field_path = "usage"
//! timezone = "Europe/London"
//!
//! [export.labels.usage]
//! label = "Usage"
//! unit = "kWh"
//! ```
//!
//! Environment overrides:
//! - `METER_HISTORY_CONFIG`: path of the file [`from_env_or_default`] loads;
//! - `METER_HISTORY_ENDPOINT`: replaces `endpoint`.

use std::{num::NonZeroU32, path::Path};

use anyhow::{Context, bail};
use chrono::Duration;
use chrono_tz::Tz;
use history_client::providers::gateway::ENDPOINT_ENV;
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};
use shared_utils::env::{get_env_var_opt, parse_env_var};
use toml::from_str;
use tracing::debug;

use crate::{
    export::{ExportOptions, FieldDictionary},
    retriever::RetrieveOptions,
    window::Timing,
};

/// Env var naming the config file.
pub const CONFIG_ENV: &str = "METER_HISTORY_CONFIG";

/// Env var overriding `page_size`.
pub const PAGE_SIZE_ENV: &str = "METER_HISTORY_PAGE_SIZE";

/// Engine tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Records requested per page.
    pub page_size: NonZeroU32,
    /// Quiet period before a triggered cycle runs.
    #[serde(with = "shared_utils::duration::compact")]
    pub debounce: Duration,
    /// Lower bound of the refresh cadence.
    #[serde(with = "shared_utils::duration::compact")]
    pub min_fetch_period: Duration,
    /// Refresh cadence is the span divided by this.
    pub fetch_period_divisor: NonZeroU32,
    /// Lower bound of the lookback margin.
    #[serde(with = "shared_utils::duration::compact")]
    pub min_lookback: Duration,
    /// Lookback margin in spans.
    pub lookback_spans: u32,
    /// Drop re-fetched boundary records on append.
    pub dedupe_append: bool,
    /// Gateway base URL.
    pub endpoint: Option<String>,
    /// CSV export settings.
    pub export: ExportConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let timing = Timing::default();
        Self {
            page_size: nonzero!(1000u32),
            debounce: Duration::milliseconds(500),
            min_fetch_period: timing.min_fetch_period,
            fetch_period_divisor: timing.fetch_period_divisor,
            min_lookback: timing.min_lookback,
            lookback_spans: timing.lookback_spans,
            dedupe_append: true,
            endpoint: None,
            export: ExportConfig::default(),
        }
    }
}

/// `[export]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    /// Dotted path of the exported value.
    pub field_path: String,
    /// IANA zone name for the time column.
    pub timezone: String,
    /// Header labels keyed by field path.
    pub labels: FieldDictionary,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            field_path: "usage".to_string(),
            timezone: "UTC".to_string(),
            labels: FieldDictionary::new(),
        }
    }
}

impl ExportConfig {
    /// Parsed zone.
    pub fn tz(&self) -> anyhow::Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("unknown timezone {:?}: {e}", self.timezone))
    }

    /// Resolve into projector options.
    pub fn options(&self) -> anyhow::Result<ExportOptions> {
        Ok(ExportOptions {
            field_path: self.field_path.clone(),
            timezone: self.tz()?,
            labels: self.labels.clone(),
        })
    }
}

impl EngineConfig {
    /// Lookback and cadence rules.
    pub fn timing(&self) -> Timing {
        Timing {
            min_fetch_period: self.min_fetch_period,
            fetch_period_divisor: self.fetch_period_divisor,
            min_lookback: self.min_lookback,
            lookback_spans: self.lookback_spans,
        }
    }

    /// Paging and merge knobs.
    pub fn retrieve_options(&self) -> RetrieveOptions {
        RetrieveOptions {
            page_size: self.page_size,
            dedupe_append: self.dedupe_append,
        }
    }

    /// Debounce delay as a std duration.
    pub fn debounce_delay(&self) -> std::time::Duration {
        // validated non-negative
        self.debounce.to_std().unwrap_or_default()
    }

    /// Reject values the engine can't run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.debounce < Duration::zero() {
            bail!("debounce must not be negative");
        }
        if self.min_fetch_period <= Duration::zero() {
            bail!("min_fetch_period must be positive");
        }
        if self.min_lookback < Duration::zero() {
            bail!("min_lookback must not be negative");
        }
        if let Some(endpoint) = &self.endpoint {
            if endpoint.trim().is_empty() {
                bail!("endpoint cannot be empty");
            }
        }
        if self.export.field_path.trim().is_empty() {
            bail!("export.field_path cannot be empty");
        }
        self.export.tz()?;
        Ok(())
    }

    /// Apply `METER_HISTORY_ENDPOINT` and `METER_HISTORY_PAGE_SIZE` if set.
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        if let Some(endpoint) = get_env_var_opt(ENDPOINT_ENV) {
            debug!(%endpoint, "endpoint overridden from environment");
            self.endpoint = Some(endpoint);
        }
        if let Some(page_size) = parse_env_var::<NonZeroU32>(PAGE_SIZE_ENV)? {
            debug!(page_size = page_size.get(), "page size overridden from environment");
            self.page_size = page_size;
        }
        Ok(())
    }
}

/// Parse and validate a TOML string.
pub fn load_config_str(toml_str: &str) -> anyhow::Result<EngineConfig> {
    let cfg: EngineConfig = from_str(toml_str).context("failed to parse engine config TOML")?;
    cfg.validate().context("invalid engine config")?;
    Ok(cfg)
}

/// Read, parse and validate a TOML file.
pub fn load_config_path(path: impl AsRef<Path>) -> anyhow::Result<EngineConfig> {
    let text = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("read config file {}", path.as_ref().display()))?;
    load_config_str(&text)
}

/// Load `$METER_HISTORY_CONFIG` if set, else defaults; then apply env overrides.
pub fn from_env_or_default() -> anyhow::Result<EngineConfig> {
    let mut cfg = match get_env_var_opt(CONFIG_ENV) {
        Some(path) => load_config_path(&path)?,
        None => EngineConfig::default(),
    };
    cfg.apply_env()?;
    Ok(cfg)
}
