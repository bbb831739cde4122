//! TOML configuration for logdag.
//!
//! Layered like the rest of our tooling: an explicit path wins, then the
//! `LOGDAG_CONFIG` environment variable, then `/etc/logdag/logdag.toml`, then
//! compiled-in defaults. Every section is optional.

use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::event::area::AreaMode;
use crate::event::{EventSource, MergeKey};
use crate::filter::{FilterAction, PeriodicTest};
use crate::series::discretize::BinMethod;
use crate::series::TimeWindow;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub dag: DagConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would only fail once windows are being processed.
    pub fn validate(&self) -> Result<()> {
        ensure_positive(self.general.unit_term, "general.unit_term")?;
        ensure!(self.general.workers > 0, "general.workers must be at least 1");
        self.filter.validate()?;
        self.dag.validate()
    }

    /// Resolve the configuration source.
    ///
    /// An explicitly given path must load; the fallbacks only warn.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var("LOGDAG_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "LOGDAG_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new("/etc/logdag/logdag.toml");
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file of the time-series DB.
    pub path: PathBuf,
    /// Area group definition loaded into the `area` table by `init-area`.
    pub area_filename: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/logdag.db"),
            area_filename: None,
        }
    }
}

// ---------------------------------------------------------------------------
// General
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Whole term processed by `make-tsdb`, as `[start, end]`.
    pub whole_term: Option<[DateTime<Utc>; 2]>,
    /// Length of one processing window.
    #[serde(with = "duration_str")]
    pub unit_term: Duration,
    /// Windows filtered concurrently by `make-tsdb`.
    pub workers: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            whole_term: None,
            unit_term: Duration::days(1),
            workers: 4,
        }
    }
}

impl GeneralConfig {
    /// Processing windows covering the whole term.
    pub fn windows(&self) -> Result<Vec<TimeWindow>> {
        let [start, end] = self
            .whole_term
            .context("general.whole_term is not configured")?;
        let whole = TimeWindow::new(start, end)?;
        Ok(whole.split(self.unit_term)?)
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// One multi-resolution periodicity sample: look back `duration`, bin at `binsize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRule {
    #[serde(with = "duration_str")]
    pub duration: Duration,
    #[serde(with = "duration_str")]
    pub binsize: Duration,
}

/// Upper bound on the bins of one sample rule. The periodicity tests run a direct
/// DFT, so cost grows with the square of this number; one week at 1m resolution fits.
pub const MAX_SAMPLE_BINS: i64 = 10_080;

impl SampleRule {
    pub fn validate(&self) -> Result<()> {
        ensure_positive(self.duration, "sample rule duration")?;
        ensure_positive(self.binsize, "sample rule binsize")?;
        let bins = self.duration.num_milliseconds() / self.binsize.num_milliseconds();
        if bins < 1 {
            bail!("sample rule {}: binsize exceeds duration", self);
        }
        if bins > MAX_SAMPLE_BINS {
            bail!(
                "sample rule {}: {} bins exceeds the limit of {}",
                self,
                bins,
                MAX_SAMPLE_BINS
            );
        }
        Ok(())
    }
}

impl std::fmt::Display for SampleRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}_{}",
            duration_str::format(&self.duration),
            duration_str::format(&self.binsize)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: bool,
    pub action: FilterAction,
    pub periodic_test: PeriodicTest,
    #[serde(with = "duration_str")]
    pub linear_binsize: Duration,
    pub linear_threshold: f64,
    pub linear_count: usize,
    /// Minimum number of occurrences before testing periodicity.
    pub pre_count: usize,
    /// Minimum time span of occurrences before testing periodicity.
    #[serde(with = "duration_str")]
    pub pre_term: Duration,
    pub sample_rules: Vec<SampleRule>,
    /// Fisher g p-value below which the dominant frequency is significant.
    pub fourier_p_value: f64,
    /// Autocorrelation a candidate lag must reach.
    pub corr_threshold: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            action: FilterAction::RemoveLinear,
            periodic_test: PeriodicTest::Fourier,
            linear_binsize: Duration::minutes(10),
            linear_threshold: 0.5,
            linear_count: 10,
            pre_count: 5,
            pre_term: Duration::hours(6),
            sample_rules: vec![
                SampleRule {
                    duration: Duration::days(1),
                    binsize: Duration::minutes(1),
                },
                SampleRule {
                    duration: Duration::days(7),
                    binsize: Duration::hours(1),
                },
            ],
            fourier_p_value: 0.01,
            corr_threshold: 0.5,
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_positive(self.linear_binsize, "filter.linear_binsize")?;
        for rule in &self.sample_rules {
            rule.validate()?;
        }
        ensure!(
            self.fourier_p_value > 0.0 && self.fourier_p_value <= 1.0,
            "filter.fourier_p_value must be in (0, 1], got {}",
            self.fourier_p_value
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DAG input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DagConfig {
    pub sources: Vec<EventSource>,
    pub ci_bin_method: BinMethod,
    #[serde(with = "duration_str")]
    pub ci_bin_size: Duration,
    /// Stride between bins for slide/radius discretization.
    #[serde(with = "duration_str")]
    pub ci_bin_diff: Duration,
    pub binarize: bool,
    pub merge_duplicates: bool,
    pub merge_keys: Vec<MergeKey>,
    pub area: AreaMode,
    pub area_def: Option<PathBuf>,
    /// JSON-lines file with SNMP feature values.
    pub snmp_input: Option<PathBuf>,
    pub output_dir: PathBuf,
}

impl Default for DagConfig {
    fn default() -> Self {
        Self {
            sources: vec![EventSource::Log],
            ci_bin_method: BinMethod::Sequential,
            ci_bin_size: Duration::minutes(1),
            ci_bin_diff: Duration::minutes(1),
            binarize: true,
            merge_duplicates: false,
            merge_keys: vec![MergeKey::Host],
            area: AreaMode::All,
            area_def: None,
            snmp_input: None,
            output_dir: PathBuf::from("data/dag"),
        }
    }
}

impl DagConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_positive(self.ci_bin_size, "dag.ci_bin_size")?;
        ensure_positive(self.ci_bin_diff, "dag.ci_bin_diff")?;
        if self.ci_bin_method != BinMethod::Sequential && self.ci_bin_diff > self.ci_bin_size {
            bail!(
                "dag.ci_bin_diff ({}) exceeds dag.ci_bin_size ({}) for {} binning",
                duration_str::format(&self.ci_bin_diff),
                duration_str::format(&self.ci_bin_size),
                self.ci_bin_method
            );
        }
        Ok(())
    }
}

fn ensure_positive(d: Duration, name: &str) -> Result<()> {
    ensure!(
        d > Duration::zero(),
        "{} must be positive, got {}",
        name,
        duration_str::format(&d)
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Durations
// ---------------------------------------------------------------------------

/// Durations written as `<int><unit>` with unit `s`, `m`, `h`, `d` or `w`.
/// Negative values are rejected; zero is allowed and checked per field.
pub mod duration_str {
    use anyhow::{bail, Result};
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(s: &str) -> Result<Duration> {
        let s = s.trim();
        let Some(unit) = s.chars().last() else {
            bail!("empty duration");
        };
        let number: i64 = s[..s.len() - unit.len_utf8()]
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid duration: {:?}", s))?;
        if number < 0 {
            bail!("negative duration: {:?}", s);
        }
        let d = match unit {
            's' => Duration::seconds(number),
            'm' => Duration::minutes(number),
            'h' => Duration::hours(number),
            'd' => Duration::days(number),
            'w' => Duration::weeks(number),
            _ => bail!("invalid duration unit in {:?}", s),
        };
        Ok(d)
    }

    pub fn format(d: &Duration) -> String {
        let secs = d.num_seconds();
        for (unit, len) in [('w', 604_800), ('d', 86_400), ('h', 3_600), ('m', 60)] {
            if secs != 0 && secs % len == 0 {
                return format!("{}{}", secs / len, unit);
            }
        }
        format!("{}s", secs)
    }

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }
}
