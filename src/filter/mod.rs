//! Noise filters applied to event timestamps before they enter the time-series DB.
//!
//! An action names the sub-filters to try and their order. The first sub-filter that
//! fires decides the outcome; when none fires the original timestamps pass through.

pub mod linear;
pub mod periodic;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::FilterConfig;
use crate::event::loader::EventLoader;
use crate::event::EventDefinition;
use crate::series::TimeWindow;

use self::periodic::{filter_periodic, PeriodicMethod};

/// Filter action as configured by `filter.action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterAction {
    #[serde(rename = "remove")]
    Remove,
    #[serde(rename = "replace")]
    Replace,
    #[serde(rename = "linear")]
    Linear,
    #[serde(rename = "remove+linear")]
    RemoveLinear,
    #[serde(rename = "replace+linear")]
    ReplaceLinear,
    #[serde(rename = "linear+remove")]
    LinearRemove,
    #[serde(rename = "linear+replace")]
    LinearReplace,
}

/// Which detector the periodic step of an action uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodicTest {
    #[default]
    Fourier,
    Corr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStep {
    Periodic(PeriodicMethod),
    Linear,
}

impl FilterAction {
    /// Sub-filters in the order they are tried.
    pub fn steps(&self, test: PeriodicTest) -> Vec<FilterStep> {
        let periodic = |fourier: PeriodicMethod| {
            FilterStep::Periodic(match test {
                PeriodicTest::Fourier => fourier,
                PeriodicTest::Corr => PeriodicMethod::Corr,
            })
        };
        match self {
            FilterAction::Remove => vec![periodic(PeriodicMethod::Remove)],
            FilterAction::Replace => vec![periodic(PeriodicMethod::Replace)],
            FilterAction::Linear => vec![FilterStep::Linear],
            FilterAction::RemoveLinear => {
                vec![periodic(PeriodicMethod::Remove), FilterStep::Linear]
            }
            FilterAction::ReplaceLinear => {
                vec![periodic(PeriodicMethod::Replace), FilterStep::Linear]
            }
            FilterAction::LinearRemove => {
                vec![FilterStep::Linear, periodic(PeriodicMethod::Remove)]
            }
            FilterAction::LinearReplace => {
                vec![FilterStep::Linear, periodic(PeriodicMethod::Replace)]
            }
        }
    }
}

impl std::fmt::Display for FilterAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FilterAction::Remove => "remove",
            FilterAction::Replace => "replace",
            FilterAction::Linear => "linear",
            FilterAction::RemoveLinear => "remove+linear",
            FilterAction::ReplaceLinear => "replace+linear",
            FilterAction::LinearRemove => "linear+remove",
            FilterAction::LinearReplace => "linear+replace",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterStatus {
    None,
    Const,
    Period,
}

impl std::fmt::Display for FilterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterStatus::None => write!(f, "none"),
            FilterStatus::Const => write!(f, "const"),
            FilterStatus::Period => write!(f, "period"),
        }
    }
}

impl std::str::FromStr for FilterStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(FilterStatus::None),
            "const" => Ok(FilterStatus::Const),
            "period" => Ok(FilterStatus::Period),
            other => anyhow::bail!("unknown filter status: {}", other),
        }
    }
}

/// Result of filtering one event's timestamps in one window.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    /// Nothing fired; the original timestamps are kept verbatim.
    None { timestamps: Vec<DateTime<Utc>> },
    /// Occurrences accumulate linearly; the event is reduced to its daily rate.
    Const { daily_rate: f64 },
    /// A periodic component was found.
    Period {
        residual: Option<Vec<DateTime<Utc>>>,
        interval: chrono::Duration,
    },
}

impl FilterOutcome {
    pub fn status(&self) -> FilterStatus {
        match self {
            FilterOutcome::None { .. } => FilterStatus::None,
            FilterOutcome::Const { .. } => FilterStatus::Const,
            FilterOutcome::Period { .. } => FilterStatus::Period,
        }
    }

    /// Daily rate for `const`, period in seconds for `period`.
    pub fn value(&self) -> Option<f64> {
        match self {
            FilterOutcome::None { .. } => None,
            FilterOutcome::Const { daily_rate } => Some(*daily_rate),
            FilterOutcome::Period { interval, .. } => Some(interval.num_seconds() as f64),
        }
    }

    /// Timestamps to persist after filtering.
    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        match self {
            FilterOutcome::None { timestamps } => timestamps,
            FilterOutcome::Const { .. } => &[],
            FilterOutcome::Period { residual, .. } => residual.as_deref().unwrap_or(&[]),
        }
    }
}

/// Persisted filter decision for one (event, window).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRecord {
    pub window: TimeWindow,
    pub event: EventDefinition,
    pub status: FilterStatus,
    pub value: Option<f64>,
}

impl FilterRecord {
    pub fn new(window: TimeWindow, event: EventDefinition, outcome: &FilterOutcome) -> Self {
        Self {
            window,
            event,
            status: outcome.status(),
            value: outcome.value(),
        }
    }
}

impl std::fmt::Display for FilterRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}, {}: {}",
            self.window.start.date_naive(),
            self.event,
            self.status
        )?;
        if let Some(v) = self.value {
            write!(f, "[{}]", v)?;
        }
        Ok(())
    }
}

/// Apply the configured filter action to one event's timestamps.
pub fn apply_filter(
    conf: &FilterConfig,
    loader: &dyn EventLoader,
    event: &EventDefinition,
    window: &TimeWindow,
    timestamps: Vec<DateTime<Utc>>,
) -> Result<FilterOutcome> {
    if !conf.enabled {
        return Ok(FilterOutcome::None { timestamps });
    }

    for step in conf.action.steps(conf.periodic_test) {
        match step {
            FilterStep::Periodic(method) => {
                if let Some(found) =
                    filter_periodic(conf, loader, event, window, &timestamps, method)?
                {
                    return Ok(FilterOutcome::Period {
                        residual: found.residual,
                        interval: found.interval,
                    });
                }
            }
            FilterStep::Linear => {
                let fired = linear::filter_linear(
                    &timestamps,
                    window,
                    conf.linear_binsize,
                    conf.linear_threshold,
                    conf.linear_count,
                )?;
                if fired {
                    return Ok(FilterOutcome::Const {
                        daily_rate: timestamps.len() as f64 / window.days(),
                    });
                }
            }
        }
    }
    Ok(FilterOutcome::None { timestamps })
}
