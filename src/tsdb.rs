//! Time-series DB generation: filter raw events window by window and persist them.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::config::FilterConfig;
use crate::event::loader::EventLoader;
use crate::filter::{apply_filter, FilterOutcome, FilterRecord};
use crate::series::TimeWindow;
use crate::storage::TimeSeriesDb;

/// Counts of filter decisions and stored lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TsdbSummary {
    pub windows: usize,
    pub events: usize,
    pub none: usize,
    pub constant: usize,
    pub period: usize,
    pub lines: usize,
}

impl TsdbSummary {
    fn count(&mut self, outcome: &FilterOutcome) {
        self.events += 1;
        match outcome {
            FilterOutcome::None { .. } => self.none += 1,
            FilterOutcome::Const { .. } => self.constant += 1,
            FilterOutcome::Period { .. } => self.period += 1,
        }
    }

    pub fn merge(&mut self, other: &TsdbSummary) {
        self.windows += other.windows;
        self.events += other.events;
        self.none += other.none;
        self.constant += other.constant;
        self.period += other.period;
        self.lines += other.lines;
    }
}

impl std::fmt::Display for TsdbSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} windows, {} events (none {}, const {}, period {}), {} lines",
            self.windows, self.events, self.none, self.constant, self.period, self.lines
        )
    }
}

/// Filter every candidate event of one window. Without `db` nothing is written.
pub fn make_tsdb_window(
    conf: &FilterConfig,
    db: Option<&TimeSeriesDb>,
    loader: &dyn EventLoader,
    window: &TimeWindow,
) -> Result<TsdbSummary> {
    let mut summary = TsdbSummary {
        windows: 1,
        ..TsdbSummary::default()
    };
    for event in loader.candidate_events(window)? {
        let Some(timestamps) = loader.load_timestamps(&event, window)? else {
            continue;
        };
        if timestamps.is_empty() {
            continue;
        }
        let outcome = apply_filter(conf, loader, &event, window, timestamps)
            .with_context(|| format!("filtering {} failed", event))?;
        summary.count(&outcome);
        summary.lines += match db {
            Some(db) => db.store_outcome(window, &event, &outcome)?,
            None => outcome.timestamps().len(),
        };
        debug!(record = %FilterRecord::new(*window, event, &outcome), "filtered");
    }
    info!(%window, summary = %summary, "window done");
    Ok(summary)
}

/// Process `windows` on up to `workers` blocking threads at a time.
///
/// Each window owns its (event, window) keys, so workers never write the same rows.
pub async fn make_tsdb(
    conf: Arc<FilterConfig>,
    db: Option<TimeSeriesDb>,
    loader: Arc<dyn EventLoader>,
    windows: Vec<TimeWindow>,
    workers: usize,
) -> Result<TsdbSummary> {
    let mut total = TsdbSummary::default();
    for chunk in windows.chunks(workers.max(1)) {
        let mut set = JoinSet::new();
        for window in chunk.iter().copied() {
            let conf = conf.clone();
            let db = db.clone();
            let loader = loader.clone();
            set.spawn_blocking(move || {
                make_tsdb_window(&conf, db.as_ref(), loader.as_ref(), &window)
                    .with_context(|| format!("window {}", window))
            });
        }
        while let Some(res) = set.join_next().await {
            total.merge(&res??);
        }
    }
    info!(summary = %total, "time-series db generation finished");
    Ok(total)
}
