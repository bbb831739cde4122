//! logdag -- causal analysis input pipeline for log and SNMP events.
//!
//! Raw event timestamps are discretized, filtered for periodic and linear noise,
//! stored in a time-series DB, and finally aligned into an event matrix for a
//! causal-discovery backend.

pub mod config;
pub mod dag;
pub mod event;
pub mod filter;
pub mod series;
pub mod storage;
pub mod tsdb;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use config::Config;
use event::area::AreaTest;
use event::loader::{EventLoader, RecordLoader, TsdbLoader};
use event::matrix::{input_paths, MatrixBuilder};
use event::{EventError, EventSource};
use series::TimeWindow;
use storage::TimeSeriesDb;
use tsdb::TsdbSummary;

/// Filter the raw log records in `input` over the configured whole term.
///
/// With `dry` the database is left untouched.
pub async fn make_tsdb(conf: &Config, input: &Path, dry: bool) -> Result<TsdbSummary> {
    let windows = conf.general.windows()?;
    let loader: Arc<dyn EventLoader> = Arc::new(RecordLoader::from_jsonl(input, EventSource::Log)?);
    let db = if dry {
        info!("dry run, nothing will be stored");
        None
    } else {
        Some(TimeSeriesDb::open(&conf.database.path)?)
    };
    tsdb::make_tsdb(
        Arc::new(conf.filter.clone()),
        db,
        loader,
        windows,
        conf.general.workers,
    )
    .await
}

/// Build the event matrix of `area` for each window and write it to the output dir.
///
/// Windows without any event are skipped with a warning. Returns the written
/// matrix files.
pub fn make_input(conf: &Config, windows: &[TimeWindow], area: &str) -> Result<Vec<PathBuf>> {
    let db = TimeSeriesDb::open(&conf.database.path)?;
    let area_test = AreaTest::from_config(conf.dag.area, conf.dag.area_def.as_deref())?;
    let snmp = match &conf.dag.snmp_input {
        Some(path) if conf.dag.sources.contains(&EventSource::Snmp) => {
            Some(RecordLoader::from_jsonl(path, EventSource::Snmp)?)
        }
        _ => None,
    };

    let mut builder = MatrixBuilder::new(&conf.dag, area_test)
        .with_loader(Box::new(TsdbLoader::new(db, EventSource::Log)));
    if let Some(snmp) = snmp {
        builder = builder.with_loader(Box::new(snmp));
    }

    let out_dir = &conf.dag.output_dir;
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let mut written = Vec::new();
    for window in windows {
        let (matrix, evmap) = match builder.build(window, area) {
            Ok(built) => built,
            Err(EventError::NoData) => {
                warn!(%window, %area, "no data, skip");
                continue;
            }
            Err(e) => return Err(e).with_context(|| format!("window {}", window)),
        };
        let (matrix_path, evmap_path) = input_paths(out_dir, window, area);
        matrix.dump(&matrix_path)?;
        evmap.dump(&evmap_path)?;
        info!(path = %matrix_path.display(), events = evmap.len(), "input written");
        written.push(matrix_path);
    }
    Ok(written)
}
