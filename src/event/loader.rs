//! Source adapters that enumerate events and load their occurrences.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{EventDefinition, EventSource};
use crate::series::{Occurrence, TimeWindow};
use crate::storage::{TimeSeriesDb, TsQuery};

/// A source of events: log groups from the time-series DB, SNMP features, raw records.
///
/// `None` from a load means the event has no data in that window.
pub trait EventLoader: Send + Sync {
    fn source(&self) -> EventSource;

    /// Events with at least one occurrence in `window`, in a stable sorted order.
    fn candidate_events(&self, window: &TimeWindow) -> Result<Vec<EventDefinition>>;

    fn load_items(
        &self,
        event: &EventDefinition,
        window: &TimeWindow,
    ) -> Result<Option<Vec<Occurrence>>>;

    fn load_timestamps(
        &self,
        event: &EventDefinition,
        window: &TimeWindow,
    ) -> Result<Option<Vec<DateTime<Utc>>>> {
        Ok(self
            .load_items(event, window)?
            .map(|items| items.into_iter().map(|o| o.time).collect()))
    }
}

/// Loads filtered log timestamps back from the time-series DB.
#[derive(Clone)]
pub struct TsdbLoader {
    db: TimeSeriesDb,
    source: EventSource,
}

impl TsdbLoader {
    pub fn new(db: TimeSeriesDb, source: EventSource) -> Self {
        Self { db, source }
    }
}

impl EventLoader for TsdbLoader {
    fn source(&self) -> EventSource {
        self.source
    }

    fn candidate_events(&self, window: &TimeWindow) -> Result<Vec<EventDefinition>> {
        self.db.events(window, self.source)
    }

    fn load_items(
        &self,
        event: &EventDefinition,
        window: &TimeWindow,
    ) -> Result<Option<Vec<Occurrence>>> {
        let query = TsQuery::for_event(event, window);
        let timestamps = self.db.timestamps(&query)?;
        if timestamps.is_empty() {
            return Ok(None);
        }
        Ok(Some(crate::series::occurrences(&timestamps)))
    }
}

/// One raw record of the JSON-lines ingest format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub source: EventSource,
    pub host: String,
    pub group: String,
    pub time: DateTime<Utc>,
    /// Feature value for SNMP records; log lines count once.
    #[serde(default = "default_value")]
    pub value: f64,
}

fn default_value() -> f64 {
    1.0
}

/// In-memory loader over raw records, grouped per event and sorted by time.
#[derive(Debug, Clone, Default)]
pub struct RecordLoader {
    source: EventSource,
    events: BTreeMap<EventDefinition, Vec<Occurrence>>,
}

impl RecordLoader {
    /// Keep the records of `source`; others are dropped.
    pub fn from_records(source: EventSource, records: impl IntoIterator<Item = RawRecord>) -> Self {
        let mut events: BTreeMap<EventDefinition, Vec<Occurrence>> = BTreeMap::new();
        for r in records.into_iter().filter(|r| r.source == source) {
            events
                .entry(EventDefinition::new(r.source, r.host, r.group))
                .or_default()
                .push(Occurrence::new(r.time, r.value));
        }
        for items in events.values_mut() {
            items.sort_by_key(|o| o.time);
        }
        Self { source, events }
    }

    pub fn from_jsonl(path: &Path, source: EventSource) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open input: {}", path.display()))?;
        let mut records = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: RawRecord = serde_json::from_str(&line).with_context(|| {
                format!("invalid record at {}:{}", path.display(), lineno + 1)
            })?;
            records.push(record);
        }
        let loader = Self::from_records(source, records);
        info!(
            path = %path.display(),
            %source,
            events = loader.events.len(),
            "loaded raw records"
        );
        Ok(loader)
    }
}

impl EventLoader for RecordLoader {
    fn source(&self) -> EventSource {
        self.source
    }

    fn candidate_events(&self, window: &TimeWindow) -> Result<Vec<EventDefinition>> {
        Ok(self
            .events
            .iter()
            .filter(|(_, items)| items.iter().any(|o| window.contains(&o.time)))
            .map(|(ev, _)| ev.clone())
            .collect())
    }

    fn load_items(
        &self,
        event: &EventDefinition,
        window: &TimeWindow,
    ) -> Result<Option<Vec<Occurrence>>> {
        let Some(items) = self.events.get(event) else {
            debug!(%event, "unknown event");
            return Ok(None);
        };
        let start = items.partition_point(|o| o.time < window.start);
        let end = items.partition_point(|o| o.time < window.end);
        if start >= end {
            return Ok(None);
        }
        Ok(Some(items[start..end].to_vec()))
    }
}
