//! Builds the time-indexed event matrix fed to causal discovery.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::area::AreaTest;
use super::loader::EventLoader;
use super::{
    CompositeDefinition, EventDefinitionMap, EventError, EventId, EventNode, EventSource,
    MergeKey,
};
use crate::config::DagConfig;
use crate::series::{is_absent, TimeWindow};

/// Column `i` is the discretized series of event id `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMatrix {
    pub index: Vec<DateTime<Utc>>,
    pub columns: Vec<Vec<f64>>,
}

impl EventMatrix {
    pub fn n_events(&self) -> usize {
        self.columns.len()
    }

    pub fn n_bins(&self) -> usize {
        self.index.len()
    }

    pub fn column(&self, id: EventId) -> Option<&[f64]> {
        self.columns.get(id).map(Vec::as_slice)
    }

    pub fn dump(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write matrix: {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read matrix: {}", path.display()))?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// File names of the matrix and event map for one (area, window) input.
pub fn input_paths(dir: &Path, window: &TimeWindow, area: &str) -> (PathBuf, PathBuf) {
    let stem = format!("{}_{}", area, window.start.format("%Y%m%d"));
    (
        dir.join(format!("{}.matrix.json", stem)),
        dir.join(format!("{}.evmap.json", stem)),
    )
}

pub struct MatrixBuilder<'a> {
    conf: &'a DagConfig,
    area_test: AreaTest,
    loaders: Vec<Box<dyn EventLoader + 'a>>,
}

impl<'a> MatrixBuilder<'a> {
    pub fn new(conf: &'a DagConfig, area_test: AreaTest) -> Self {
        Self {
            conf,
            area_test,
            loaders: Vec::new(),
        }
    }

    pub fn with_loader(mut self, loader: Box<dyn EventLoader + 'a>) -> Self {
        self.loaders.push(loader);
        self
    }

    fn loader(&self, source: EventSource) -> Result<&dyn EventLoader, EventError> {
        self.loaders
            .iter()
            .find(|l| l.source() == source)
            .map(|l| &**l)
            .ok_or(EventError::MissingLoader(source))
    }

    /// Load and discretize every event of `area` in `window`.
    ///
    /// Sources are visited in configured order, events in loader order, so ids are
    /// reproducible for the same input.
    pub fn build(
        &self,
        window: &TimeWindow,
        area: &str,
    ) -> Result<(EventMatrix, EventDefinitionMap), EventError> {
        let conf = self.conf;
        let method = conf.ci_bin_method;
        let load_window = method.load_window(window, conf.ci_bin_size, conf.ci_bin_diff);

        let mut evmap = EventDefinitionMap::new();
        let mut columns = Vec::new();
        for source in &conf.sources {
            let loader = self.loader(*source)?;
            for event in loader.candidate_events(window)? {
                if !self.area_test.test(area, &event.host) {
                    continue;
                }
                let Some(items) = loader.load_items(&event, &load_window)? else {
                    debug!(%event, "no data, skip");
                    continue;
                };
                let series = method.discretize(
                    &items,
                    window,
                    conf.ci_bin_size,
                    conf.ci_bin_diff,
                    conf.binarize,
                )?;
                if is_absent(&series) {
                    debug!(%event, "empty series, skip");
                    continue;
                }
                evmap.add(event)?;
                columns.push(series);
            }
        }

        if columns.is_empty() {
            return Err(EventError::NoData);
        }

        let index = method.index(window, conf.ci_bin_size, conf.ci_bin_diff)?;
        let mut matrix = EventMatrix { index, columns };
        if conf.merge_duplicates {
            let before = evmap.len();
            (matrix, evmap) = merge_duplicates(&matrix, &evmap, &conf.merge_keys)?;
            info!(before, after = evmap.len(), "merged duplicate events");
        }
        info!(
            %area,
            events = matrix.n_events(),
            bins = matrix.n_bins(),
            "event matrix built"
        );
        Ok((matrix, evmap))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MergeGroupKey {
    series: Vec<u64>,
    source: Option<EventSource>,
    host: Option<String>,
    group: Option<String>,
}

/// Collapse events whose series are bit-identical and whose merge-key attributes agree.
///
/// Ids are reassigned in order of first appearance into a fresh map.
pub fn merge_duplicates(
    matrix: &EventMatrix,
    evmap: &EventDefinitionMap,
    keys: &[MergeKey],
) -> Result<(EventMatrix, EventDefinitionMap), EventError> {
    let mut slots: HashMap<MergeGroupKey, usize> = HashMap::new();
    let mut groups: Vec<(MergeGroupKey, Vec<EventId>)> = Vec::new();

    for (id, node) in evmap.iter() {
        let Some(column) = matrix.column(id) else {
            continue;
        };
        let attrs = shared_attributes(node);
        let key = MergeGroupKey {
            series: column.iter().map(|v| v.to_bits()).collect(),
            source: keys.contains(&MergeKey::Source).then(|| attrs.0).flatten(),
            host: keys.contains(&MergeKey::Host).then(|| attrs.1.clone()).flatten(),
            group: keys.contains(&MergeKey::Group).then(|| attrs.2.clone()).flatten(),
        };
        match slots.get(&key) {
            Some(slot) => groups[*slot].1.push(id),
            None => {
                slots.insert(key.clone(), groups.len());
                groups.push((key, vec![id]));
            }
        }
    }

    let mut merged_map = EventDefinitionMap::new();
    let mut columns = Vec::with_capacity(groups.len());
    for (key, ids) in groups {
        let first = ids[0];
        let node = if ids.len() == 1 {
            evmap.get(first).cloned()
        } else {
            let members: BTreeSet<_> = ids
                .iter()
                .filter_map(|id| evmap.get(*id))
                .flat_map(|n| n.members().into_iter().cloned())
                .collect();
            Some(EventNode::Composite(CompositeDefinition {
                source: key.source,
                host: key.host,
                group: key.group,
                members,
            }))
        };
        let (Some(node), Some(column)) = (node, matrix.column(first)) else {
            continue;
        };
        merged_map.add(node)?;
        columns.push(column.to_vec());
    }

    let matrix = EventMatrix {
        index: matrix.index.clone(),
        columns,
    };
    Ok((matrix, merged_map))
}

/// Source, host and group when every member of the node agrees on them.
fn shared_attributes(node: &EventNode) -> (Option<EventSource>, Option<String>, Option<String>) {
    let members = node.members();
    let Some(first) = members.first() else {
        return (None, None, None);
    };
    let source = members
        .iter()
        .all(|m| m.source == first.source)
        .then_some(first.source);
    let host = node.host().map(str::to_string);
    let group = members
        .iter()
        .all(|m| m.group == first.group)
        .then(|| first.group.clone());
    (source, host, group)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::area::{AreaMode, GroupDef};
    use crate::event::loader::{RawRecord, RecordLoader};
    use crate::event::EventDefinition;
    use crate::series::discretize::BinMethod;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn window() -> TimeWindow {
        TimeWindow::new(t0(), t0() + Duration::hours(1)).unwrap()
    }

    fn rec(source: EventSource, host: &str, group: &str, minute: i64, value: f64) -> RawRecord {
        RawRecord {
            source,
            host: host.into(),
            group: group.into(),
            time: t0() + Duration::minutes(minute),
            value,
        }
    }

    fn dag_conf() -> DagConfig {
        DagConfig {
            ci_bin_method: BinMethod::Sequential,
            ci_bin_size: Duration::minutes(10),
            ci_bin_diff: Duration::minutes(10),
            ..DagConfig::default()
        }
    }

    fn log_loader(records: Vec<RawRecord>) -> Box<dyn EventLoader> {
        Box::new(RecordLoader::from_records(EventSource::Log, records))
    }

    #[test]
    fn test_ids_follow_enumeration_order() {
        let conf = dag_conf();
        let builder = MatrixBuilder::new(&conf, AreaTest::default()).with_loader(log_loader(vec![
            rec(EventSource::Log, "b", "1", 5, 1.0),
            rec(EventSource::Log, "a", "2", 15, 1.0),
            rec(EventSource::Log, "a", "1", 25, 1.0),
        ]));
        let (matrix, evmap) = builder.build(&window(), "all").unwrap();
        assert_eq!(matrix.n_events(), 3);
        assert_eq!(matrix.n_bins(), 6);
        assert_eq!(
            evmap.get(0),
            Some(&EventNode::Single(EventDefinition::new(EventSource::Log, "a", "1")))
        );
        assert_eq!(matrix.column(0).unwrap(), &[0.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
        assert_eq!(matrix.column(2).unwrap(), &[1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_absent_series_do_not_consume_ids() {
        let conf = DagConfig {
            sources: vec![EventSource::Snmp],
            ..dag_conf()
        };
        let snmp = RecordLoader::from_records(
            EventSource::Snmp,
            vec![
                rec(EventSource::Snmp, "a", "cpu", 5, 0.0),
                rec(EventSource::Snmp, "b", "cpu", 5, 2.5),
            ],
        );
        let builder = MatrixBuilder::new(&conf, AreaTest::default()).with_loader(Box::new(snmp));
        let (matrix, evmap) = builder.build(&window(), "all").unwrap();
        assert_eq!(evmap.len(), 1);
        assert_eq!(evmap.get(0).and_then(|n| n.host()), Some("b"));
        assert_eq!(matrix.column(0).unwrap()[0], 1.0);
    }

    #[test]
    fn test_area_filter_applies_before_loading() {
        let conf = DagConfig {
            area: AreaMode::Ingroup,
            ..dag_conf()
        };
        let groups = GroupDef::parse("[core]\nrt1\n").unwrap();
        let builder = MatrixBuilder::new(&conf, AreaTest::new(AreaMode::Ingroup, groups))
            .with_loader(log_loader(vec![
                rec(EventSource::Log, "rt1", "1", 5, 1.0),
                rec(EventSource::Log, "sw1", "1", 5, 1.0),
            ]));
        let (_, evmap) = builder.build(&window(), "core").unwrap();
        assert_eq!(evmap.len(), 1);
        assert_eq!(evmap.get(0).and_then(|n| n.host()), Some("rt1"));

        let (_, evmap) = builder.build(&window(), "host_sw1").unwrap();
        assert_eq!(evmap.get(0).and_then(|n| n.host()), Some("sw1"));
    }

    #[test]
    fn test_no_data() {
        let conf = dag_conf();
        let builder = MatrixBuilder::new(&conf, AreaTest::default()).with_loader(log_loader(vec![]));
        assert!(matches!(
            builder.build(&window(), "all"),
            Err(EventError::NoData)
        ));
    }

    #[test]
    fn test_missing_loader() {
        let conf = DagConfig {
            sources: vec![EventSource::Log, EventSource::Snmp],
            ..dag_conf()
        };
        let builder = MatrixBuilder::new(&conf, AreaTest::default()).with_loader(log_loader(vec![
            rec(EventSource::Log, "a", "1", 5, 1.0),
        ]));
        assert!(matches!(
            builder.build(&window(), "all"),
            Err(EventError::MissingLoader(EventSource::Snmp))
        ));
    }

    #[test]
    fn test_merge_by_host() {
        let conf = DagConfig {
            merge_duplicates: true,
            merge_keys: vec![MergeKey::Host],
            ..dag_conf()
        };
        let builder = MatrixBuilder::new(&conf, AreaTest::default()).with_loader(log_loader(vec![
            rec(EventSource::Log, "a", "1", 5, 1.0),
            rec(EventSource::Log, "a", "2", 6, 1.0),
            rec(EventSource::Log, "a", "3", 45, 1.0),
            rec(EventSource::Log, "b", "1", 5, 1.0),
        ]));
        let (matrix, evmap) = builder.build(&window(), "all").unwrap();
        // a/1 and a/2 share a host and a series; b/1 differs in host.
        assert_eq!(evmap.len(), 3);
        assert_eq!(matrix.n_events(), 3);
        let Some(EventNode::Composite(c)) = evmap.get(0) else {
            panic!("expected composite at id 0");
        };
        assert_eq!(c.host.as_deref(), Some("a"));
        assert_eq!(c.group, None);
        assert_eq!(c.members.len(), 2);
        assert!(matches!(evmap.get(1), Some(EventNode::Single(d)) if d.group == "3"));
        assert!(matches!(evmap.get(2), Some(EventNode::Single(d)) if d.host == "b"));
    }

    #[test]
    fn test_merge_without_keys_spans_hosts() {
        let mut evmap = EventDefinitionMap::new();
        evmap.add(EventDefinition::new(EventSource::Log, "a", "1")).unwrap();
        evmap.add(EventDefinition::new(EventSource::Log, "b", "1")).unwrap();
        let matrix = EventMatrix {
            index: vec![t0(), t0() + Duration::minutes(1)],
            columns: vec![vec![1.0, 0.0], vec![1.0, 0.0]],
        };
        let (merged, map) = merge_duplicates(&matrix, &evmap, &[]).unwrap();
        assert_eq!(merged.n_events(), 1);
        assert_eq!(map.get(0).and_then(|n| n.host()), None);

        let (_, map) = merge_duplicates(&matrix, &evmap, &[MergeKey::Host]).unwrap();
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_matrix_dump_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let (mpath, _) = input_paths(dir.path(), &window(), "core");
        assert!(mpath.ends_with("core_20240301.matrix.json"));
        let matrix = EventMatrix {
            index: vec![t0()],
            columns: vec![vec![1.0]],
        };
        matrix.dump(&mpath).unwrap();
        assert_eq!(EventMatrix::load(&mpath).unwrap(), matrix);
    }
}
