//! Event definitions and the dense event-id map.

pub mod area;
pub mod loader;
pub mod matrix;

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::series::SeriesError;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("no events survived loading")]
    NoData,
    #[error("event {0} is already mapped to id {1}")]
    Duplicate(String, EventId),
    #[error("no loader configured for source {0}")]
    MissingLoader(EventSource),
    #[error(transparent)]
    Series(#[from] SeriesError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EventId = usize;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    #[default]
    Log,
    Snmp,
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSource::Log => write!(f, "log"),
            EventSource::Snmp => write!(f, "snmp"),
        }
    }
}

impl std::str::FromStr for EventSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "log" => Ok(EventSource::Log),
            "snmp" => Ok(EventSource::Snmp),
            other => anyhow::bail!("unknown event source: {}", other),
        }
    }
}

/// A classified, recurring event: one group of log lines or one SNMP feature on a host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventDefinition {
    /// Older dumps predate SNMP sources and omit this field.
    #[serde(default)]
    pub source: EventSource,
    pub host: String,
    pub group: String,
}

impl EventDefinition {
    pub fn new(source: EventSource, host: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            source,
            host: host.into(),
            group: group.into(),
        }
    }
}

impl std::fmt::Display for EventDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}@{}", self.source, self.group, self.host)
    }
}

/// Attributes that must agree for identical series to be merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeKey {
    Source,
    Host,
    Group,
}

/// Events merged because their series were identical under the merge keys.
/// Key attributes are `Some` when they were part of the merge key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeDefinition {
    pub source: Option<EventSource>,
    pub host: Option<String>,
    pub group: Option<String>,
    pub members: BTreeSet<EventDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EventNode {
    Single(EventDefinition),
    Composite(CompositeDefinition),
}

impl EventNode {
    pub fn members(&self) -> Vec<&EventDefinition> {
        match self {
            EventNode::Single(d) => vec![d],
            EventNode::Composite(c) => c.members.iter().collect(),
        }
    }

    /// The host shared by every member, if any.
    pub fn host(&self) -> Option<&str> {
        let members = self.members();
        let first = members.first()?.host.as_str();
        members
            .iter()
            .all(|m| m.host == first)
            .then_some(first)
    }
}

impl From<EventDefinition> for EventNode {
    fn from(d: EventDefinition) -> Self {
        EventNode::Single(d)
    }
}

impl std::fmt::Display for EventNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventNode::Single(d) => write!(f, "{}", d),
            EventNode::Composite(c) => {
                let names: Vec<String> = c.members.iter().map(|m| m.to_string()).collect();
                write!(f, "[{}]", names.join(", "))
            }
        }
    }
}

/// Bidirectional map between dense ids and event nodes.
///
/// Ids are assigned by appending, so one build always yields exactly `0..len`.
#[derive(Debug, Clone, Default)]
pub struct EventDefinitionMap {
    nodes: Vec<EventNode>,
    ids: HashMap<EventNode, EventId>,
}

impl EventDefinitionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: impl Into<EventNode>) -> Result<EventId, EventError> {
        let node = node.into();
        if let Some(id) = self.ids.get(&node) {
            return Err(EventError::Duplicate(node.to_string(), *id));
        }
        let id = self.nodes.len();
        self.ids.insert(node.clone(), id);
        self.nodes.push(node);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: EventId) -> Option<&EventNode> {
        self.nodes.get(id)
    }

    pub fn id_of(&self, node: &EventNode) -> Option<EventId> {
        self.ids.get(node).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EventId, &EventNode)> {
        self.nodes.iter().enumerate()
    }

    pub fn dump(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.nodes)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write event map: {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read event map: {}", path.display()))?;
        let nodes: Vec<EventNode> = serde_json::from_str(&content)?;
        let mut map = Self::new();
        for node in nodes {
            map.add(node)?;
        }
        Ok(map)
    }
}
