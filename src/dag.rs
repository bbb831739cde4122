//! Causal graphs over event ids and the queries run on them.
//!
//! A reciprocal edge pair `a -> b`, `b -> a` means the backend could not orient the
//! relation; it counts as one undirected edge.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::matrix::EventMatrix;
use crate::event::{EventDefinitionMap, EventId};

pub type Edge = (EventId, EventId);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DagError {
    #[error("edge {0} -> {1} not found, reversed edge exists")]
    Reversed(EventId, EventId),
    #[error("edge {0} -> {1} not found")]
    NotFound(EventId, EventId),
}

/// Structure learner that turns an aligned event matrix into a graph over its ids.
pub trait CausalBackend {
    fn estimate(&self, matrix: &EventMatrix) -> anyhow::Result<EventDag>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDag {
    pub nodes: BTreeSet<EventId>,
    pub edges: BTreeSet<Edge>,
}

impl EventDag {
    pub fn new(nodes: impl IntoIterator<Item = EventId>) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
            edges: BTreeSet::new(),
        }
    }

    pub fn add_edge(&mut self, src: EventId, dst: EventId) {
        self.nodes.insert(src);
        self.nodes.insert(dst);
        self.edges.insert((src, dst));
    }

    pub fn from_edges(edges: impl IntoIterator<Item = Edge>) -> Self {
        let mut dag = Self::default();
        for (src, dst) in edges {
            dag.add_edge(src, dst);
        }
        dag
    }

    pub fn number_of_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Edge count of the undirected view.
    pub fn number_of_edges(&self) -> usize {
        self.edges
            .iter()
            .filter(|(a, b)| a <= b || !self.edges.contains(&(*b, *a)))
            .count()
    }

    pub fn is_directed(&self, edge: Edge) -> Result<bool, DagError> {
        let (src, dst) = edge;
        let reverse = self.edges.contains(&(dst, src));
        if self.edges.contains(&edge) {
            Ok(!reverse)
        } else if reverse {
            Err(DagError::Reversed(src, dst))
        } else {
            Err(DagError::NotFound(src, dst))
        }
    }

    /// Split into directed edges and undirected edges (one per reciprocal pair,
    /// lower id first).
    pub fn edges_directed(&self) -> (Vec<Edge>, Vec<Edge>) {
        let mut directed = Vec::new();
        let mut undirected = Vec::new();
        for &(a, b) in &self.edges {
            if self.edges.contains(&(b, a)) {
                if a <= b {
                    undirected.push((a, b));
                }
            } else {
                directed.push((a, b));
            }
        }
        (directed, undirected)
    }

    /// Split edges by whether both ends share a host.
    ///
    /// Composite nodes without a common host never match.
    pub fn edges_across_host(&self, evmap: &EventDefinitionMap) -> (Vec<Edge>, Vec<Edge>) {
        let host = |id: EventId| evmap.get(id).and_then(|n| n.host());
        self.edges.iter().partition(|(a, b)| match (host(*a), host(*b)) {
            (Some(ha), Some(hb)) => ha == hb,
            _ => false,
        })
    }

    /// Copy without nodes that have no edges.
    pub fn without_orphans(&self) -> EventDag {
        let nodes = self.edges.iter().flat_map(|(a, b)| [*a, *b]).collect();
        EventDag {
            nodes,
            edges: self.edges.clone(),
        }
    }

    /// Node sets of the connected components of the undirected view, largest first.
    pub fn connected_components(&self) -> Vec<BTreeSet<EventId>> {
        let mut adjacency: BTreeMap<EventId, BTreeSet<EventId>> =
            self.nodes.iter().map(|n| (*n, BTreeSet::new())).collect();
        for &(a, b) in &self.edges {
            adjacency.entry(a).or_default().insert(b);
            adjacency.entry(b).or_default().insert(a);
        }

        let mut seen = BTreeSet::new();
        let mut components = Vec::new();
        for &start in adjacency.keys() {
            if !seen.insert(start) {
                continue;
            }
            let mut component = BTreeSet::from([start]);
            let mut stack = vec![start];
            while let Some(node) = stack.pop() {
                for &next in adjacency.get(&node).into_iter().flatten() {
                    if seen.insert(next) {
                        component.insert(next);
                        stack.push(next);
                    }
                }
            }
            components.push(component);
        }
        components.sort_by(|a, b| b.len().cmp(&a.len()));
        components
    }

    pub fn edge_label(&self, edge: Edge, evmap: &EventDefinitionMap) -> Result<String, DagError> {
        let arrow = if self.is_directed(edge)? { "->" } else { "<->" };
        let label = |id: EventId| {
            evmap
                .get(id)
                .map(|n| n.to_string())
                .unwrap_or_else(|| format!("#{}", id))
        };
        Ok(format!("{} {} {}", label(edge.0), arrow, label(edge.1)))
    }

    pub fn dump(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write dag: {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read dag: {}", path.display()))?;
        Ok(serde_json::from_str(&content)?)
    }
}
