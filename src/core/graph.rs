//! Shared similarity graph written by concurrent detection tasks.
//!
//! Nodes are items, undirected edges carry the similarity score that linked
//! them. Every merge is validated first and then applied under a single lock,
//! so readers never observe half of a query's matches.

use petgraph::graph::{NodeIndex, UnGraph};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::core::lock;
use crate::services::backend::{Candidate, ItemId};

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Backend returned conflicting metadata for {id}: {existing:?} vs {incoming:?}")]
    MetadataConflict {
        id: ItemId,
        existing: NodeMeta,
        incoming: NodeMeta,
    },

    #[error("Matches for {id} do not include the queried item")]
    MissingQueryNode { id: ItemId },
}

/// Display metadata of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeMeta {
    pub label: String,
    /// Image reference: local path or URL.
    pub source: String,
}

impl From<&Candidate> for NodeMeta {
    fn from(candidate: &Candidate) -> Self {
        Self {
            label: candidate.label().to_string(),
            source: candidate.image.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub a: ItemId,
    pub b: ItemId,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub nodes_added: usize,
    pub edges_added: usize,
}

pub(crate) type Inner = UnGraph<(ItemId, NodeMeta), f64>;

#[derive(Debug, Clone, Default)]
struct GraphState {
    graph: Inner,
    index: HashMap<ItemId, NodeIndex>,
}

impl GraphState {
    fn node(&mut self, id: &str, meta: &NodeMeta, stats: &mut MergeStats) -> NodeIndex {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.graph.add_node((id.to_string(), meta.clone()));
        self.index.insert(id.to_string(), idx);
        stats.nodes_added += 1;
        idx
    }
}

#[derive(Debug, Default)]
pub struct SimilarityGraph {
    state: Mutex<GraphState>,
}

impl SimilarityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the relevant matches of one similarity query.
    ///
    /// Adds a node per match and an edge from `query_id` to every other match.
    /// When an edge already exists the larger of the two scores is kept, which
    /// makes merges order-independent. Nothing is written if validation fails.
    pub fn merge_matches(
        &self,
        query_id: &str,
        matches: &[Candidate],
    ) -> Result<MergeStats, GraphError> {
        let mut state = lock(&self.state);

        let mut incoming: Vec<(&str, NodeMeta, f64)> = Vec::with_capacity(matches.len());
        for candidate in matches {
            let meta = NodeMeta::from(candidate);
            let known = state
                .index
                .get(candidate.id.as_str())
                .map(|&idx| &state.graph[idx].1)
                .or_else(|| {
                    incoming
                        .iter()
                        .find(|(id, _, _)| *id == candidate.id)
                        .map(|(_, m, _)| m)
                });
            if let Some(existing) = known {
                if *existing != meta {
                    return Err(GraphError::MetadataConflict {
                        id: candidate.id.clone(),
                        existing: existing.clone(),
                        incoming: meta,
                    });
                }
            }
            match incoming.iter_mut().find(|(id, _, _)| *id == candidate.id) {
                Some(entry) => entry.2 = entry.2.max(candidate.score),
                None => incoming.push((candidate.id.as_str(), meta, candidate.score)),
            }
        }

        // Judged on this result alone so the outcome never depends on earlier merges.
        let query_meta = match incoming.iter().find(|(id, _, _)| *id == query_id) {
            Some((_, meta, _)) => meta.clone(),
            None => {
                return Err(GraphError::MissingQueryNode {
                    id: query_id.to_string(),
                });
            }
        };

        let mut stats = MergeStats::default();
        let query = state.node(query_id, &query_meta, &mut stats);
        for (id, meta, score) in &incoming {
            let other = state.node(id, meta, &mut stats);
            if other == query {
                continue;
            }
            match state.graph.find_edge(query, other) {
                Some(edge) => {
                    let weight = &mut state.graph[edge];
                    *weight = weight.max(*score);
                }
                None => {
                    state.graph.add_edge(query, other, *score);
                    stats.edges_added += 1;
                }
            }
        }

        Ok(stats)
    }

    pub fn node_count(&self) -> usize {
        lock(&self.state).graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        lock(&self.state).graph.edge_count()
    }

    /// Take a read-only copy once all writers are done.
    pub fn freeze(&self) -> FrozenGraph {
        let state = lock(&self.state).clone();
        FrozenGraph { graph: state.graph }
    }
}

/// Immutable snapshot consumed by the grouper and the report.
#[derive(Debug, Clone, Default)]
pub struct FrozenGraph {
    graph: Inner,
}

impl FrozenGraph {
    pub(crate) fn inner(&self) -> &Inner {
        &self.graph
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Nodes sorted by id.
    pub fn nodes(&self) -> Vec<(ItemId, NodeMeta)> {
        let mut nodes: Vec<_> = self.graph.node_weights().cloned().collect();
        nodes.sort_by(|a, b| a.0.cmp(&b.0));
        nodes
    }

    /// Edges with endpoints in ascending order, sorted.
    pub fn edges(&self) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self
            .graph
            .edge_indices()
            .filter_map(|e| {
                let (x, y) = self.graph.edge_endpoints(e)?;
                let (x, y) = (&self.graph[x].0, &self.graph[y].0);
                let (a, b) = if x <= y { (x, y) } else { (y, x) };
                Some(Edge {
                    a: a.clone(),
                    b: b.clone(),
                    weight: self.graph[e],
                })
            })
            .collect();
        edges.sort_by(|l, r| (&l.a, &l.b).cmp(&(&r.a, &r.b)));
        edges
    }
}
