use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use serde::ser::{Serialize, Serializer};
use std::collections::HashMap;

use crate::core::graph::FrozenGraph;

/// One connected component of the similarity graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub name: String,
    /// Image references of the members, sorted.
    pub members: Vec<String>,
}

/// Ordered partition of all linked nodes. Serializes as a JSON object
/// `{"group-1": [...], "group-2": [...]}` in group order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicateGroups(Vec<DuplicateGroup>);

impl DuplicateGroups {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DuplicateGroup> {
        self.0.iter()
    }

    pub fn get(&self, name: &str) -> Option<&DuplicateGroup> {
        self.0.iter().find(|g| g.name == name)
    }

    /// Total number of images across all groups.
    pub fn member_count(&self) -> usize {
        self.0.iter().map(|g| g.members.len()).sum()
    }
}

impl Serialize for DuplicateGroups {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|g| (&g.name, &g.members)))
    }
}

/// Collapse the graph into its connected components.
///
/// Isolated nodes are left out, so every group spans at least two nodes.
/// Members are the distinct sources of those nodes.
/// Groups are numbered after sorting by their smallest member.
pub fn group_duplicates(graph: &FrozenGraph) -> DuplicateGroups {
    let inner = graph.inner();
    let mut components = UnionFind::<usize>::new(inner.node_count());
    for edge in inner.edge_references() {
        components.union(edge.source().index(), edge.target().index());
    }

    let mut by_root: HashMap<usize, Vec<String>> = HashMap::new();
    for node in inner.node_indices() {
        if inner.neighbors(node).next().is_none() {
            continue;
        }
        by_root
            .entry(components.find(node.index()))
            .or_default()
            .push(inner[node].1.source.clone());
    }

    let mut members: Vec<Vec<String>> = by_root
        .into_values()
        .map(|mut m| {
            m.sort();
            // Two ids can point at the same image when a folder is indexed twice.
            m.dedup();
            m
        })
        .collect();
    members.sort();

    let groups = members
        .into_iter()
        .enumerate()
        .map(|(i, members)| DuplicateGroup {
            name: format!("group-{}", i + 1),
            members,
        })
        .collect();
    DuplicateGroups(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::SimilarityGraph;
    use crate::test_utilities::candidate;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    fn link(graph: &SimilarityGraph, query: &str, others: &[&str]) {
        let mut matches = vec![candidate(query, 1.0)];
        matches.extend(others.iter().map(|id| candidate(id, 0.8)));
        graph.merge_matches(query, &matches).unwrap();
    }

    #[test]
    fn test_components_become_groups() {
        let graph = SimilarityGraph::new();
        link(&graph, "a", &["b"]);
        link(&graph, "c", &["b", "d"]);
        link(&graph, "x", &["y"]);

        let groups = group_duplicates(&graph.freeze());
        assert_eq!(groups.len(), 2);
        assert_eq!(
            groups.get("group-1").unwrap().members,
            vec![
                "/photos/a.jpg",
                "/photos/b.jpg",
                "/photos/c.jpg",
                "/photos/d.jpg"
            ]
        );
        assert_eq!(
            groups.get("group-2").unwrap().members,
            vec!["/photos/x.jpg", "/photos/y.jpg"]
        );
    }

    #[test]
    fn test_partition_covers_exactly_linked_nodes() {
        let graph = SimilarityGraph::new();
        for i in 0..30 {
            let q = format!("n{i:02}");
            let other = format!("n{:02}", (i * 7) % 30);
            if other != q {
                link(&graph, &q, &[other.as_str()]);
            }
        }
        let frozen = graph.freeze();
        let groups = group_duplicates(&frozen);

        let mut seen = HashSet::new();
        for group in groups.iter() {
            assert!(group.members.len() >= 2);
            for member in &group.members {
                assert!(seen.insert(member.clone()), "{member} in two groups");
            }
        }

        let linked: HashSet<String> = frozen
            .edges()
            .iter()
            .flat_map(|e| [e.a.clone(), e.b.clone()])
            .map(|id| format!("/photos/{id}.jpg"))
            .collect();
        assert_eq!(seen, linked);
        assert_eq!(groups.member_count(), linked.len());
    }

    #[test]
    fn test_shared_source_is_listed_once() {
        let graph = SimilarityGraph::new();
        let mut copy = candidate("a2", 0.99);
        copy.image = "/photos/a.jpg".to_string();
        graph
            .merge_matches("a", &[candidate("a", 1.0), copy, candidate("b", 0.8)])
            .unwrap();

        let groups = group_duplicates(&graph.freeze());
        assert_eq!(groups.len(), 1);
        assert_eq!(
            groups.get("group-1").unwrap().members,
            vec!["/photos/a.jpg", "/photos/b.jpg"]
        );
        assert_eq!(groups.member_count(), 2);
    }

    #[test]
    fn test_empty_graph_has_no_groups() {
        let groups = group_duplicates(&SimilarityGraph::new().freeze());
        assert!(groups.is_empty());
        assert_eq!(serde_json::to_string(&groups).unwrap(), "{}");
    }

    #[test]
    fn test_serializes_as_ordered_object() {
        let graph = SimilarityGraph::new();
        link(&graph, "b", &["a"]);
        link(&graph, "d", &["c"]);

        let json = serde_json::to_string(&group_duplicates(&graph.freeze())).unwrap();
        assert_eq!(
            json,
            r#"{"group-1":["/photos/a.jpg","/photos/b.jpg"],"group-2":["/photos/c.jpg","/photos/d.jpg"]}"#
        );
    }
}
