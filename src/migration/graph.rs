use super::mapping::MappingModel;
use crate::schema::Fingerprint;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

/// Directed graph over schema fingerprints; each edge is one registered mapping.
///
/// Edges live in an arena and adjacency lists hold arena indices sorted by
/// destination fingerprint, so every traversal visits neighbours in a fixed order.
#[derive(Debug, Clone, Default)]
pub struct MigrationGraph {
    edges: Vec<Arc<MappingModel>>,
    outgoing: BTreeMap<Fingerprint, Vec<usize>>,
    incoming: BTreeMap<Fingerprint, Vec<usize>>,
    nodes: BTreeSet<Fingerprint>,
}

impl MigrationGraph {
    pub fn from_mappings<I>(mappings: I) -> Self
    where
        I: IntoIterator<Item = Arc<MappingModel>>,
    {
        let mut graph = Self::default();
        for mapping in mappings {
            let index = graph.edges.len();
            let from = mapping.source_fingerprint();
            let to = mapping.destination_fingerprint();
            graph.nodes.insert(from);
            graph.nodes.insert(to);
            graph.outgoing.entry(from).or_default().push(index);
            graph.incoming.entry(to).or_default().push(index);
            graph.edges.push(mapping);
        }

        let edges = &graph.edges;
        for list in graph.outgoing.values_mut() {
            list.sort_by_key(|&i| edges[i].destination_fingerprint());
        }
        for list in graph.incoming.values_mut() {
            list.sort_by_key(|&i| edges[i].source_fingerprint());
        }
        graph
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edge(&self, index: usize) -> &Arc<MappingModel> {
        &self.edges[index]
    }

    /// Outgoing edges of `node`, ordered by destination fingerprint.
    pub fn successors(&self, node: Fingerprint) -> impl Iterator<Item = (usize, Fingerprint)> + '_ {
        self.outgoing
            .get(&node)
            .into_iter()
            .flatten()
            .map(|&i| (i, self.edges[i].destination_fingerprint()))
    }

    pub fn predecessors(&self, node: Fingerprint) -> impl Iterator<Item = (usize, Fingerprint)> + '_ {
        self.incoming
            .get(&node)
            .into_iter()
            .flatten()
            .map(|&i| (i, self.edges[i].source_fingerprint()))
    }

    /// Whether `to` is reachable from `from` through at least one edge.
    pub fn has_path(&self, from: Fingerprint, to: Fingerprint) -> bool {
        let mut seen = BTreeSet::from([from]);
        let mut queue = VecDeque::from([from]);
        while let Some(node) = queue.pop_front() {
            for (_, next) in self.successors(node) {
                if next == to {
                    return true;
                }
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        false
    }
}
