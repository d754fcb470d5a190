use super::graph::MigrationGraph;
use super::mapping::MappingModel;
use crate::core::MappingError;
use crate::schema::Fingerprint;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

/// Ordered chain of mappings leading from a store's fingerprint to the current one.
///
/// Each step's source fingerprint equals the previous step's destination.
#[derive(Debug, Clone, Default)]
pub struct MigrationPlan {
    steps: Vec<Arc<MappingModel>>,
}

impl MigrationPlan {
    pub fn steps(&self) -> &[Arc<MappingModel>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn source_fingerprint(&self) -> Option<Fingerprint> {
        self.steps.first().map(|s| s.source_fingerprint())
    }

    pub fn destination_fingerprint(&self) -> Option<Fingerprint> {
        self.steps.last().map(|s| s.destination_fingerprint())
    }

    /// Version tags along the path, source first.
    pub fn version_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .steps
            .first()
            .map(|s| s.source().version_tag().to_string())
            .into_iter()
            .collect();
        tags.extend(
            self.steps
                .iter()
                .map(|s| s.destination().version_tag().to_string()),
        );
        tags
    }
}

/// Resolves migration plans over a [`MigrationGraph`].
pub struct MigrationMapper;

impl MigrationMapper {
    /// Finds the shortest mapping path from `source` to `destination`.
    ///
    /// Among equally short paths the one taking the lowest destination
    /// fingerprint at each hop wins, so a fixed registry always yields the same
    /// plan on every machine. Mappings in both directions between two versions
    /// are fine; only a walk that comes back to a version it already passed is
    /// reported as [`MappingError::Cycle`].
    pub fn resolve_plan(
        source: Fingerprint,
        destination: Fingerprint,
        graph: &MigrationGraph,
    ) -> Result<MigrationPlan, MappingError> {
        if source == destination {
            return Ok(MigrationPlan::default());
        }

        // Hop distance of every node that can still reach the destination.
        let mut distance = BTreeMap::from([(destination, 0usize)]);
        let mut queue = VecDeque::from([destination]);
        while let Some(node) = queue.pop_front() {
            let next_distance = distance[&node] + 1;
            for (_, previous) in graph.predecessors(node) {
                if !distance.contains_key(&previous) {
                    distance.insert(previous, next_distance);
                    queue.push_back(previous);
                }
            }
        }

        let Some(&total) = distance.get(&source) else {
            return Err(MappingError::NoPath {
                from: source,
                to: destination,
            });
        };

        let mut steps = Vec::with_capacity(total);
        let mut visited = BTreeSet::from([source]);
        let mut current = source;
        while current != destination {
            let remaining = distance[&current];
            // Successors are ordered by destination fingerprint: first match is the tie-break.
            let (edge, next) = graph
                .successors(current)
                .find(|(_, next)| distance.get(next) == Some(&(remaining - 1)))
                .ok_or(MappingError::NoPath {
                    from: source,
                    to: destination,
                })?;
            if !visited.insert(next) {
                return Err(MappingError::Cycle(next));
            }
            steps.push(graph.edge(edge).clone());
            current = next;
        }

        Ok(MigrationPlan { steps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AttributeType;
    use crate::schema::{AttributeDescription, EntityDescription, SchemaModel};

    fn model(tag: &str) -> Arc<SchemaModel> {
        Arc::new(
            SchemaModel::builder(tag)
                .entity(
                    EntityDescription::new("Recipe")
                        .attribute(AttributeDescription::new(tag, AttributeType::Text)),
                )
                .build()
                .unwrap(),
        )
    }

    fn edge(from: &Arc<SchemaModel>, to: &Arc<SchemaModel>) -> Arc<MappingModel> {
        Arc::new(MappingModel::infer(from.clone(), to.clone()))
    }

    #[test]
    fn test_same_fingerprint_yields_empty_plan() {
        let a = model("a");
        let plan = MigrationMapper::resolve_plan(a.fingerprint(), a.fingerprint(), &MigrationGraph::default())
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_prefers_shortest_path() {
        let (a, b, c, d) = (model("a"), model("b"), model("c"), model("d"));
        let graph = MigrationGraph::from_mappings([
            edge(&a, &b),
            edge(&b, &c),
            edge(&c, &d),
            edge(&b, &d),
        ]);

        let plan = MigrationMapper::resolve_plan(a.fingerprint(), d.fingerprint(), &graph).unwrap();
        assert_eq!(plan.version_tags(), vec!["a", "b", "d"]);
        assert_eq!(plan.source_fingerprint(), Some(a.fingerprint()));
        assert_eq!(plan.destination_fingerprint(), Some(d.fingerprint()));
    }

    #[test]
    fn test_ties_break_on_lowest_destination_fingerprint() {
        let (a, x, y, d) = (model("a"), model("x"), model("y"), model("d"));
        let graph = MigrationGraph::from_mappings([
            edge(&a, &x),
            edge(&a, &y),
            edge(&x, &d),
            edge(&y, &d),
        ]);

        let expected_middle = if x.fingerprint() < y.fingerprint() { "x" } else { "y" };
        let first = MigrationMapper::resolve_plan(a.fingerprint(), d.fingerprint(), &graph).unwrap();
        assert_eq!(first.version_tags(), vec!["a", expected_middle, "d"]);

        // Registration order must not matter.
        let reversed = MigrationGraph::from_mappings([
            edge(&y, &d),
            edge(&x, &d),
            edge(&a, &y),
            edge(&a, &x),
        ]);
        let second = MigrationMapper::resolve_plan(a.fingerprint(), d.fingerprint(), &reversed).unwrap();
        assert_eq!(first.version_tags(), second.version_tags());
    }

    #[test]
    fn test_disconnected_graph_has_no_path() {
        let (a, b, c) = (model("a"), model("b"), model("c"));
        let graph = MigrationGraph::from_mappings([edge(&a, &b)]);
        assert!(matches!(
            MigrationMapper::resolve_plan(a.fingerprint(), c.fingerprint(), &graph),
            Err(MappingError::NoPath { .. })
        ));
        assert!(!graph.has_path(b.fingerprint(), a.fingerprint()));
    }

    #[test]
    fn test_inverse_mappings_do_not_block_planning() {
        let (a, b, c) = (model("a"), model("b"), model("c"));
        let graph = MigrationGraph::from_mappings([edge(&a, &b), edge(&b, &a), edge(&b, &c)]);

        let forward = MigrationMapper::resolve_plan(a.fingerprint(), c.fingerprint(), &graph).unwrap();
        assert_eq!(forward.version_tags(), vec!["a", "b", "c"]);

        let backward = MigrationMapper::resolve_plan(b.fingerprint(), a.fingerprint(), &graph).unwrap();
        assert_eq!(backward.version_tags(), vec!["b", "a"]);

        assert!(matches!(
            MigrationMapper::resolve_plan(c.fingerprint(), a.fingerprint(), &graph),
            Err(MappingError::NoPath { .. })
        ));
    }
}
