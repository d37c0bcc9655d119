use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("`{dependent}` depends on unknown node `{dependency}`")]
    UnknownNode {
        dependent: String,
        dependency: String,
    },

    #[error("Dependency cycle between: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// Directed graph where an edge `a -> b` reads "a depends on b".
///
/// Ordering is resolved with Kahn's algorithm over ordered sets, so the same
/// graph always yields the same order regardless of how it was built.
#[derive(Debug, Clone)]
pub struct DependencyGraph<N: Ord> {
    dependencies: BTreeMap<N, BTreeSet<N>>,
}

impl<N: Ord> Default for DependencyGraph<N> {
    fn default() -> Self {
        return Self {
            dependencies: BTreeMap::new(),
        };
    }
}

impl<N> DependencyGraph<N>
where
    N: Ord + Clone + Display,
{
    pub fn new() -> Self {
        return Self::default();
    }

    pub fn add_node(&mut self, node: N) {
        self.dependencies.entry(node).or_default();
    }

    pub fn add_edge(&mut self, dependent: N, dependency: N) {
        self.dependencies
            .entry(dependent)
            .or_default()
            .insert(dependency);
    }

    pub fn contains(&self, node: &N) -> bool {
        return self.dependencies.contains_key(node);
    }

    pub fn len(&self) -> usize {
        return self.dependencies.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.dependencies.is_empty();
    }

    pub fn dependencies_of(&self, node: &N) -> impl Iterator<Item = &N> {
        return self.dependencies.get(node).into_iter().flatten();
    }

    pub fn transitive_dependencies(&self, node: &N) -> BTreeSet<N> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&N> = self.dependencies_of(node).collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next.clone()) {
                stack.extend(self.dependencies_of(next));
            }
        }

        return seen;
    }

    fn check_edges(&self) -> Result<(), Error> {
        for (dependent, dependencies) in &self.dependencies {
            if let Some(missing) = dependencies
                .iter()
                .find(|dependency| !self.dependencies.contains_key(*dependency))
            {
                return Err(Error::UnknownNode {
                    dependent: dependent.to_string(),
                    dependency: missing.to_string(),
                });
            }
        }

        return Ok(());
    }

    /// Groups nodes into waves: every node of a wave only depends on nodes of
    /// earlier waves, so a wave may be provisioned concurrently.
    pub fn waves(&self) -> Result<Vec<Vec<N>>, Error> {
        self.check_edges()?;

        let mut remaining: BTreeMap<&N, usize> = self
            .dependencies
            .iter()
            .map(|(node, dependencies)| (node, dependencies.len()))
            .collect();
        let mut dependents: BTreeMap<&N, Vec<&N>> = BTreeMap::new();
        for (node, dependencies) in &self.dependencies {
            for dependency in dependencies {
                dependents.entry(dependency).or_default().push(node);
            }
        }

        let mut waves = Vec::new();
        let mut ready: Vec<&N> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(node, _)| *node)
            .collect();

        while !ready.is_empty() {
            let mut next = BTreeSet::new();
            for node in &ready {
                remaining.remove(*node);
                for dependent in dependents.get(*node).into_iter().flatten() {
                    if let Some(count) = remaining.get_mut(*dependent) {
                        *count -= 1;
                        if *count == 0 {
                            next.insert(*dependent);
                        }
                    }
                }
            }
            waves.push(ready.iter().map(|node| (*node).clone()).collect());
            ready = next.into_iter().collect();
        }

        if !remaining.is_empty() {
            return Err(Error::Cycle(
                remaining.keys().map(|node| node.to_string()).collect(),
            ));
        }

        return Ok(waves);
    }

    pub fn topological_order(&self) -> Result<Vec<N>, Error> {
        return Ok(self.waves()?.into_iter().flatten().collect());
    }
}

#[cfg(test)]
mod tests {
    use super::{DependencyGraph, Error};

    fn diamond() -> DependencyGraph<&'static str> {
        let mut graph = DependencyGraph::new();
        graph.add_node("network");
        graph.add_edge("common", "network");
        graph.add_edge("database", "network");
        graph.add_node("data-lake");
        graph.add_edge("replication", "common");
        graph.add_edge("replication", "database");
        graph.add_edge("replication", "data-lake");
        return graph;
    }

    #[test]
    fn dependencies_come_first() {
        let order = diamond().topological_order().unwrap();
        let position = |name: &str| order.iter().position(|node| *node == name).unwrap();

        assert!(position("network") < position("common"));
        assert!(position("network") < position("database"));
        assert!(position("common") < position("replication"));
        assert!(position("data-lake") < position("replication"));
    }

    #[test]
    fn independent_nodes_share_a_wave() {
        let waves = diamond().waves().unwrap();
        assert_eq!(
            vec![
                vec!["data-lake", "network"],
                vec!["common", "database"],
                vec!["replication"],
            ],
            waves
        );
    }

    #[test]
    fn order_is_stable() {
        assert_eq!(
            diamond().topological_order().unwrap(),
            diamond().topological_order().unwrap()
        );
    }

    #[test]
    fn detects_cycles() {
        let mut graph = diamond();
        graph.add_edge("network", "replication");

        match graph.topological_order() {
            Err(Error::Cycle(nodes)) => {
                assert!(nodes.contains(&String::from("network")));
                assert!(nodes.contains(&String::from("replication")));
                assert!(!nodes.contains(&String::from("data-lake")));
            }
            other => panic!("Expected `Cycle` error, got {:?}", other),
        }
    }

    #[test]
    fn rejects_edges_to_unknown_nodes() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("catalog", "data-lake");

        assert_eq!(
            Err(Error::UnknownNode {
                dependent: String::from("catalog"),
                dependency: String::from("data-lake"),
            }),
            graph.waves()
        );
    }

    #[test]
    fn collects_transitive_dependencies() {
        let deps = diamond().transitive_dependencies(&"replication");
        assert_eq!(4, deps.len());
        assert!(deps.contains("network"));
    }
}
