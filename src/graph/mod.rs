//! Resource dependency graph.
//!
//! Edges run from a dependency to its dependents. The graph is built once
//! from a complete descriptor set and rejects duplicate names, references to
//! undeclared resources, and cycles, so every accessor can assume a valid
//! DAG.

mod descriptor;

use std::collections::{BTreeMap, BTreeSet};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use tracing::debug;

use crate::types::LogicalName;

pub use descriptor::{Materialization, ResolvedDescriptor, ResourceDescriptor, ResourceKind};

/// Errors raised while building or auditing the graph.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GraphError {
    /// Raised when two descriptors share a logical name.
    #[error("resource `{name}` is declared more than once")]
    Duplicate {
        /// Repeated logical name.
        name: LogicalName,
    },
    /// Raised when a descriptor depends on an undeclared resource.
    #[error("resource `{resource}` depends on undeclared resource `{dependency}`")]
    UnknownDependency {
        /// Descriptor holding the reference.
        resource: LogicalName,
        /// Missing dependency.
        dependency: LogicalName,
    },
    /// Raised when the dependency edges form a cycle.
    #[error("dependency cycle through resource `{resource}`")]
    Cycle {
        /// A resource on the cycle.
        resource: LogicalName,
    },
    /// Raised when an audited resource is absent.
    #[error("resource `{name}` is not declared")]
    UnknownResource {
        /// Missing logical name.
        name: LogicalName,
    },
    /// Raised when a required edge is not declared.
    #[error("resource `{dependent}` does not declare its dependency on `{dependency}`")]
    MissingEdge {
        /// Resource that should wait.
        dependent: LogicalName,
        /// Resource it should wait for.
        dependency: LogicalName,
    },
}

/// Validated dependency graph over [`ResourceDescriptor`]s.
#[derive(Clone, Debug)]
pub struct ResourceGraph {
    graph: DiGraph<LogicalName, ()>,
    nodes: BTreeMap<LogicalName, NodeIndex>,
    descriptors: BTreeMap<LogicalName, ResourceDescriptor>,
}

impl ResourceGraph {
    /// Builds and validates a graph from a complete descriptor set.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Duplicate`], [`GraphError::UnknownDependency`],
    /// or [`GraphError::Cycle`] when the set is not a valid DAG.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = ResourceDescriptor>,
    ) -> Result<Self, GraphError> {
        let mut graph = DiGraph::new();
        let mut nodes = BTreeMap::new();
        let mut by_name = BTreeMap::new();

        for descriptor in descriptors {
            let name = descriptor.name().clone();
            if by_name.contains_key(&name) {
                return Err(GraphError::Duplicate { name });
            }
            nodes.insert(name.clone(), graph.add_node(name.clone()));
            by_name.insert(name, descriptor);
        }

        for (name, descriptor) in &by_name {
            let Some(&dependent) = nodes.get(name) else {
                continue;
            };
            for dependency in descriptor.dependencies() {
                let Some(&source) = nodes.get(&dependency) else {
                    return Err(GraphError::UnknownDependency {
                        resource: name.clone(),
                        dependency,
                    });
                };
                graph.add_edge(source, dependent, ());
            }
        }

        if let Err(cycle) = toposort(&graph, None) {
            let resource = graph
                .node_weight(cycle.node_id())
                .cloned()
                .unwrap_or_default();
            return Err(GraphError::Cycle { resource });
        }

        debug!(
            resources = nodes.len(),
            edges = graph.edge_count(),
            "validated resource graph"
        );
        Ok(Self {
            graph,
            nodes,
            descriptors: by_name,
        })
    }

    /// Number of declared resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no resources are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Descriptor declared under `name`.
    #[must_use]
    pub fn descriptor(&self, name: &LogicalName) -> Option<&ResourceDescriptor> {
        self.descriptors.get(name)
    }

    /// Descriptors ordered by logical name.
    pub fn descriptors(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.descriptors.values()
    }

    /// Direct dependencies of `name`; empty when undeclared.
    #[must_use]
    pub fn dependencies_of(&self, name: &LogicalName) -> BTreeSet<LogicalName> {
        self.neighbours(name, Direction::Incoming)
    }

    /// Direct dependents of `name`; empty when undeclared.
    #[must_use]
    pub fn dependents_of(&self, name: &LogicalName) -> BTreeSet<LogicalName> {
        self.neighbours(name, Direction::Outgoing)
    }

    fn neighbours(&self, name: &LogicalName, direction: Direction) -> BTreeSet<LogicalName> {
        self.nodes
            .get(name)
            .map(|&index| {
                self.graph
                    .neighbors_directed(index, direction)
                    .filter_map(|neighbour| self.graph.node_weight(neighbour).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Groups resources into waves: each wave depends only on earlier ones.
    /// Names inside a wave are sorted.
    #[must_use]
    pub fn waves(&self) -> Vec<Vec<LogicalName>> {
        let mut remaining: BTreeMap<&LogicalName, usize> = self
            .nodes
            .iter()
            .map(|(name, &index)| {
                let in_degree = self
                    .graph
                    .neighbors_directed(index, Direction::Incoming)
                    .count();
                (name, in_degree)
            })
            .collect();

        let mut waves = Vec::new();
        while !remaining.is_empty() {
            let wave: Vec<LogicalName> = remaining
                .iter()
                .filter(|(_, in_degree)| **in_degree == 0)
                .map(|(name, _)| (*name).clone())
                .collect();
            if wave.is_empty() {
                // Unreachable for a validated graph.
                break;
            }
            for name in &wave {
                remaining.remove(name);
                for dependent in self.dependents_of(name) {
                    if let Some(in_degree) = remaining.get_mut(&dependent) {
                        *in_degree = in_degree.saturating_sub(1);
                    }
                }
            }
            waves.push(wave);
        }
        waves
    }

    /// Flattened wave order; every resource follows its dependencies.
    #[must_use]
    pub fn creation_order(&self) -> Vec<LogicalName> {
        self.waves().into_iter().flatten().collect()
    }

    /// Checks that every `(dependent, dependency)` edge is declared.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownResource`] when the dependent is absent and
    /// [`GraphError::MissingEdge`] for the first edge that is not declared.
    pub fn audit(&self, required: &[(&str, &str)]) -> Result<(), GraphError> {
        for (dependent, dependency) in required {
            let dependent = LogicalName::from(*dependent);
            if !self.nodes.contains_key(&dependent) {
                return Err(GraphError::UnknownResource { name: dependent });
            }
            let dependency = LogicalName::from(*dependency);
            if !self.dependencies_of(&dependent).contains(&dependency) {
                return Err(GraphError::MissingEdge {
                    dependent,
                    dependency,
                });
            }
        }
        Ok(())
    }
}
