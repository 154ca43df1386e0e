//! Dependency graph logic for ordering entity imports
//!
//! This module provides functions to:
//! - Build a dependency graph from declared entity dependencies
//! - Split declared dependencies into hard edges and nullable (elided) edges
//! - Perform topological sort for correct insert/delete ordering
//! - Report the members of dependency cycles

use std::collections::{BTreeMap, BTreeSet};

use crate::registry::{EntityDescriptor, EntityRegistry};

/// Whether a declared dependency forces ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    /// Backed by a non-nullable foreign key, or by no foreign key at all
    Hard,
    /// Every backing foreign key is nullable
    Nullable,
}

/// One declared dependency of an entity, with its classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredDependency {
    pub entity: String,
    pub dependency: String,
    pub kind: DependencyKind,
    /// Foreign key columns on the entity that target the dependency
    pub foreign_keys: Vec<String>,
}

impl std::fmt::Display for DeclaredDependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.foreign_keys.is_empty() {
            write!(f, "{} -> {}", self.entity, self.dependency)
        } else {
            write!(
                f,
                "{} -> {} (via {})",
                self.entity,
                self.dependency,
                self.foreign_keys.join(", ")
            )
        }
    }
}

/// Classify the relationship between `entity` and its declared dependency
pub fn classify_dependency(
    entity: &EntityDescriptor,
    dependency_name: &str,
    dependency: Option<&EntityDescriptor>,
) -> DeclaredDependency {
    let columns = dependency
        .map(|d| entity.foreign_keys_to(&d.storage_name))
        .unwrap_or_default();

    let kind = if !columns.is_empty() && columns.iter().all(|c| c.nullable) {
        DependencyKind::Nullable
    } else {
        DependencyKind::Hard
    };

    DeclaredDependency {
        entity: entity.name.clone(),
        dependency: dependency_name.to_string(),
        kind,
        foreign_keys: columns.iter().map(|c| c.name.clone()).collect(),
    }
}

/// Dependency graph over the discovered entity names
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// All entities in the graph
    pub nodes: BTreeSet<String>,
    /// Adjacency list: entity -> entities it must be imported after
    pub dependencies: BTreeMap<String, BTreeSet<String>>,
    /// Reverse adjacency: entity -> entities that must be imported after it
    pub dependents: BTreeMap<String, BTreeSet<String>>,
}

/// Everything learned while building the graph
#[derive(Debug, Clone, Default)]
pub struct GraphBuild {
    pub graph: DependencyGraph,
    /// Nullable dependencies between discovered entities, dropped from the graph
    pub nullable_edges: Vec<DeclaredDependency>,
    /// Nullable dependencies on entities absent from the batch
    pub optional_dependencies: Vec<DeclaredDependency>,
    /// Hard dependencies on entities absent from the batch
    pub missing_hard_dependencies: Vec<DeclaredDependency>,
    /// Discovered entity names the registry does not describe
    pub unknown_entities: Vec<String>,
}

impl DependencyGraph {
    /// Graph with the given nodes and no edges
    pub fn with_nodes<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut graph = DependencyGraph::default();
        for name in names {
            graph.add_node(name.into());
        }
        graph
    }

    pub fn add_node(&mut self, name: String) {
        self.dependencies.entry(name.clone()).or_default();
        self.dependents.entry(name.clone()).or_default();
        self.nodes.insert(name);
    }

    /// Record that `entity` must be imported after `dependency`.
    ///
    /// Self-references and edges to unknown nodes are ignored.
    pub fn add_edge(&mut self, entity: &str, dependency: &str) {
        if entity == dependency || !self.nodes.contains(entity) || !self.nodes.contains(dependency) {
            return;
        }
        self.dependencies
            .entry(entity.to_string())
            .or_default()
            .insert(dependency.to_string());
        self.dependents
            .entry(dependency.to_string())
            .or_default()
            .insert(entity.to_string());
    }

    /// Build the graph for the discovered entity names
    pub fn build<I, S>(entity_names: I, registry: &dyn EntityRegistry) -> GraphBuild
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut build = GraphBuild {
            graph: DependencyGraph::with_nodes(entity_names),
            ..GraphBuild::default()
        };

        let names: Vec<String> = build.graph.nodes.iter().cloned().collect();
        for name in &names {
            let Some(descriptor) = registry.describe(name) else {
                build.unknown_entities.push(name.clone());
                continue;
            };

            let declared: BTreeSet<&String> = descriptor.depends_on.iter().collect();
            for dependency_name in declared {
                if dependency_name == name {
                    continue;
                }

                let relation = classify_dependency(
                    descriptor,
                    dependency_name,
                    registry.describe(dependency_name),
                );
                let discovered = build.graph.nodes.contains(dependency_name);

                match (discovered, relation.kind) {
                    (true, DependencyKind::Hard) => build.graph.add_edge(name, dependency_name),
                    (true, DependencyKind::Nullable) => build.nullable_edges.push(relation),
                    (false, DependencyKind::Nullable) => build.optional_dependencies.push(relation),
                    (false, DependencyKind::Hard) => build.missing_hard_dependencies.push(relation),
                }
            }
        }

        build
    }

    /// Perform topological sort using Kahn's algorithm.
    ///
    /// Returns entities in insert order (dependencies first); ready nodes
    /// are taken in name order.
    pub fn topological_sort(&self) -> Result<Vec<String>, CycleError> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|name| {
                let count = self.dependencies.get(name).map_or(0, |d| d.len());
                (name.as_str(), count)
            })
            .collect();

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(entity) = ready.pop_first() {
            result.push(entity.to_string());

            if let Some(dependents) = self.dependents.get(entity) {
                for dependent in dependents {
                    if let Some(count) = in_degree.get_mut(dependent.as_str()) {
                        *count -= 1;
                        if *count == 0 {
                            ready.insert(dependent.as_str());
                        }
                    }
                }
            }
        }

        if result.len() != self.nodes.len() {
            let emitted: BTreeSet<&str> = result.iter().map(String::as_str).collect();
            let remaining: BTreeSet<&str> = self
                .nodes
                .iter()
                .map(String::as_str)
                .filter(|name| !emitted.contains(name))
                .collect();

            let cycles = self.cycles_within(&remaining);
            let entities = cycles.iter().flatten().cloned().collect::<BTreeSet<_>>();

            return Err(CycleError {
                entities: entities.into_iter().collect(),
                cycles,
            });
        }

        Ok(result)
    }

    /// Get delete order (dependents before dependencies, reverse of insert)
    pub fn delete_order(&self) -> Result<Vec<String>, CycleError> {
        let mut order = self.topological_sort()?;
        order.reverse();
        Ok(order)
    }

    /// Strongly connected components of size > 1 among `subset` (Tarjan)
    fn cycles_within(&self, subset: &BTreeSet<&str>) -> Vec<Vec<String>> {
        struct Tarjan<'g> {
            graph: &'g DependencyGraph,
            subset: &'g BTreeSet<&'g str>,
            index: usize,
            indices: BTreeMap<&'g str, usize>,
            lowlinks: BTreeMap<&'g str, usize>,
            stack: Vec<&'g str>,
            on_stack: BTreeSet<&'g str>,
            components: Vec<Vec<String>>,
        }

        impl<'g> Tarjan<'g> {
            fn visit(&mut self, node: &'g str) {
                self.indices.insert(node, self.index);
                self.lowlinks.insert(node, self.index);
                self.index += 1;
                self.stack.push(node);
                self.on_stack.insert(node);

                let graph = self.graph;
                let subset = self.subset;
                let neighbours = graph
                    .dependencies
                    .get(node)
                    .into_iter()
                    .flatten()
                    .map(String::as_str)
                    .filter(move |n| subset.contains(n));

                for next in neighbours {
                    if !self.indices.contains_key(next) {
                        self.visit(next);
                        let low = self.lowlinks[node].min(self.lowlinks[next]);
                        self.lowlinks.insert(node, low);
                    } else if self.on_stack.contains(next) {
                        let low = self.lowlinks[node].min(self.indices[next]);
                        self.lowlinks.insert(node, low);
                    }
                }

                if self.lowlinks[node] == self.indices[node] {
                    let mut component = Vec::new();
                    while let Some(member) = self.stack.pop() {
                        self.on_stack.remove(member);
                        component.push(member.to_string());
                        if member == node {
                            break;
                        }
                    }
                    if component.len() > 1 {
                        component.sort();
                        self.components.push(component);
                    }
                }
            }
        }

        let mut tarjan = Tarjan {
            graph: self,
            subset,
            index: 0,
            indices: BTreeMap::new(),
            lowlinks: BTreeMap::new(),
            stack: Vec::new(),
            on_stack: BTreeSet::new(),
            components: Vec::new(),
        };

        for node in subset {
            if !tarjan.indices.contains_key(node) {
                tarjan.visit(*node);
            }
        }

        let mut components = tarjan.components;
        components.sort();
        components
    }
}

/// Error when a cycle is detected in the dependency graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    /// Every entity that sits on a cycle, sorted
    pub entities: Vec<String>,
    /// Each cycle as its own sorted member list
    pub cycles: Vec<Vec<String>>,
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Circular dependency detected involving: {}", self.entities.join(", "))
    }
}

impl std::error::Error for CycleError {}
