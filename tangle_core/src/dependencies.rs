//! Façade over the link registry and the node graph.
//!
//! All link validation lives here; the engine only supplies property ids
//! and node ownership via the property pool.

use crate::errors::TangleError;
use crate::graph::NodeGraph;
use crate::links::LinkRegistry;
use crate::property::{PropertyId, PropertyPool};
use crate::NodeId;

#[derive(Debug, Default)]
pub struct Dependencies {
    registry: LinkRegistry,
    graph: NodeGraph,
    cached_order: Option<Vec<NodeId>>,
    topology_changed: bool,
}

impl Dependencies {
    pub fn add_node(&mut self, node: NodeId) {
        self.graph.add_node(node);
        self.topology_changed = true;
    }

    /// Removes `node` from the graph, severing every link that touches one
    /// of its leaves. The cached order keeps the relative order of the
    /// remaining nodes without a resort.
    pub fn remove_node(&mut self, node: NodeId, leaves: &[PropertyId], pool: &mut PropertyPool) {
        for &leaf in leaves {
            if let Some(source) = self.registry.source_of(leaf) {
                self.registry.unlink(source, leaf);
                self.graph.remove_edge(pool.property(source).owner(), node);
                pool.set_linked_input(leaf, false);
            }
            let targets: Vec<PropertyId> = self.registry.targets_of(leaf).collect();
            for target in targets {
                self.registry.unlink(leaf, target);
                self.graph.remove_edge(node, pool.property(target).owner());
                pool.set_linked_input(target, false);
            }
        }
        self.graph.remove_node(node);
        if let Some(order) = self.cached_order.as_mut() {
            order.retain(|&n| n != node);
        }
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.graph.contains(node)
    }

    /// A node-level dependency without a property link; used for nodes
    /// whose result depends on another node's host object (anchor points).
    pub fn add_node_dependency(&mut self, source: NodeId, target: NodeId) {
        self.graph.add_edge(source, target);
        self.topology_changed = true;
    }

    pub fn remove_node_dependency(&mut self, source: NodeId, target: NodeId) {
        self.graph.remove_edge(source, target);
    }

    /// Validates and establishes a link from `output` to `input`.
    ///
    /// A link whose edge would close a dependency cycle is rejected here
    /// (the edge is tried on the graph and rolled back), so a once-linked
    /// engine always has a valid topological order.
    pub fn link(
        &mut self,
        pool: &mut PropertyPool,
        output: PropertyId,
        input: PropertyId,
    ) -> Result<(), TangleError> {
        let out_prop = pool
            .get(output)
            .ok_or_else(|| TangleError::Link("source property does not exist".into()))?;
        let in_prop = pool
            .get(input)
            .ok_or_else(|| TangleError::Link("target property does not exist".into()))?;
        let source_node = out_prop.owner();
        let target_node = in_prop.owner();

        if !self.graph.contains(source_node) || !self.graph.contains(target_node) {
            return Err(TangleError::Link(
                "both properties must belong to nodes of this engine".into(),
            ));
        }
        if source_node == target_node {
            return Err(TangleError::Link(format!(
                "source property '{}' and target property '{}' belong to the same node",
                out_prop.name(),
                in_prop.name()
            )));
        }
        if !(out_prop.semantics().is_output() && in_prop.semantics().is_input()) {
            let role = |is_output: bool| if is_output { "output" } else { "input" };
            return Err(TangleError::Link(format!(
                "failed to link {} property '{}' to {} property '{}', only outputs can drive inputs",
                role(out_prop.semantics().is_output()),
                out_prop.name(),
                role(in_prop.semantics().is_output()),
                in_prop.name()
            )));
        }
        if out_prop.kind() != in_prop.kind() {
            return Err(TangleError::Link(format!(
                "type {} of source property '{}' does not match type {} of target property '{}'",
                out_prop.kind(),
                out_prop.name(),
                in_prop.kind(),
                in_prop.name()
            )));
        }
        if !out_prop.kind().is_primitive() {
            return Err(TangleError::Link(format!(
                "properties of complex type {} cannot be linked directly, only primitive leaves can",
                out_prop.kind()
            )));
        }
        if let Some(existing) = self.registry.source_of(input) {
            return Err(TangleError::Link(format!(
                "target property '{}' is already driven by property '{}'",
                in_prop.name(),
                pool.property(existing).name()
            )));
        }

        // Try the edge on the graph first; a cycle must not leave a trace.
        self.graph.add_edge(source_node, target_node);
        let order = match self.graph.topologically_sorted() {
            Ok(order) => order,
            Err(_) => {
                self.graph.remove_edge(source_node, target_node);
                return Err(TangleError::Link(format!(
                    "linking property '{}' to property '{}' would create a dependency cycle",
                    out_prop.name(),
                    in_prop.name()
                )));
            }
        };

        let linked = self.registry.link(output, input);
        debug_assert!(linked, "registry occupancy was checked above");
        pool.set_linked_input(input, true);
        self.cached_order = Some(order);
        self.topology_changed = false;
        Ok(())
    }

    /// Removes exactly the link `output -> input`.
    pub fn unlink(
        &mut self,
        pool: &mut PropertyPool,
        output: PropertyId,
        input: PropertyId,
    ) -> Result<(), TangleError> {
        let in_prop = pool
            .get(input)
            .ok_or_else(|| TangleError::Link("target property does not exist".into()))?;
        if !in_prop.kind().is_primitive() {
            return Err(TangleError::Link(format!(
                "properties of complex type {} cannot be unlinked directly",
                in_prop.kind()
            )));
        }
        if !self.registry.unlink(output, input) {
            return Err(TangleError::Link(format!(
                "no link to remove to target property '{}'",
                in_prop.name()
            )));
        }
        pool.set_linked_input(input, false);
        let source_node = pool.property(output).owner();
        let target_node = pool.property(input).owner();
        self.graph.remove_edge(source_node, target_node);
        // Removing a constraint cannot invalidate the cached order.
        Ok(())
    }

    /// The cached topological order, recomputed when the topology changed.
    pub fn sorted_nodes(&mut self) -> Result<&[NodeId], TangleError> {
        if self.topology_changed || self.cached_order.is_none() {
            let order = self.graph.topologically_sorted()?;
            self.cached_order = Some(order);
            self.topology_changed = false;
        }
        Ok(self.cached_order.as_deref().expect("cache was just filled"))
    }

    pub fn linked_source(&self, input: PropertyId) -> Option<PropertyId> {
        self.registry.source_of(input)
    }

    pub fn targets_of(&self, output: PropertyId) -> impl Iterator<Item = PropertyId> + '_ {
        self.registry.targets_of(output)
    }

    pub fn links(&self) -> impl Iterator<Item = (PropertyId, PropertyId)> + '_ {
        self.registry.links()
    }

    pub fn graph(&self) -> &NodeGraph {
        &self.graph
    }
}
