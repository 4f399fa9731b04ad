//! Workflow graph model and validator.
//!
//! The persisted form is a pair of flat arrays (`nodes`, `edges`) with
//! string-id cross-references, exactly as the editor stores them. For
//! validation and execution the arrays are compiled into a petgraph
//! `DiGraph` plus an id→index map, built once per pass.

use crate::edge::Edge;
use crate::error::ValidationError;
use crate::node::{Node, NodeId, NodeKind};
use crate::trigger::TriggerType;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ceiling on the number of nodes in a single workflow graph.
pub const MAX_NODES: usize = 50;

/// A workflow graph in its persisted form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    /// All nodes, in definition order.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// All edges, referencing nodes by id.
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl WorkflowGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node, returning its id.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Adds an edge.
    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    /// Returns a node by id.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Returns all trigger nodes.
    pub fn trigger_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_trigger())
    }

    /// Compiles the flat arrays into a traversable graph.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownNode`] for any edge whose
    /// endpoint is missing from `nodes`. Dangling edges are rejected,
    /// never dropped.
    pub fn compile(&self) -> Result<CompiledGraph<'_>, ValidationError> {
        let mut graph = DiGraph::with_capacity(self.nodes.len(), self.edges.len());
        let mut index: HashMap<NodeId, NodeIndex> = HashMap::with_capacity(self.nodes.len());

        for (pos, node) in self.nodes.iter().enumerate() {
            let idx = graph.add_node(pos);
            index.insert(node.id.clone(), idx);
        }

        for (pos, edge) in self.edges.iter().enumerate() {
            let source = *index
                .get(&edge.source)
                .ok_or_else(|| ValidationError::UnknownNode {
                    edge_id: edge.id.as_str().to_string(),
                    node_id: edge.source.clone(),
                })?;
            let target = *index
                .get(&edge.target)
                .ok_or_else(|| ValidationError::UnknownNode {
                    edge_id: edge.id.as_str().to_string(),
                    node_id: edge.target.clone(),
                })?;
            graph.add_edge(source, target, pos);
        }

        Ok(CompiledGraph {
            defs: self,
            graph,
            index,
        })
    }

    /// Validates the graph against its trigger type.
    ///
    /// Checks, in order:
    /// - every edge references existing node ids
    /// - node count is within [`MAX_NODES`]
    /// - the graph is acyclic (first back-edge reports the cycle)
    /// - automatic trigger types have at least one trigger node
    /// - trigger nodes have no incoming edges, and when a trigger node
    ///   exists every other node is fed by at least one edge
    ///
    /// # Errors
    ///
    /// Returns the first violation found; the caller rejects the write.
    pub fn validate(&self, trigger_type: &TriggerType) -> Result<(), ValidationError> {
        let compiled = self.compile()?;

        if self.nodes.len() > MAX_NODES {
            return Err(ValidationError::NodeLimitExceeded {
                count: self.nodes.len(),
                limit: MAX_NODES,
            });
        }

        compiled.check_acyclic()?;

        let trigger_count = self.trigger_nodes().count();
        if trigger_type.is_automatic() && trigger_count == 0 {
            return Err(ValidationError::MissingTriggerNode {
                trigger_type: trigger_type.to_string(),
            });
        }

        for node in &self.nodes {
            let incoming = compiled.in_degree(&node.id);
            if node.is_trigger() && incoming > 0 {
                return Err(ValidationError::TriggerHasIncomingEdge {
                    node_id: node.id.clone(),
                });
            }
            if !node.is_trigger() && trigger_count > 0 && incoming == 0 {
                return Err(ValidationError::DetachedNode {
                    node_id: node.id.clone(),
                });
            }
        }

        Ok(())
    }
}

/// A compiled view of a [`WorkflowGraph`] for traversal.
#[derive(Debug)]
pub struct CompiledGraph<'g> {
    defs: &'g WorkflowGraph,
    graph: DiGraph<usize, usize>,
    index: HashMap<NodeId, NodeIndex>,
}

impl<'g> CompiledGraph<'g> {
    /// Returns a node by id.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&'g Node> {
        let idx = self.index.get(id)?;
        self.defs.nodes.get(*self.graph.node_weight(*idx)?)
    }

    /// Returns the nodes with no incoming edges, in definition order.
    #[must_use]
    pub fn entry_nodes(&self) -> Vec<&'g Node> {
        self.defs
            .nodes
            .iter()
            .filter(|n| self.in_degree(&n.id) == 0)
            .collect()
    }

    /// Returns the number of incoming edges for a node.
    #[must_use]
    pub fn in_degree(&self, id: &NodeId) -> usize {
        self.index
            .get(id)
            .map(|idx| self.graph.edges_directed(*idx, Direction::Incoming).count())
            .unwrap_or(0)
    }

    /// Returns the successors of a node with the connecting edges, in
    /// edge-definition order.
    #[must_use]
    pub fn successors(&self, id: &NodeId) -> Vec<(&'g Node, &'g Edge)> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };

        let mut out: Vec<(usize, &'g Node, &'g Edge)> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter_map(|e| {
                let edge_pos = *e.weight();
                let node_pos = *self.graph.node_weight(e.target())?;
                Some((
                    edge_pos,
                    self.defs.nodes.get(node_pos)?,
                    self.defs.edges.get(edge_pos)?,
                ))
            })
            .collect();
        out.sort_by_key(|(pos, _, _)| *pos);
        out.into_iter().map(|(_, n, e)| (n, e)).collect()
    }

    /// Returns the predecessors of a node, in edge-definition order.
    #[must_use]
    pub fn predecessors(&self, id: &NodeId) -> Vec<(&'g Node, &'g Edge)> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };

        let mut out: Vec<(usize, &'g Node, &'g Edge)> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .filter_map(|e| {
                let edge_pos = *e.weight();
                let node_pos = *self.graph.node_weight(e.source())?;
                Some((
                    edge_pos,
                    self.defs.nodes.get(node_pos)?,
                    self.defs.edges.get(edge_pos)?,
                ))
            })
            .collect();
        out.sort_by_key(|(pos, _, _)| *pos);
        out.into_iter().map(|(_, n, e)| (n, e)).collect()
    }

    /// Depth-first cycle check with gray/white/black coloring.
    ///
    /// Terminates on the first back edge found and reports the node ids
    /// on the offending cycle.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::CycleDetected`] naming the cycle.
    pub fn check_acyclic(&self) -> Result<(), ValidationError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut colors = vec![Color::White; self.graph.node_count()];
        let mut path: Vec<NodeIndex> = Vec::new();

        // Node count is capped, so recursion depth is bounded.
        fn visit(
            g: &CompiledGraph<'_>,
            idx: NodeIndex,
            colors: &mut [Color],
            path: &mut Vec<NodeIndex>,
        ) -> Result<(), Vec<NodeIndex>> {
            colors[idx.index()] = Color::Gray;
            path.push(idx);

            let targets: Vec<NodeIndex> = g
                .graph
                .edges_directed(idx, Direction::Outgoing)
                .map(|e| e.target())
                .collect();
            for next in targets {
                match colors[next.index()] {
                    Color::Gray => {
                        // Back edge: the cycle is the path suffix from
                        // the revisited node.
                        let start = path.iter().position(|p| *p == next).unwrap_or(0);
                        return Err(path[start..].to_vec());
                    }
                    Color::White => visit(g, next, colors, path)?,
                    Color::Black => {}
                }
            }

            path.pop();
            colors[idx.index()] = Color::Black;
            Ok(())
        }

        for idx in self.graph.node_indices() {
            if colors[idx.index()] == Color::White {
                if let Err(cycle) = visit(self, idx, &mut colors, &mut path) {
                    let nodes = cycle
                        .iter()
                        .filter_map(|i| {
                            let pos = *self.graph.node_weight(*i)?;
                            Some(self.defs.nodes.get(pos)?.id.clone())
                        })
                        .collect();
                    return Err(ValidationError::CycleDetected { nodes });
                }
            }
        }

        Ok(())
    }
}
