// SPDX-License-Identifier: MIT OR Apache-2.0
//! Depth-first traversal callbacks.

use crate::graph::Graph;
use crate::node::NodeKey;
use std::collections::HashSet;

/// Callback invoked once per node reached by a walk.
///
/// Returning `false` stops the walk from descending below that node; the
/// rest of the walk continues.
pub trait NodeVisitor {
    /// Visit a node
    fn visit(&mut self, graph: &Graph, node: NodeKey) -> bool;
}

impl<F> NodeVisitor for F
where
    F: FnMut(&Graph, NodeKey) -> bool,
{
    fn visit(&mut self, graph: &Graph, node: NodeKey) -> bool {
        self(graph, node)
    }
}

/// Visitor recording every reached node in visit order
#[derive(Debug, Clone, Default)]
pub struct CollectNodes {
    /// Reached nodes
    pub nodes: Vec<NodeKey>,
}

impl NodeVisitor for CollectNodes {
    fn visit(&mut self, _graph: &Graph, node: NodeKey) -> bool {
        self.nodes.push(node);
        true
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Upstream,
    Downstream,
}

impl Graph {
    /// Pre-order walk from `start` towards producers, over typed inputs
    pub fn visit_upstream(&self, visitor: &mut dyn NodeVisitor, start: NodeKey) {
        let mut visited = HashSet::new();
        self.walk(visitor, start, Direction::Upstream, &mut visited);
    }

    /// Pre-order walk from `start` towards consumers, over typed outputs and
    /// control outputs
    pub fn visit_downstream(&self, visitor: &mut dyn NodeVisitor, start: NodeKey) {
        let mut visited = HashSet::new();
        self.walk(visitor, start, Direction::Downstream, &mut visited);
    }

    fn walk(
        &self,
        visitor: &mut dyn NodeVisitor,
        node: NodeKey,
        direction: Direction,
        visited: &mut HashSet<NodeKey>,
    ) {
        let Some(entry) = self.nodes.get(node) else {
            return;
        };
        if !visited.insert(node) || !visitor.visit(self, node) {
            return;
        }

        let sockets: Vec<_> = match direction {
            Direction::Upstream => entry.inputs.clone(),
            Direction::Downstream => entry.outputs.iter().chain(&entry.output_flows).copied().collect(),
        };
        for socket in sockets {
            if !self.sockets.get(socket).is_some_and(|s| s.is_typed()) {
                continue;
            }
            let peers: Vec<_> = match direction {
                Direction::Upstream => self.upstream.peers(socket).collect(),
                Direction::Downstream => self.downstream.peers(socket).collect(),
            };
            for peer in peers {
                if let Some(next) = self.sockets.get(peer).map(|s| s.node()) {
                    self.walk(visitor, next, direction, visited);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::flow::{EventEntry, Sequence};
    use crate::nodes::math::{Add, FloatConstant, Scale};

    fn wire(graph: &mut Graph, from: NodeKey, out: usize, to: NodeKey, input: usize) {
        let from = graph.node(from).unwrap().output(out).unwrap();
        let to = graph.node(to).unwrap().input(input).unwrap();
        assert!(graph.connect(from, to));
    }

    #[test]
    fn test_upstream_pre_order_visits_once() {
        let mut graph = Graph::default();
        let shared = graph.add_node(FloatConstant::new(1.0));
        let left = graph.add_node(Scale::new(2.0));
        let right = graph.add_node(Scale::new(3.0));
        let sum = graph.add_node(Add);
        wire(&mut graph, shared, 0, left, 0);
        wire(&mut graph, shared, 0, right, 0);
        wire(&mut graph, left, 0, sum, 0);
        wire(&mut graph, right, 0, sum, 1);

        let mut collect = CollectNodes::default();
        graph.visit_upstream(&mut collect, sum);
        assert_eq!(collect.nodes, vec![sum, left, shared, right]);
    }

    #[test]
    fn test_false_prunes_only_below_node() {
        let mut graph = Graph::default();
        let source = graph.add_node(FloatConstant::new(1.0));
        let pruned = graph.add_node(Scale::new(2.0));
        let below = graph.add_node(Scale::new(2.0));
        let sibling = graph.add_node(Scale::new(2.0));
        wire(&mut graph, source, 0, pruned, 0);
        wire(&mut graph, pruned, 0, below, 0);
        wire(&mut graph, source, 0, sibling, 0);

        let mut seen = Vec::new();
        let mut visitor = |_: &Graph, node: NodeKey| {
            seen.push(node);
            node != pruned
        };
        graph.visit_downstream(&mut visitor, source);
        assert_eq!(seen, vec![source, pruned, sibling]);
    }

    #[test]
    fn test_downstream_follows_control_outputs() {
        let mut graph = Graph::default();
        let entry = graph.add_node(EventEntry);
        let sequence = graph.add_node(Sequence::new(1));
        let then = graph.node(entry).unwrap().output_flow(0).unwrap();
        let exec = graph.node(sequence).unwrap().input_flow().unwrap();
        assert!(graph.connect(then, exec));

        let mut collect = CollectNodes::default();
        graph.visit_downstream(&mut collect, entry);
        assert_eq!(collect.nodes, vec![entry, sequence]);

        // Control inputs are not followed upstream
        let mut collect = CollectNodes::default();
        graph.visit_upstream(&mut collect, sequence);
        assert_eq!(collect.nodes, vec![sequence]);
    }
}
