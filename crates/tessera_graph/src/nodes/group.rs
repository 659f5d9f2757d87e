// SPDX-License-Identifier: MIT OR Apache-2.0
//! Group node: a node that owns a nested graph.
//!
//! Each group socket may be bound to a socket of an inner node, addressed by
//! the inner node's source id and the socket index. On execute the group
//! writes its inputs into the bound inner inputs, evaluates the inner nodes
//! that own bound outputs with the upstream discipline, and copies their
//! values to its own outputs.

use crate::evaluation::ExecContext;
use crate::graph::Graph;
use crate::node::{ExecResult, NodeKey, NodeKind, SocketLayout};
use crate::socket::SocketKey;
use crate::value::{Properties, Property, SocketType, Value};
use uuid::Uuid;

/// Reference to a socket inside the nested graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InnerSocket {
    /// Source id of the inner node
    pub node: Uuid,
    /// Index among the inner node's inputs (for group inputs) or outputs
    pub index: usize,
}

/// One socket of the group's interface
#[derive(Debug, Clone, PartialEq)]
pub struct GroupPort {
    /// Socket name
    pub name: String,
    /// Socket type
    pub socket_type: SocketType,
    /// Bound inner socket
    pub target: Option<InnerSocket>,
}

impl GroupPort {
    /// Create an unbound port
    pub fn new(name: impl Into<String>, socket_type: SocketType) -> Self {
        Self {
            name: name.into(),
            socket_type,
            target: None,
        }
    }
}

/// A node wrapping a nested graph
#[derive(Debug, Default)]
pub struct GroupNode {
    graph: Graph,
    inputs: Vec<GroupPort>,
    outputs: Vec<GroupPort>,
}

impl GroupNode {
    /// Wrap a graph with an empty interface
    pub fn new(graph: Graph) -> Self {
        Self {
            graph,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Add an input bound to input `index` of the inner node `node`
    pub fn with_input(mut self, name: impl Into<String>, ty: SocketType, node: Uuid, index: usize) -> Self {
        let mut port = GroupPort::new(name, ty);
        port.target = Some(InnerSocket { node, index });
        self.inputs.push(port);
        self
    }

    /// Add an output bound to output `index` of the inner node `node`
    pub fn with_output(mut self, name: impl Into<String>, ty: SocketType, node: Uuid, index: usize) -> Self {
        let mut port = GroupPort::new(name, ty);
        port.target = Some(InnerSocket { node, index });
        self.outputs.push(port);
        self
    }

    /// Interface inputs
    pub fn inputs(&self) -> &[GroupPort] {
        &self.inputs
    }

    /// Interface outputs
    pub fn outputs(&self) -> &[GroupPort] {
        &self.outputs
    }

    /// Nested graph
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Nested graph (mutable)
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }
}

fn resolve(graph: &Graph, target: Option<InnerSocket>, output: bool) -> Option<(NodeKey, SocketKey)> {
    let target = target?;
    let node_key = graph.find_by_source_id(target.node)?;
    let node = graph.node(node_key)?;
    let socket = if output {
        node.output(target.index)
    } else {
        node.input(target.index)
    }?;
    Some((node_key, socket))
}

impl NodeKind for GroupNode {
    fn type_name(&self) -> &'static str {
        "group"
    }

    fn construct(&self, layout: &mut SocketLayout) {
        for port in &self.inputs {
            layout.add_input(port.name.clone(), port.socket_type);
        }
        for port in &self.outputs {
            layout.add_output(port.name.clone(), port.socket_type);
        }
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> ExecResult {
        for (index, port) in self.inputs.iter().enumerate() {
            let value = ctx.input(index);
            if value.is_empty() {
                continue;
            }
            let Some((_, socket)) = resolve(&self.graph, port.target, false) else {
                continue;
            };
            if let Some(Err(err)) = self.graph.socket_mut(socket).map(|s| s.store_value(value)) {
                tracing::warn!("Group input '{}': {err}", port.name);
            }
        }

        let generation = self.graph.next_generation();
        for (index, port) in self.outputs.iter().enumerate() {
            let Some((node, socket)) = resolve(&self.graph, port.target, true) else {
                continue;
            };
            if let Err(err) = self.graph.execute_upstream(generation, ctx.params(), node, None) {
                tracing::warn!("Group output '{}' failed: {err}", port.name);
                return ExecResult::Terminate;
            }
            let value = self.graph.socket(socket).map_or(Value::Empty, |s| s.value());
            ctx.set_output(index, value);
        }
        ExecResult::Complete
    }

    fn properties(&self) -> Properties {
        let mut properties = Properties::new();
        for (side, ports) in [("input", &self.inputs), ("output", &self.outputs)] {
            for (index, port) in ports.iter().enumerate() {
                let prefix = format!("{side}.{index}");
                properties.insert(format!("{prefix}.name"), Property::Text(port.name.clone()));
                properties.insert(
                    format!("{prefix}.type"),
                    Property::Text(port.socket_type.name().to_string()),
                );
                if let Some(target) = port.target {
                    properties.insert(format!("{prefix}.node"), Property::Text(target.node.to_string()));
                    properties.insert(format!("{prefix}.socket"), Property::Int(target.index as i64));
                }
            }
        }
        properties
    }

    fn set_property(&mut self, name: &str, value: &Property) -> bool {
        let mut parts = name.splitn(3, '.');
        let (Some(side), Some(index), Some(field)) = (parts.next(), parts.next(), parts.next()) else {
            return false;
        };
        let Ok(index) = index.parse::<usize>() else {
            return false;
        };
        let ports = match side {
            "input" => &mut self.inputs,
            "output" => &mut self.outputs,
            _ => return false,
        };
        // Ports are restored in order; an index may only name a port or append one
        if index > ports.len() {
            return false;
        }
        if index < ports.len() {
            return apply_port_field(&mut ports[index], field, value);
        }
        let mut port = GroupPort::new("", SocketType::Untyped);
        if !apply_port_field(&mut port, field, value) {
            return false;
        }
        ports.push(port);
        true
    }

    fn subgraph(&self) -> Option<&Graph> {
        Some(&self.graph)
    }

    fn subgraph_mut(&mut self) -> Option<&mut Graph> {
        Some(&mut self.graph)
    }
}

fn apply_port_field(port: &mut GroupPort, field: &str, value: &Property) -> bool {
    match (field, value) {
        ("name", Property::Text(text)) => port.name = text.clone(),
        ("type", Property::Text(text)) => match SocketType::from_name(text) {
            Some(ty) => port.socket_type = ty,
            None => return false,
        },
        ("node", Property::Text(text)) => match Uuid::parse_str(text) {
            Ok(node) => {
                let index = port.target.map_or(0, |t| t.index);
                port.target = Some(InnerSocket { node, index });
            }
            Err(_) => return false,
        },
        ("socket", Property::Int(socket)) if *socket >= 0 => {
            let node = port.target.map_or(Uuid::nil(), |t| t.node);
            port.target = Some(InnerSocket {
                node,
                index: *socket as usize,
            });
        }
        _ => return false,
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::ExecParams;
    use crate::nodes::math::{Add, FloatConstant, Scale};

    fn doubling_group() -> GroupNode {
        let mut inner = Graph::new("inner");
        let scale = inner.add_node(Scale::new(2.0));
        let scale_id = inner.node(scale).unwrap().source_id();
        GroupNode::new(inner)
            .with_input("In", SocketType::Float, scale_id, 0)
            .with_output("Out", SocketType::Float, scale_id, 0)
    }

    #[test]
    fn test_group_evaluates_nested_graph() {
        let mut graph = Graph::default();
        let source = graph.add_node(FloatConstant::new(4.0));
        let group = graph.add_node(doubling_group());
        let sum = graph.add_node(Add);

        let node = |key| graph.node(key).unwrap();
        let (src_out, group_in) = (node(source).output(0).unwrap(), node(group).input(0).unwrap());
        let (group_out, sum_in) = (node(group).output(0).unwrap(), node(sum).input(0).unwrap());
        assert!(graph.connect(src_out, group_in));
        assert!(graph.connect(group_out, sum_in));

        graph.evaluate(sum, &ExecParams::default()).unwrap();
        let out = graph.node(sum).unwrap().output(0).unwrap();
        assert_eq!(graph.socket(out).unwrap().value(), Value::Float(8.0));
    }

    #[test]
    fn test_group_properties_round_trip() {
        let group = doubling_group();
        let mut restored = GroupNode::default();
        for (name, value) in group.properties() {
            assert!(restored.set_property(&name, &value), "{name}");
        }
        assert_eq!(restored.inputs(), group.inputs());
        assert_eq!(restored.outputs(), group.outputs());
        assert!(!restored.set_property("input.x.name", &Property::Text("A".into())));
    }

    #[test]
    fn test_port_index_must_name_or_append() {
        let mut group = GroupNode::default();
        let name = Property::Text("In".into());
        assert!(!group.set_property("input.2000000.name", &name));
        assert!(!group.set_property(&format!("input.{}.name", usize::MAX), &name));
        assert!(group.inputs().is_empty());

        assert!(group.set_property("input.0.name", &name));
        assert!(!group.set_property("input.1.type", &Property::Text("no-such-type".into())));
        assert!(group.set_property("input.0.type", &Property::Text("float".into())));
        assert_eq!(group.inputs().len(), 1);
        assert_eq!(group.inputs()[0].socket_type, SocketType::Float);

        let mut layout = SocketLayout::default();
        group.construct(&mut layout);
        assert_eq!(layout.inputs().len(), 1);
    }
}
