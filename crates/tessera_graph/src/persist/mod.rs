// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph persistence.
//!
//! Both on-disk formats go through the same intermediate records: a graph is
//! captured into a [`GraphRecord`] after `assign_ids`, and a record is turned
//! back into a graph by [`build_graph`], which owns every recovery rule
//! (unknown kinds, dangling edges, duplicate producers).

pub mod binary;
pub mod local;
pub mod xml;

use crate::connection::Edge;
use crate::graph::Graph;
use crate::node::{Node, NodeKey, NodeRegistry, SocketLayout, SocketSpec};
use crate::socket::{SocketKey, SocketRole};
use crate::value::{Properties, SocketType, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Type tag opening every binary graph (`TGRF`)
pub const GRAPH_TAG: u32 = u32::from_le_bytes(*b"TGRF");

/// Current format version of both graph formats
pub const FORMAT_VERSION: u16 = 1;

/// Id written when a node reference is absent
pub const NO_NODE: u32 = u32::MAX;

/// Persistence error
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Underlying stream failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary primitive could not be encoded or decoded
    #[error("Binary encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    /// Malformed XML
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Stream does not start with a graph tag
    #[error("Not a graph stream (tag {0:#010x})")]
    BadTag(u32),

    /// Written by a newer format
    #[error("Unsupported format version {0}")]
    UnsupportedVersion(u16),

    /// Structurally invalid content
    #[error("Malformed graph data: {0}")]
    Malformed(String),
}

/// Persisted socket
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SocketRecord {
    pub id: u32,
    pub name: String,
    pub socket_type: SocketType,
    pub role: SocketRole,
    pub value: Value,
}

/// Persisted node
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NodeRecord {
    pub id: u32,
    pub type_name: String,
    pub version: u16,
    pub source_id: Uuid,
    pub name: String,
    pub properties: Properties,
    pub subgraph: Option<GraphRecord>,
    pub inputs: Vec<SocketRecord>,
    pub outputs: Vec<SocketRecord>,
    pub output_flows: Vec<SocketRecord>,
    pub input_flow: Option<SocketRecord>,
}

/// Persisted edge; `from` is the key side of the table it was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EdgeRecord {
    pub from_node: u32,
    pub from_socket: u32,
    pub to_node: u32,
    pub to_socket: u32,
}

/// Persisted graph
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct GraphRecord {
    pub nodes: Vec<NodeRecord>,
    pub master: Option<u32>,
    pub entries: Vec<u32>,
    pub upstream: Vec<EdgeRecord>,
    pub downstream: Vec<EdgeRecord>,
}

// ----------------------------------------------------------------------
// Capture
// ----------------------------------------------------------------------

/// Capture a graph whose ids were just assigned
pub(crate) fn capture_graph(graph: &Graph) -> GraphRecord {
    let node_id = |key: NodeKey| graph.node(key).and_then(Node::serial_id);

    let edges = |pairs: Vec<(SocketKey, SocketKey)>| -> Vec<EdgeRecord> {
        pairs
            .into_iter()
            .filter_map(|(key, peer)| {
                let key = graph.socket(key)?;
                let peer = graph.socket(peer)?;
                Some(EdgeRecord {
                    from_node: node_id(key.node())?,
                    from_socket: key.serial_id()?,
                    to_node: node_id(peer.node())?,
                    to_socket: peer.serial_id()?,
                })
            })
            .collect()
    };

    GraphRecord {
        nodes: graph.nodes().map(|(_, node)| capture_node(graph, node)).collect(),
        master: graph.master_node().and_then(node_id),
        entries: graph.entry_nodes().iter().filter_map(|key| node_id(*key)).collect(),
        upstream: edges(graph.upstream.iter().collect()),
        downstream: edges(graph.downstream.iter().collect()),
    }
}

pub(crate) fn capture_node(graph: &Graph, node: &Node) -> NodeRecord {
    let socket = |key: &SocketKey| {
        let socket = &graph.sockets[*key];
        SocketRecord {
            id: socket.serial_id().unwrap_or(NO_NODE),
            name: socket.name().to_string(),
            socket_type: socket.socket_type(),
            role: socket.role(),
            value: socket.value(),
        }
    };

    NodeRecord {
        id: node.serial_id().unwrap_or(NO_NODE),
        type_name: node.type_name().to_string(),
        version: node.kind().version(),
        source_id: node.source_id(),
        name: node.name.clone(),
        properties: node.kind().properties(),
        subgraph: node.kind().subgraph().map(capture_graph),
        inputs: node.inputs().iter().map(socket).collect(),
        outputs: node.outputs().iter().map(socket).collect(),
        output_flows: node.output_flows().iter().map(socket).collect(),
        input_flow: node.input_flow().as_ref().map(socket),
    }
}

// ----------------------------------------------------------------------
// Build
// ----------------------------------------------------------------------

/// Rebuild a graph from a record. Nothing is emitted to event sinks.
pub(crate) fn build_graph(record: GraphRecord, registry: &NodeRegistry) -> Graph {
    let mut graph = Graph::default();
    let mut by_id: HashMap<u32, NodeKey> = HashMap::new();

    for node in record.nodes {
        let id = node.id;
        if let Some(key) = build_node(&mut graph, node, registry) {
            by_id.insert(id, key);
        }
    }

    if let Some(id) = record.master {
        match by_id.get(&id) {
            Some(key) => graph.master = Some(*key),
            None => tracing::warn!("Master node {} not found; leaving master unset", id),
        }
    }
    for id in record.entries {
        match by_id.get(&id) {
            Some(key) if !graph.entry_nodes.contains(key) => graph.entry_nodes.push(*key),
            Some(_) => {}
            None => tracing::warn!("Entry node {} not found; skipping", id),
        }
    }

    for edge in &record.upstream {
        if let Some((consumer, producer)) = resolve_edge(&graph, &by_id, edge) {
            restore_edge(&mut graph, producer, consumer);
        }
    }
    for edge in &record.downstream {
        if let Some((producer, consumer)) = resolve_edge(&graph, &by_id, edge) {
            restore_edge(&mut graph, producer, consumer);
        }
    }
    graph
}

/// Instantiate one node record; `None` if its kind is unknown
pub(crate) fn build_node(graph: &mut Graph, record: NodeRecord, registry: &NodeRegistry) -> Option<NodeKey> {
    let Some(mut kind) = registry.create(&record.type_name) else {
        tracing::warn!(
            "Skipping node {} of unknown type '{}'",
            record.source_id,
            record.type_name
        );
        return None;
    };

    for (name, value) in &record.properties {
        if !kind.set_property(name, value) {
            tracing::warn!("Node type '{}' rejected property '{}'", record.type_name, name);
        }
    }
    if let Some(subgraph) = record.subgraph {
        match kind.subgraph_mut() {
            Some(slot) => *slot = build_graph(subgraph, registry),
            None => tracing::warn!("Node type '{}' has no subgraph; dropping it", record.type_name),
        }
    }

    let spec = |socket: SocketRecord| SocketSpec {
        name: socket.name,
        socket_type: socket.socket_type,
        value: socket.value,
        serial_id: Some(socket.id),
    };
    let mut layout = SocketLayout {
        inputs: record.inputs.into_iter().map(spec).collect(),
        outputs: record.outputs.into_iter().map(spec).collect(),
        output_flows: record.output_flows.into_iter().map(spec).collect(),
        input_flow: record.input_flow.map(spec),
    };

    let current = kind.version();
    if record.version < current {
        tracing::debug!(
            "Upgrading node type '{}' from version {} to {}",
            record.type_name,
            record.version,
            current
        );
        kind.version_update(record.version, &mut layout);
    } else if record.version > current {
        tracing::warn!(
            "Node type '{}' was saved by a newer version ({} > {})",
            record.type_name,
            record.version,
            current
        );
    }

    let key = graph.insert_node(kind, layout, record.source_id, record.name);
    graph.nodes[key].serial_id = Some(record.id);
    Some(key)
}

/// Map an edge record to `(key socket, peer socket)` handles
fn resolve_edge(
    graph: &Graph,
    by_id: &HashMap<u32, NodeKey>,
    edge: &EdgeRecord,
) -> Option<(SocketKey, SocketKey)> {
    let lookup = |node: u32, socket: u32| {
        by_id
            .get(&node)
            .and_then(|key| graph.socket_by_serial(*key, socket))
    };
    match (lookup(edge.from_node, edge.from_socket), lookup(edge.to_node, edge.to_socket)) {
        (Some(key), Some(peer)) => Some((key, peer)),
        _ => {
            tracing::warn!(
                "Skipping edge {}:{} - {}:{} with unknown endpoint",
                edge.from_node,
                edge.from_socket,
                edge.to_node,
                edge.to_socket
            );
            None
        }
    }
}

/// Insert a persisted edge if `connect` would accept it, keeping the first
/// producer of a data input and the first successor of a control output
fn restore_edge(graph: &mut Graph, producer: SocketKey, consumer: SocketKey) {
    let (Some(from), Some(to)) = (graph.socket(producer), graph.socket(consumer)) else {
        return;
    };
    if from.role().is_input_side() || !to.role().is_input_side() {
        tracing::warn!("Skipping edge {:?} -> {:?} with wrong direction", producer, consumer);
        return;
    }
    let (from_role, to_role) = (from.role(), to.role());
    if let Err(err) = graph.check_connection(producer, consumer) {
        tracing::warn!("Skipping illegal edge {:?} -> {:?}: {err}", producer, consumer);
        return;
    }

    if to_role == SocketRole::Input {
        if let Some(existing) = graph.upstream.first(consumer) {
            if existing != producer {
                tracing::warn!("Input {:?} already has a producer; keeping the first", consumer);
            }
            return;
        }
    }
    if from_role == SocketRole::ControlOut {
        if let Some(existing) = graph.downstream.first(producer) {
            if existing != consumer {
                tracing::warn!("Control output {:?} already routed; keeping the first", producer);
            }
            return;
        }
    }
    graph.link(Edge::new(producer, consumer));
}
