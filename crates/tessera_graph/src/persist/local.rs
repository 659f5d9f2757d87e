// SPDX-License-Identifier: MIT OR Apache-2.0
//! Local subgraph format used by copy and paste.
//!
//! Connectivity inside a node subset is recorded by position: for every node
//! of the subset and every socket of that node (inputs, outputs, control
//! outputs, control input) a flag says whether the socket has upstream peers
//! inside the subset, followed by their `(node index, socket index)` pairs.
//! Edges to nodes outside the subset are not recorded.

use super::binary::{BinaryReader, BinaryWriter};
use super::{build_node, capture_node, PersistError, FORMAT_VERSION};
use crate::events::GraphEvent;
use crate::graph::Graph;
use crate::node::{NodeKey, NodeRegistry};
use std::io::{Read, Write};
use uuid::Uuid;

/// Type tag opening a clipboard buffer (`TCLP`)
pub const CLIPBOARD_TAG: u32 = u32::from_le_bytes(*b"TCLP");

/// Record the edges between the nodes of `nodes`
pub fn collect_local_connectivity(graph: &Graph, nodes: &[NodeKey], dest: impl Write) -> Result<(), PersistError> {
    collect(graph, nodes, &mut BinaryWriter::new(dest))
}

/// Replay connectivity recorded by [`collect_local_connectivity`] onto
/// `nodes`, which must have the same socket layout as the recorded subset.
///
/// Edges go through [`Graph::connect`]; returns how many were created.
pub fn reconstruct_local_connectivity(
    graph: &mut Graph,
    nodes: &[NodeKey],
    src: impl Read,
) -> Result<usize, PersistError> {
    let mut slots = Vec::with_capacity(nodes.len());
    for key in nodes {
        let node = graph
            .node(*key)
            .ok_or_else(|| PersistError::Malformed(format!("node {key:?} is not in the graph")))?;
        slots.push((Some(*key), node.sockets().count()));
    }
    replay(graph, &slots, &mut BinaryReader::new(src))
}

fn collect<W: Write>(graph: &Graph, nodes: &[NodeKey], writer: &mut BinaryWriter<W>) -> Result<(), PersistError> {
    for key in nodes {
        let Some(node) = graph.node(*key) else {
            return Err(PersistError::Malformed(format!("node {key:?} is not in the graph")));
        };
        for socket in node.sockets() {
            let peers: Vec<[u32; 2]> = graph
                .upstream_of(socket)
                .filter_map(|peer| {
                    let owner = graph.socket(peer)?.node();
                    let node_index = nodes.iter().position(|k| *k == owner)?;
                    let socket_index = graph.node(owner)?.socket_index(peer)?;
                    Some([u32::try_from(node_index).ok()?, u32::try_from(socket_index).ok()?])
                })
                .collect();

            writer.put(&!peers.is_empty())?;
            if !peers.is_empty() {
                writer.put_count(peers.len())?;
                for peer in &peers {
                    writer.put(peer)?;
                }
            }
        }
    }
    Ok(())
}

/// `slots` holds, per recorded node, its handle in `graph` (or `None` if it
/// was not recreated) and its socket count
fn replay<R: Read>(
    graph: &mut Graph,
    slots: &[(Option<NodeKey>, usize)],
    reader: &mut BinaryReader<R>,
) -> Result<usize, PersistError> {
    let mut created = 0;
    for (node, socket_count) in slots {
        for socket_index in 0..*socket_count {
            if !reader.take::<bool>()? {
                continue;
            }
            let count = reader.take_count()?;
            for _ in 0..count {
                let [peer_node, peer_socket]: [u32; 2] = reader.take()?;
                let consumer = node.and_then(|key| graph.node(key)?.socket_at(socket_index));
                let producer = slots
                    .get(peer_node as usize)
                    .and_then(|(key, _)| *key)
                    .and_then(|key| graph.node(key)?.socket_at(peer_socket as usize));

                match (producer, consumer) {
                    (Some(producer), Some(consumer)) => {
                        if graph.connect(producer, consumer) {
                            created += 1;
                        }
                    }
                    _ => tracing::debug!("Dropping local edge to a node that was not recreated"),
                }
            }
        }
    }
    Ok(created)
}

/// Serialize `nodes` and the edges between them into a clipboard buffer
pub fn copy_nodes(graph: &mut Graph, nodes: &[NodeKey]) -> Result<Vec<u8>, PersistError> {
    graph.assign_ids();
    let mut bytes = Vec::new();
    let mut writer = BinaryWriter::new(&mut bytes);
    writer.put(&CLIPBOARD_TAG)?;
    writer.put(&FORMAT_VERSION)?;
    writer.put_count(nodes.len())?;
    for key in nodes {
        let node = graph
            .node(*key)
            .ok_or_else(|| PersistError::Malformed(format!("node {key:?} is not in the graph")))?;
        writer.write_node(&capture_node(graph, node))?;
    }
    collect(graph, nodes, &mut writer)?;
    tracing::debug!("Copied {} nodes", nodes.len());
    Ok(bytes)
}

/// Add the nodes of a clipboard buffer to `graph` and restore their edges.
///
/// Pasted nodes get fresh source ids. Nodes of unknown kind are skipped
/// together with their edges. Returns the pasted nodes.
pub fn paste_nodes(graph: &mut Graph, bytes: &[u8], registry: &NodeRegistry) -> Result<Vec<NodeKey>, PersistError> {
    let mut reader = BinaryReader::new(bytes);
    let tag: u32 = reader.take()?;
    if tag != CLIPBOARD_TAG {
        return Err(PersistError::BadTag(tag));
    }
    let version: u16 = reader.take()?;
    if version > FORMAT_VERSION {
        return Err(PersistError::UnsupportedVersion(version));
    }

    let count = reader.take_count()?;
    let mut records = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        records.push(reader.read_node()?);
    }

    let mut slots = Vec::with_capacity(records.len());
    let mut pasted = Vec::new();
    for mut record in records {
        let socket_count = record.inputs.len()
            + record.outputs.len()
            + record.output_flows.len()
            + usize::from(record.input_flow.is_some());
        record.source_id = Uuid::new_v4();

        let key = build_node(graph, record, registry);
        if let Some(key) = key {
            forget_serial_ids(graph, key);
            graph.emit(GraphEvent::NodeAdded(key));
            pasted.push(key);
        }
        slots.push((key, socket_count));
    }

    let edges = replay(graph, &slots, &mut reader)?;
    tracing::debug!("Pasted {} nodes with {} edges", pasted.len(), edges);
    Ok(pasted)
}

/// Ids copied from another graph mean nothing here
fn forget_serial_ids(graph: &mut Graph, key: NodeKey) {
    let Some(node) = graph.nodes.get_mut(key) else {
        return;
    };
    node.serial_id = None;
    for socket in node.sockets() {
        if let Some(socket) = graph.sockets.get_mut(socket) {
            socket.serial_id = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::create_standard_registry;
    use crate::nodes::math::{Add, FloatConstant, Scale};
    use std::sync::mpsc;

    fn wire(graph: &mut Graph, from: NodeKey, out: usize, to: NodeKey, input: usize) {
        let from = graph.node(from).unwrap().output(out).unwrap();
        let to = graph.node(to).unwrap().input(input).unwrap();
        assert!(graph.connect(from, to));
    }

    fn chain(graph: &mut Graph) -> [NodeKey; 3] {
        let constant = graph.add_node(FloatConstant::new(1.0));
        let first = graph.add_node(Scale::new(2.0));
        let second = graph.add_node(Scale::new(3.0));
        wire(graph, constant, 0, first, 0);
        wire(graph, first, 0, second, 0);
        [constant, first, second]
    }

    #[test]
    fn test_reconstruct_onto_matching_nodes() {
        let mut source = Graph::default();
        let nodes = chain(&mut source);
        let mut buffer = Vec::new();
        collect_local_connectivity(&source, &nodes, &mut buffer).unwrap();

        let mut target = Graph::default();
        let copies = [
            target.add_node(FloatConstant::new(1.0)),
            target.add_node(Scale::new(2.0)),
            target.add_node(Scale::new(3.0)),
        ];
        let created = reconstruct_local_connectivity(&mut target, &copies, buffer.as_slice()).unwrap();
        assert_eq!(created, 2);

        let input = target.node(copies[2]).unwrap().input(0).unwrap();
        let output = target.node(copies[1]).unwrap().output(0).unwrap();
        assert!(target.connected(output, input));
    }

    #[test]
    fn test_paste_keeps_internal_edges_only() {
        let mut graph = Graph::default();
        let [_, first, second] = chain(&mut graph);
        let bytes = copy_nodes(&mut graph, &[first, second]).unwrap();

        let pasted = paste_nodes(&mut graph, &bytes, &create_standard_registry()).unwrap();
        assert_eq!(pasted.len(), 2);
        assert_eq!(graph.node_count(), 5);
        assert_eq!(graph.edge_count(), 3);

        let copy = graph.node(pasted[0]).unwrap();
        assert_ne!(copy.source_id(), graph.node(first).unwrap().source_id());
        assert_eq!(copy.serial_id(), None);
        // The edge from the constant outside the selection is not restored
        assert_eq!(graph.upstream_of(copy.input(0).unwrap()).count(), 0);
        let out = copy.output(0).unwrap();
        let input = graph.node(pasted[1]).unwrap().input(0).unwrap();
        assert!(graph.connected(out, input));
    }

    #[test]
    fn test_paste_emits_events() {
        let mut source = Graph::default();
        let nodes = chain(&mut source);
        let bytes = copy_nodes(&mut source, &nodes).unwrap();

        let (tx, rx) = mpsc::channel();
        let mut target = Graph::new("target").with_event_sink(tx);
        let pasted = paste_nodes(&mut target, &bytes, &create_standard_registry()).unwrap();

        let events: Vec<_> = rx.try_iter().collect();
        let added = events.iter().filter(|e| matches!(e, GraphEvent::NodeAdded(_))).count();
        let edges = events.iter().filter(|e| matches!(e, GraphEvent::EdgeAdded { .. })).count();
        assert_eq!(added, pasted.len());
        assert_eq!(edges, 2);
    }

    #[test]
    fn test_paste_skips_unknown_kinds() {
        let mut graph = Graph::default();
        let constant = graph.add_node(FloatConstant::new(1.0));
        let scale = graph.add_node(Scale::new(2.0));
        let add = graph.add_node(Add);
        wire(&mut graph, constant, 0, scale, 0);
        wire(&mut graph, constant, 0, add, 0);
        wire(&mut graph, scale, 0, add, 1);
        let bytes = copy_nodes(&mut graph, &[constant, scale, add]).unwrap();

        let mut registry = NodeRegistry::new();
        registry.register_kind::<FloatConstant>();
        registry.register_kind::<Add>();
        let mut target = Graph::default();
        let pasted = paste_nodes(&mut target, &bytes, &registry).unwrap();
        assert_eq!(pasted.len(), 2);
        assert_eq!(target.edge_count(), 1);
    }

    #[test]
    fn test_paste_rejects_graph_stream() {
        let bytes = Graph::default().to_bytes().unwrap();
        let result = paste_nodes(&mut Graph::default(), &bytes, &create_standard_registry());
        assert!(matches!(result, Err(PersistError::BadTag(_))));
    }
}
