// SPDX-License-Identifier: MIT OR Apache-2.0
//! Binary graph format.
//!
//! Fixed-width little-endian primitives encoded with `bincode`:
//!
//! ```text
//! graph   := tag:u32 version:u16 body
//! body    := count:u32 node* master:u32 count:u32 entry:u32*
//!            count:u32 edge* count:u32 edge*
//! node    := id:u32 type:str version:u16 source:u128 name:str
//!            count:u32 (name:str property)* has_subgraph:bool body?
//!            count:u32 socket* count:u32 socket* count:u32 socket*
//!            has_flow:bool socket?
//! socket  := id:u32 name:str type:u8 role:u8 value
//! edge    := from_node:u32 from_socket:u32 to_node:u32 to_socket:u32
//! ```

use super::{
    build_graph, capture_graph, EdgeRecord, GraphRecord, NodeRecord, PersistError, SocketRecord, FORMAT_VERSION,
    GRAPH_TAG, NO_NODE,
};
use crate::graph::Graph;
use crate::node::NodeRegistry;
use crate::socket::SocketRole;
use crate::value::{Properties, SocketType};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};
use uuid::Uuid;

/// Largest capacity reserved up front for a persisted count
const MAX_PREALLOC: usize = 1024;

/// Primitive writer over any byte sink
pub(crate) struct BinaryWriter<W> {
    inner: W,
}

impl<W: Write> BinaryWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        Self { inner }
    }

    pub(crate) fn put<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), PersistError> {
        bincode::serialize_into(&mut self.inner, value)?;
        Ok(())
    }

    pub(crate) fn put_count(&mut self, count: usize) -> Result<(), PersistError> {
        let count = u32::try_from(count).map_err(|_| PersistError::Malformed(format!("count {count} too large")))?;
        self.put(&count)
    }

    pub(crate) fn write_header(&mut self) -> Result<(), PersistError> {
        self.put(&GRAPH_TAG)?;
        self.put(&FORMAT_VERSION)
    }

    pub(crate) fn write_graph(&mut self, graph: &GraphRecord) -> Result<(), PersistError> {
        self.put_count(graph.nodes.len())?;
        for node in &graph.nodes {
            self.write_node(node)?;
        }
        self.put(&graph.master.unwrap_or(NO_NODE))?;
        self.put_count(graph.entries.len())?;
        for entry in &graph.entries {
            self.put(entry)?;
        }
        for edges in [&graph.upstream, &graph.downstream] {
            self.put_count(edges.len())?;
            for edge in edges {
                self.put(&[edge.from_node, edge.from_socket, edge.to_node, edge.to_socket])?;
            }
        }
        Ok(())
    }

    pub(crate) fn write_node(&mut self, node: &NodeRecord) -> Result<(), PersistError> {
        self.put(&node.id)?;
        self.put(node.type_name.as_str())?;
        self.put(&node.version)?;
        self.put(&node.source_id.as_u128())?;
        self.put(node.name.as_str())?;

        self.put_count(node.properties.len())?;
        for (name, value) in &node.properties {
            self.put(name.as_str())?;
            self.put(value)?;
        }

        self.put(&node.subgraph.is_some())?;
        if let Some(subgraph) = &node.subgraph {
            self.write_graph(subgraph)?;
        }

        for sockets in [&node.inputs, &node.outputs, &node.output_flows] {
            self.put_count(sockets.len())?;
            for socket in sockets {
                self.write_socket(socket)?;
            }
        }
        self.put(&node.input_flow.is_some())?;
        if let Some(socket) = &node.input_flow {
            self.write_socket(socket)?;
        }
        Ok(())
    }

    fn write_socket(&mut self, socket: &SocketRecord) -> Result<(), PersistError> {
        self.put(&socket.id)?;
        self.put(socket.name.as_str())?;
        self.put(&socket.socket_type.tag())?;
        self.put(&socket.role.tag())?;
        self.put(&socket.value)
    }
}

/// Primitive reader over any byte source
pub(crate) struct BinaryReader<R> {
    inner: R,
}

impl<R: Read> BinaryReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self { inner }
    }

    pub(crate) fn take<T: DeserializeOwned>(&mut self) -> Result<T, PersistError> {
        Ok(bincode::deserialize_from(&mut self.inner)?)
    }

    pub(crate) fn take_count(&mut self) -> Result<usize, PersistError> {
        Ok(self.take::<u32>()? as usize)
    }

    pub(crate) fn read_header(&mut self) -> Result<(), PersistError> {
        let tag: u32 = self.take()?;
        if tag != GRAPH_TAG {
            return Err(PersistError::BadTag(tag));
        }
        let version: u16 = self.take()?;
        if version > FORMAT_VERSION {
            return Err(PersistError::UnsupportedVersion(version));
        }
        Ok(())
    }

    pub(crate) fn read_graph(&mut self) -> Result<GraphRecord, PersistError> {
        let count = self.take_count()?;
        let mut nodes = Vec::with_capacity(count.min(MAX_PREALLOC));
        for _ in 0..count {
            nodes.push(self.read_node()?);
        }

        let master: u32 = self.take()?;
        let count = self.take_count()?;
        let mut entries = Vec::with_capacity(count.min(MAX_PREALLOC));
        for _ in 0..count {
            entries.push(self.take()?);
        }

        let upstream = self.read_edges()?;
        let downstream = self.read_edges()?;
        Ok(GraphRecord {
            nodes,
            master: (master != NO_NODE).then_some(master),
            entries,
            upstream,
            downstream,
        })
    }

    fn read_edges(&mut self) -> Result<Vec<EdgeRecord>, PersistError> {
        let count = self.take_count()?;
        let mut edges = Vec::with_capacity(count.min(MAX_PREALLOC));
        for _ in 0..count {
            let [from_node, from_socket, to_node, to_socket]: [u32; 4] = self.take()?;
            edges.push(EdgeRecord {
                from_node,
                from_socket,
                to_node,
                to_socket,
            });
        }
        Ok(edges)
    }

    pub(crate) fn read_node(&mut self) -> Result<NodeRecord, PersistError> {
        let id = self.take()?;
        let type_name = self.take()?;
        let version = self.take()?;
        let source_id = Uuid::from_u128(self.take()?);
        let name = self.take()?;

        let count = self.take_count()?;
        let mut properties = Properties::with_capacity(count.min(MAX_PREALLOC));
        for _ in 0..count {
            let name: String = self.take()?;
            properties.insert(name, self.take()?);
        }

        let subgraph = if self.take::<bool>()? {
            Some(self.read_graph()?)
        } else {
            None
        };

        let inputs = self.read_sockets()?;
        let outputs = self.read_sockets()?;
        let output_flows = self.read_sockets()?;
        let input_flow = if self.take::<bool>()? {
            Some(self.read_socket()?)
        } else {
            None
        };

        Ok(NodeRecord {
            id,
            type_name,
            version,
            source_id,
            name,
            properties,
            subgraph,
            inputs,
            outputs,
            output_flows,
            input_flow,
        })
    }

    fn read_sockets(&mut self) -> Result<Vec<SocketRecord>, PersistError> {
        let count = self.take_count()?;
        let mut sockets = Vec::with_capacity(count.min(MAX_PREALLOC));
        for _ in 0..count {
            sockets.push(self.read_socket()?);
        }
        Ok(sockets)
    }

    fn read_socket(&mut self) -> Result<SocketRecord, PersistError> {
        let id = self.take()?;
        let name = self.take()?;
        let type_tag: u8 = self.take()?;
        let role_tag: u8 = self.take()?;
        let value = self.take()?;
        Ok(SocketRecord {
            id,
            name,
            socket_type: SocketType::from_tag(type_tag)
                .ok_or_else(|| PersistError::Malformed(format!("unknown socket type tag {type_tag}")))?,
            role: SocketRole::from_tag(role_tag)
                .ok_or_else(|| PersistError::Malformed(format!("unknown socket role tag {role_tag}")))?,
            value,
        })
    }
}

impl Graph {
    /// Write the graph in binary form. Reassigns serialization ids first.
    pub fn write_binary(&mut self, writer: impl Write) -> Result<(), PersistError> {
        self.assign_ids();
        let record = capture_graph(self);
        let mut writer = BinaryWriter::new(writer);
        writer.write_header()?;
        writer.write_graph(&record)?;
        tracing::debug!("Wrote binary graph with {} nodes", record.nodes.len());
        Ok(())
    }

    /// Read a graph in binary form, creating node kinds through `registry`
    pub fn read_binary(reader: impl Read, registry: &NodeRegistry) -> Result<Graph, PersistError> {
        let mut reader = BinaryReader::new(reader);
        reader.read_header()?;
        let record = reader.read_graph()?;
        Ok(build_graph(record, registry))
    }

    /// Binary form as a byte vector
    pub fn to_bytes(&mut self) -> Result<Vec<u8>, PersistError> {
        let mut bytes = Vec::new();
        self.write_binary(&mut bytes)?;
        Ok(bytes)
    }

    /// Parse the binary form from a byte slice
    pub fn from_bytes(bytes: &[u8], registry: &NodeRegistry) -> Result<Graph, PersistError> {
        Self::read_binary(bytes, registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::ExecContext;
    use crate::node::{ExecResult, NodeKind, SocketLayout};
    use crate::nodes::create_standard_registry;
    use crate::nodes::flow::{Branch, EventEntry};
    use crate::nodes::math::{ColorConstant, FloatConstant, Mix, Scale};
    use crate::value::Value;

    fn wire(graph: &mut Graph, from: crate::node::NodeKey, out: usize, to: crate::node::NodeKey, input: usize) {
        let from = graph.node(from).unwrap().output(out).unwrap();
        let to = graph.node(to).unwrap().input(input).unwrap();
        assert!(graph.connect(from, to));
    }

    fn record_bytes(record: &GraphRecord) -> Vec<u8> {
        let mut bytes = Vec::new();
        let mut writer = BinaryWriter::new(&mut bytes);
        writer.write_header().unwrap();
        writer.write_graph(record).unwrap();
        bytes
    }

    #[test]
    fn test_round_trip_keeps_structure() {
        let mut graph = Graph::default();
        let constant = graph.add_node(FloatConstant::new(3.0));
        let scale = graph.add_node(Scale::new(2.0));
        let entry = graph.add_node(EventEntry);
        let branch = graph.add_node(Branch);
        wire(&mut graph, constant, 0, scale, 0);
        let then = graph.node(entry).unwrap().output_flow(0).unwrap();
        let exec = graph.node(branch).unwrap().input_flow().unwrap();
        assert!(graph.connect(then, exec));
        graph.add_entry_node(entry);
        graph.set_master_node(Some(scale));

        let bytes = graph.to_bytes().unwrap();
        let loaded = Graph::from_bytes(&bytes, &create_standard_registry()).unwrap();

        assert_eq!(loaded.node_count(), 4);
        assert_eq!(loaded.edge_count(), graph.edge_count());
        let scale_id = graph.node(scale).unwrap().source_id();
        let loaded_scale = loaded.find_by_source_id(scale_id).unwrap();
        assert_eq!(loaded.master_node(), Some(loaded_scale));
        assert_eq!(loaded.entry_nodes().len(), 1);

        let node = loaded.node(loaded_scale).unwrap();
        assert_eq!(node.kind().properties(), graph.node(scale).unwrap().kind().properties());
        let input = node.input(0).unwrap();
        let producer = loaded.upstream_of(input).next().unwrap();
        let owner = loaded.socket(producer).unwrap().node();
        assert_eq!(
            loaded.node(owner).unwrap().source_id(),
            graph.node(constant).unwrap().source_id()
        );
        assert_eq!(loaded.socket(producer).unwrap().value(), Value::Float(3.0));
    }

    #[test]
    fn test_rejects_bad_tag_and_future_version() {
        let registry = create_standard_registry();
        let mut bytes = Graph::default().to_bytes().unwrap();
        bytes[0] ^= 0xFF;
        assert!(matches!(Graph::from_bytes(&bytes, &registry), Err(PersistError::BadTag(_))));

        let mut bytes = Graph::default().to_bytes().unwrap();
        bytes[4..6].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
        assert!(matches!(
            Graph::from_bytes(&bytes, &registry),
            Err(PersistError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_truncated_stream_is_an_error() {
        let mut graph = Graph::default();
        graph.add_node(ColorConstant::default());
        let bytes = graph.to_bytes().unwrap();
        let result = Graph::from_bytes(&bytes[..bytes.len() - 3], &create_standard_registry());
        assert!(matches!(result, Err(PersistError::Encoding(_))));
    }

    #[test]
    fn test_unknown_kind_and_its_edges_are_skipped() {
        let mut graph = Graph::default();
        let constant = graph.add_node(FloatConstant::new(1.0));
        let scale = graph.add_node(Scale::new(2.0));
        let tail = graph.add_node(Scale::new(2.0));
        wire(&mut graph, constant, 0, scale, 0);
        wire(&mut graph, scale, 0, tail, 0);
        let bytes = graph.to_bytes().unwrap();

        let mut registry = NodeRegistry::new();
        registry.register_kind::<FloatConstant>();
        let loaded = Graph::from_bytes(&bytes, &registry).unwrap();
        assert_eq!(loaded.node_count(), 1);
        assert_eq!(loaded.edge_count(), 0);
    }

    #[test]
    fn test_dangling_edge_and_duplicate_producer() {
        let mut graph = Graph::default();
        let a = graph.add_node(FloatConstant::new(1.0));
        let b = graph.add_node(FloatConstant::new(2.0));
        let scale = graph.add_node(Scale::new(1.0));
        wire(&mut graph, a, 0, scale, 0);
        graph.assign_ids();
        let mut record = capture_graph(&graph);

        let b_id = graph.node(b).unwrap().serial_id().unwrap();
        let b_out = graph.socket(graph.node(b).unwrap().output(0).unwrap()).unwrap().serial_id().unwrap();
        let first = record.upstream[0];
        // Second producer for the same input, then an edge to a missing node
        record.upstream.push(EdgeRecord {
            to_node: b_id,
            to_socket: b_out,
            ..first
        });
        record.upstream.push(EdgeRecord { to_node: 999, ..first });
        record.downstream.clear();

        let loaded = Graph::from_bytes(&record_bytes(&record), &create_standard_registry()).unwrap();
        assert_eq!(loaded.edge_count(), 1);
        let scale = loaded.find_by_source_id(graph.node(scale).unwrap().source_id()).unwrap();
        let input = loaded.node(scale).unwrap().input(0).unwrap();
        let producer = loaded.upstream_of(input).next().unwrap();
        let owner = loaded.socket(producer).unwrap().node();
        assert_eq!(loaded.node(owner).unwrap().source_id(), graph.node(a).unwrap().source_id());
    }

    #[test]
    fn test_illegal_persisted_edges_are_skipped() {
        let mut graph = Graph::default();
        let constant = graph.add_node(FloatConstant::new(1.0));
        let branch = graph.add_node(Branch);
        let scale = graph.add_node(Scale::new(2.0));
        wire(&mut graph, constant, 0, branch, 0);
        graph.assign_ids();
        let mut record = capture_graph(&graph);

        let serial = |node: crate::node::NodeKey, socket: crate::socket::SocketKey| {
            (
                graph.node(node).unwrap().serial_id().unwrap(),
                graph.socket(socket).unwrap().serial_id().unwrap(),
            )
        };
        let (constant_id, value) = serial(constant, graph.node(constant).unwrap().output(0).unwrap());
        let (branch_id, exec) = serial(branch, graph.node(branch).unwrap().input_flow().unwrap());
        let (scale_id, scale_out) = serial(scale, graph.node(scale).unwrap().output(0).unwrap());
        let (_, scale_in) = serial(scale, graph.node(scale).unwrap().input(0).unwrap());

        // Float output into a control input, then an edge looping on one node
        record.downstream.push(EdgeRecord {
            from_node: constant_id,
            from_socket: value,
            to_node: branch_id,
            to_socket: exec,
        });
        record.downstream.push(EdgeRecord {
            from_node: scale_id,
            from_socket: scale_out,
            to_node: scale_id,
            to_socket: scale_in,
        });

        let loaded = Graph::from_bytes(&record_bytes(&record), &create_standard_registry()).unwrap();
        assert_eq!(loaded.edge_count(), 1);
        for edge in loaded.edges() {
            assert!(loaded.socket(edge.from).unwrap().accept_edge(loaded.socket(edge.to).unwrap()));
            assert!(loaded.can_connect(edge.from, edge.to));
        }
        let branch = loaded.find_by_source_id(graph.node(branch).unwrap().source_id()).unwrap();
        let exec = loaded.node(branch).unwrap().input_flow().unwrap();
        assert_eq!(loaded.upstream_of(exec).count(), 0);
    }

    /// First release of the mix node, before the `T` input existed
    #[derive(Debug, Default)]
    struct LegacyMix;

    impl NodeKind for LegacyMix {
        fn type_name(&self) -> &'static str {
            "mix"
        }

        fn construct(&self, layout: &mut SocketLayout) {
            layout.add_input("A", SocketType::Color);
            layout.add_input("B", SocketType::Color);
            layout.add_output("Color", SocketType::Color);
        }

        fn execute(&mut self, _ctx: &mut ExecContext<'_>) -> ExecResult {
            ExecResult::Complete
        }
    }

    #[test]
    fn test_version_update_inserts_socket_and_keeps_edges() {
        let mut graph = Graph::default();
        let color = graph.add_node(ColorConstant::new([1.0, 0.0, 0.0, 1.0]));
        let mix = graph.add_node(LegacyMix);
        let blend = graph.add_node(Mix);
        wire(&mut graph, color, 0, mix, 1);
        wire(&mut graph, mix, 0, blend, 0);
        let bytes = graph.to_bytes().unwrap();

        let loaded = Graph::from_bytes(&bytes, &create_standard_registry()).unwrap();
        let mix = loaded.find_by_source_id(graph.node(mix).unwrap().source_id()).unwrap();
        let node = loaded.node(mix).unwrap();
        assert_eq!(node.kind().version(), 2);
        let names: Vec<_> = node.inputs().iter().map(|s| loaded.socket(*s).unwrap().name()).collect();
        assert_eq!(names, ["A", "B", "T"]);
        assert_eq!(loaded.socket(node.input(2).unwrap()).unwrap().value(), Value::Float(0.5));

        assert_eq!(loaded.edge_count(), 2);
        assert_eq!(loaded.upstream_of(node.input(1).unwrap()).count(), 1);
        assert_eq!(loaded.downstream_of(node.output(0).unwrap()).count(), 1);
    }
}
