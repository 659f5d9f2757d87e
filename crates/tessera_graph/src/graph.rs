// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph data structure containing nodes, sockets and the edge tables.

use crate::connection::{ConnectionError, Edge, EdgeTable};
use crate::events::{GraphEvent, GraphEventSink};
use crate::node::{Node, NodeKey, NodeKind, SocketLayout, SocketSpec};
use crate::settings::GraphSettings;
use crate::socket::{Socket, SocketKey, SocketRole};
use crate::value::SocketType;
use slotmap::SlotMap;
use std::fmt;
use uuid::Uuid;

/// A node graph.
///
/// Nodes and sockets live in generational arenas owned by the graph; edges
/// are kept twice, keyed by consumer (`upstream`) and by producer
/// (`downstream`).
pub struct Graph {
    name: String,
    pub(crate) nodes: SlotMap<NodeKey, Node>,
    pub(crate) sockets: SlotMap<SocketKey, Socket>,
    pub(crate) order: Vec<NodeKey>,
    pub(crate) entry_nodes: Vec<NodeKey>,
    pub(crate) master: Option<NodeKey>,
    pub(crate) upstream: EdgeTable,
    pub(crate) downstream: EdgeTable,
    pub(crate) generation: u64,
    pub(crate) settings: GraphSettings,
    events: Option<Box<dyn GraphEventSink>>,
}

impl Graph {
    /// Create a new empty graph
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: SlotMap::with_key(),
            sockets: SlotMap::with_key(),
            order: Vec::new(),
            entry_nodes: Vec::new(),
            master: None,
            upstream: EdgeTable::default(),
            downstream: EdgeTable::default(),
            generation: 0,
            settings: GraphSettings::default(),
            events: None,
        }
    }

    /// Replace the settings
    pub fn with_settings(mut self, settings: GraphSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Inject the sink that receives structural change events
    pub fn with_event_sink(mut self, sink: impl GraphEventSink + 'static) -> Self {
        self.events = Some(Box::new(sink));
        self
    }

    /// Replace or remove the event sink
    pub fn set_event_sink(&mut self, sink: Option<Box<dyn GraphEventSink>>) {
        self.events = sink;
    }

    /// Graph name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the graph
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Engine settings
    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    /// Engine settings (mutable)
    pub fn settings_mut(&mut self) -> &mut GraphSettings {
        &mut self.settings
    }

    pub(crate) fn emit(&mut self, event: GraphEvent) {
        if let Some(sink) = self.events.as_mut() {
            sink.notify(event);
        }
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Add a node; the kind declares its sockets
    pub fn add_node(&mut self, kind: impl NodeKind + 'static) -> NodeKey {
        self.add_boxed_node(Box::new(kind))
    }

    /// Add an already boxed node kind
    pub fn add_boxed_node(&mut self, kind: Box<dyn NodeKind>) -> NodeKey {
        let mut layout = SocketLayout::new();
        kind.construct(&mut layout);
        let name = kind.type_name().to_string();
        let key = self.insert_node(kind, layout, Uuid::new_v4(), name);
        tracing::debug!("Added node {:?} ({})", key, self.nodes[key].type_name());
        self.emit(GraphEvent::NodeAdded(key));
        key
    }

    pub(crate) fn insert_node(
        &mut self,
        kind: Box<dyn NodeKind>,
        layout: SocketLayout,
        source_id: Uuid,
        name: String,
    ) -> NodeKey {
        let key = self.nodes.insert(Node::new(kind, source_id, name));
        let SocketLayout {
            inputs,
            outputs,
            output_flows,
            input_flow,
        } = layout;

        let inputs = self.materialize(key, inputs, SocketRole::Input);
        let outputs = self.materialize(key, outputs, SocketRole::Output);
        let output_flows = self.materialize(key, output_flows, SocketRole::ControlOut);
        let input_flow = self
            .materialize(key, input_flow.into_iter().collect(), SocketRole::ControlIn)
            .pop();

        let node = &mut self.nodes[key];
        node.inputs = inputs;
        node.outputs = outputs;
        node.output_flows = output_flows;
        node.input_flow = input_flow;
        self.order.push(key);
        key
    }

    fn materialize(&mut self, node: NodeKey, specs: Vec<SocketSpec>, role: SocketRole) -> Vec<SocketKey> {
        specs
            .into_iter()
            .map(|spec| {
                let mut socket = Socket::new(node, spec.name, spec.socket_type, role);
                socket.serial_id = spec.serial_id;
                if let Err(err) = socket.store_value(spec.value) {
                    tracing::warn!("Dropping default of socket '{}': {err}", socket.name());
                }
                self.sockets.insert(socket)
            })
            .collect()
    }

    /// Remove a node, its sockets and every edge touching it
    pub fn remove_node(&mut self, key: NodeKey) -> Option<Box<dyn NodeKind>> {
        if !self.nodes.contains_key(key) {
            return None;
        }
        self.disconnect_all(key);

        let node = self.nodes.remove(key)?;
        for socket in node.sockets() {
            self.sockets.remove(socket);
        }
        self.order.retain(|k| *k != key);
        self.entry_nodes.retain(|k| *k != key);
        if self.master == Some(key) {
            self.master = None;
        }

        tracing::debug!("Removed node {:?} ({})", key, node.type_name());
        self.emit(GraphEvent::NodeRemoved(key));
        Some(node.kind)
    }

    /// Get a node by handle
    pub fn node(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    /// Get a mutable node by handle
    pub fn node_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        self.nodes.get_mut(key)
    }

    /// Whether the handle refers to a live node
    pub fn contains_node(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// All nodes, in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = (NodeKey, &Node)> {
        self.order.iter().map(move |key| (*key, &self.nodes[*key]))
    }

    /// All node handles, in insertion order
    pub fn node_keys(&self) -> &[NodeKey] {
        &self.order
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.order.len()
    }

    /// Find a node by its durable source id
    pub fn find_by_source_id(&self, source_id: Uuid) -> Option<NodeKey> {
        self.order
            .iter()
            .copied()
            .find(|key| self.nodes[*key].source_id() == source_id)
    }

    /// Get a socket by handle
    pub fn socket(&self, key: SocketKey) -> Option<&Socket> {
        self.sockets.get(key)
    }

    /// Get a mutable socket by handle
    pub fn socket_mut(&mut self, key: SocketKey) -> Option<&mut Socket> {
        self.sockets.get_mut(key)
    }

    // ------------------------------------------------------------------
    // Socket layout of attached nodes
    // ------------------------------------------------------------------

    /// Append a data input to an attached node
    pub fn add_input(&mut self, node: NodeKey, name: impl Into<String>, ty: SocketType) -> Option<SocketKey> {
        self.attach_socket(node, SocketRole::Input, usize::MAX, name.into(), ty)
    }

    /// Append a data output to an attached node
    pub fn add_output(&mut self, node: NodeKey, name: impl Into<String>, ty: SocketType) -> Option<SocketKey> {
        self.attach_socket(node, SocketRole::Output, usize::MAX, name.into(), ty)
    }

    /// Append a control output to an attached node
    pub fn add_output_flow(&mut self, node: NodeKey, name: impl Into<String>) -> Option<SocketKey> {
        self.attach_socket(node, SocketRole::ControlOut, usize::MAX, name.into(), SocketType::Control)
    }

    /// Give an attached node its control input; `None` if it already has one
    pub fn add_input_flow(&mut self, node: NodeKey, name: impl Into<String>) -> Option<SocketKey> {
        self.attach_socket(node, SocketRole::ControlIn, 0, name.into(), SocketType::Control)
    }

    /// Insert a data input at `index` of an attached node
    pub fn insert_input(
        &mut self,
        node: NodeKey,
        index: usize,
        name: impl Into<String>,
        ty: SocketType,
    ) -> Option<SocketKey> {
        self.attach_socket(node, SocketRole::Input, index, name.into(), ty)
    }

    /// Insert a data output at `index` of an attached node
    pub fn insert_output(
        &mut self,
        node: NodeKey,
        index: usize,
        name: impl Into<String>,
        ty: SocketType,
    ) -> Option<SocketKey> {
        self.attach_socket(node, SocketRole::Output, index, name.into(), ty)
    }

    /// Insert a control output at `index` of an attached node
    pub fn insert_output_flow(&mut self, node: NodeKey, index: usize, name: impl Into<String>) -> Option<SocketKey> {
        self.attach_socket(node, SocketRole::ControlOut, index, name.into(), SocketType::Control)
    }

    fn attach_socket(
        &mut self,
        node: NodeKey,
        role: SocketRole,
        index: usize,
        name: String,
        ty: SocketType,
    ) -> Option<SocketKey> {
        let entry = self.nodes.get(node)?;
        if role == SocketRole::ControlIn && entry.input_flow.is_some() {
            return None;
        }

        let socket = self.sockets.insert(Socket::new(node, name, ty, role));
        let entry = &mut self.nodes[node];
        let list = match role {
            SocketRole::Input => &mut entry.inputs,
            SocketRole::Output => &mut entry.outputs,
            SocketRole::ControlOut => &mut entry.output_flows,
            SocketRole::ControlIn => {
                entry.input_flow = Some(socket);
                self.emit(GraphEvent::SocketLayoutChanged(node));
                return Some(socket);
            }
        };
        list.insert(index.min(list.len()), socket);
        self.emit(GraphEvent::SocketLayoutChanged(node));
        Some(socket)
    }

    // ------------------------------------------------------------------
    // Entry points and master node
    // ------------------------------------------------------------------

    /// Mark a node as a valid start point for event-style execution
    pub fn add_entry_node(&mut self, key: NodeKey) -> bool {
        if !self.nodes.contains_key(key) || self.entry_nodes.contains(&key) {
            return false;
        }
        self.entry_nodes.push(key);
        true
    }

    /// Unmark an entry node
    pub fn remove_entry_node(&mut self, key: NodeKey) -> bool {
        let before = self.entry_nodes.len();
        self.entry_nodes.retain(|k| *k != key);
        self.entry_nodes.len() != before
    }

    /// Entry nodes, in the order they were marked
    pub fn entry_nodes(&self) -> &[NodeKey] {
        &self.entry_nodes
    }

    /// Whether a node is an entry node
    pub fn is_entry_node(&self, key: NodeKey) -> bool {
        self.entry_nodes.contains(&key)
    }

    /// Set or clear the master node
    pub fn set_master_node(&mut self, key: Option<NodeKey>) -> bool {
        if let Some(key) = key {
            if !self.nodes.contains_key(key) {
                return false;
            }
        }
        self.master = key;
        true
    }

    /// The distinguished master node
    pub fn master_node(&self) -> Option<NodeKey> {
        self.master
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// Validate a connection and normalize it to producer -> consumer
    pub(crate) fn check_connection(&self, a: SocketKey, b: SocketKey) -> Result<Edge, ConnectionError> {
        let socket_a = self.sockets.get(a).ok_or(ConnectionError::SocketNotFound(a))?;
        let socket_b = self.sockets.get(b).ok_or(ConnectionError::SocketNotFound(b))?;

        let (from, to) = if socket_b.role().is_input_side() {
            ((a, socket_a), (b, socket_b))
        } else {
            ((b, socket_b), (a, socket_a))
        };

        if from.1.node() == to.1.node() && !self.settings.allow_same_node_edges {
            return Err(ConnectionError::SelfLoop);
        }

        if !from.1.accept_edge(to.1) {
            let roles_ok = from.1.role().is_input_side() != to.1.role().is_input_side()
                && from.1.role().is_control() == to.1.role().is_control();
            return Err(if roles_ok {
                ConnectionError::IncompatibleTypes {
                    from: from.1.socket_type(),
                    to: to.1.socket_type(),
                }
            } else {
                ConnectionError::RoleMismatch
            });
        }

        Ok(Edge::new(from.0, to.0))
    }

    /// Connect two sockets, reporting why an illegal connection was rejected.
    ///
    /// Arguments may be given in either order. A data input keeps a single
    /// producer and a control output a single successor; the previous edge
    /// is evicted.
    pub fn try_connect(&mut self, a: SocketKey, b: SocketKey) -> Result<Edge, ConnectionError> {
        let edge = self.check_connection(a, b)?;

        let evicted: Vec<Edge> = if self.sockets[edge.to].role().is_control() {
            self.downstream
                .peers(edge.from)
                .filter(|peer| *peer != edge.to)
                .map(|peer| Edge::new(edge.from, peer))
                .collect()
        } else {
            self.upstream
                .peers(edge.to)
                .filter(|peer| *peer != edge.from)
                .map(|peer| Edge::new(peer, edge.to))
                .collect()
        };
        for old in evicted {
            self.unlink(old);
        }

        if self.link(edge) {
            tracing::debug!("Connected {:?} -> {:?}", edge.from, edge.to);
            self.emit(GraphEvent::EdgeAdded {
                from: edge.from,
                to: edge.to,
            });
        }
        Ok(edge)
    }

    /// Connect two sockets; `false` if the connection is illegal
    pub fn connect(&mut self, a: SocketKey, b: SocketKey) -> bool {
        match self.try_connect(a, b) {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!("Rejected connection {:?} -> {:?}: {err}", a, b);
                false
            }
        }
    }

    /// Whether `connect(a, b)` would succeed
    pub fn can_connect(&self, a: SocketKey, b: SocketKey) -> bool {
        self.check_connection(a, b).is_ok()
    }

    /// Whether an edge joins the two sockets (either order)
    pub fn connected(&self, a: SocketKey, b: SocketKey) -> bool {
        self.upstream.contains(b, a) || self.upstream.contains(a, b)
    }

    /// Remove the edge between two sockets (either order).
    ///
    /// Returns whether an edge existed.
    pub fn disconnect(&mut self, a: SocketKey, b: SocketKey) -> bool {
        self.unlink(Edge::new(a, b)) || self.unlink(Edge::new(b, a))
    }

    /// Remove every edge touching a socket, returns the number removed
    pub fn disconnect_all_socket(&mut self, socket: SocketKey) -> usize {
        self.edges_of(socket)
            .into_iter()
            .filter(|edge| self.unlink(*edge))
            .count()
    }

    /// Remove every edge touching any socket of a node
    pub fn disconnect_all(&mut self, node: NodeKey) -> usize {
        let sockets: Vec<SocketKey> = match self.nodes.get(node) {
            Some(node) => node.sockets().collect(),
            None => return 0,
        };
        sockets
            .into_iter()
            .map(|socket| self.disconnect_all_socket(socket))
            .sum()
    }

    /// `(socket, peer)` pairs for every upstream and downstream edge of a socket
    pub fn connections(&self, socket: SocketKey) -> Vec<(SocketKey, SocketKey)> {
        self.upstream
            .peers(socket)
            .chain(self.downstream.peers(socket))
            .map(|peer| (socket, peer))
            .collect()
    }

    fn edges_of(&self, socket: SocketKey) -> Vec<Edge> {
        self.upstream
            .peers(socket)
            .map(|peer| Edge::new(peer, socket))
            .chain(self.downstream.peers(socket).map(|peer| Edge::new(socket, peer)))
            .collect()
    }

    /// Producers feeding a socket
    pub fn upstream_of(&self, socket: SocketKey) -> impl Iterator<Item = SocketKey> + '_ {
        self.upstream.peers(socket)
    }

    /// Consumers fed by a socket
    pub fn downstream_of(&self, socket: SocketKey) -> impl Iterator<Item = SocketKey> + '_ {
        self.downstream.peers(socket)
    }

    /// All edges, producer -> consumer
    pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
        self.upstream.iter().map(|(to, from)| Edge::new(from, to))
    }

    /// Get the number of edges
    pub fn edge_count(&self) -> usize {
        self.upstream.len()
    }

    /// Insert an edge into both tables without checks
    pub(crate) fn link(&mut self, edge: Edge) -> bool {
        let up = self.upstream.insert(edge.to, edge.from);
        let down = self.downstream.insert(edge.from, edge.to);
        up || down
    }

    fn unlink(&mut self, edge: Edge) -> bool {
        let up = self.upstream.remove(edge.to, edge.from);
        let down = self.downstream.remove(edge.from, edge.to);
        if up || down {
            tracing::debug!("Disconnected {:?} -> {:?}", edge.from, edge.to);
            self.emit(GraphEvent::EdgeRemoved {
                from: edge.from,
                to: edge.to,
            });
        }
        up || down
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    /// Assign sequential serialization ids.
    ///
    /// Walks nodes in order; each node takes an id, then its inputs,
    /// outputs, control outputs and control input. Must run right before
    /// writing. Nested graphs are numbered independently.
    pub fn assign_ids(&mut self) {
        let mut next = 0u32;
        for key in &self.order {
            let node = &mut self.nodes[*key];
            node.serial_id = Some(next);
            next += 1;
            for socket in node.sockets() {
                self.sockets[socket].serial_id = Some(next);
                next += 1;
            }
        }

        for node in self.nodes.values_mut() {
            if let Some(subgraph) = node.kind.subgraph_mut() {
                subgraph.assign_ids();
            }
        }
    }

    /// Find a node by the id of the last `assign_ids` pass
    pub fn node_by_serial(&self, serial_id: u32) -> Option<NodeKey> {
        self.order
            .iter()
            .copied()
            .find(|key| self.nodes[*key].serial_id == Some(serial_id))
    }

    /// Find a socket of a node by the id of the last `assign_ids` pass
    pub fn socket_by_serial(&self, node: NodeKey, serial_id: u32) -> Option<SocketKey> {
        self.nodes
            .get(node)?
            .sockets()
            .find(|socket| self.sockets[*socket].serial_id == Some(serial_id))
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new("Untitled")
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("name", &self.name)
            .field("nodes", &self.order.len())
            .field("edges", &self.upstream.len())
            .field("entry_nodes", &self.entry_nodes)
            .field("master", &self.master)
            .finish_non_exhaustive()
    }
}
