// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions for the graph framework.

use crate::evaluation::ExecContext;
use crate::graph::Graph;
use crate::socket::SocketKey;
use crate::value::{Properties, Property, SocketType, Value};
use indexmap::IndexMap;
use slotmap::new_key_type;
use std::fmt;
use uuid::Uuid;

new_key_type! {
    /// Generational handle to a node owned by a graph
    pub struct NodeKey;
}

/// Outcome of a single `execute` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecResult {
    /// The node is done for this pass
    Complete,
    /// Run `execute` again without revisiting neighbors
    Loop,
    /// Stop the traversal at this node
    Terminate,
}

/// Behavior of a node kind.
///
/// Kinds declare their sockets in [`NodeKind::construct`] and compute in
/// [`NodeKind::execute`], which may only read input caches, write output
/// caches and pick a selected exit.
pub trait NodeKind: fmt::Debug + Send {
    /// Persisted type name, used by [`NodeRegistry`] on load
    fn type_name(&self) -> &'static str;

    /// Socket layout version of this kind
    fn version(&self) -> u16 {
        1
    }

    /// Declare the default sockets
    fn construct(&self, layout: &mut SocketLayout);

    /// Compute outputs from inputs
    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> ExecResult;

    /// Skip pulling ancestors in the upstream discipline
    fn will_force_execute(&self) -> bool {
        false
    }

    /// Upgrade a socket layout persisted by an older kind version
    fn version_update(&mut self, from_version: u16, layout: &mut SocketLayout) {
        let _ = (from_version, layout);
    }

    /// Persisted property set
    fn properties(&self) -> Properties {
        Properties::new()
    }

    /// Restore one property, returns false if the name is unknown
    fn set_property(&mut self, name: &str, value: &Property) -> bool {
        let _ = (name, value);
        false
    }

    /// Nested graph owned by this kind
    fn subgraph(&self) -> Option<&Graph> {
        None
    }

    /// Nested graph owned by this kind (mutable)
    fn subgraph_mut(&mut self) -> Option<&mut Graph> {
        None
    }
}

/// Declaration of a socket before it is materialized in a graph
#[derive(Debug, Clone, PartialEq)]
pub struct SocketSpec {
    /// Socket name
    pub name: String,
    /// Type tag
    pub socket_type: SocketType,
    /// Initial cached value
    pub value: Value,
    pub(crate) serial_id: Option<u32>,
}

impl SocketSpec {
    /// Create a new socket declaration
    pub fn new(name: impl Into<String>, socket_type: SocketType) -> Self {
        Self {
            name: name.into(),
            socket_type,
            value: Value::Empty,
            serial_id: None,
        }
    }

    /// Set the initial cached value
    pub fn with_default(&mut self, value: impl Into<Value>) -> &mut Self {
        self.value = value.into();
        self
    }
}

/// Ordered socket declarations of a node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SocketLayout {
    pub(crate) inputs: Vec<SocketSpec>,
    pub(crate) outputs: Vec<SocketSpec>,
    pub(crate) output_flows: Vec<SocketSpec>,
    pub(crate) input_flow: Option<SocketSpec>,
}

impl SocketLayout {
    /// Create an empty layout
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a data input
    pub fn add_input(&mut self, name: impl Into<String>, ty: SocketType) -> &mut SocketSpec {
        let at = self.inputs.len();
        self.insert_input(at, name, ty)
    }

    /// Append a data output
    pub fn add_output(&mut self, name: impl Into<String>, ty: SocketType) -> &mut SocketSpec {
        let at = self.outputs.len();
        self.insert_output(at, name, ty)
    }

    /// Append a control output
    pub fn add_output_flow(&mut self, name: impl Into<String>) -> &mut SocketSpec {
        let at = self.output_flows.len();
        self.insert_output_flow(at, name)
    }

    /// Set the control input; fails if one already exists
    pub fn add_input_flow(&mut self, name: impl Into<String>) -> bool {
        if self.input_flow.is_some() {
            return false;
        }
        self.input_flow = Some(SocketSpec::new(name, SocketType::Control));
        true
    }

    /// Insert a data input at `index` (clamped to the end)
    pub fn insert_input(
        &mut self,
        index: usize,
        name: impl Into<String>,
        ty: SocketType,
    ) -> &mut SocketSpec {
        insert_spec(&mut self.inputs, index, SocketSpec::new(name, ty))
    }

    /// Insert a data output at `index` (clamped to the end)
    pub fn insert_output(
        &mut self,
        index: usize,
        name: impl Into<String>,
        ty: SocketType,
    ) -> &mut SocketSpec {
        insert_spec(&mut self.outputs, index, SocketSpec::new(name, ty))
    }

    /// Insert a control output at `index` (clamped to the end)
    pub fn insert_output_flow(&mut self, index: usize, name: impl Into<String>) -> &mut SocketSpec {
        insert_spec(
            &mut self.output_flows,
            index,
            SocketSpec::new(name, SocketType::Control),
        )
    }

    /// Declared inputs
    pub fn inputs(&self) -> &[SocketSpec] {
        &self.inputs
    }

    /// Declared outputs
    pub fn outputs(&self) -> &[SocketSpec] {
        &self.outputs
    }

    /// Declared control outputs
    pub fn output_flows(&self) -> &[SocketSpec] {
        &self.output_flows
    }

    /// Declared control input
    pub fn input_flow(&self) -> Option<&SocketSpec> {
        self.input_flow.as_ref()
    }
}

fn insert_spec(specs: &mut Vec<SocketSpec>, index: usize, spec: SocketSpec) -> &mut SocketSpec {
    let index = index.min(specs.len());
    specs.insert(index, spec);
    &mut specs[index]
}

/// A node instance in the graph
#[derive(Debug)]
pub struct Node {
    pub(crate) serial_id: Option<u32>,
    source_id: Uuid,
    instance_id: Uuid,
    /// Display name
    pub name: String,
    pub(crate) inputs: Vec<SocketKey>,
    pub(crate) outputs: Vec<SocketKey>,
    pub(crate) output_flows: Vec<SocketKey>,
    pub(crate) input_flow: Option<SocketKey>,
    pub(crate) last_execution: Option<u64>,
    pub(crate) selected_exit: Option<SocketKey>,
    pub(crate) kind: Box<dyn NodeKind>,
}

impl Node {
    pub(crate) fn new(kind: Box<dyn NodeKind>, source_id: Uuid, name: String) -> Self {
        Self {
            serial_id: None,
            source_id,
            instance_id: Uuid::new_v4(),
            name,
            inputs: Vec::new(),
            outputs: Vec::new(),
            output_flows: Vec::new(),
            input_flow: None,
            last_execution: None,
            selected_exit: None,
            kind,
        }
    }

    /// Durable identity, persisted across save/load
    pub fn source_id(&self) -> Uuid {
        self.source_id
    }

    /// Identity of this in-memory object
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Id from the last `assign_ids` pass
    pub fn serial_id(&self) -> Option<u32> {
        self.serial_id
    }

    /// Node kind
    pub fn kind(&self) -> &dyn NodeKind {
        self.kind.as_ref()
    }

    /// Node kind (mutable)
    pub fn kind_mut(&mut self) -> &mut dyn NodeKind {
        self.kind.as_mut()
    }

    /// Persisted type name of the kind
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    /// Data inputs
    pub fn inputs(&self) -> &[SocketKey] {
        &self.inputs
    }

    /// Data outputs
    pub fn outputs(&self) -> &[SocketKey] {
        &self.outputs
    }

    /// Control outputs
    pub fn output_flows(&self) -> &[SocketKey] {
        &self.output_flows
    }

    /// Control input
    pub fn input_flow(&self) -> Option<SocketKey> {
        self.input_flow
    }

    /// Get an input by index
    pub fn input(&self, index: usize) -> Option<SocketKey> {
        self.inputs.get(index).copied()
    }

    /// Get an output by index
    pub fn output(&self, index: usize) -> Option<SocketKey> {
        self.outputs.get(index).copied()
    }

    /// Get a control output by index
    pub fn output_flow(&self, index: usize) -> Option<SocketKey> {
        self.output_flows.get(index).copied()
    }

    /// Control output picked by the last `execute`
    pub fn selected_exit(&self) -> Option<SocketKey> {
        self.selected_exit
    }

    /// Generation stamp of the last execution, `None` if never executed
    pub fn last_execution(&self) -> Option<u64> {
        self.last_execution
    }

    /// All sockets in persisted order: inputs, outputs, control outputs, control input
    pub fn sockets(&self) -> impl Iterator<Item = SocketKey> + '_ {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .chain(self.output_flows.iter())
            .chain(self.input_flow.iter())
            .copied()
    }

    /// Socket at a position of [`Node::sockets`]
    pub fn socket_at(&self, index: usize) -> Option<SocketKey> {
        self.sockets().nth(index)
    }

    /// Position of a socket in [`Node::sockets`]
    pub fn socket_index(&self, socket: SocketKey) -> Option<usize> {
        self.sockets().position(|s| s == socket)
    }
}

/// Factory producing a fresh node kind
pub type NodeFactory = Box<dyn Fn() -> Box<dyn NodeKind> + Send + Sync>;

/// Registry of available node kinds, keyed by persisted type name
pub struct NodeRegistry {
    factories: IndexMap<String, NodeFactory>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: IndexMap::new(),
        }
    }

    /// Register a factory under a type name
    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        factory: impl Fn() -> Box<dyn NodeKind> + Send + Sync + 'static,
    ) {
        self.factories.insert(type_name.into(), Box::new(factory));
    }

    /// Register a kind constructible through `Default`
    pub fn register_kind<K: NodeKind + Default + 'static>(&mut self) {
        let type_name = K::default().type_name();
        self.register(type_name, || Box::new(K::default()) as Box<dyn NodeKind>);
    }

    /// Create a kind from its type name
    pub fn create(&self, type_name: &str) -> Option<Box<dyn NodeKind>> {
        self.factories.get(type_name).map(|factory| factory())
    }

    /// Whether a type name is registered
    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Registered type names, in registration order
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_input_flow() {
        let mut layout = SocketLayout::new();
        assert!(layout.add_input_flow("Exec"));
        assert!(!layout.add_input_flow("Exec 2"));
        assert_eq!(layout.input_flow().map(|s| s.name.as_str()), Some("Exec"));
    }

    #[test]
    fn test_insert_keeps_existing_specs() {
        let mut layout = SocketLayout::new();
        layout.add_input("A", SocketType::Float).serial_id = Some(4);
        layout.add_input("B", SocketType::Float).serial_id = Some(5);
        layout.insert_input(1, "T", SocketType::Float).with_default(0.5);
        layout.insert_input(99, "Tail", SocketType::Color);

        let names: Vec<_> = layout.inputs().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["A", "T", "B", "Tail"]);
        assert_eq!(layout.inputs()[2].serial_id, Some(5));
        assert_eq!(layout.inputs()[1].value, Value::Float(0.5));
    }
}
