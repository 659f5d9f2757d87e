// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node graph execution engine for the Tessera procedural authoring tool.
//!
//! This crate provides the typed graph that powers:
//! - Texture and mesh generator graphs (pull-based dataflow)
//! - Event graphs (push-based control flow)
//! - Hybrid graphs that route control flow through data-driven branches
//!
//! ## Architecture
//!
//! The engine is built on a generic graph model with:
//! - Nodes and sockets in generational arenas, addressed by handles
//! - Connection validation with single-producer inputs
//! - Three execution disciplines sharing a generation stamp
//! - Binary and XML persistence keyed by durable node ids
//! - Copy/paste of partial selections

pub mod connection;
pub mod evaluation;
pub mod events;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod persist;
pub mod settings;
pub mod shared;
pub mod socket;
pub mod value;
pub mod visitor;

pub use connection::{ConnectionError, Edge};
pub use evaluation::{ExecContext, ExecError, ExecParams, Propagation};
pub use events::{GraphEvent, GraphEventSink};
pub use graph::Graph;
pub use node::{ExecResult, Node, NodeKey, NodeKind, NodeRegistry, SocketLayout, SocketSpec};
pub use nodes::create_standard_registry;
pub use persist::local::{collect_local_connectivity, copy_nodes, paste_nodes, reconstruct_local_connectivity};
pub use persist::PersistError;
pub use settings::{GraphSettings, SettingsError};
pub use shared::SharedGraph;
pub use socket::{Socket, SocketKey, SocketRole};
pub use value::{Properties, Property, ResourceHandle, SocketType, Value};
pub use visitor::{CollectNodes, NodeVisitor};
