// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connection (edge) definitions and the edge tables of the graph.

use crate::socket::SocketKey;
use crate::value::SocketType;
use indexmap::{IndexMap, IndexSet};

/// A connection between two sockets, producer to consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    /// Producing socket (output or control output)
    pub from: SocketKey,
    /// Consuming socket (input or control input)
    pub to: SocketKey,
}

impl Edge {
    /// Create a new edge
    pub fn new(from: SocketKey, to: SocketKey) -> Self {
        Self { from, to }
    }
}

/// Multimap from one socket to the sockets on the other end of its edges.
///
/// Iteration order is insertion order so persisted edge lists are stable.
#[derive(Debug, Clone, Default)]
pub(crate) struct EdgeTable {
    map: IndexMap<SocketKey, IndexSet<SocketKey>>,
}

impl EdgeTable {
    pub(crate) fn insert(&mut self, key: SocketKey, peer: SocketKey) -> bool {
        self.map.entry(key).or_default().insert(peer)
    }

    pub(crate) fn remove(&mut self, key: SocketKey, peer: SocketKey) -> bool {
        let Some(peers) = self.map.get_mut(&key) else {
            return false;
        };
        let removed = peers.shift_remove(&peer);
        if peers.is_empty() {
            self.map.shift_remove(&key);
        }
        removed
    }

    pub(crate) fn contains(&self, key: SocketKey, peer: SocketKey) -> bool {
        self.map.get(&key).is_some_and(|peers| peers.contains(&peer))
    }

    pub(crate) fn peers(&self, key: SocketKey) -> impl Iterator<Item = SocketKey> + '_ {
        self.map.get(&key).into_iter().flatten().copied()
    }

    pub(crate) fn first(&self, key: SocketKey) -> Option<SocketKey> {
        self.map.get(&key).and_then(|peers| peers.first().copied())
    }

    pub(crate) fn len(&self) -> usize {
        self.map.values().map(IndexSet::len).sum()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (SocketKey, SocketKey)> + '_ {
        self.map
            .iter()
            .flat_map(|(key, peers)| peers.iter().map(move |peer| (*key, *peer)))
    }
}

/// Error when creating a connection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// Socket handle is stale or foreign
    #[error("Socket not found: {0:?}")]
    SocketNotFound(SocketKey),

    /// Both ends are on the same node
    #[error("Self-loop not allowed")]
    SelfLoop,

    /// Both ends consume or both produce, or control meets dataflow
    #[error("Socket roles cannot be connected")]
    RoleMismatch,

    /// Producer type cannot feed the consumer type
    #[error("Incompatible socket types: {from:?} -> {to:?}")]
    IncompatibleTypes {
        /// Producer type
        from: SocketType,
        /// Consumer type
        to: SocketType,
    },
}
