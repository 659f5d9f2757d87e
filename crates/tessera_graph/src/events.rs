// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structural change notifications sent to the hosting editor.

use crate::node::NodeKey;
use crate::socket::SocketKey;
use std::sync::mpsc::Sender;

/// A structural change to a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphEvent {
    /// A node was added
    NodeAdded(NodeKey),
    /// A node was removed (its handles are already invalid)
    NodeRemoved(NodeKey),
    /// Sockets were added to or inserted into an attached node
    SocketLayoutChanged(NodeKey),
    /// An edge was inserted
    EdgeAdded {
        /// Producing socket
        from: SocketKey,
        /// Consuming socket
        to: SocketKey,
    },
    /// An edge was removed
    EdgeRemoved {
        /// Producing socket
        from: SocketKey,
        /// Consuming socket
        to: SocketKey,
    },
}

/// Receiver of graph events. Delivery is fire-and-forget.
pub trait GraphEventSink: Send {
    /// Handle one event
    fn notify(&mut self, event: GraphEvent);
}

impl GraphEventSink for Sender<GraphEvent> {
    fn notify(&mut self, event: GraphEvent) {
        // A dropped receiver just means nobody is listening anymore
        let _ = self.send(event);
    }
}
