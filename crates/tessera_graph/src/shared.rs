// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph handle shared between an editing thread and evaluation workers.
//!
//! Every edit or evaluation holds the lock for its whole duration, so jobs
//! never interleave.

use crate::evaluation::{ExecError, ExecParams};
use crate::graph::Graph;
use crate::node::NodeKey;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Cloneable, thread-safe handle to one graph
#[derive(Debug, Clone)]
pub struct SharedGraph {
    inner: Arc<Mutex<Graph>>,
}

impl SharedGraph {
    /// Share a graph
    pub fn new(graph: Graph) -> Self {
        Self {
            inner: Arc::new(Mutex::new(graph)),
        }
    }

    /// Lock the graph
    pub fn lock(&self) -> MutexGuard<'_, Graph> {
        self.inner.lock()
    }

    /// Run an edit as one job
    pub fn edit<T>(&self, f: impl FnOnce(&mut Graph) -> T) -> T {
        f(&mut self.inner.lock())
    }

    /// Evaluate `node` with the upstream discipline as one job
    pub fn evaluate(&self, node: NodeKey, params: &ExecParams) -> Result<(), ExecError> {
        self.inner.lock().evaluate(node, params)
    }

    /// Run every entry node as one job
    pub fn run_entry_points(&self, params: &ExecParams) -> Result<(), ExecError> {
        self.inner.lock().run_entry_points(params)
    }
}

impl From<Graph> for SharedGraph {
    fn from(graph: Graph) -> Self {
        Self::new(graph)
    }
}
