// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph evaluation and execution.
//!
//! Three disciplines share the per-node generation stamp:
//! - upstream: pull ancestors, then compute (dataflow)
//! - downstream: compute, then push into descendants (control flow)
//! - hybrid: pull values, compute, push values, then route control flow
//!   through the selected exit or every control output

use crate::graph::Graph;
use crate::node::{ExecResult, NodeKey};
use crate::socket::{Socket, SocketKey};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

/// Host parameters handed to every `execute`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecParams {
    /// Random seed for procedural nodes
    pub seed: u64,
    /// Output texture resolution
    pub resolution: [u32; 2],
    /// Animation time in seconds
    pub time: f32,
}

impl Default for ExecParams {
    fn default() -> Self {
        Self {
            seed: 0,
            resolution: [256, 256],
            time: 0.0,
        }
    }
}

/// View of one node's sockets during `execute`
pub struct ExecContext<'a> {
    node: NodeKey,
    inputs: &'a [SocketKey],
    outputs: &'a [SocketKey],
    output_flows: &'a [SocketKey],
    sockets: &'a mut SlotMap<SocketKey, Socket>,
    selected_exit: &'a mut Option<SocketKey>,
    params: &'a ExecParams,
}

impl<'a> ExecContext<'a> {
    /// Node being executed
    pub fn node(&self) -> NodeKey {
        self.node
    }

    /// Host parameters
    pub fn params(&self) -> &ExecParams {
        self.params
    }

    /// Number of data inputs
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Number of data outputs
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Number of control outputs
    pub fn output_flow_count(&self) -> usize {
        self.output_flows.len()
    }

    /// Cached value of an input, `Value::Empty` if absent
    pub fn input(&self, index: usize) -> Value {
        self.inputs
            .get(index)
            .and_then(|key| self.sockets.get(*key))
            .map_or(Value::Empty, Socket::value)
    }

    /// Scalar value of an input
    pub fn input_float(&self, index: usize) -> Option<f32> {
        self.input(index).as_float()
    }

    /// Cached value of one of this node's outputs
    pub fn output(&self, index: usize) -> Value {
        self.outputs
            .get(index)
            .and_then(|key| self.sockets.get(*key))
            .map_or(Value::Empty, Socket::value)
    }

    /// Write an output; `false` if the index is out of range or the value
    /// does not convert to the socket type
    pub fn set_output(&mut self, index: usize, value: impl Into<Value>) -> bool {
        let Some(socket) = self
            .outputs
            .get(index)
            .and_then(|key| self.sockets.get_mut(*key))
        else {
            return false;
        };
        match socket.store_value(value) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("Node {:?} output {index}: {err}", self.node);
                false
            }
        }
    }

    /// Route control flow through one control output only
    pub fn select_exit(&mut self, index: usize) -> bool {
        match self.output_flows.get(index) {
            Some(exit) => {
                *self.selected_exit = Some(*exit);
                true
            }
            None => false,
        }
    }
}

/// Error during execution
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    /// Node handle is stale or foreign
    #[error("Node not found: {0:?}")]
    NodeNotFound(NodeKey),

    /// A node kept returning `Loop`
    #[error("Node {node:?} looped more than {limit} times")]
    LoopLimit {
        /// Looping node
        node: NodeKey,
        /// Configured limit
        limit: u32,
    },
}

/// Direction of value propagation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Copy producer outputs into this node's inputs
    Pull,
    /// Copy this node's outputs into consumer inputs
    Push,
}

impl Graph {
    /// Hand out a fresh execution generation stamp
    pub fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Pull-based dataflow evaluation of `node` and its ancestors.
    ///
    /// Does nothing if `node` already ran in `generation` or is `ignore`.
    pub fn execute_upstream(
        &mut self,
        generation: u64,
        params: &ExecParams,
        node: NodeKey,
        ignore: Option<NodeKey>,
    ) -> Result<(), ExecError> {
        if !self.enter(node, generation, ignore)? {
            return Ok(());
        }

        if !self.nodes[node].kind.will_force_execute() {
            for producer in self.producer_nodes(node) {
                self.execute_upstream(generation, params, producer, ignore)?;
            }
        }

        let mut streak = 0;
        loop {
            self.propagate_values(node, Propagation::Pull);
            match self.run_node(node, params)? {
                ExecResult::Loop => self.count_loop(node, &mut streak)?,
                ExecResult::Complete | ExecResult::Terminate => return Ok(()),
            }
        }
    }

    /// Push-based evaluation of `node` and then its descendants.
    ///
    /// `Terminate` stops the walk below the node.
    pub fn execute_downstream(
        &mut self,
        generation: u64,
        params: &ExecParams,
        node: NodeKey,
        ignore: Option<NodeKey>,
    ) -> Result<(), ExecError> {
        if !self.enter(node, generation, ignore)? {
            return Ok(());
        }
        if !self.run_to_completion(node, params)? {
            return Ok(());
        }

        for consumer in self.consumer_nodes(node) {
            self.execute_downstream(generation, params, consumer, ignore)?;
        }
        Ok(())
    }

    /// Event-style evaluation: pull values, compute, push values, then follow
    /// the selected exit (or every control output if none was selected).
    pub fn execute_hybrid(
        &mut self,
        generation: u64,
        params: &ExecParams,
        node: NodeKey,
        ignore: Option<NodeKey>,
    ) -> Result<(), ExecError> {
        if !self.enter(node, generation, ignore)? {
            return Ok(());
        }

        // Loop iterations reuse the values pulled here
        self.propagate_values(node, Propagation::Pull);
        if !self.run_to_completion(node, params)? {
            return Ok(());
        }

        for next in self.routed_nodes(node) {
            self.execute_hybrid(generation, params, next, ignore)?;
        }
        Ok(())
    }

    /// Evaluate `node` with the upstream discipline in a fresh generation
    pub fn evaluate(&mut self, node: NodeKey, params: &ExecParams) -> Result<(), ExecError> {
        let generation = self.next_generation();
        self.execute_upstream(generation, params, node, None)
    }

    /// Run every entry node with the hybrid discipline in one fresh generation
    pub fn run_entry_points(&mut self, params: &ExecParams) -> Result<(), ExecError> {
        let generation = self.next_generation();
        for entry in self.entry_nodes.clone() {
            self.execute_hybrid(generation, params, entry, None)?;
        }
        Ok(())
    }

    /// [`evaluate`](Self::evaluate) with the parameters from the graph settings
    pub fn evaluate_with_defaults(&mut self, node: NodeKey) -> Result<(), ExecError> {
        let params = self.settings.default_params.clone();
        self.evaluate(node, &params)
    }

    /// [`run_entry_points`](Self::run_entry_points) with the parameters from
    /// the graph settings
    pub fn run_entry_points_with_defaults(&mut self) -> Result<(), ExecError> {
        let params = self.settings.default_params.clone();
        self.run_entry_points(&params)
    }

    /// Copy values across the edges of one node
    pub fn propagate_values(&mut self, node: NodeKey, direction: Propagation) {
        let Some(entry) = self.nodes.get(node) else {
            return;
        };

        let transfers: Vec<(SocketKey, SocketKey)> = match direction {
            Propagation::Pull => entry
                .inputs
                .iter()
                .filter_map(|input| self.upstream.first(*input).map(|from| (from, *input)))
                .collect(),
            Propagation::Push => entry
                .outputs
                .iter()
                .flat_map(|output| self.downstream.peers(*output).map(move |to| (*output, to)))
                .collect(),
        };

        for (from, to) in transfers {
            let value = match self.sockets.get(from) {
                Some(socket) if !socket.value().is_empty() => socket.value(),
                _ => continue,
            };
            if let Some(target) = self.sockets.get_mut(to) {
                if let Err(err) = target.store_value(value) {
                    tracing::warn!("Skipping value transfer {:?} -> {:?}: {err}", from, to);
                }
            }
        }
    }

    /// Stamp the node for this generation; `false` if it must be skipped
    fn enter(&mut self, node: NodeKey, generation: u64, ignore: Option<NodeKey>) -> Result<bool, ExecError> {
        let entry = self.nodes.get_mut(node).ok_or(ExecError::NodeNotFound(node))?;
        if entry.last_execution == Some(generation) || ignore == Some(node) {
            return Ok(false);
        }
        entry.last_execution = Some(generation);
        Ok(true)
    }

    /// Execute, pushing values after every call, until a non-loop result.
    ///
    /// Returns `false` on `Terminate`.
    fn run_to_completion(&mut self, node: NodeKey, params: &ExecParams) -> Result<bool, ExecError> {
        let mut streak = 0;
        loop {
            match self.run_node(node, params)? {
                ExecResult::Terminate => return Ok(false),
                ExecResult::Loop => {
                    self.propagate_values(node, Propagation::Push);
                    self.count_loop(node, &mut streak)?;
                }
                ExecResult::Complete => {
                    self.propagate_values(node, Propagation::Push);
                    return Ok(true);
                }
            }
        }
    }

    fn count_loop(&self, node: NodeKey, streak: &mut u32) -> Result<(), ExecError> {
        *streak += 1;
        let limit = self.settings.max_loop_iterations;
        if *streak > limit {
            return Err(ExecError::LoopLimit { node, limit });
        }
        Ok(())
    }

    fn run_node(&mut self, key: NodeKey, params: &ExecParams) -> Result<ExecResult, ExecError> {
        let Self { nodes, sockets, .. } = self;
        let node = nodes.get_mut(key).ok_or(ExecError::NodeNotFound(key))?;
        node.selected_exit = None;

        let crate::node::Node {
            kind,
            inputs,
            outputs,
            output_flows,
            selected_exit,
            ..
        } = node;
        let mut ctx = ExecContext {
            node: key,
            inputs,
            outputs,
            output_flows,
            sockets,
            selected_exit,
            params,
        };
        let result = kind.execute(&mut ctx);
        tracing::trace!("Executed {:?} ({}): {:?}", key, kind.type_name(), result);
        Ok(result)
    }

    /// Nodes feeding the typed data inputs of `node`, deduplicated
    fn producer_nodes(&self, node: NodeKey) -> Vec<NodeKey> {
        let mut found = Vec::new();
        for input in &self.nodes[node].inputs {
            if !self.sockets[*input].is_typed() {
                continue;
            }
            for producer in self.upstream.peers(*input) {
                push_owner(&mut found, &self.sockets, producer);
            }
        }
        found
    }

    /// Nodes fed by the typed data and control outputs of `node`, deduplicated
    fn consumer_nodes(&self, node: NodeKey) -> Vec<NodeKey> {
        let entry = &self.nodes[node];
        let mut found = Vec::new();
        for output in entry.outputs.iter().chain(entry.output_flows.iter()) {
            if !self.sockets[*output].is_typed() {
                continue;
            }
            for consumer in self.downstream.peers(*output) {
                push_owner(&mut found, &self.sockets, consumer);
            }
        }
        found
    }

    /// Control-flow successors after a hybrid execution
    fn routed_nodes(&self, node: NodeKey) -> Vec<NodeKey> {
        let entry = &self.nodes[node];
        let mut found = Vec::new();
        match entry.selected_exit {
            Some(exit) => {
                if let Some(target) = self.downstream.first(exit) {
                    push_owner(&mut found, &self.sockets, target);
                }
            }
            None => {
                for exit in &entry.output_flows {
                    for target in self.downstream.peers(*exit) {
                        push_owner(&mut found, &self.sockets, target);
                    }
                }
            }
        }
        found
    }
}

fn push_owner(found: &mut Vec<NodeKey>, sockets: &SlotMap<SocketKey, Socket>, socket: SocketKey) {
    if let Some(owner) = sockets.get(socket).map(Socket::node) {
        if !found.contains(&owner) {
            found.push(owner);
        }
    }
}
