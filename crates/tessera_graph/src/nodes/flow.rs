// SPDX-License-Identifier: MIT OR Apache-2.0
//! Control-flow nodes for event-style graphs.
//!
//! These nodes carry a control input and route execution through their
//! control outputs, either by selecting one exit or by fanning out.

use crate::evaluation::ExecContext;
use crate::node::{ExecResult, NodeKind, SocketLayout};
use crate::value::{Properties, Property, SocketType, Value};

/// Start point of an event graph
#[derive(Debug, Clone, Copy, Default)]
pub struct EventEntry;

impl NodeKind for EventEntry {
    fn type_name(&self) -> &'static str {
        "event_entry"
    }

    fn construct(&self, layout: &mut SocketLayout) {
        layout.add_output_flow("Then");
    }

    fn execute(&mut self, _ctx: &mut ExecContext<'_>) -> ExecResult {
        ExecResult::Complete
    }
}

/// If/else on a scalar condition (`> 0` is true)
#[derive(Debug, Clone, Copy, Default)]
pub struct Branch;

impl NodeKind for Branch {
    fn type_name(&self) -> &'static str {
        "branch"
    }

    fn construct(&self, layout: &mut SocketLayout) {
        layout.add_input_flow("Exec");
        layout.add_input("Condition", SocketType::Float).with_default(0.0);
        layout.add_output_flow("True");
        layout.add_output_flow("False");
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> ExecResult {
        let condition = ctx.input_float(0).unwrap_or(0.0) > 0.0;
        ctx.select_exit(if condition { 0 } else { 1 });
        ExecResult::Complete
    }
}

/// Route to the exit whose index matches the rounded `Index` input
#[derive(Debug, Clone)]
pub struct Switch {
    /// Number of exits
    pub cases: usize,
}

impl Switch {
    /// Create a switch with `cases` exits
    pub fn new(cases: usize) -> Self {
        Self { cases }
    }
}

impl Default for Switch {
    fn default() -> Self {
        Self::new(2)
    }
}

impl NodeKind for Switch {
    fn type_name(&self) -> &'static str {
        "switch"
    }

    fn construct(&self, layout: &mut SocketLayout) {
        layout.add_input_flow("Exec");
        layout.add_input("Index", SocketType::Float).with_default(0.0);
        for case in 0..self.cases {
            layout.add_output_flow(format!("Case {case}"));
        }
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> ExecResult {
        let index = ctx.input_float(0).unwrap_or(0.0).round();
        if index < 0.0 || !ctx.select_exit(index as usize) {
            // No matching case ends the flow here
            return ExecResult::Terminate;
        }
        ExecResult::Complete
    }

    fn properties(&self) -> Properties {
        Properties::from([("cases".to_string(), Property::Int(self.cases as i64))])
    }

    fn set_property(&mut self, name: &str, value: &Property) -> bool {
        match (name, value.as_int()) {
            ("cases", Some(cases)) if cases >= 0 => {
                self.cases = cases as usize;
                true
            }
            _ => false,
        }
    }
}

/// Fan out to every exit, in order
#[derive(Debug, Clone)]
pub struct Sequence {
    /// Number of exits
    pub count: usize,
}

impl Sequence {
    /// Create a sequence with `count` exits
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(2)
    }
}

impl NodeKind for Sequence {
    fn type_name(&self) -> &'static str {
        "sequence"
    }

    fn construct(&self, layout: &mut SocketLayout) {
        layout.add_input_flow("Exec");
        for index in 0..self.count {
            layout.add_output_flow(format!("Then {index}"));
        }
    }

    fn execute(&mut self, _ctx: &mut ExecContext<'_>) -> ExecResult {
        ExecResult::Complete
    }

    fn properties(&self) -> Properties {
        Properties::from([("count".to_string(), Property::Int(self.count as i64))])
    }

    fn set_property(&mut self, name: &str, value: &Property) -> bool {
        match (name, value.as_int()) {
            ("count", Some(count)) if count >= 0 => {
                self.count = count as usize;
                true
            }
            _ => false,
        }
    }
}

/// Sum its input over several `Loop` iterations of one pass
#[derive(Debug, Clone)]
pub struct Accumulator {
    /// Number of iterations per pass
    pub iterations: u32,
    total: f32,
    done: u32,
}

impl Accumulator {
    /// Create an accumulator
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations,
            total: 0.0,
            done: 0,
        }
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new(1)
    }
}

impl NodeKind for Accumulator {
    fn type_name(&self) -> &'static str {
        "accumulator"
    }

    fn construct(&self, layout: &mut SocketLayout) {
        layout.add_input_flow("Exec");
        layout.add_input("In", SocketType::Float).with_default(0.0);
        layout.add_output("Sum", SocketType::Float);
        layout.add_output_flow("Done");
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> ExecResult {
        if self.done == 0 {
            self.total = 0.0;
        }
        self.total += ctx.input_float(0).unwrap_or(0.0);
        self.done += 1;
        ctx.set_output(0, self.total);

        if self.done < self.iterations {
            return ExecResult::Loop;
        }
        self.done = 0;
        ExecResult::Complete
    }

    fn properties(&self) -> Properties {
        Properties::from([(
            "iterations".to_string(),
            Property::Int(i64::from(self.iterations)),
        )])
    }

    fn set_property(&mut self, name: &str, value: &Property) -> bool {
        match (name, value.as_int().and_then(|v| u32::try_from(v).ok())) {
            ("iterations", Some(iterations)) => {
                self.iterations = iterations;
                true
            }
            _ => false,
        }
    }
}

/// Final color read by the preview renderer
#[derive(Debug, Clone, Copy, Default)]
pub struct PreviewOutput;

impl NodeKind for PreviewOutput {
    fn type_name(&self) -> &'static str {
        "preview_output"
    }

    fn construct(&self, layout: &mut SocketLayout) {
        layout.add_input_flow("Exec");
        layout
            .add_input("Color", SocketType::Color)
            .with_default(Value::Color([0.0, 0.0, 0.0, 1.0]));
        layout.add_output("Result", SocketType::Color);
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> ExecResult {
        let color = ctx.input(0);
        ctx.set_output(0, color);
        ExecResult::Complete
    }
}
