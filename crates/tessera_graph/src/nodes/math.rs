// SPDX-License-Identifier: MIT OR Apache-2.0
//! Constant, arithmetic and blending nodes for texture graphs.

use crate::evaluation::ExecContext;
use crate::node::{ExecResult, NodeKind, SocketLayout};
use crate::value::{Properties, Property, SocketType, Value};

// ============================================================================
// Constants
// ============================================================================

/// Constant scalar
#[derive(Debug, Clone, Default)]
pub struct FloatConstant {
    /// Emitted value
    pub value: f32,
}

impl FloatConstant {
    /// Create a constant
    pub fn new(value: f32) -> Self {
        Self { value }
    }
}

impl NodeKind for FloatConstant {
    fn type_name(&self) -> &'static str {
        "float_constant"
    }

    fn construct(&self, layout: &mut SocketLayout) {
        layout
            .add_output("Value", SocketType::Float)
            .with_default(self.value);
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> ExecResult {
        ctx.set_output(0, self.value);
        ExecResult::Complete
    }

    fn properties(&self) -> Properties {
        Properties::from([("value".to_string(), Property::Value(Value::Float(self.value)))])
    }

    fn set_property(&mut self, name: &str, value: &Property) -> bool {
        match (name, value.as_value().and_then(|v| v.as_float())) {
            ("value", Some(v)) => {
                self.value = v;
                true
            }
            _ => false,
        }
    }
}

/// Constant color
#[derive(Debug, Clone)]
pub struct ColorConstant {
    /// Emitted color
    pub color: [f32; 4],
}

impl ColorConstant {
    /// Create a constant
    pub fn new(color: [f32; 4]) -> Self {
        Self { color }
    }
}

impl Default for ColorConstant {
    fn default() -> Self {
        Self::new([1.0, 1.0, 1.0, 1.0])
    }
}

impl NodeKind for ColorConstant {
    fn type_name(&self) -> &'static str {
        "color_constant"
    }

    fn construct(&self, layout: &mut SocketLayout) {
        layout
            .add_output("Color", SocketType::Color)
            .with_default(Value::Color(self.color));
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> ExecResult {
        ctx.set_output(0, Value::Color(self.color));
        ExecResult::Complete
    }

    fn properties(&self) -> Properties {
        Properties::from([("color".to_string(), Property::Value(Value::Color(self.color)))])
    }

    fn set_property(&mut self, name: &str, value: &Property) -> bool {
        match (name, value.as_value().and_then(|v| v.as_vector4())) {
            ("color", Some(color)) => {
                self.color = color;
                true
            }
            _ => false,
        }
    }
}

// ============================================================================
// Arithmetic
// ============================================================================

/// `Out = A + B`
#[derive(Debug, Clone, Copy, Default)]
pub struct Add;

impl NodeKind for Add {
    fn type_name(&self) -> &'static str {
        "add"
    }

    fn construct(&self, layout: &mut SocketLayout) {
        layout.add_input("A", SocketType::Float).with_default(0.0);
        layout.add_input("B", SocketType::Float).with_default(0.0);
        layout.add_output("Out", SocketType::Float);
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> ExecResult {
        let a = ctx.input_float(0).unwrap_or(0.0);
        let b = ctx.input_float(1).unwrap_or(0.0);
        ctx.set_output(0, a + b);
        ExecResult::Complete
    }
}

/// `Out = A * B`
#[derive(Debug, Clone, Copy, Default)]
pub struct Multiply;

impl NodeKind for Multiply {
    fn type_name(&self) -> &'static str {
        "multiply"
    }

    fn construct(&self, layout: &mut SocketLayout) {
        layout.add_input("A", SocketType::Float).with_default(1.0);
        layout.add_input("B", SocketType::Float).with_default(1.0);
        layout.add_output("Out", SocketType::Float);
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> ExecResult {
        let a = ctx.input_float(0).unwrap_or(1.0);
        let b = ctx.input_float(1).unwrap_or(1.0);
        ctx.set_output(0, a * b);
        ExecResult::Complete
    }
}

/// `Out = In * factor`
#[derive(Debug, Clone)]
pub struct Scale {
    /// Multiplier
    pub factor: f32,
}

impl Scale {
    /// Create a scale node
    pub fn new(factor: f32) -> Self {
        Self { factor }
    }
}

impl Default for Scale {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl NodeKind for Scale {
    fn type_name(&self) -> &'static str {
        "scale"
    }

    fn construct(&self, layout: &mut SocketLayout) {
        layout.add_input("In", SocketType::Float);
        layout.add_output("Out", SocketType::Float);
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> ExecResult {
        let value = ctx.input_float(0).unwrap_or(0.0);
        ctx.set_output(0, value * self.factor);
        ExecResult::Complete
    }

    fn properties(&self) -> Properties {
        Properties::from([("factor".to_string(), Property::Value(Value::Float(self.factor)))])
    }

    fn set_property(&mut self, name: &str, value: &Property) -> bool {
        match (name, value.as_value().and_then(|v| v.as_float())) {
            ("factor", Some(v)) => {
                self.factor = v;
                true
            }
            _ => false,
        }
    }
}

// ============================================================================
// Blending
// ============================================================================

/// Linear blend of two colors.
///
/// Version 1 had no `T` input and always blended half-way.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mix;

impl NodeKind for Mix {
    fn type_name(&self) -> &'static str {
        "mix"
    }

    fn version(&self) -> u16 {
        2
    }

    fn construct(&self, layout: &mut SocketLayout) {
        layout.add_input("A", SocketType::Color);
        layout.add_input("B", SocketType::Color);
        layout.add_input("T", SocketType::Float).with_default(0.5);
        layout.add_output("Color", SocketType::Color);
    }

    fn version_update(&mut self, from_version: u16, layout: &mut SocketLayout) {
        if from_version < 2 {
            layout.insert_input(2, "T", SocketType::Float).with_default(0.5);
        }
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> ExecResult {
        let a = ctx.input(0).as_vector4().unwrap_or([0.0; 4]);
        let b = ctx.input(1).as_vector4().unwrap_or([0.0; 4]);
        let t = ctx.input_float(2).unwrap_or(0.5).clamp(0.0, 1.0);
        let mut mixed = [0.0; 4];
        for (out, (a, b)) in mixed.iter_mut().zip(a.iter().zip(b.iter())) {
            *out = a + (b - a) * t;
        }
        ctx.set_output(0, Value::Color(mixed));
        ExecResult::Complete
    }
}
