// SPDX-License-Identifier: MIT OR Apache-2.0
//! Socket definitions for node inputs/outputs and control pins.

use crate::node::NodeKey;
use crate::value::{SocketType, Value};
use slotmap::new_key_type;

new_key_type! {
    /// Generational handle to a socket owned by a graph
    pub struct SocketKey;
}

/// Role of a socket on its node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SocketRole {
    /// Data input
    Input = 0,
    /// Data output
    Output = 1,
    /// Execution flow entering the node
    ControlIn = 2,
    /// Execution flow leaving the node
    ControlOut = 3,
}

impl SocketRole {
    /// Whether the socket consumes edges (it is the key of the upstream table)
    pub fn is_input_side(self) -> bool {
        matches!(self, Self::Input | Self::ControlIn)
    }

    /// Whether the socket carries execution flow
    pub fn is_control(self) -> bool {
        matches!(self, Self::ControlIn | Self::ControlOut)
    }

    /// Persisted tag byte
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Decode a persisted tag byte
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Input),
            1 => Some(Self::Output),
            2 => Some(Self::ControlIn),
            3 => Some(Self::ControlOut),
            _ => None,
        }
    }

    /// Name used by the text format
    pub fn name(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::ControlIn => "control-in",
            Self::ControlOut => "control-out",
        }
    }

    /// Parse a text-format name
    pub fn from_name(name: &str) -> Option<Self> {
        [Self::Input, Self::Output, Self::ControlIn, Self::ControlOut]
            .into_iter()
            .find(|role| role.name() == name)
    }
}

/// A typed pin on a node.
///
/// The type tag is fixed at construction. The cached value is only ever
/// written through [`Socket::store_value`], which converts to the tag.
#[derive(Debug, Clone)]
pub struct Socket {
    node: NodeKey,
    pub(crate) serial_id: Option<u32>,
    name: String,
    socket_type: SocketType,
    role: SocketRole,
    value: Value,
}

impl Socket {
    pub(crate) fn new(
        node: NodeKey,
        name: impl Into<String>,
        socket_type: SocketType,
        role: SocketRole,
    ) -> Self {
        // Control pins always carry the control tag
        let socket_type = if role.is_control() {
            SocketType::Control
        } else {
            socket_type
        };
        Self {
            node,
            serial_id: None,
            name: name.into(),
            socket_type,
            role,
            value: Value::Empty,
        }
    }

    /// Owning node
    pub fn node(&self) -> NodeKey {
        self.node
    }

    /// Socket name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type tag
    pub fn socket_type(&self) -> SocketType {
        self.socket_type
    }

    /// Role on the owning node
    pub fn role(&self) -> SocketRole {
        self.role
    }

    /// Id from the last `assign_ids` pass
    pub fn serial_id(&self) -> Option<u32> {
        self.serial_id
    }

    /// Whether traversal follows this socket
    pub fn is_typed(&self) -> bool {
        self.socket_type.is_typed()
    }

    /// Cached value, `Value::Empty` if never stored
    pub fn value(&self) -> Value {
        self.value
    }

    /// Overwrite the cached value, converting it to this socket's type
    pub fn store_value(&mut self, value: impl Into<Value>) -> Result<(), ValueTypeError> {
        let value = value.into();
        let converted = value
            .convert_to(self.socket_type)
            .ok_or(ValueTypeError {
                expected: self.socket_type,
                found: value.socket_type(),
            })?;
        self.value = converted;
        Ok(())
    }

    /// Drop the cached value
    pub fn clear_value(&mut self) {
        self.value = Value::Empty;
    }

    /// Check if an edge between this socket and `other` is legal
    pub fn accept_edge(&self, other: &Socket) -> bool {
        // Must be opposite sides
        if self.role.is_input_side() == other.role.is_input_side() {
            return false;
        }

        // Control never mixes with dataflow
        if self.role.is_control() != other.role.is_control() {
            return false;
        }

        let (producer, consumer) = if self.role.is_input_side() {
            (other, self)
        } else {
            (self, other)
        };
        producer.socket_type.can_connect_to(consumer.socket_type)
    }
}

/// A value could not be converted to a socket's type
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot store a {found:?} value in a {expected:?} socket")]
pub struct ValueTypeError {
    /// Socket type
    pub expected: SocketType,
    /// Type of the rejected value
    pub found: SocketType,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socket(ty: SocketType, role: SocketRole) -> Socket {
        Socket::new(NodeKey::default(), "s", ty, role)
    }

    #[test]
    fn test_accept_edge_roles() {
        let out = socket(SocketType::Float, SocketRole::Output);
        let input = socket(SocketType::Float, SocketRole::Input);
        assert!(out.accept_edge(&input));
        assert!(input.accept_edge(&out));
        assert!(!input.accept_edge(&input.clone()));
        assert!(!out.accept_edge(&out.clone()));
    }

    #[test]
    fn test_accept_edge_families() {
        let flow_out = socket(SocketType::Untyped, SocketRole::ControlOut);
        let flow_in = socket(SocketType::Float, SocketRole::ControlIn);
        let data_in = socket(SocketType::Float, SocketRole::Input);
        assert_eq!(flow_in.socket_type(), SocketType::Control);
        assert!(flow_out.accept_edge(&flow_in));
        assert!(!flow_out.accept_edge(&data_in));

        let untyped_in = socket(SocketType::Untyped, SocketRole::Input);
        let float_out = socket(SocketType::Float, SocketRole::Output);
        assert!(!float_out.accept_edge(&untyped_in));
    }

    #[test]
    fn test_store_value_converts() {
        let mut color = socket(SocketType::Color, SocketRole::Input);
        color.store_value(0.5).unwrap();
        assert_eq!(color.value(), Value::Color([0.5, 0.5, 0.5, 1.0]));

        let mut scalar = socket(SocketType::Float, SocketRole::Input);
        assert!(scalar.store_value([1.0, 2.0]).is_err());
        assert_eq!(scalar.value(), Value::Empty);
    }
}
