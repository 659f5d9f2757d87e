// SPDX-License-Identifier: MIT OR Apache-2.0
//! Socket type tags and the dynamic values that flow between sockets.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Opaque handle to a host-owned resource (texture, mesh buffer, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceHandle(pub u64);

/// Data type carried by a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SocketType {
    /// Unused or optional pin, skipped by traversal
    Untyped = 0,
    /// Scalar value
    Float = 1,
    /// 2D vector
    Vector2 = 2,
    /// 3D vector
    Vector3 = 3,
    /// 4D vector
    Vector4 = 4,
    /// Color (RGBA)
    Color = 5,
    /// Host resource handle
    Resource = 6,
    /// Execution flow
    Control = 7,
}

impl SocketType {
    /// All type tags, in tag order
    pub const ALL: [SocketType; 8] = [
        Self::Untyped,
        Self::Float,
        Self::Vector2,
        Self::Vector3,
        Self::Vector4,
        Self::Color,
        Self::Resource,
        Self::Control,
    ];

    /// Persisted tag byte
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Decode a persisted tag byte
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(usize::from(tag)).copied()
    }

    /// Name used by the text format
    pub fn name(self) -> &'static str {
        match self {
            Self::Untyped => "untyped",
            Self::Float => "float",
            Self::Vector2 => "vec2",
            Self::Vector3 => "vec3",
            Self::Vector4 => "vec4",
            Self::Color => "color",
            Self::Resource => "resource",
            Self::Control => "control",
        }
    }

    /// Parse a text-format name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.name() == name)
    }

    /// Whether traversal should follow sockets of this type
    pub fn is_typed(self) -> bool {
        self != Self::Untyped
    }

    /// Whether this is the execution-flow type
    pub fn is_control(self) -> bool {
        self == Self::Control
    }

    /// Check if a producer of this type can feed a consumer of `other`
    pub fn can_connect_to(self, other: SocketType) -> bool {
        if !self.is_typed() || !other.is_typed() {
            return false;
        }

        // Control only pairs with control
        if self.is_control() || other.is_control() {
            return self == other;
        }

        if self == other {
            return true;
        }

        // Implicit widening
        matches!(
            (self, other),
            (Self::Float, Self::Vector2 | Self::Vector3 | Self::Vector4 | Self::Color)
                | (Self::Vector2, Self::Vector3 | Self::Vector4)
                | (Self::Vector3, Self::Vector4)
                | (Self::Color, Self::Vector4)
                | (Self::Vector4, Self::Color)
        )
    }
}

/// Value cached on a socket
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Nothing stored yet
    #[default]
    Empty,
    /// Scalar
    Float(f32),
    /// 2D vector
    Vector2([f32; 2]),
    /// 3D vector
    Vector3([f32; 3]),
    /// 4D vector
    Vector4([f32; 4]),
    /// Color
    Color([f32; 4]),
    /// Host resource
    Resource(ResourceHandle),
}

impl Value {
    /// Get the socket type for this value
    pub fn socket_type(&self) -> SocketType {
        match self {
            Self::Empty => SocketType::Untyped,
            Self::Float(_) => SocketType::Float,
            Self::Vector2(_) => SocketType::Vector2,
            Self::Vector3(_) => SocketType::Vector3,
            Self::Vector4(_) => SocketType::Vector4,
            Self::Color(_) => SocketType::Color,
            Self::Resource(_) => SocketType::Resource,
        }
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Scalar view of the value
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Four-component view of any vector-like value
    pub fn as_vector4(&self) -> Option<[f32; 4]> {
        match self.convert_to(SocketType::Vector4)? {
            Self::Vector4(v) => Some(v),
            _ => None,
        }
    }

    /// Convert to a socket type following the implicit widening rules.
    ///
    /// `Empty` converts to every type.
    pub fn convert_to(&self, ty: SocketType) -> Option<Value> {
        if self.is_empty() {
            return Some(Self::Empty);
        }
        let from = self.socket_type();
        if from == ty {
            return Some(*self);
        }
        if !from.can_connect_to(ty) {
            return None;
        }

        let converted = match (*self, ty) {
            (Self::Float(x), SocketType::Vector2) => Self::Vector2([x, x]),
            (Self::Float(x), SocketType::Vector3) => Self::Vector3([x, x, x]),
            (Self::Float(x), SocketType::Vector4) => Self::Vector4([x, x, x, x]),
            (Self::Float(x), SocketType::Color) => Self::Color([x, x, x, 1.0]),
            (Self::Vector2([x, y]), SocketType::Vector3) => Self::Vector3([x, y, 0.0]),
            (Self::Vector2([x, y]), SocketType::Vector4) => Self::Vector4([x, y, 0.0, 0.0]),
            (Self::Vector3([x, y, z]), SocketType::Vector4) => Self::Vector4([x, y, z, 0.0]),
            (Self::Color(c), SocketType::Vector4) => Self::Vector4(c),
            (Self::Vector4(v), SocketType::Color) => Self::Color(v),
            _ => return None,
        };
        Some(converted)
    }

    /// Encode the payload for the text format (space separated components)
    pub fn to_text(&self) -> String {
        let join = |parts: &[f32]| {
            parts
                .iter()
                .map(f32::to_string)
                .collect::<Vec<_>>()
                .join(" ")
        };
        match self {
            Self::Empty => String::new(),
            Self::Float(v) => v.to_string(),
            Self::Vector2(v) => join(v),
            Self::Vector3(v) => join(v),
            Self::Vector4(v) | Self::Color(v) => join(v),
            Self::Resource(handle) => handle.0.to_string(),
        }
    }

    /// Decode a text-format payload of the given type
    pub fn from_text(ty: SocketType, text: &str) -> Option<Value> {
        let floats = || {
            text.split_whitespace()
                .map(str::parse::<f32>)
                .collect::<Result<Vec<_>, _>>()
                .ok()
        };
        let value = match ty {
            SocketType::Untyped | SocketType::Control => Self::Empty,
            SocketType::Float => Self::Float(text.trim().parse().ok()?),
            SocketType::Vector2 => Self::Vector2(floats()?.try_into().ok()?),
            SocketType::Vector3 => Self::Vector3(floats()?.try_into().ok()?),
            SocketType::Vector4 => Self::Vector4(floats()?.try_into().ok()?),
            SocketType::Color => Self::Color(floats()?.try_into().ok()?),
            SocketType::Resource => Self::Resource(ResourceHandle(text.trim().parse().ok()?)),
        };
        Some(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<[f32; 2]> for Value {
    fn from(value: [f32; 2]) -> Self {
        Self::Vector2(value)
    }
}

impl From<[f32; 3]> for Value {
    fn from(value: [f32; 3]) -> Self {
        Self::Vector3(value)
    }
}

impl From<[f32; 4]> for Value {
    fn from(value: [f32; 4]) -> Self {
        Self::Vector4(value)
    }
}

impl From<ResourceHandle> for Value {
    fn from(value: ResourceHandle) -> Self {
        Self::Resource(value)
    }
}

/// A node property, as exposed to the editor's property layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Property {
    /// Boolean flag
    Bool(bool),
    /// Integer
    Int(i64),
    /// Free text
    Text(String),
    /// Socket-typed value
    Value(Value),
}

impl Property {
    /// Integer view
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Text view
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Value view
    pub fn as_value(&self) -> Option<Value> {
        match self {
            Self::Value(v) => Some(*v),
            _ => None,
        }
    }

    /// Type name and payload for the text format
    pub fn to_text(&self) -> (&'static str, String) {
        match self {
            Self::Bool(v) => ("bool", v.to_string()),
            Self::Int(v) => ("int", v.to_string()),
            Self::Text(v) => ("text", v.clone()),
            Self::Value(v) => (v.socket_type().name(), v.to_text()),
        }
    }

    /// Decode a text-format property
    pub fn from_text(kind: &str, text: &str) -> Option<Property> {
        match kind {
            "bool" => text.parse().ok().map(Self::Bool),
            "int" => text.parse().ok().map(Self::Int),
            "text" => Some(Self::Text(text.to_string())),
            other => Value::from_text(SocketType::from_name(other)?, text).map(Self::Value),
        }
    }
}

/// Ordered property set of a node
pub type Properties = IndexMap<String, Property>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widening_rules() {
        assert!(SocketType::Float.can_connect_to(SocketType::Vector3));
        assert!(SocketType::Color.can_connect_to(SocketType::Vector4));
        assert!(!SocketType::Vector3.can_connect_to(SocketType::Float));
        assert!(!SocketType::Control.can_connect_to(SocketType::Float));
        assert!(!SocketType::Untyped.can_connect_to(SocketType::Untyped));
        assert!(SocketType::Control.can_connect_to(SocketType::Control));
    }

    #[test]
    fn test_value_conversion() {
        assert_eq!(
            Value::Float(2.0).convert_to(SocketType::Color),
            Some(Value::Color([2.0, 2.0, 2.0, 1.0]))
        );
        assert_eq!(Value::Vector3([1.0, 2.0, 3.0]).convert_to(SocketType::Float), None);
        assert_eq!(Value::Empty.convert_to(SocketType::Resource), Some(Value::Empty));
    }

    #[test]
    fn test_text_encoding() {
        let value = Value::Color([0.25, 0.5, 1.0, 1.0]);
        let text = value.to_text();
        assert_eq!(Value::from_text(SocketType::Color, &text), Some(value));
        assert_eq!(Value::from_text(SocketType::Vector2, "1 2 3"), None);

        let (kind, text) = Property::Int(-4).to_text();
        assert_eq!(Property::from_text(kind, &text), Some(Property::Int(-4)));
    }

    #[test]
    fn test_tag_round_trip() {
        for ty in SocketType::ALL {
            assert_eq!(SocketType::from_tag(ty.tag()), Some(ty));
            assert_eq!(SocketType::from_name(ty.name()), Some(ty));
        }
        assert_eq!(SocketType::from_tag(99), None);
    }
}
