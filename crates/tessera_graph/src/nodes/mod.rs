// SPDX-License-Identifier: MIT OR Apache-2.0
//! Standard node library.

pub mod flow;
pub mod group;
pub mod math;

use crate::node::NodeRegistry;

/// Registry with every node kind of the standard library
pub fn create_standard_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register_kind::<math::FloatConstant>();
    registry.register_kind::<math::ColorConstant>();
    registry.register_kind::<math::Add>();
    registry.register_kind::<math::Multiply>();
    registry.register_kind::<math::Scale>();
    registry.register_kind::<math::Mix>();
    registry.register_kind::<flow::EventEntry>();
    registry.register_kind::<flow::Branch>();
    registry.register_kind::<flow::Switch>();
    registry.register_kind::<flow::Sequence>();
    registry.register_kind::<flow::Accumulator>();
    registry.register_kind::<flow::PreviewOutput>();
    registry.register_kind::<group::GroupNode>();
    registry
}
