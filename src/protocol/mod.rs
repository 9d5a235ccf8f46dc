//! Topic namespace and control sub-protocol

pub mod control;
pub mod topics;

pub use control::{decode_payload, ControlMessage};
pub use topics::{TopicBuilder, CONTROL_PREFIX};
