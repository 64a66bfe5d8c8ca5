//! The B^ε-tree itself: node model, message protocol and the tree
//! implementation.

mod buffer;
mod imp;
mod message;
mod node;

pub use self::{buffer::MessageBuffer, imp::Tree, message::Message, node::Node};
