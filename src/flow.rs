//! Proxy flow graph: document model and step injection.
mod augment;
mod document;
mod xml;

pub use augment::inject_at_head;
pub use document::{Direction, FlowDocument, FlowEntry, FlowRef};
