//! mirror DOM - Live host document
//!
//! Arena-based document the capture engine observes: elements, text,
//! shadow roots, same-origin frames, a CSSOM with a patchable style-sheet
//! prototype, native mutation observers and load listeners.

mod node;
mod tree;
mod observer;
mod cssom;
mod events;

pub use node::{Node, NodeData, ElementData, DoctypeData, ShadowRootData, ShadowRootMode, FrameContent};
pub use tree::DomTree;
pub use observer::{MutationRecord, MutationObserverInit, ObserverCallback, ObserverId};
pub use cssom::{StyleSheet, SheetId, SheetMethods, StyleSheetPrototype, InsertRuleFn, DeleteRuleFn, ReplaceFn, split_rules};
pub use events::{EventKind, ListenerCallback, ListenerId};

/// Node identifier (index into arena)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// The document node every tree is created with
    pub const ROOT: NodeId = NodeId(0);
    /// Absent link
    pub const NONE: NodeId = NodeId(u32::MAX);

    /// Check if this id points at a node
    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::NONE
    }

    /// Arena index
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub(crate) fn option(self) -> Option<NodeId> {
        if self.is_valid() { Some(self) } else { None }
    }
}

/// Errors raised by host DOM operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomError {
    #[error("node {0:?} does not exist")]
    NotFound(NodeId),
    #[error("hierarchy request error: {0}")]
    HierarchyRequest(&'static str),
    #[error("index {index} is out of range for {len} rules")]
    IndexSize { index: usize, len: usize },
    #[error("operation not allowed: {0}")]
    NotAllowed(&'static str),
    #[error("not supported: {0}")]
    NotSupported(&'static str),
}
