//! Geometry collaborator
//!
//! Region, size and boundary lookups are delegated to the embedder's
//! layout. The engine asks for a recompute after discovery and after each
//! drained mutation pass.

use mirror_dom::{DomTree, NodeId};

use crate::registry::IdentityRegistry;

/// Layout queries used while describing nodes
pub trait Layout {
    /// Region the node belongs to
    fn region_of(&self, _dom: &DomTree, _node: NodeId) -> Option<u32> {
        None
    }

    /// Rendered `[width, height]`
    fn size_of(&self, _dom: &DomTree, _node: NodeId) -> Option<[u32; 2]> {
        None
    }

    /// Topmost and bottommost visible nodes
    fn boundary_nodes(&self, _dom: &DomTree) -> (Option<NodeId>, Option<NodeId>) {
        (None, None)
    }

    /// Recompute geometry for the current mirror
    fn compute(&mut self, _dom: &DomTree, _registry: &IdentityRegistry) {}
}

/// Layout that knows nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLayout;

impl Layout for NoLayout {}
