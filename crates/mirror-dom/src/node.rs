//! DOM Node - arena representation
//!
//! Links are `NodeId`s into the tree arena; `NodeId::NONE` marks an
//! absent link. Removed nodes stay in the arena, detached, so ids held
//! by observers remain valid lookups.

use crate::{NodeId, SheetId};

/// DOM Node - Core structure
#[derive(Debug)]
pub struct Node {
    /// Parent node (NONE if detached or a tree root)
    pub parent: NodeId,
    /// First child
    pub first_child: NodeId,
    /// Last child (for O(1) append)
    pub last_child: NodeId,
    /// Previous sibling
    pub prev_sibling: NodeId,
    /// Next sibling
    pub next_sibling: NodeId,
    /// Node-specific data
    pub data: NodeData,
}

impl Node {
    pub(crate) fn new(data: NodeData) -> Self {
        Self {
            parent: NodeId::NONE,
            first_child: NodeId::NONE,
            last_child: NodeId::NONE,
            prev_sibling: NodeId::NONE,
            next_sibling: NodeId::NONE,
            data,
        }
    }

    /// Check if this is an element
    #[inline]
    pub fn is_element(&self) -> bool {
        matches!(self.data, NodeData::Element(_))
    }

    /// Check if this is text
    #[inline]
    pub fn is_text(&self) -> bool {
        matches!(self.data, NodeData::Text(_))
    }

    /// Get element data if this is an element
    #[inline]
    pub fn as_element(&self) -> Option<&ElementData> {
        match &self.data {
            NodeData::Element(e) => Some(e),
            _ => None,
        }
    }

    /// Get mutable element data
    #[inline]
    pub fn as_element_mut(&mut self) -> Option<&mut ElementData> {
        match &mut self.data {
            NodeData::Element(e) => Some(e),
            _ => None,
        }
    }

    /// Get text content if this is a text node
    #[inline]
    pub fn as_text(&self) -> Option<&str> {
        match &self.data {
            NodeData::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Adopted style sheets, for nodes that expose the list
    pub fn adopted_style_sheets(&self) -> Option<&[SheetId]> {
        match &self.data {
            NodeData::Document { adopted, .. } => Some(adopted),
            NodeData::ShadowRoot(shadow) => Some(&shadow.adopted),
            _ => None,
        }
    }
}

/// Node-specific data
#[derive(Debug)]
pub enum NodeData {
    /// Document root. `owner_frame` is set for frame content documents.
    Document {
        owner_frame: NodeId,
        adopted: Vec<SheetId>,
    },
    /// DOCTYPE
    Doctype(DoctypeData),
    /// Element
    Element(ElementData),
    /// Text content
    Text(String),
    /// Comment
    Comment(String),
    /// Shadow root attached to a host element
    ShadowRoot(ShadowRootData),
}

/// DOCTYPE data
#[derive(Debug, Clone, Default)]
pub struct DoctypeData {
    pub name: String,
    pub public_id: String,
    pub system_id: String,
}

/// Element-specific data
#[derive(Debug)]
pub struct ElementData {
    /// Tag name, lowercase
    pub tag: String,
    /// Attributes in insertion order
    pub attrs: Vec<(String, String)>,
    /// Attached shadow root
    pub shadow_root: NodeId,
    /// Browsing context for `iframe` elements
    pub frame: Option<FrameContent>,
    /// Sheet owned by a `<style>` element
    pub sheet: Option<SheetId>,
}

impl ElementData {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
            shadow_root: NodeId::NONE,
            frame: None,
            sheet: None,
        }
    }

    /// Get an attribute value
    pub fn get_attr(&self, name: &str) -> Option<&str> {
        self.attrs.iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, returning the previous value
    pub fn set_attr(&mut self, name: &str, value: String) -> Option<String> {
        for attr in self.attrs.iter_mut() {
            if attr.0 == name {
                return Some(std::mem::replace(&mut attr.1, value));
            }
        }
        self.attrs.push((name.to_string(), value));
        None
    }

    /// Remove an attribute, returning the previous value
    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let pos = self.attrs.iter().position(|(n, _)| n == name)?;
        Some(self.attrs.remove(pos).1)
    }

    /// Space separated `class` tokens
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.get_attr("class").unwrap_or("").split_ascii_whitespace()
    }
}

/// Shadow root mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShadowRootMode {
    #[default]
    Open,
    Closed,
}

/// Shadow root data
#[derive(Debug)]
pub struct ShadowRootData {
    /// Host element
    pub host: NodeId,
    /// Mode (open/closed)
    pub mode: ShadowRootMode,
    /// Adopted style sheets of this root
    pub adopted: Vec<SheetId>,
}

/// What an `iframe` element currently hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameContent {
    /// Same-origin document reachable from the parent page
    SameOrigin(NodeId),
    /// Opaque cross-origin browsing context
    CrossOrigin,
}
