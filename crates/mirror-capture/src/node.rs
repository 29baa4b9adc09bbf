//! Node description
//!
//! Reads a live node into the [`Snapshot`] the mirror stores: tag,
//! attributes and text with privacy applied, a CSS selector path and the
//! layout collaborator's answers.

use mirror_dom::{DomTree, NodeData, NodeId};

use crate::layout::Layout;
use crate::privacy::{self, Privacy, PrivacyClassifier};
use crate::registry::{IdentityRegistry, NodeInfo, Snapshot};

/// Tag of mirrored text nodes
pub const TEXT_TAG: &str = "*T";
/// Tag of mirrored shadow roots
pub const SHADOW_TAG: &str = "*S";
/// Tag of mirrored frame documents
pub const DOCUMENT_TAG: &str = "*D";
/// Tag of mirrored doctypes
pub const DOCTYPE_TAG: &str = "!doctype";

/// Describe `node` for the mirror. `None` for nodes that are never
/// mirrored (comments and the root document).
pub fn describe(
    dom: &DomTree,
    privacy: &dyn PrivacyClassifier,
    layout: &dyn Layout,
    registry: &IdentityRegistry,
    node: NodeId,
    parent: Option<u32>,
) -> Option<Snapshot> {
    if node == dom.root() {
        return None;
    }
    let parent_entry = parent.and_then(|p| registry.resolve(p));
    let inherited = parent_entry.map_or(Privacy::None, |p| p.metadata.privacy);
    let level = privacy.classify(dom, node, inherited);

    let (data, selector) = match &dom.get(node)?.data {
        NodeData::Element(element) => {
            let password = element.tag == "input" && element.get_attr("type") == Some("password");
            let attributes = element.attrs.iter()
                .map(|(name, value)| {
                    let value = privacy::mask_attribute(&element.tag, name, value, password, level);
                    (name.clone(), value)
                })
                .collect();
            let value = element.sheet
                .and_then(|sheet| dom.sheet(sheet))
                .map(|sheet| sheet.css_text());
            let info = NodeInfo { tag: element.tag.clone(), attributes, value };
            (info, Some(selector(dom, node)))
        }
        NodeData::Text(text) => {
            let value = if level.masks() { privacy::mask_text(text) } else { text.clone() };
            let info = NodeInfo { tag: TEXT_TAG.to_string(), attributes: Vec::new(), value: Some(value) };
            (info, parent_entry.and_then(|p| p.selector.clone()))
        }
        NodeData::Doctype(doctype) => {
            let info = NodeInfo {
                tag: DOCTYPE_TAG.to_string(),
                attributes: vec![("name".to_string(), doctype.name.clone())],
                value: None,
            };
            (info, None)
        }
        NodeData::ShadowRoot(_) => (NodeInfo { tag: SHADOW_TAG.to_string(), ..Default::default() }, None),
        NodeData::Document { .. } => (NodeInfo { tag: DOCUMENT_TAG.to_string(), ..Default::default() }, None),
        NodeData::Comment(_) => return None,
    };

    let element = dom.get(node).is_some_and(|n| n.is_element());
    Some(Snapshot {
        data,
        selector,
        region: layout.region_of(dom, node),
        privacy: level,
        size: if element { layout.size_of(dom, node) } else { None },
    })
}

/// `>`-joined selector path up to the nearest non-element ancestor
pub fn selector(dom: &DomTree, node: NodeId) -> String {
    let mut parts = Vec::new();
    let mut current = Some(node);
    while let Some(id) = current {
        let Some(tag) = dom.tag(id) else {
            break;
        };
        parts.push(segment(dom, id, tag));
        current = dom.composed_parent(id);
    }
    parts.reverse();
    parts.join(">")
}

fn segment(dom: &DomTree, node: NodeId, tag: &str) -> String {
    let mut part = tag.to_string();
    if let Some(id) = dom.attribute(node, "id").filter(|id| !id.is_empty()) {
        part.push('#');
        part.push_str(id);
        return part;
    }
    if let Some(element) = dom.get(node).and_then(|n| n.as_element()) {
        for class in element.classes() {
            part.push('.');
            part.push_str(class);
        }
    }

    if let Some(parent) = dom.parent(node) {
        let same_tag: Vec<NodeId> = dom.children(parent)
            .filter(|c| dom.tag(*c) == Some(tag))
            .collect();
        if same_tag.len() > 1 {
            if let Some(pos) = same_tag.iter().position(|c| *c == node) {
                part.push_str(&format!(":nth-of-type({})", pos + 1));
            }
        }
    }
    part
}
