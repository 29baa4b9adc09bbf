//! Subtree traversal shared by discovery and the normalizer
//!
//! Mirrored child order is: shadow root first, then light children
//! (comments excluded), then the same-origin frame document last.

use std::collections::HashMap;
use std::rc::Rc;

use mirror_dom::{DomTree, EventKind, FrameContent, MutationObserverInit, MutationRecord, NodeData, NodeId};

use crate::encode::{AdoptionTarget, ChangeRecord, Source};
use crate::error::CaptureError;
use crate::node::{self, DOCUMENT_TAG, SHADOW_TAG};
use crate::registry::IdentityRegistry;
use crate::session::Cx;

/// Mirrored children of `node`, in mirror order
pub(crate) fn mirror_children(dom: &DomTree, node: NodeId) -> Vec<NodeId> {
    let mut children = Vec::new();
    if let Some(shadow) = dom.shadow_root(node) {
        children.push(shadow);
    }
    children.extend(dom.children(node).filter(|c| is_mirrored(dom, *c)));
    if let Some(FrameContent::SameOrigin(doc)) = dom.frame_content(node) {
        children.push(doc);
    }
    children
}

pub(crate) fn is_mirrored(dom: &DomTree, node: NodeId) -> bool {
    node != dom.root() && dom.get(node).is_some_and(|n| !matches!(n.data, NodeData::Comment(_)))
}

/// Where `node` belongs in the mirror: `(parent, previous)` ids. `None`
/// when its parent is not mirrored.
pub(crate) fn placement(dom: &DomTree, registry: &IdentityRegistry, node: NodeId) -> Option<(Option<u32>, Option<u32>)> {
    let parent_node = dom.composed_parent(node)?;
    let parent = if parent_node == dom.root() {
        None
    } else {
        Some(registry.lookup(parent_node)?)
    };
    Some((parent, previous_mirrored(dom, registry, node, parent_node)))
}

/// Nearest preceding sibling, in mirror order, that is already mirrored
fn previous_mirrored(dom: &DomTree, registry: &IdentityRegistry, node: NodeId, parent: NodeId) -> Option<u32> {
    let shadow = dom.shadow_root(parent);
    if shadow == Some(node) {
        return None;
    }
    let is_frame_doc = dom.parent(node).is_none();
    let mut sibling = if is_frame_doc {
        dom.children(parent).last()
    } else {
        dom.previous_sibling(node)
    };
    while let Some(current) = sibling {
        if let Some(id) = registry.lookup(current) {
            return Some(id);
        }
        sibling = dom.previous_sibling(current);
    }
    shadow.and_then(|s| registry.lookup(s))
}

/// Explicit DFS work stack
#[derive(Debug, Default)]
pub(crate) struct SubtreeWalk {
    stack: Vec<NodeId>,
}

impl SubtreeWalk {
    pub(crate) fn new(roots: Vec<NodeId>) -> Self {
        let mut stack = roots;
        stack.reverse();
        Self { stack }
    }

    pub(crate) fn pop(&mut self) -> Option<NodeId> {
        self.stack.pop()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Queue the mirrored children of `node` to be visited next. Returns
    /// whether any were queued.
    pub(crate) fn descend(&mut self, dom: &DomTree, node: NodeId) -> bool {
        let before = self.stack.len();
        self.stack.extend(mirror_children(dom, node).into_iter().rev());
        self.stack.len() > before
    }
}

/// Change records of one batch, at most one value record per node
#[derive(Debug, Default)]
pub(crate) struct BatchOutput {
    records: Vec<ChangeRecord>,
    latest: HashMap<u32, usize>,
}

impl BatchOutput {
    pub(crate) fn push(&mut self, record: ChangeRecord) {
        let id = record.value.id;
        match record.source {
            Source::Attributes | Source::CharacterData => {
                if let Some(&at) = self.latest.get(&id) {
                    self.records[at].value = record.value;
                    return;
                }
            }
            Source::ChildListRemove => {
                self.latest.remove(&id);
                self.records.push(record);
                return;
            }
            Source::Discover | Source::ChildListAdd => {}
        }
        self.latest.insert(id, self.records.len());
        self.records.push(record);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn into_records(self) -> Vec<ChangeRecord> {
        self.records
    }
}

/// What to do after visiting a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Visit {
    Descend,
    Skip,
}

/// Bring one node of an addition or discovery walk into the mirror
pub(crate) fn visit(cx: &mut Cx<'_>, node: NodeId, source: Source, time: u64, out: &mut BatchOutput) -> Visit {
    let registry = &cx.session.registry;
    let Some((parent, previous)) = placement(cx.dom, registry, node) else {
        tracing::trace!("skipping {:?}: parent is not mirrored", node);
        return Visit::Skip;
    };

    if let Some(id) = registry.lookup(node) {
        let same_place = registry.resolve(id).is_some_and(|v| v.parent == parent && v.previous == previous);
        if same_place {
            if let Some(snapshot) = node::describe(cx.dom, cx.privacy, &*cx.layout, registry, node, parent) {
                if cx.session.registry.update(id, snapshot) {
                    push_value(cx, id, source, time, out);
                }
            }
            retire_stale_frame_documents(cx, node, id, time, out);
            return Visit::Descend;
        }
        tracing::trace!("{:?} moved, re-assigning", node);
        retire(cx, id, time, out);
    }

    let registry = &cx.session.registry;
    let Some((parent, previous)) = placement(cx.dom, registry, node) else {
        return Visit::Skip;
    };
    let Some(snapshot) = node::describe(cx.dom, cx.privacy, &*cx.layout, registry, node, parent) else {
        return Visit::Skip;
    };
    let id = cx.session.registry.assign(node, parent, previous, snapshot);
    push_value(cx, id, source, time, out);
    watch(cx, node, id);
    Visit::Descend
}

fn push_value(cx: &Cx<'_>, id: u32, source: Source, time: u64, out: &mut BatchOutput) {
    if let Some(value) = cx.session.registry.resolve(id) {
        out.push(ChangeRecord { time, source, value: value.clone() });
    }
}

/// Retire a subtree, one removal record per retired entry
pub(crate) fn retire(cx: &mut Cx<'_>, id: u32, time: u64, out: &mut BatchOutput) {
    for value in cx.session.registry.retire(id) {
        if value.data.tag == SHADOW_TAG || value.data.tag == DOCUMENT_TAG {
            if let Some(root) = cx.session.registry.node(value.id) {
                forget(cx, root);
            }
        }
        out.push(ChangeRecord { time, source: Source::ChildListRemove, value });
    }
}

/// Stop tracking a retired shadow root or frame document
fn forget(cx: &mut Cx<'_>, root: NodeId) {
    if let Some(observer) = cx.session.observed.remove(&root) {
        cx.dom.disconnect(observer);
    }
    cx.session.adoption_docs.retain(|doc| *doc != root);
    cx.session.pending_roots.retain(|doc| *doc != root);
}

/// After a navigation the mirror may still hold the previous document
fn retire_stale_frame_documents(cx: &mut Cx<'_>, frame: NodeId, id: u32, time: u64, out: &mut BatchOutput) {
    if cx.dom.tag(frame) != Some("iframe") {
        return;
    }
    let current = match cx.dom.frame_content(frame) {
        Some(FrameContent::SameOrigin(doc)) => Some(doc),
        _ => None,
    };
    let registry = &cx.session.registry;
    let stale: Vec<u32> = registry.children(Some(id)).iter()
        .copied()
        .filter(|child| {
            registry.resolve(*child).is_some_and(|v| v.data.tag == DOCUMENT_TAG)
                && registry.node(*child) != current
        })
        .collect();
    for child in stale {
        tracing::debug!("frame {:?} navigated, retiring document {}", frame, child);
        retire(cx, child, time, out);
    }
}

/// Hook a newly mirrored node into live capture
fn watch(cx: &mut Cx<'_>, node: NodeId, id: u32) {
    let document = cx.dom.get(node).is_some_and(|n| {
        matches!(n.data, NodeData::ShadowRoot(_) | NodeData::Document { .. })
    });
    if document {
        if !cx.session.adoption_docs.contains(&node) {
            cx.session.adoption_docs.push(node);
        }
        if cx.session.armed {
            observe(cx, node);
            if cx.config.track_adopted_styles {
                cx.session.shared.check_adoption(cx.dom, AdoptionTarget::Node(id), node);
            }
        } else {
            cx.session.pending_roots.push(node);
        }
    }

    if cx.config.monitor_frames && cx.dom.tag(node) == Some("iframe") {
        if cx.session.armed {
            monitor(cx, node);
        } else {
            cx.session.pending_frames.push(node);
        }
    }
}

/// Attach an observer to a document-like root. Failure leaves the
/// subtree out of live capture.
pub(crate) fn observe(cx: &mut Cx<'_>, root: NodeId) {
    if cx.session.observed.contains_key(&root) {
        return;
    }
    let shared = Rc::downgrade(&cx.session.shared);
    let callback: mirror_dom::ObserverCallback = Rc::new(move |records: Vec<MutationRecord>| {
        if let Some(shared) = shared.upgrade() {
            shared.ingest(records);
        }
    });
    match cx.dom.observe(root, MutationObserverInit::all(), callback) {
        Ok(observer) => {
            cx.session.observed.insert(root, observer);
        }
        Err(source) => {
            let error = CaptureError::ObserverUnavailable { node: root, source };
            tracing::debug!("{}", error);
        }
    }
}

/// Bind a load listener to a frame, once
pub(crate) fn monitor(cx: &mut Cx<'_>, frame: NodeId) {
    if !cx.session.monitored.insert(frame) {
        return;
    }
    let shared = Rc::downgrade(&cx.session.shared);
    let listener = cx.dom.add_event_listener(frame, EventKind::Load, Rc::new(move |target: NodeId| {
        if let Some(shared) = shared.upgrade() {
            shared.frame_loaded(target);
        }
    }));
    cx.session.listeners.push(listener);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{NodeInfo, NodeMeta, NodeValue};
    use crate::privacy::Privacy;
    use mirror_dom::ShadowRootMode;

    fn value(id: u32, tag: &str) -> NodeValue {
        NodeValue {
            id,
            parent: None,
            previous: None,
            children: Vec::new(),
            data: NodeInfo { tag: tag.into(), ..Default::default() },
            selector: None,
            region: None,
            metadata: NodeMeta { active: true, privacy: Privacy::None, size: None },
        }
    }

    #[test]
    fn test_mirror_children_order() {
        let mut dom = DomTree::new();
        let frame = dom.create_element("iframe");
        dom.append_child(dom.root(), frame).unwrap();
        let shadow = dom.attach_shadow(frame, ShadowRootMode::Open).unwrap();
        let comment = dom.create_comment("c");
        let text = dom.create_text("fallback");
        dom.append_child(frame, comment).unwrap();
        dom.append_child(frame, text).unwrap();
        let doc = dom.create_document();
        dom.set_frame_content(frame, FrameContent::SameOrigin(doc)).unwrap();

        assert_eq!(mirror_children(&dom, frame), vec![shadow, text, doc]);
    }

    #[test]
    fn test_coalescing_keeps_latest_value() {
        let mut out = BatchOutput::default();
        let mut first = value(3, "div");
        first.data.attributes.push(("class".into(), "a".into()));
        let mut second = value(3, "div");
        second.data.attributes.push(("class".into(), "b".into()));

        out.push(ChangeRecord { time: 1, source: Source::Attributes, value: first });
        out.push(ChangeRecord { time: 1, source: Source::Attributes, value: second });
        out.push(ChangeRecord { time: 1, source: Source::Attributes, value: value(4, "p") });
        let records = out.into_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value.data.attributes[0].1, "b");
    }

    #[test]
    fn test_add_absorbs_later_value_change() {
        let mut out = BatchOutput::default();
        out.push(ChangeRecord { time: 1, source: Source::ChildListAdd, value: value(5, "*T") });
        let mut changed = value(5, "*T");
        changed.data.value = Some("new".into());
        out.push(ChangeRecord { time: 1, source: Source::CharacterData, value: changed });

        let records = out.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, Source::ChildListAdd);
        assert_eq!(records[0].value.data.value.as_deref(), Some("new"));
    }

    #[test]
    fn test_walk_order() {
        let mut dom = DomTree::new();
        let a = dom.create_element("a");
        let b = dom.create_element("b");
        let c = dom.create_element("c");
        dom.append_child(dom.root(), a).unwrap();
        dom.append_child(a, b).unwrap();
        dom.append_child(dom.root(), c).unwrap();

        let mut walk = SubtreeWalk::new(mirror_children(&dom, dom.root()));
        let mut order = Vec::new();
        while let Some(node) = walk.pop() {
            order.push(node);
            walk.descend(&dom, node);
        }
        assert_eq!(order, vec![a, b, c]);
        assert!(walk.is_empty());
    }
}
