//! DOM Tree (arena-based allocation)
//!
//! Owns every node, style sheet, observer and listener of one page.
//! Structural, attribute and text mutations queue native mutation
//! records; CSSOM calls and frame navigations do not.

use crate::events::Listeners;
use crate::observer::ObserverRegistry;
use crate::{
    DoctypeData, DomError, ElementData, EventKind, FrameContent, ListenerCallback, ListenerId,
    MutationObserverInit, MutationRecord, Node, NodeData, NodeId, ObserverCallback, ObserverId,
    ShadowRootData, ShadowRootMode, SheetId, StyleSheet, StyleSheetPrototype,
};

/// Arena-based DOM tree
#[derive(Debug)]
pub struct DomTree {
    nodes: Vec<Node>,
    sheets: Vec<StyleSheet>,
    prototype: StyleSheetPrototype,
    observers: ObserverRegistry,
    listeners: Listeners,
    serial: u64,
    shadow_observation: bool,
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry").field("observers", &self.count()).finish()
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners").field("listeners", &self.count()).finish()
    }
}

impl Default for DomTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DomTree {
    /// Create a tree holding only the root document
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(NodeData::Document {
                owner_frame: NodeId::NONE,
                adopted: Vec::new(),
            })],
            sheets: Vec::new(),
            prototype: StyleSheetPrototype::default(),
            observers: ObserverRegistry::default(),
            listeners: Listeners::default(),
            serial: 0,
            shadow_observation: true,
        }
    }

    /// Root document
    #[inline]
    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Get a node by ID
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    fn node(&self, id: NodeId) -> Result<&Node, DomError> {
        self.nodes.get(id.index()).ok_or(DomError::NotFound(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, DomError> {
        self.nodes.get_mut(id.index()).ok_or(DomError::NotFound(id))
    }

    /// Number of nodes ever created (detached ones included)
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if tree is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(data));
        id
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeData::Element(ElementData::new(tag)))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Comment(text.to_string()))
    }

    pub fn create_doctype(&mut self, name: &str) -> NodeId {
        self.push(NodeData::Doctype(DoctypeData {
            name: name.to_string(),
            ..Default::default()
        }))
    }

    /// Detached document, used as frame content
    pub fn create_document(&mut self) -> NodeId {
        self.push(NodeData::Document {
            owner_frame: NodeId::NONE,
            adopted: Vec::new(),
        })
    }

    /// `<style>` element with a text child and an owned sheet
    pub fn create_style(&mut self, css: &str) -> NodeId {
        let style = self.create_element("style");
        let text = self.create_text(css);
        self.link(style, text, NodeId::NONE);
        let sheet = SheetId(self.sheets.len() as u32);
        self.sheets.push(StyleSheet::owned_by(style, css));
        if let Some(element) = self.nodes[style.index()].as_element_mut() {
            element.sheet = Some(sheet);
        }
        style
    }

    /// Constructed style sheet (`new CSSStyleSheet()`)
    pub fn create_style_sheet(&mut self) -> SheetId {
        let sheet = SheetId(self.sheets.len() as u32);
        self.sheets.push(StyleSheet::constructed());
        sheet
    }

    /// Monotonic serial shared by everything running against this tree
    pub fn allocate_serial(&mut self) -> u64 {
        self.serial += 1;
        self.serial
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    /// Light-DOM parent
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.parent.option())
    }

    /// Light-DOM children, in order
    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children {
            tree: self,
            next: self.get(id).map_or(NodeId::NONE, |n| n.first_child),
        }
    }

    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.prev_sibling.option())
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.next_sibling.option())
    }

    /// Parent across shadow and frame boundaries: a shadow root's host,
    /// a frame document's `iframe`
    pub fn composed_parent(&self, id: NodeId) -> Option<NodeId> {
        let node = self.get(id)?;
        if let Some(parent) = node.parent.option() {
            return Some(parent);
        }
        match &node.data {
            NodeData::ShadowRoot(shadow) => shadow.host.option(),
            NodeData::Document { owner_frame, .. } => {
                let frame = owner_frame.option()?;
                match self.frame_content(frame) {
                    Some(FrameContent::SameOrigin(doc)) if doc == id => Some(frame),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Reachable from the root document
    pub fn is_connected(&self, id: NodeId) -> bool {
        let mut current = id;
        // Composed parents cannot cycle: insertion rejects ancestors
        loop {
            if current == NodeId::ROOT {
                return true;
            }
            match self.composed_parent(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, of: NodeId) -> bool {
        let mut current = Some(of);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.composed_parent(id);
        }
        false
    }

    fn light_ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = vec![id];
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    // ------------------------------------------------------------------
    // Element and text access
    // ------------------------------------------------------------------

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.get(id)?.as_element()?.get_attr(name)
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.get(id)?.as_element().map(|e| e.tag.as_str())
    }

    /// Text of a text or comment node
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.get(id)?.data {
            NodeData::Text(text) | NodeData::Comment(text) => Some(text),
            _ => None,
        }
    }

    pub fn shadow_root(&self, host: NodeId) -> Option<NodeId> {
        self.get(host)?.as_element()?.shadow_root.option()
    }

    pub fn frame_content(&self, frame: NodeId) -> Option<FrameContent> {
        self.get(frame)?.as_element()?.frame
    }

    /// Sheet owned by a `<style>` element
    pub fn element_sheet(&self, id: NodeId) -> Option<SheetId> {
        self.get(id)?.as_element()?.sheet
    }

    pub fn sheet(&self, id: SheetId) -> Option<&StyleSheet> {
        self.sheets.get(id.0 as usize)
    }

    pub fn sheet_mut(&mut self, id: SheetId) -> Option<&mut StyleSheet> {
        self.sheets.get_mut(id.0 as usize)
    }

    pub(crate) fn sheet_entry(&mut self, id: SheetId) -> Result<&mut StyleSheet, DomError> {
        self.sheets.get_mut(id.0 as usize).ok_or(DomError::NotSupported("unknown style sheet"))
    }

    // ------------------------------------------------------------------
    // Structural mutation
    // ------------------------------------------------------------------

    /// Append `child` as the last child of `parent`
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` before `reference` (append when `None`). An attached
    /// child is moved, which queues its removal first.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) -> Result<(), DomError> {
        self.node(parent)?;
        let child_node = self.node(child)?;
        if matches!(child_node.data, NodeData::Document { .. } | NodeData::ShadowRoot(_)) {
            return Err(DomError::HierarchyRequest("documents and shadow roots cannot be inserted"));
        }
        if matches!(self.nodes[parent.index()].data, NodeData::Text(_) | NodeData::Comment(_) | NodeData::Doctype(_)) {
            return Err(DomError::HierarchyRequest("parent cannot have children"));
        }
        if self.is_inclusive_ancestor(child, parent) {
            return Err(DomError::HierarchyRequest("node is an ancestor of the parent"));
        }
        if let Some(reference) = reference {
            if reference == child {
                return Ok(());
            }
            if self.parent(reference) != Some(parent) {
                return Err(DomError::NotFound(reference));
            }
        }

        if let Some(old_parent) = self.parent(child) {
            self.remove_child(old_parent, child)?;
        }

        let next = reference.unwrap_or(NodeId::NONE);
        self.link(parent, child, next);
        let record = MutationRecord::ChildList {
            target: parent,
            added: vec![child],
            removed: Vec::new(),
            previous_sibling: self.previous_sibling(child),
            next_sibling: self.next_sibling(child),
        };
        self.queue(record);
        self.sync_style_sheet(parent);
        Ok(())
    }

    /// Remove `child` from `parent`
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        if self.parent(child) != Some(parent) {
            return Err(DomError::NotFound(child));
        }
        let previous = self.previous_sibling(child);
        let next = self.next_sibling(child);
        self.unlink(child);
        self.queue(MutationRecord::ChildList {
            target: parent,
            added: Vec::new(),
            removed: vec![child],
            previous_sibling: previous,
            next_sibling: next,
        });
        self.sync_style_sheet(parent);
        Ok(())
    }

    /// Detach a node from its parent, if it has one
    pub fn remove(&mut self, child: NodeId) -> Result<(), DomError> {
        match self.parent(child) {
            Some(parent) => self.remove_child(parent, child),
            None => Ok(()),
        }
    }

    fn link(&mut self, parent: NodeId, child: NodeId, next: NodeId) {
        let prev = if next.is_valid() {
            self.nodes[next.index()].prev_sibling
        } else {
            self.nodes[parent.index()].last_child
        };
        {
            let node = &mut self.nodes[child.index()];
            node.parent = parent;
            node.prev_sibling = prev;
            node.next_sibling = next;
        }
        if prev.is_valid() {
            self.nodes[prev.index()].next_sibling = child;
        } else {
            self.nodes[parent.index()].first_child = child;
        }
        if next.is_valid() {
            self.nodes[next.index()].prev_sibling = child;
        } else {
            self.nodes[parent.index()].last_child = child;
        }
    }

    fn unlink(&mut self, child: NodeId) {
        let (parent, prev, next) = {
            let node = &self.nodes[child.index()];
            (node.parent, node.prev_sibling, node.next_sibling)
        };
        if prev.is_valid() {
            self.nodes[prev.index()].next_sibling = next;
        } else if parent.is_valid() {
            self.nodes[parent.index()].first_child = next;
        }
        if next.is_valid() {
            self.nodes[next.index()].prev_sibling = prev;
        } else if parent.is_valid() {
            self.nodes[parent.index()].last_child = prev;
        }
        let node = &mut self.nodes[child.index()];
        node.parent = NodeId::NONE;
        node.prev_sibling = NodeId::NONE;
        node.next_sibling = NodeId::NONE;
    }

    // ------------------------------------------------------------------
    // Attribute and character data mutation
    // ------------------------------------------------------------------

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        let element = self.node_mut(id)?.as_element_mut()
            .ok_or(DomError::NotSupported("attributes on a non-element"))?;
        let old_value = element.set_attr(name, value.to_string());
        self.queue(MutationRecord::Attributes { target: id, name: name.to_string(), old_value });
        Ok(())
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Result<(), DomError> {
        let element = self.node_mut(id)?.as_element_mut()
            .ok_or(DomError::NotSupported("attributes on a non-element"))?;
        if let Some(old_value) = element.remove_attr(name) {
            self.queue(MutationRecord::Attributes { target: id, name: name.to_string(), old_value: Some(old_value) });
        }
        Ok(())
    }

    /// Replace the data of a text or comment node
    pub fn set_text(&mut self, id: NodeId, value: &str) -> Result<(), DomError> {
        let old_value = match &mut self.node_mut(id)?.data {
            NodeData::Text(text) | NodeData::Comment(text) => std::mem::replace(text, value.to_string()),
            _ => return Err(DomError::NotSupported("character data on a non-text node")),
        };
        self.queue(MutationRecord::CharacterData { target: id, old_value: Some(old_value) });
        if let Some(parent) = self.parent(id) {
            self.sync_style_sheet(parent);
        }
        Ok(())
    }

    /// Re-parse an owned sheet after its `<style>` text changed
    fn sync_style_sheet(&mut self, style: NodeId) {
        let Some(sheet) = self.element_sheet(style) else {
            return;
        };
        let text: String = self.children(style).filter_map(|c| self.text(c)).collect();
        if let Some(sheet) = self.sheets.get_mut(sheet.0 as usize) {
            sheet.set_text(&text);
        }
    }

    // ------------------------------------------------------------------
    // Shadow roots and frames
    // ------------------------------------------------------------------

    /// Attach a shadow root to `host`
    pub fn attach_shadow(&mut self, host: NodeId, mode: ShadowRootMode) -> Result<NodeId, DomError> {
        let element = self.node(host)?.as_element()
            .ok_or(DomError::NotSupported("shadow root on a non-element"))?;
        if element.shadow_root.is_valid() {
            return Err(DomError::NotAllowed("host already has a shadow root"));
        }
        let shadow = self.push(NodeData::ShadowRoot(ShadowRootData { host, mode, adopted: Vec::new() }));
        if let Some(element) = self.nodes[host.index()].as_element_mut() {
            element.shadow_root = shadow;
        }
        Ok(shadow)
    }

    /// Set what an `iframe` hosts without dispatching `load`
    pub fn set_frame_content(&mut self, frame: NodeId, content: FrameContent) -> Result<(), DomError> {
        let element = self.node(frame)?.as_element()
            .ok_or(DomError::NotSupported("frame content on a non-element"))?;
        if element.tag != "iframe" {
            return Err(DomError::NotSupported("frame content on a non-iframe element"));
        }
        if let FrameContent::SameOrigin(doc) = content {
            match self.node_mut(doc)?.data {
                NodeData::Document { ref mut owner_frame, .. } if doc != NodeId::ROOT => *owner_frame = frame,
                _ => return Err(DomError::HierarchyRequest("frame content must be a detached document")),
            }
        }
        if let Some(element) = self.nodes[frame.index()].as_element_mut() {
            element.frame = Some(content);
        }
        Ok(())
    }

    /// Navigate an `iframe` and dispatch `load` to its listeners.
    /// Navigation queues no mutation records.
    pub fn navigate_frame(&mut self, frame: NodeId, content: FrameContent) -> Result<(), DomError> {
        self.set_frame_content(frame, content)?;
        self.dispatch(frame, EventKind::Load);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Adopted style sheets and CSSOM
    // ------------------------------------------------------------------

    /// Adopted sheets of a document or shadow root
    pub fn adopted_style_sheets(&self, id: NodeId) -> Option<&[SheetId]> {
        self.get(id)?.adopted_style_sheets()
    }

    pub fn set_adopted_style_sheets(&mut self, id: NodeId, sheets: Vec<SheetId>) -> Result<(), DomError> {
        for sheet in &sheets {
            match self.sheet(*sheet) {
                Some(s) if s.constructed => {}
                Some(_) => return Err(DomError::NotAllowed("only constructed sheets can be adopted")),
                None => return Err(DomError::NotSupported("unknown style sheet")),
            }
        }
        match &mut self.node_mut(id)?.data {
            NodeData::Document { adopted, .. } => *adopted = sheets,
            NodeData::ShadowRoot(shadow) => shadow.adopted = sheets,
            _ => return Err(DomError::NotSupported("adoptedStyleSheets on this node")),
        }
        Ok(())
    }

    pub fn prototype(&self) -> &StyleSheetPrototype {
        &self.prototype
    }

    pub fn prototype_mut(&mut self) -> &mut StyleSheetPrototype {
        &mut self.prototype
    }

    /// `CSSStyleSheet.insertRule`
    pub fn insert_rule(&mut self, sheet: SheetId, rule: &str, index: usize) -> Result<usize, DomError> {
        let method = self.prototype.insert_rule.get();
        method(self, sheet, rule, index)
    }

    /// `CSSStyleSheet.deleteRule`
    pub fn delete_rule(&mut self, sheet: SheetId, index: usize) -> Result<(), DomError> {
        let method = self.prototype.delete_rule.get();
        method(self, sheet, index)
    }

    /// `CSSStyleSheet.replace`
    pub fn replace(&mut self, sheet: SheetId, text: &str) -> Result<(), DomError> {
        let method = self.prototype.replace.get();
        method(self, sheet, text)
    }

    /// `CSSStyleSheet.replaceSync`
    pub fn replace_sync(&mut self, sheet: SheetId, text: &str) -> Result<(), DomError> {
        let method = self.prototype.replace_sync.get();
        method(self, sheet, text)
    }

    // ------------------------------------------------------------------
    // Observers and listeners
    // ------------------------------------------------------------------

    /// Models engines that refuse observers on shadow roots
    pub fn set_shadow_observation_supported(&mut self, supported: bool) {
        self.shadow_observation = supported;
    }

    /// Create an observer watching `target`
    pub fn observe(&mut self, target: NodeId, options: MutationObserverInit, callback: ObserverCallback) -> Result<ObserverId, DomError> {
        let node = self.node(target)?;
        if matches!(node.data, NodeData::ShadowRoot(_)) && !self.shadow_observation {
            return Err(DomError::NotSupported("mutation observer on a shadow root"));
        }
        let id = self.observers.create(callback);
        self.observers.observe(id, target, options);
        Ok(id)
    }

    pub fn disconnect(&mut self, observer: ObserverId) -> bool {
        self.observers.disconnect(observer)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.count()
    }

    fn queue(&mut self, record: MutationRecord) {
        if self.observers.is_empty() {
            return;
        }
        let ancestors = self.light_ancestors(record.target());
        self.observers.queue(&record, &ancestors);
    }

    /// Hand queued records to their observers (the microtask checkpoint).
    /// Returns the number of records delivered.
    pub fn deliver_mutations(&mut self) -> usize {
        let pending = self.observers.take_pending();
        let mut delivered = 0;
        for (callback, records) in pending {
            delivered += records.len();
            callback(records);
        }
        delivered
    }

    pub fn add_event_listener(&mut self, target: NodeId, kind: EventKind, callback: ListenerCallback) -> ListenerId {
        self.listeners.add(target, kind, callback)
    }

    pub fn remove_event_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.count()
    }

    fn dispatch(&mut self, target: NodeId, kind: EventKind) {
        tracing::trace!("dispatching {:?} to {:?}", kind, target);
        for callback in self.listeners.matching(target, kind) {
            callback(target);
        }
    }
}

/// Iterator over light-DOM children
pub struct Children<'a> {
    tree: &'a DomTree,
    next: NodeId,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next.option()?;
        self.next = self.tree.get(current).map_or(NodeId::NONE, |n| n.next_sibling);
        Some(current)
    }
}
