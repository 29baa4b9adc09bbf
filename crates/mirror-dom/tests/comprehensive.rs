//! Comprehensive tests for mirror-dom
//!
//! Tree structure, observers, frames and the style-sheet prototype as an
//! embedder sees them.

use std::cell::RefCell;
use std::rc::Rc;

use mirror_dom::{
    DomError, DomTree, EventKind, FrameContent, MutationObserverInit, MutationRecord, NodeId,
    ObserverCallback, ReplaceFn, SheetId, ShadowRootMode, split_rules,
};

fn recorder() -> (ObserverCallback, Rc<RefCell<Vec<MutationRecord>>>) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let callback: ObserverCallback = Rc::new(move |records: Vec<MutationRecord>| sink.borrow_mut().extend(records));
    (callback, seen)
}

// ============================================================================
// TREE STRUCTURE
// ============================================================================

#[test]
fn test_insert_before_and_remove() {
    let mut dom = DomTree::new();
    let list = dom.create_element("ul");
    dom.append_child(dom.root(), list).unwrap();
    let items: Vec<NodeId> = (0..4).map(|_| dom.create_element("li")).collect();
    for item in &items {
        dom.append_child(list, *item).unwrap();
    }

    dom.remove_child(list, items[1]).unwrap();
    dom.insert_before(list, items[1], Some(items[0])).unwrap();
    let order: Vec<NodeId> = dom.children(list).collect();
    assert_eq!(order, vec![items[1], items[0], items[2], items[3]]);
    assert_eq!(dom.next_sibling(items[3]), None);
    assert_eq!(dom.previous_sibling(items[1]), None);

    assert!(matches!(dom.remove_child(list, dom.root()), Err(DomError::NotFound(_))));
    let orphan = dom.create_element("p");
    assert!(!dom.is_connected(orphan));
}

#[test]
fn test_text_nodes_cannot_have_children() {
    let mut dom = DomTree::new();
    let text = dom.create_text("x");
    let span = dom.create_element("span");
    assert!(matches!(dom.append_child(text, span), Err(DomError::HierarchyRequest(_))));
    let doc = dom.create_document();
    assert!(matches!(dom.append_child(span, doc), Err(DomError::HierarchyRequest(_))));
}

#[test]
fn test_attributes_keep_insertion_order() {
    let mut dom = DomTree::new();
    let input = dom.create_element("INPUT");
    dom.set_attribute(input, "type", "text").unwrap();
    dom.set_attribute(input, "name", "q").unwrap();
    dom.set_attribute(input, "type", "search").unwrap();
    let element = dom.get(input).unwrap().as_element().unwrap();
    assert_eq!(element.tag, "input");
    assert_eq!(element.attrs, vec![
        ("type".to_string(), "search".to_string()),
        ("name".to_string(), "q".to_string()),
    ]);
    dom.remove_attribute(input, "type").unwrap();
    assert_eq!(dom.attribute(input, "type"), None);
}

// ============================================================================
// OBSERVERS
// ============================================================================

#[test]
fn test_observer_records_old_values() {
    let mut dom = DomTree::new();
    let div = dom.create_element("div");
    let text = dom.create_text("a");
    dom.append_child(dom.root(), div).unwrap();
    dom.append_child(div, text).unwrap();
    dom.set_attribute(div, "class", "one").unwrap();

    let (callback, seen) = recorder();
    dom.observe(dom.root(), MutationObserverInit::all(), callback).unwrap();
    dom.set_attribute(div, "class", "two").unwrap();
    dom.set_text(text, "b").unwrap();
    assert_eq!(dom.deliver_mutations(), 2);

    let seen = seen.borrow();
    assert_eq!(seen[0], MutationRecord::Attributes {
        target: div,
        name: "class".into(),
        old_value: Some("one".into()),
    });
    assert_eq!(seen[1], MutationRecord::CharacterData { target: text, old_value: Some("a".into()) });
}

#[test]
fn test_subtree_does_not_cross_shadow_boundary() {
    let mut dom = DomTree::new();
    let host = dom.create_element("div");
    dom.append_child(dom.root(), host).unwrap();
    let shadow = dom.attach_shadow(host, ShadowRootMode::Open).unwrap();

    let (root_callback, root_seen) = recorder();
    let (shadow_callback, shadow_seen) = recorder();
    dom.observe(dom.root(), MutationObserverInit::all(), root_callback).unwrap();
    dom.observe(shadow, MutationObserverInit::all(), shadow_callback).unwrap();

    let inner = dom.create_element("p");
    dom.append_child(shadow, inner).unwrap();
    dom.deliver_mutations();
    assert!(root_seen.borrow().is_empty());
    assert_eq!(shadow_seen.borrow().len(), 1);
}

#[test]
fn test_disconnected_observer_gets_nothing() {
    let mut dom = DomTree::new();
    let (callback, seen) = recorder();
    let observer = dom.observe(dom.root(), MutationObserverInit::all(), callback).unwrap();
    let div = dom.create_element("div");
    dom.append_child(dom.root(), div).unwrap();
    assert!(dom.disconnect(observer));
    assert_eq!(dom.deliver_mutations(), 0);
    assert!(seen.borrow().is_empty());
    assert_eq!(dom.observer_count(), 0);
}

// ============================================================================
// FRAMES
// ============================================================================

#[test]
fn test_frame_content_rules() {
    let mut dom = DomTree::new();
    let div = dom.create_element("div");
    let frame = dom.create_element("iframe");
    let doc = dom.create_document();
    assert!(dom.set_frame_content(div, FrameContent::CrossOrigin).is_err());
    assert!(dom.set_frame_content(frame, FrameContent::SameOrigin(dom.root())).is_err());
    dom.set_frame_content(frame, FrameContent::SameOrigin(doc)).unwrap();
    assert_eq!(dom.frame_content(frame), Some(FrameContent::SameOrigin(doc)));
}

#[test]
fn test_removed_listener_is_not_called() {
    let mut dom = DomTree::new();
    let frame = dom.create_element("iframe");
    let calls = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&calls);
    let listener = dom.add_event_listener(frame, EventKind::Load, Rc::new(move |_: NodeId| *counter.borrow_mut() += 1));

    dom.navigate_frame(frame, FrameContent::CrossOrigin).unwrap();
    assert!(dom.remove_event_listener(listener));
    dom.navigate_frame(frame, FrameContent::CrossOrigin).unwrap();
    assert_eq!(*calls.borrow(), 1);
    assert_eq!(dom.listener_count(), 0);
}

// ============================================================================
// CSSOM
// ============================================================================

#[test]
fn test_rule_splitting_ignores_blank_text() {
    assert!(split_rules("  \n ").is_empty());
    assert_eq!(split_rules("a{} b{}").len(), 2);
}

#[test]
fn test_wrapped_replace_sees_result() {
    let mut dom = DomTree::new();
    let sheet = dom.create_style_sheet();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    let wrapped = dom.prototype_mut().replace_sync.wrap(move |original| {
        let wrapper: Rc<ReplaceFn> = Rc::new(move |dom: &mut DomTree, sheet: SheetId, text: &str| {
            let result = original(dom, sheet, text);
            log.borrow_mut().push(result.is_ok());
            result
        });
        wrapper
    });
    assert!(wrapped);

    dom.replace_sync(sheet, "a{}").unwrap();
    let style = dom.create_style("b{}");
    let owned = dom.element_sheet(style).unwrap();
    assert!(dom.replace_sync(owned, "c{}").is_err());
    assert_eq!(*seen.borrow(), vec![true, false]);

    // Replace is a separate method and stays native
    dom.replace(sheet, "d{}").unwrap();
    assert_eq!(seen.borrow().len(), 2);
    assert_eq!(dom.sheet(sheet).unwrap().css_text(), "d{}");
}

#[test]
fn test_style_sheet_follows_child_text() {
    let mut dom = DomTree::new();
    let style = dom.create_style("a{}");
    let sheet = dom.element_sheet(style).unwrap();
    let extra = dom.create_text("b{}");
    dom.append_child(style, extra).unwrap();
    assert_eq!(dom.sheet(sheet).unwrap().rules().len(), 2);
    dom.remove(extra).unwrap();
    assert_eq!(dom.sheet(sheet).unwrap().css_text(), "a{}");
    assert_eq!(dom.sheet(sheet).unwrap().owner(), Some(style));
}
