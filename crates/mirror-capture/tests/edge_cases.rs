//! Edge case tests for mirror-capture
//!
//! Stale records, moves, frame navigation, shadow roots, coalescing and
//! hooks firing outside a session.

use std::rc::Rc;

use mirror_capture::{
    AdoptionTarget, Capture, CaptureConfig, Encoded, Event, ManualClock, MemorySink, Privacy, Source,
    StyleSheetOperation,
};
use mirror_dom::{DomTree, FrameContent, NodeId, ShadowRootMode};

fn started(dom: &mut DomTree) -> (Capture, MemorySink) {
    let sink = MemorySink::new();
    let mut capture = Capture::new(CaptureConfig::default(), Rc::new(ManualClock::new()), sink.clone());
    capture.start().unwrap();
    capture.run_until_idle(dom);
    sink.take();
    (capture, sink)
}

fn body(dom: &mut DomTree) -> NodeId {
    let html = dom.create_element("html");
    let body = dom.create_element("body");
    dom.append_child(dom.root(), html).unwrap();
    dom.append_child(html, body).unwrap();
    body
}

fn mutations(events: &[Encoded]) -> Vec<&Encoded> {
    events.iter().filter(|e| e.event == Event::Mutation).collect()
}

// ============================================================================
// STALE RECORDS
// ============================================================================

#[test]
fn test_added_then_removed_is_skipped() {
    let mut dom = DomTree::new();
    let body = body(&mut dom);
    let (mut capture, sink) = started(&mut dom);

    let temp = dom.create_element("div");
    dom.append_child(body, temp).unwrap();
    dom.remove(temp).unwrap();
    capture.run_until_idle(&mut dom);

    assert!(mutations(&sink.take()).is_empty());
    assert_eq!(capture.registry().unwrap().lookup(temp), None);
}

#[test]
fn test_attribute_on_detached_node_is_skipped() {
    let mut dom = DomTree::new();
    let body = body(&mut dom);
    let div = dom.create_element("div");
    dom.append_child(body, div).unwrap();
    let (mut capture, sink) = started(&mut dom);

    dom.set_attribute(div, "class", "late").unwrap();
    dom.remove(div).unwrap();
    capture.run_until_idle(&mut dom);

    let events = sink.take();
    let batch = mutations(&events)[0];
    assert_eq!(batch.nodes.len(), 1);
    assert_eq!(batch.nodes[0].source, Source::ChildListRemove);
}

#[test]
fn test_reinsert_at_same_place_keeps_id() {
    let mut dom = DomTree::new();
    let body = body(&mut dom);
    let div = dom.create_element("div");
    dom.append_child(body, div).unwrap();
    let (mut capture, sink) = started(&mut dom);
    let id = capture.registry().unwrap().lookup(div).unwrap();

    dom.remove(div).unwrap();
    dom.append_child(body, div).unwrap();
    capture.run_until_idle(&mut dom);

    assert!(mutations(&sink.take()).is_empty());
    assert_eq!(capture.registry().unwrap().lookup(div), Some(id));
}

#[test]
fn test_comments_are_not_mirrored() {
    let mut dom = DomTree::new();
    let body = body(&mut dom);
    let (mut capture, sink) = started(&mut dom);

    let comment = dom.create_comment("note");
    dom.append_child(body, comment).unwrap();
    dom.set_text(comment, "changed").unwrap();
    capture.run_until_idle(&mut dom);

    assert!(mutations(&sink.take()).is_empty());
}

// ============================================================================
// MOVES AND COALESCING
// ============================================================================

#[test]
fn test_move_retires_and_reassigns() {
    let mut dom = DomTree::new();
    let body = body(&mut dom);
    let left = dom.create_element("section");
    let right = dom.create_element("aside");
    let item = dom.create_element("p");
    dom.append_child(body, left).unwrap();
    dom.append_child(body, right).unwrap();
    dom.append_child(left, item).unwrap();
    let (mut capture, sink) = started(&mut dom);
    let old = capture.registry().unwrap().lookup(item).unwrap();

    dom.append_child(right, item).unwrap();
    capture.run_until_idle(&mut dom);

    let events = sink.take();
    let batch = mutations(&events)[0];
    let sources: Vec<(Source, u32)> = batch.nodes.iter().map(|r| (r.source, r.value.id)).collect();
    let new = capture.registry().unwrap().lookup(item).unwrap();
    assert_eq!(sources, vec![(Source::ChildListRemove, old), (Source::ChildListAdd, new)]);
    assert!(new > old);
    let right_id = capture.registry().unwrap().lookup(right).unwrap();
    assert_eq!(capture.registry().unwrap().resolve(new).unwrap().parent, Some(right_id));
}

#[test]
fn test_attribute_changes_coalesce_to_latest() {
    let mut dom = DomTree::new();
    let body = body(&mut dom);
    let (mut capture, sink) = started(&mut dom);

    dom.set_attribute(body, "class", "one").unwrap();
    dom.set_attribute(body, "class", "two").unwrap();
    dom.set_attribute(body, "class", "three").unwrap();
    capture.run_until_idle(&mut dom);

    let events = sink.take();
    let batch = mutations(&events)[0];
    assert_eq!(batch.nodes.len(), 1);
    assert_eq!(batch.nodes[0].value.data.attributes, vec![("class".to_string(), "three".to_string())]);
}

#[test]
fn test_unchanged_value_emits_nothing() {
    let mut dom = DomTree::new();
    let body = body(&mut dom);
    dom.set_attribute(body, "class", "same").unwrap();
    let (mut capture, sink) = started(&mut dom);

    dom.set_attribute(body, "class", "other").unwrap();
    dom.set_attribute(body, "class", "same").unwrap();
    capture.run_until_idle(&mut dom);

    assert!(mutations(&sink.take()).is_empty());
}

#[test]
fn test_masked_text_stays_masked_on_update() {
    let mut dom = DomTree::new();
    let body = body(&mut dom);
    let secret = dom.create_element("div");
    dom.set_attribute(secret, "data-mirror-mask", "").unwrap();
    let text = dom.create_text("1234");
    dom.append_child(body, secret).unwrap();
    dom.append_child(secret, text).unwrap();
    let (mut capture, sink) = started(&mut dom);

    dom.set_text(text, "5678 90").unwrap();
    capture.run_until_idle(&mut dom);

    let events = sink.take();
    let record = &mutations(&events)[0].nodes[0];
    assert_eq!(record.value.data.value.as_deref(), Some("•••• ••"));
    assert_eq!(record.value.metadata.privacy, Privacy::Mask);
}

// ============================================================================
// SHADOW ROOTS AND FRAMES
// ============================================================================

#[test]
fn test_shadow_root_is_mirrored_and_observed() {
    let mut dom = DomTree::new();
    let body = body(&mut dom);
    let host = dom.create_element("x-card");
    let light = dom.create_text("light");
    dom.append_child(body, host).unwrap();
    dom.append_child(host, light).unwrap();
    let shadow = dom.attach_shadow(host, ShadowRootMode::Open).unwrap();
    let inner = dom.create_element("p");
    dom.append_child(shadow, inner).unwrap();
    let (mut capture, sink) = started(&mut dom);

    let registry = capture.registry().unwrap();
    let host_id = registry.lookup(host).unwrap();
    let shadow_id = registry.lookup(shadow).unwrap();
    assert_eq!(registry.children(Some(host_id))[0], shadow_id);
    assert_eq!(registry.resolve(shadow_id).unwrap().data.tag, "*S");
    assert_eq!(dom.observer_count(), 2);

    dom.set_attribute(inner, "class", "x").unwrap();
    capture.run_until_idle(&mut dom);
    let events = sink.take();
    assert_eq!(mutations(&events)[0].nodes[0].source, Source::Attributes);
}

#[test]
fn test_shadow_observer_unavailable_is_not_fatal() {
    let mut dom = DomTree::new();
    let body = body(&mut dom);
    let host = dom.create_element("div");
    dom.append_child(body, host).unwrap();
    let shadow = dom.attach_shadow(host, ShadowRootMode::Closed).unwrap();
    let inner = dom.create_element("span");
    dom.append_child(shadow, inner).unwrap();
    dom.set_shadow_observation_supported(false);
    let (mut capture, sink) = started(&mut dom);

    assert!(capture.is_active());
    assert!(capture.registry().unwrap().lookup(inner).is_some());
    assert_eq!(dom.observer_count(), 1);

    // Changes inside the shadow tree go unseen, the rest still flows
    dom.set_attribute(inner, "class", "x").unwrap();
    dom.set_attribute(host, "class", "y").unwrap();
    capture.run_until_idle(&mut dom);
    let events = sink.take();
    let batch = mutations(&events)[0];
    assert_eq!(batch.nodes.len(), 1);
    assert_eq!(Some(batch.nodes[0].value.id), capture.registry().unwrap().lookup(host));
}

#[test]
fn test_frame_navigation_retraverses() {
    let mut dom = DomTree::new();
    let body = body(&mut dom);
    let frame = dom.create_element("iframe");
    dom.append_child(body, frame).unwrap();
    let first = dom.create_document();
    let old_body = dom.create_element("body");
    dom.append_child(first, old_body).unwrap();
    dom.set_frame_content(frame, FrameContent::SameOrigin(first)).unwrap();
    let (mut capture, sink) = started(&mut dom);

    let frame_id = capture.registry().unwrap().lookup(frame).unwrap();
    let first_id = capture.registry().unwrap().lookup(first).unwrap();
    assert_eq!(capture.registry().unwrap().resolve(first_id).unwrap().data.tag, "*D");

    let second = dom.create_document();
    let new_body = dom.create_element("body");
    dom.append_child(second, new_body).unwrap();
    dom.navigate_frame(frame, FrameContent::SameOrigin(second)).unwrap();
    assert_eq!(capture.pending_batches(), 1);
    capture.run_until_idle(&mut dom);

    let events = sink.take();
    let batch = mutations(&events)[0];
    let removed: Vec<u32> = batch.nodes.iter()
        .filter(|r| r.source == Source::ChildListRemove)
        .map(|r| r.value.id)
        .collect();
    let added: Vec<&str> = batch.nodes.iter()
        .filter(|r| r.source == Source::ChildListAdd)
        .map(|r| r.value.data.tag.as_str())
        .collect();
    assert_eq!(removed.len(), 2);
    assert_eq!(removed[0], first_id);
    assert_eq!(added, vec!["*D", "body"]);

    let registry = capture.registry().unwrap();
    let second_id = registry.lookup(second).unwrap();
    assert_eq!(registry.children(Some(frame_id)), &[second_id]);
    assert!(registry.lookup(old_body).is_none());

    // The new document is observed too
    dom.set_attribute(new_body, "class", "ready").unwrap();
    capture.run_until_idle(&mut dom);
    assert_eq!(mutations(&sink.take()).len(), 1);
}

#[test]
fn test_moving_shadow_host_keeps_one_observer() {
    let mut dom = DomTree::new();
    let body = body(&mut dom);
    let left = dom.create_element("div");
    let right = dom.create_element("div");
    dom.append_child(body, left).unwrap();
    dom.append_child(body, right).unwrap();
    let host = dom.create_element("x-card");
    dom.append_child(left, host).unwrap();
    let shadow = dom.attach_shadow(host, ShadowRootMode::Open).unwrap();
    let inner = dom.create_element("p");
    dom.append_child(shadow, inner).unwrap();
    let (mut capture, sink) = started(&mut dom);
    assert_eq!(dom.observer_count(), 2);

    for round in 0..6 {
        let target = if round % 2 == 0 { right } else { left };
        dom.append_child(target, host).unwrap();
        capture.run_until_idle(&mut dom);
        assert_eq!(dom.observer_count(), 2);
    }
    sink.take();

    // One delivery, one batch
    dom.set_attribute(inner, "class", "x").unwrap();
    capture.run_until_idle(&mut dom);
    let events = sink.take();
    let batches = mutations(&events);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].nodes.len(), 1);
}

#[test]
fn test_frame_navigations_keep_one_observer() {
    let mut dom = DomTree::new();
    let body = body(&mut dom);
    let frame = dom.create_element("iframe");
    dom.append_child(body, frame).unwrap();
    let first = dom.create_document();
    dom.set_frame_content(frame, FrameContent::SameOrigin(first)).unwrap();
    let (mut capture, sink) = started(&mut dom);
    assert_eq!(dom.observer_count(), 2);

    let mut latest = NodeId::ROOT;
    for _ in 0..4 {
        let doc = dom.create_document();
        latest = dom.create_element("body");
        dom.append_child(doc, latest).unwrap();
        dom.navigate_frame(frame, FrameContent::SameOrigin(doc)).unwrap();
        capture.run_until_idle(&mut dom);
        assert_eq!(dom.observer_count(), 2);
    }
    sink.take();

    dom.set_attribute(latest, "class", "ready").unwrap();
    capture.run_until_idle(&mut dom);
    assert_eq!(mutations(&sink.take()).len(), 1);
}

#[test]
fn test_stop_removes_frame_listeners() {
    let mut dom = DomTree::new();
    let body = body(&mut dom);
    let frame = dom.create_element("iframe");
    dom.append_child(body, frame).unwrap();
    let (mut capture, _sink) = started(&mut dom);
    assert_eq!(dom.listener_count(), 1);

    capture.stop(&mut dom);
    assert_eq!(dom.listener_count(), 0);
    let doc = dom.create_document();
    dom.navigate_frame(frame, FrameContent::SameOrigin(doc)).unwrap();
    assert_eq!(capture.pending_batches(), 0);
}

#[test]
fn test_cross_origin_frame_has_no_document() {
    let mut dom = DomTree::new();
    let body = body(&mut dom);
    let frame = dom.create_element("iframe");
    dom.append_child(body, frame).unwrap();
    dom.set_frame_content(frame, FrameContent::CrossOrigin).unwrap();
    let (capture, _sink) = started(&mut dom);

    let registry = capture.registry().unwrap();
    let frame_id = registry.lookup(frame).unwrap();
    assert!(registry.children(Some(frame_id)).is_empty());
}

#[test]
fn test_shadow_root_adoption_uses_node_id() {
    let mut dom = DomTree::new();
    let body = body(&mut dom);
    let host = dom.create_element("div");
    dom.append_child(body, host).unwrap();
    let shadow = dom.attach_shadow(host, ShadowRootMode::Open).unwrap();
    let (mut capture, sink) = started(&mut dom);
    let shadow_id = capture.registry().unwrap().lookup(shadow).unwrap();

    let sheet = dom.create_style_sheet();
    dom.set_adopted_style_sheets(shadow, vec![sheet]).unwrap();
    capture.compute(&mut dom);

    let events = sink.take();
    let adoption = events.iter().flat_map(|e| e.adoptions.iter()).next().unwrap();
    assert_eq!(adoption.document, AdoptionTarget::Node(shadow_id));
    assert_eq!(adoption.document.wire_id(), i64::from(shadow_id));
}

// ============================================================================
// HOOKS OUTSIDE A SESSION
// ============================================================================

#[test]
fn test_hooks_are_inert_after_stop() {
    let mut dom = DomTree::new();
    let body = body(&mut dom);
    let style = dom.create_style("a{}");
    dom.append_child(body, style).unwrap();
    let sheet = dom.create_style_sheet();
    let (mut capture, sink) = started(&mut dom);
    capture.stop(&mut dom);

    let owned = dom.element_sheet(style).unwrap();
    dom.insert_rule(owned, "b{}", 0).unwrap();
    dom.replace_sync(sheet, "c{}").unwrap();
    dom.set_attribute(body, "class", "x").unwrap();
    assert_eq!(dom.deliver_mutations(), 0);
    assert!(sink.is_empty());
    assert!(dom.sheet(sheet).unwrap().annotation.is_none());
}

#[test]
fn test_failed_replace_emits_nothing() {
    let mut dom = DomTree::new();
    let body = body(&mut dom);
    let style = dom.create_style("a{}");
    dom.append_child(body, style).unwrap();
    let (_capture, sink) = started(&mut dom);

    let owned = dom.element_sheet(style).unwrap();
    assert!(dom.replace_sync(owned, "b{}").is_err());
    assert!(dom.insert_rule(owned, "c{}", 9).is_err());
    assert!(sink.is_empty());
}

#[test]
fn test_sheet_id_is_stable_and_reannounced() {
    let mut dom = DomTree::new();
    body(&mut dom);
    let sheet = dom.create_style_sheet();
    let (mut capture, sink) = started(&mut dom);

    dom.replace(sheet, "a{}").unwrap();
    dom.replace(sheet, "b{}").unwrap();
    let ops: Vec<(String, StyleSheetOperation)> = sink.take().iter()
        .flat_map(|e| e.sheet_updates.iter())
        .map(|u| (u.data.id.clone(), u.data.operation))
        .collect();
    assert_eq!(ops, vec![
        ("s1".to_string(), StyleSheetOperation::Create),
        ("s1".to_string(), StyleSheetOperation::Replace),
        ("s1".to_string(), StyleSheetOperation::Replace),
    ]);

    capture.stop(&mut dom);
    capture.start().unwrap();
    capture.run_until_idle(&mut dom);
    sink.take();
    dom.replace_sync(sheet, "c{}").unwrap();
    let ops: Vec<StyleSheetOperation> = sink.take().iter()
        .flat_map(|e| e.sheet_updates.iter())
        .map(|u| u.data.operation)
        .collect();
    assert_eq!(ops, vec![StyleSheetOperation::Create, StyleSheetOperation::ReplaceSync]);
}

#[test]
fn test_interception_is_shared_between_engines() {
    let mut dom = DomTree::new();
    let body = body(&mut dom);
    let style = dom.create_style("a{}");
    dom.append_child(body, style).unwrap();
    let (mut first, first_sink) = started(&mut dom);
    let (mut second, second_sink) = started(&mut dom);

    let sheet = dom.create_style_sheet();
    dom.replace_sync(sheet, "b{}").unwrap();
    assert_eq!(first_sink.take().len(), 2);
    assert_eq!(second_sink.take().len(), 2);

    // The engine still running keeps the wrappers
    first.stop(&mut dom);
    assert!(second.is_active());
    assert!(dom.prototype().insert_rule.is_wrapped());
    assert!(dom.prototype().replace_sync.is_wrapped());

    let owned = dom.element_sheet(style).unwrap();
    dom.insert_rule(owned, "c{}", 1).unwrap();
    second.run_until_idle(&mut dom);
    let events = second_sink.take();
    let batches = mutations(&events);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].nodes[0].value.data.value.as_deref(), Some("a{}c{}"));
    assert!(first_sink.is_empty());

    second.stop(&mut dom);
    assert!(!dom.prototype().insert_rule.is_wrapped());
    assert!(!dom.prototype().replace_sync.is_wrapped());
}

#[test]
fn test_restart_while_another_engine_runs() {
    let mut dom = DomTree::new();
    body(&mut dom);
    let (mut first, first_sink) = started(&mut dom);
    let (mut second, second_sink) = started(&mut dom);

    first.stop(&mut dom);
    first.start().unwrap();
    first.run_until_idle(&mut dom);
    first_sink.take();

    let sheet = dom.create_style_sheet();
    dom.replace(sheet, "a{}").unwrap();
    assert_eq!(first_sink.take().len(), 2);
    assert_eq!(second_sink.take().len(), 2);

    second.stop(&mut dom);
    first.stop(&mut dom);
    assert!(!dom.prototype().replace.is_wrapped());
}
