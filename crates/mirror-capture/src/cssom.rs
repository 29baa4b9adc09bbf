//! CSSOM Shadow Tracker
//!
//! Style-sheet APIs that bypass mutation observers are wrapped once per
//! tree on its [`StyleSheetPrototype`](mirror_dom::StyleSheetPrototype)
//! and fanned out to every active engine subscribed to it:
//!
//! - `insertRule` / `deleteRule` feed a synthetic `CharacterData` record
//!   for the owner node into the mutation queue.
//! - `replace` / `replaceSync` emit `Create` (first sighting) and the
//!   replacement itself as style-sheet updates.
//!
//! Adopted style-sheet lists have no notification at all and are diffed
//! by [`compute`].

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use mirror_dom::{DeleteRuleFn, DomError, DomTree, InsertRuleFn, NodeId, ReplaceFn, SheetId, SheetMethods};

use crate::encode::{AdoptionTarget, StyleSheetOperation};
use crate::session::{Cx, Session, Shared};

struct Subscriber {
    shared: Weak<Shared>,
    rules: bool,
    replace: bool,
}

/// Interception shared by every engine running against one tree
///
/// Attached to the prototype. Each method is wrapped while at least one
/// subscriber wants it and restored when the last one leaves.
#[derive(Default)]
pub(crate) struct Interception {
    subscribers: RefCell<Vec<Subscriber>>,
    insert_rule: Cell<bool>,
    delete_rule: Cell<bool>,
    replace: Cell<bool>,
    replace_sync: Cell<bool>,
}

impl Interception {
    /// Active subscribers interested in a call
    fn active(&self, wants: fn(&Subscriber) -> bool) -> Vec<Rc<Shared>> {
        self.subscribers.borrow().iter()
            .filter(|s| wants(s))
            .filter_map(|s| s.shared.upgrade())
            .filter(|shared| shared.is_active())
            .collect()
    }

    fn subscribed(&self) -> usize {
        self.subscribers.borrow().len()
    }
}

/// Subscribe this session to the tree's interception layer, creating and
/// wrapping it on first use
pub(crate) fn install(cx: &mut Cx<'_>) {
    if cx.session.subscribed || !(cx.config.intercept_rules || cx.config.intercept_replace) {
        return;
    }
    let layer = match cx.dom.prototype().attachment::<Interception>() {
        Some(layer) => layer,
        None => {
            let layer = Rc::new(Interception::default());
            cx.dom.prototype_mut().attach(layer.clone() as Rc<dyn std::any::Any>);
            layer
        }
    };
    layer.subscribers.borrow_mut().push(Subscriber {
        shared: Rc::downgrade(&cx.session.shared),
        rules: cx.config.intercept_rules,
        replace: cx.config.intercept_replace,
    });
    cx.session.subscribed = true;
    reconcile(cx.dom, &layer);
    tracing::debug!("style sheet interception joined ({} subscribers)", layer.subscribed());
}

/// Leave the interception layer. The last subscriber out restores the
/// originals and detaches the layer.
pub(crate) fn uninstall(dom: &mut DomTree, session: &mut Session) {
    if !std::mem::take(&mut session.subscribed) {
        return;
    }
    let Some(layer) = dom.prototype().attachment::<Interception>() else {
        return;
    };
    let own = Rc::downgrade(&session.shared);
    layer.subscribers.borrow_mut().retain(|s| !Weak::ptr_eq(&s.shared, &own));
    reconcile(dom, &layer);
    if layer.subscribed() == 0 {
        dom.prototype_mut().detach();
        tracing::debug!("style sheet interception restored");
    }
}

/// Wrap or restore each method to match what live subscribers want
fn reconcile(dom: &mut DomTree, layer: &Rc<Interception>) {
    layer.subscribers.borrow_mut().retain(|s| s.shared.strong_count() > 0);
    let (rules, replace) = {
        let subscribers = layer.subscribers.borrow();
        (subscribers.iter().any(|s| s.rules), subscribers.iter().any(|s| s.replace))
    };
    let weak = Rc::downgrade(layer);
    let prototype = dom.prototype_mut();
    claim(&mut prototype.insert_rule, &layer.insert_rule, rules, insert_wrapper(Weak::clone(&weak)));
    claim(&mut prototype.delete_rule, &layer.delete_rule, rules, delete_wrapper(Weak::clone(&weak)));
    claim(&mut prototype.replace, &layer.replace, replace, replace_wrapper(Weak::clone(&weak), StyleSheetOperation::Replace));
    claim(&mut prototype.replace_sync, &layer.replace_sync, replace, replace_wrapper(weak, StyleSheetOperation::ReplaceSync));
}

fn claim<F: ?Sized>(method: &mut SheetMethods<F>, owned: &Cell<bool>, wanted: bool, wrap: impl FnOnce(Rc<F>) -> Rc<F>) {
    if wanted && !owned.get() {
        if method.wrap(wrap) {
            owned.set(true);
        } else {
            tracing::warn!("style sheet method already wrapped by another owner");
        }
    } else if !wanted && owned.get() {
        method.restore();
        owned.set(false);
    }
}

fn subscribers(layer: &Weak<Interception>, wants: fn(&Subscriber) -> bool) -> Vec<Rc<Shared>> {
    layer.upgrade().map(|layer| layer.active(wants)).unwrap_or_default()
}

fn insert_wrapper(layer: Weak<Interception>) -> impl FnOnce(Rc<InsertRuleFn>) -> Rc<InsertRuleFn> {
    move |original| {
        let wrapped: Rc<InsertRuleFn> = Rc::new(move |dom: &mut DomTree, sheet: SheetId, rule: &str, index: usize| -> Result<usize, DomError> {
            let result = original(dom, sheet, rule, index)?;
            for shared in subscribers(&layer, |s| s.rules) {
                shared.rule_changed(dom, sheet);
            }
            Ok(result)
        });
        wrapped
    }
}

fn delete_wrapper(layer: Weak<Interception>) -> impl FnOnce(Rc<DeleteRuleFn>) -> Rc<DeleteRuleFn> {
    move |original| {
        let wrapped: Rc<DeleteRuleFn> = Rc::new(move |dom: &mut DomTree, sheet: SheetId, index: usize| -> Result<(), DomError> {
            original(dom, sheet, index)?;
            for shared in subscribers(&layer, |s| s.rules) {
                shared.rule_changed(dom, sheet);
            }
            Ok(())
        });
        wrapped
    }
}

fn replace_wrapper(layer: Weak<Interception>, operation: StyleSheetOperation) -> impl FnOnce(Rc<ReplaceFn>) -> Rc<ReplaceFn> {
    move |original| {
        let wrapped: Rc<ReplaceFn> = Rc::new(move |dom: &mut DomTree, sheet: SheetId, text: &str| -> Result<(), DomError> {
            original(dom, sheet, text)?;
            for shared in subscribers(&layer, |s| s.replace) {
                shared.sheet_replaced(dom, sheet, operation, text);
            }
            Ok(())
        });
        wrapped
    }
}

/// Adoption diff over the root document and every tracked shadow root
/// or frame document still in the mirror
pub(crate) fn compute(cx: &mut Cx<'_>) {
    if !cx.config.track_adopted_styles {
        return;
    }
    let shared = Rc::clone(&cx.session.shared);
    shared.check_adoption(cx.dom, AdoptionTarget::Root, NodeId::ROOT);

    let documents: Vec<(u32, NodeId)> = cx.session.adoption_docs.iter()
        .filter_map(|doc| cx.session.registry.lookup(*doc).map(|id| (id, *doc)))
        .collect();
    for (id, document) in documents {
        shared.check_adoption(cx.dom, AdoptionTarget::Node(id), document);
    }
}
