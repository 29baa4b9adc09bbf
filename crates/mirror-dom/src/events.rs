//! DOM Events
//!
//! Listener registry for the few events the host dispatches itself.

use std::rc::Rc;

use crate::NodeId;

/// Event types the host dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A frame finished loading a new document
    Load,
}

/// Listener callback, invoked with the event target
pub type ListenerCallback = Rc<dyn Fn(NodeId)>;

/// Listener handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u32);

#[derive(Default)]
pub(crate) struct Listeners {
    entries: Vec<(ListenerId, NodeId, EventKind, ListenerCallback)>,
    next_id: u32,
}

impl Listeners {
    pub(crate) fn add(&mut self, target: NodeId, kind: EventKind, callback: ListenerCallback) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.entries.push((id, target, kind, callback));
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, ..)| *entry != id);
        before != self.entries.len()
    }

    pub(crate) fn count(&self) -> usize {
        self.entries.len()
    }

    /// Callbacks to run for `kind` on `target`, in registration order
    pub(crate) fn matching(&self, target: NodeId, kind: EventKind) -> Vec<ListenerCallback> {
        self.entries.iter()
            .filter(|(_, t, k, _)| *t == target && *k == kind)
            .map(|(.., callback)| Rc::clone(callback))
            .collect()
    }
}
