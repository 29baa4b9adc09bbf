//! Mutation observers
//!
//! Native change notifications. Records queue on every interested
//! observer and are handed to the observer callbacks when the host calls
//! [`DomTree::deliver_mutations`](crate::DomTree::deliver_mutations).
//! Subtree observation follows light-DOM parents only, so shadow roots
//! and frame documents need observers of their own.

use std::rc::Rc;

use crate::NodeId;

/// Callback receiving one delivery worth of records
pub type ObserverCallback = Rc<dyn Fn(Vec<MutationRecord>)>;

/// Observer handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u32);

/// Mutation observer options
#[derive(Debug, Clone, Default)]
pub struct MutationObserverInit {
    pub child_list: bool,
    pub attributes: bool,
    pub character_data: bool,
    pub subtree: bool,
    pub attribute_filter: Option<Vec<String>>,
}

impl MutationObserverInit {
    /// Everything, including descendants
    pub fn all() -> Self {
        Self {
            child_list: true,
            attributes: true,
            character_data: true,
            subtree: true,
            attribute_filter: None,
        }
    }
}

/// Mutation record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRecord {
    Attributes {
        target: NodeId,
        name: String,
        old_value: Option<String>,
    },
    CharacterData {
        target: NodeId,
        old_value: Option<String>,
    },
    ChildList {
        target: NodeId,
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
        previous_sibling: Option<NodeId>,
        next_sibling: Option<NodeId>,
    },
}

impl MutationRecord {
    /// Node the record was queued against
    pub fn target(&self) -> NodeId {
        match self {
            Self::Attributes { target, .. }
            | Self::CharacterData { target, .. }
            | Self::ChildList { target, .. } => *target,
        }
    }

    fn wanted_by(&self, options: &MutationObserverInit) -> bool {
        match self {
            Self::Attributes { name, .. } => {
                options.attributes
                    && options.attribute_filter.as_ref()
                        .map_or(true, |filter| filter.iter().any(|f| f == name))
            }
            Self::CharacterData { .. } => options.character_data,
            Self::ChildList { .. } => options.child_list,
        }
    }
}

struct MutationObserver {
    id: ObserverId,
    observed: Vec<(NodeId, MutationObserverInit)>,
    records: Vec<MutationRecord>,
    callback: ObserverCallback,
}

/// Registry of live observers, owned by the tree
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    observers: Vec<MutationObserver>,
    next_id: u32,
}

impl ObserverRegistry {
    pub(crate) fn create(&mut self, callback: ObserverCallback) -> ObserverId {
        self.next_id += 1;
        let id = ObserverId(self.next_id);
        self.observers.push(MutationObserver {
            id,
            observed: Vec::new(),
            records: Vec::new(),
            callback,
        });
        id
    }

    pub(crate) fn observe(&mut self, id: ObserverId, target: NodeId, options: MutationObserverInit) -> bool {
        let Some(observer) = self.observers.iter_mut().find(|o| o.id == id) else {
            return false;
        };
        match observer.observed.iter_mut().find(|(node, _)| *node == target) {
            Some(entry) => entry.1 = options,
            None => observer.observed.push((target, options)),
        }
        true
    }

    /// Drop the observer and any records it had not been handed yet
    pub(crate) fn disconnect(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|o| o.id != id);
        before != self.observers.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub(crate) fn count(&self) -> usize {
        self.observers.len()
    }

    /// Queue a record. `ancestors` is the target followed by its light-DOM
    /// ancestors, nearest first.
    pub(crate) fn queue(&mut self, record: &MutationRecord, ancestors: &[NodeId]) {
        for observer in &mut self.observers {
            let interested = observer.observed.iter().any(|(root, options)| {
                let in_scope = match ancestors.iter().position(|a| a == root) {
                    Some(0) => true,
                    Some(_) => options.subtree,
                    None => false,
                };
                in_scope && record.wanted_by(options)
            });
            if interested {
                observer.records.push(record.clone());
            }
        }
    }

    pub(crate) fn take_pending(&mut self) -> Vec<(ObserverCallback, Vec<MutationRecord>)> {
        self.observers.iter_mut()
            .filter(|o| !o.records.is_empty())
            .map(|o| (Rc::clone(&o.callback), std::mem::take(&mut o.records)))
            .collect()
    }
}
