//! Identity Registry
//!
//! Arena of mirrored node entries addressed by integer id. Ids start at 1,
//! follow assignment order and are never reused: a retired slot stays in
//! the arena as a tombstone. The live node is kept only as a lookup key.

use std::collections::HashMap;

use mirror_dom::NodeId;
use serde::Serialize;

use crate::privacy::Privacy;

/// Mirrored node data, privacy already applied
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeInfo {
    /// Lowercase tag, or `*T`, `*S`, `*D`, `!doctype`
    pub tag: String,
    /// Attributes in DOM order
    pub attributes: Vec<(String, String)>,
    /// Text value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeMeta {
    pub active: bool,
    pub privacy: Privacy,
    pub size: Option<[u32; 2]>,
}

/// One entry of the mirror
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeValue {
    pub id: u32,
    pub parent: Option<u32>,
    pub previous: Option<u32>,
    pub children: Vec<u32>,
    pub data: NodeInfo,
    pub selector: Option<String>,
    pub region: Option<u32>,
    pub metadata: NodeMeta,
}

/// Everything read from the live node when it is (re)described
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub data: NodeInfo,
    pub selector: Option<String>,
    pub region: Option<u32>,
    pub privacy: Privacy,
    pub size: Option<[u32; 2]>,
}

#[derive(Debug)]
struct Slot {
    value: NodeValue,
    node: NodeId,
}

/// Identity registry
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    /// Slot `i` holds id `i + 1`
    slots: Vec<Slot>,
    /// Active entries only
    index: HashMap<NodeId, u32>,
    /// Entries mirrored directly under the root document
    top: Vec<u32>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next id to `node`, linked under `parent` (the top level
    /// when `None`) right after `previous`. An inactive or unknown parent
    /// leaves the entry detached.
    pub fn assign(&mut self, node: NodeId, parent: Option<u32>, previous: Option<u32>, snapshot: Snapshot) -> u32 {
        let id = self.slots.len() as u32 + 1;
        let attached = parent.is_none_or(|p| self.resolve(p).is_some());

        let (parent, previous) = if attached {
            let siblings = self.siblings_mut(parent);
            let at = match previous.and_then(|p| siblings.iter().position(|s| *s == p)) {
                Some(pos) => pos + 1,
                None if previous.is_some() => siblings.len(),
                None => 0,
            };
            let previous = at.checked_sub(1).map(|i| siblings[i]);
            let next = siblings.get(at).copied();
            siblings.insert(at, id);
            if let Some(next) = next {
                self.slots[next as usize - 1].value.previous = Some(id);
            }
            (parent, previous)
        } else {
            (None, None)
        };

        self.slots.push(Slot {
            value: NodeValue {
                id,
                parent,
                previous,
                children: Vec::new(),
                data: snapshot.data,
                selector: snapshot.selector,
                region: snapshot.region,
                metadata: NodeMeta { active: true, privacy: snapshot.privacy, size: snapshot.size },
            },
            node,
        });
        self.index.insert(node, id);
        id
    }

    /// Rewrite an active entry in place. Returns whether anything changed.
    pub fn update(&mut self, id: u32, snapshot: Snapshot) -> bool {
        let Some(value) = self.value_mut(id) else {
            return false;
        };
        let changed = value.data != snapshot.data
            || value.selector != snapshot.selector
            || value.region != snapshot.region
            || value.metadata.privacy != snapshot.privacy
            || value.metadata.size != snapshot.size;
        if changed {
            value.data = snapshot.data;
            value.selector = snapshot.selector;
            value.region = snapshot.region;
            value.metadata.privacy = snapshot.privacy;
            value.metadata.size = snapshot.size;
        }
        changed
    }

    /// Retire an entry and its whole subtree. Returns the retired entries,
    /// root first then descendants depth-first. Retiring twice is a no-op.
    pub fn retire(&mut self, id: u32) -> Vec<NodeValue> {
        let Some(root) = self.resolve(id) else {
            return Vec::new();
        };
        let (parent, previous) = (root.parent, root.previous);

        let siblings = self.siblings_mut(parent);
        if let Some(pos) = siblings.iter().position(|s| *s == id) {
            siblings.remove(pos);
            if let Some(&next) = siblings.get(pos) {
                self.slots[next as usize - 1].value.previous = previous;
            }
        }

        let mut retired = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let slot = &mut self.slots[current as usize - 1];
            if !slot.value.metadata.active {
                continue;
            }
            slot.value.metadata.active = false;
            self.index.remove(&slot.node);
            stack.extend(slot.value.children.iter().rev());
            retired.push(slot.value.clone());
            slot.value.children.clear();
        }
        retired
    }

    /// Id of a mirrored node
    pub fn lookup(&self, node: NodeId) -> Option<u32> {
        self.index.get(&node).copied()
    }

    /// Active entry
    pub fn resolve(&self, id: u32) -> Option<&NodeValue> {
        self.get(id).filter(|v| v.metadata.active)
    }

    /// Entry, retired ones included
    pub fn get(&self, id: u32) -> Option<&NodeValue> {
        let slot = id.checked_sub(1)?;
        self.slots.get(slot as usize).map(|s| &s.value)
    }

    /// Live node an id was assigned to
    pub fn node(&self, id: u32) -> Option<NodeId> {
        let slot = id.checked_sub(1)?;
        self.slots.get(slot as usize).map(|s| s.node)
    }

    /// Children of `parent`, or the top level
    pub fn children(&self, parent: Option<u32>) -> &[u32] {
        match parent {
            None => &self.top,
            Some(id) => self.get(id).map_or(&[][..], |v| v.children.as_slice()),
        }
    }

    /// Ids ever assigned
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.index.len()
    }

    /// Active entries in id order
    pub fn values(&self) -> impl Iterator<Item = &NodeValue> {
        self.slots.iter().map(|s| &s.value).filter(|v| v.metadata.active)
    }

    /// Forget everything; the next id is 1 again
    pub fn reset(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.top.clear();
    }

    fn value_mut(&mut self, id: u32) -> Option<&mut NodeValue> {
        let slot = id.checked_sub(1)?;
        self.slots.get_mut(slot as usize)
            .map(|s| &mut s.value)
            .filter(|v| v.metadata.active)
    }

    fn siblings_mut(&mut self, parent: Option<u32>) -> &mut Vec<u32> {
        match parent {
            Some(id) => &mut self.slots[id as usize - 1].value.children,
            None => &mut self.top,
        }
    }
}
