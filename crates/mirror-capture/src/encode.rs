//! Output events and the encode sink
//!
//! The engine fills an [`OutputBuffer`] and then makes exactly one
//! [`EncodeSink::encode`] call for it. The sink owns serialization and is
//! expected to drain the buffer.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Serialize, Serializer};

use crate::registry::NodeValue;
use crate::scheduler::Timer;

/// Wire id standing for the root document in adoption events
pub const ROOT_DOCUMENT_ID: i64 = -1;

/// Event kinds handed to the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Event {
    Discover,
    Mutation,
    StyleSheetUpdate,
    StyleSheetAdoption,
}

/// What produced a change record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Source {
    Discover,
    ChildListAdd,
    ChildListRemove,
    Attributes,
    CharacterData,
}

/// One mirrored node change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    /// Capture time of the batch this record belongs to
    pub time: u64,
    pub source: Source,
    pub value: NodeValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StyleSheetOperation {
    Create,
    Replace,
    ReplaceSync,
    SetAdoptedStyles,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StyleSheetEntry {
    pub id: String,
    pub operation: StyleSheetOperation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StyleSheetState {
    pub time: u64,
    pub data: StyleSheetEntry,
}

/// Document whose adopted list is tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdoptionTarget {
    /// The top-level document
    Root,
    /// A mirrored shadow root or frame document
    Node(u32),
}

impl AdoptionTarget {
    /// Id used on the wire
    pub fn wire_id(self) -> i64 {
        match self {
            Self::Root => ROOT_DOCUMENT_ID,
            Self::Node(id) => i64::from(id),
        }
    }
}

impl Serialize for AdoptionTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.wire_id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdoptionEvent {
    pub time: u64,
    pub document: AdoptionTarget,
    pub operation: StyleSheetOperation,
    pub new_ids: Vec<String>,
}

/// Shared output buffer, filled before each encode call
#[derive(Debug, Default, Serialize)]
pub struct OutputBuffer {
    pub nodes: Vec<ChangeRecord>,
    pub sheet_updates: Vec<StyleSheetState>,
    pub adoptions: Vec<AdoptionEvent>,
}

impl OutputBuffer {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.sheet_updates.is_empty() && self.adoptions.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.sheet_updates.clear();
        self.adoptions.clear();
    }
}

/// Consumer of finished output
pub trait EncodeSink {
    /// Called once the buffer holds everything for `event`
    fn encode(&mut self, event: Event, buffer: &mut OutputBuffer, timer: Option<Timer>, time: Option<u64>);
}

/// One sink call as recorded by [`MemorySink`]
#[derive(Debug, Clone, Serialize)]
pub struct Encoded {
    pub event: Event,
    pub timer: Option<Timer>,
    pub time: Option<u64>,
    pub nodes: Vec<ChangeRecord>,
    pub sheet_updates: Vec<StyleSheetState>,
    pub adoptions: Vec<AdoptionEvent>,
}

/// Sink that keeps every call in memory. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    log: Rc<RefCell<Vec<Encoded>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the log
    pub fn events(&self) -> Vec<Encoded> {
        self.log.borrow().clone()
    }

    /// Drain the log
    pub fn take(&self) -> Vec<Encoded> {
        std::mem::take(&mut *self.log.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.log.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.borrow().is_empty()
    }
}

impl EncodeSink for MemorySink {
    fn encode(&mut self, event: Event, buffer: &mut OutputBuffer, timer: Option<Timer>, time: Option<u64>) {
        self.log.borrow_mut().push(Encoded {
            event,
            timer,
            time,
            nodes: std::mem::take(&mut buffer.nodes),
            sheet_updates: std::mem::take(&mut buffer.sheet_updates),
            adoptions: std::mem::take(&mut buffer.adoptions),
        });
    }
}
