//! Session context
//!
//! Everything one `start()` owns. [`Shared`] is the part reachable from
//! host callbacks (observers, load listeners, style-sheet wrappers); they
//! hold it weakly, so a stopped session silently drops late calls.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use mirror_dom::{DomTree, ListenerId, MutationRecord, NodeId, ObserverId, SheetId};

use crate::config::CaptureConfig;
use crate::encode::{
    AdoptionEvent, AdoptionTarget, ChangeRecord, EncodeSink, Event, OutputBuffer, StyleSheetEntry,
    StyleSheetOperation, StyleSheetState,
};
use crate::layout::Layout;
use crate::privacy::PrivacyClassifier;
use crate::registry::IdentityRegistry;
use crate::scheduler::Timer;
use crate::time::Clock;

/// One notification delivery, native or synthetic
#[derive(Debug, Clone)]
pub struct MutationBatch {
    /// Capture time
    pub time: u64,
    pub records: Vec<MutationRecord>,
}

/// Buffer plus the sink it is flushed into. Outlives sessions.
pub(crate) struct Output {
    pub buffer: OutputBuffer,
    pub sink: Box<dyn EncodeSink>,
}

impl Output {
    pub(crate) fn new(sink: Box<dyn EncodeSink>) -> Self {
        Self { buffer: OutputBuffer::default(), sink }
    }
}

#[derive(Debug, Default)]
struct StyleState {
    /// Sheet ids announced with `Create` in this session
    announced: HashSet<String>,
    /// Last emitted adopted list per document
    adoption: HashMap<AdoptionTarget, Vec<String>>,
}

/// State shared with host callbacks
pub(crate) struct Shared {
    active: Cell<bool>,
    clock: Rc<dyn Clock>,
    queue: RefCell<VecDeque<MutationBatch>>,
    styles: RefCell<StyleState>,
    output: Rc<RefCell<Output>>,
}

impl Shared {
    pub(crate) fn new(clock: Rc<dyn Clock>, output: Rc<RefCell<Output>>) -> Self {
        Self {
            active: Cell::new(false),
            clock,
            queue: RefCell::new(VecDeque::new()),
            styles: RefCell::new(StyleState::default()),
            output,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.set(active);
    }

    pub(crate) fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Queue one delivery as a batch stamped with the current time
    pub(crate) fn ingest(&self, records: Vec<MutationRecord>) {
        if !self.is_active() || records.is_empty() {
            return;
        }
        let time = self.clock.now();
        self.queue.borrow_mut().push_back(MutationBatch { time, records });
    }

    pub(crate) fn pop_batch(&self) -> Option<MutationBatch> {
        self.queue.borrow_mut().pop_front()
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    pub(crate) fn discard_pending(&self) {
        self.queue.borrow_mut().clear();
    }

    /// Rules of `sheet` changed through the CSSOM
    pub(crate) fn rule_changed(&self, dom: &DomTree, sheet: SheetId) {
        let Some(owner) = dom.sheet(sheet).and_then(|s| s.owner()) else {
            return;
        };
        self.ingest(vec![MutationRecord::CharacterData { target: owner, old_value: None }]);
    }

    /// A frame finished loading new content
    pub(crate) fn frame_loaded(&self, frame: NodeId) {
        self.ingest(vec![MutationRecord::ChildList {
            target: frame,
            added: vec![frame],
            removed: Vec::new(),
            previous_sibling: None,
            next_sibling: None,
        }]);
    }

    /// A constructed sheet was replaced
    pub(crate) fn sheet_replaced(&self, dom: &mut DomTree, sheet: SheetId, operation: StyleSheetOperation, text: &str) {
        if !self.is_active() {
            return;
        }
        let Some(id) = sheet_id(dom, sheet) else {
            return;
        };
        let time = self.clock.now();
        if self.styles.borrow_mut().announced.insert(id.clone()) {
            self.track_style(time, &id, StyleSheetOperation::Create, None);
        }
        self.track_style(time, &id, operation, Some(text.to_string()));
    }

    /// Diff the adopted list of one document against the last one emitted
    pub(crate) fn check_adoption(&self, dom: &mut DomTree, target: AdoptionTarget, document: NodeId) {
        if !self.is_active() {
            return;
        }
        let Some(sheets) = dom.adopted_style_sheets(document).map(<[SheetId]>::to_vec) else {
            return;
        };
        let time = self.clock.now();
        let mut current = Vec::with_capacity(sheets.len());
        for sheet in sheets {
            let Some(id) = sheet_id(dom, sheet) else {
                continue;
            };
            if self.styles.borrow_mut().announced.insert(id.clone()) {
                let rules = dom.sheet(sheet).map(|s| s.css_text()).unwrap_or_default();
                self.track_style(time, &id, StyleSheetOperation::Create, None);
                self.track_style(time, &id, StyleSheetOperation::ReplaceSync, Some(rules));
            }
            current.push(id);
        }

        let changed = {
            let mut styles = self.styles.borrow_mut();
            let recorded = styles.adoption.entry(target).or_default();
            if *recorded == current {
                false
            } else {
                recorded.clone_from(&current);
                true
            }
        };
        if changed {
            self.track_adoption(time, target, current);
        }
    }

    fn track_style(&self, time: u64, id: &str, operation: StyleSheetOperation, rules_text: Option<String>) {
        tracing::trace!("style sheet {} {:?}", id, operation);
        let state = StyleSheetState {
            time,
            data: StyleSheetEntry { id: id.to_string(), operation, rules_text },
        };
        let mut output = self.output.borrow_mut();
        output.buffer.sheet_updates.push(state);
        output.flush(Event::StyleSheetUpdate, None, Some(time));
    }

    fn track_adoption(&self, time: u64, document: AdoptionTarget, new_ids: Vec<String>) {
        let event = AdoptionEvent {
            time,
            document,
            operation: StyleSheetOperation::SetAdoptedStyles,
            new_ids,
        };
        let mut output = self.output.borrow_mut();
        output.buffer.adoptions.push(event);
        output.flush(Event::StyleSheetAdoption, None, Some(time));
    }

    /// Hand node records to the sink
    pub(crate) fn emit(&self, event: Event, records: Vec<ChangeRecord>, timer: Option<Timer>, time: Option<u64>) {
        let mut output = self.output.borrow_mut();
        output.buffer.nodes.extend(records);
        output.flush(event, timer, time);
    }
}

impl Output {
    fn flush(&mut self, event: Event, timer: Option<Timer>, time: Option<u64>) {
        let Output { buffer, sink } = self;
        sink.encode(event, buffer, timer, time);
    }
}

/// Id carried by the sheet object, allocated on first observation
fn sheet_id(dom: &mut DomTree, sheet: SheetId) -> Option<String> {
    if let Some(id) = dom.sheet(sheet)?.annotation.clone() {
        return Some(id);
    }
    let id = format!("s{}", dom.allocate_serial());
    dom.sheet_mut(sheet)?.annotation = Some(id.clone());
    Some(id)
}

/// Engine state for one run
pub(crate) struct Session {
    pub registry: IdentityRegistry,
    pub shared: Rc<Shared>,
    /// Observer per observed root
    pub observed: HashMap<NodeId, ObserverId>,
    pub listeners: Vec<ListenerId>,
    /// Frames that already have a load listener
    pub monitored: HashSet<NodeId>,
    /// Live observation path installed
    pub armed: bool,
    /// Shadow roots and frame documents waiting for an observer
    pub pending_roots: Vec<NodeId>,
    /// Frames waiting for a load listener
    pub pending_frames: Vec<NodeId>,
    /// Shadow roots and frame documents whose adopted lists are tracked
    pub adoption_docs: Vec<NodeId>,
    /// Subscribed to the style-sheet interception layer
    pub subscribed: bool,
    /// Ids of the topmost and bottommost visible nodes after discovery
    pub boundary: (Option<u32>, Option<u32>),
}

impl Session {
    pub(crate) fn new(shared: Rc<Shared>) -> Self {
        Self {
            registry: IdentityRegistry::new(),
            shared,
            observed: HashMap::new(),
            listeners: Vec::new(),
            monitored: HashSet::new(),
            armed: false,
            pending_roots: Vec::new(),
            pending_frames: Vec::new(),
            adoption_docs: Vec::new(),
            subscribed: false,
            boundary: (None, None),
        }
    }
}

/// Borrowed context handed to running tasks
pub(crate) struct Cx<'a> {
    pub dom: &'a mut DomTree,
    pub session: &'a mut Session,
    pub privacy: &'a dyn PrivacyClassifier,
    pub layout: &'a mut dyn Layout,
    pub config: &'a CaptureConfig,
}
