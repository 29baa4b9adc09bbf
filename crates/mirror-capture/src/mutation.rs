//! Mutation Normalizer
//!
//! Drains queued batches through one cost timer. Each record is
//! re-checked against the live tree, since the page may have moved on
//! since the record was queued, and then folded into the mirror. The
//! sink sees one `Mutation` event per batch, stamped with the batch
//! capture time.

use mirror_dom::{MutationRecord, NodeId};

use crate::cssom;
use crate::encode::{ChangeRecord, Event, Source};
use crate::node;
use crate::scheduler::{Budget, Step, Timer};
use crate::session::{Cx, MutationBatch};
use crate::traverse::{self, BatchOutput, SubtreeWalk, Visit};

/// Progress through the current record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Nothing done yet
    Start,
    /// Additions done, next removal index
    Removals(usize),
}

#[derive(Debug)]
struct Cursor {
    batch: MutationBatch,
    record: usize,
    stage: Stage,
    out: BatchOutput,
}

impl Cursor {
    fn new(batch: MutationBatch) -> Self {
        Self { batch, record: 0, stage: Stage::Start, out: BatchOutput::default() }
    }
}

/// Processing task state
#[derive(Debug, Default)]
pub(crate) struct Normalizer {
    timer: Option<Timer>,
    current: Option<Cursor>,
}

impl Normalizer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn run(&mut self, cx: &mut Cx<'_>, budget: &mut Budget) -> Step {
        let timer = *self.timer.get_or_insert_with(|| {
            let timer = budget.timer();
            budget.start(timer);
            timer
        });

        loop {
            if self.current.is_none() {
                match cx.session.shared.pop_batch() {
                    Some(batch) => self.current = Some(Cursor::new(batch)),
                    None => break,
                }
            }
            let Some(cursor) = self.current.as_mut() else {
                break;
            };
            if process(cx, budget, timer, cursor) == Step::Yield {
                return Step::Yield;
            }
            if let Some(cursor) = self.current.take() {
                let time = cursor.batch.time;
                if !cursor.out.is_empty() {
                    cx.session.shared.emit(Event::Mutation, cursor.out.into_records(), None, Some(time));
                }
            }
        }

        let cost = budget.stop(timer);
        self.timer = None;
        tracing::trace!("mutation pass finished in {}ms", cost);

        cx.layout.compute(cx.dom, &cx.session.registry);
        cssom::compute(cx);
        Step::Done
    }
}

/// Work through the cursor's batch. Returns `Yield` with the cursor
/// parked on the record to resume.
fn process(cx: &mut Cx<'_>, budget: &mut Budget, timer: Timer, cursor: &mut Cursor) -> Step {
    let time = cursor.batch.time;
    while let Some(record) = cursor.batch.records.get(cursor.record) {
        match record {
            MutationRecord::Attributes { target, .. } => {
                if budget.should_yield(timer) {
                    budget.suspend(timer);
                    return Step::Yield;
                }
                refresh(cx, *target, Source::Attributes, time, &mut cursor.out);
            }
            MutationRecord::CharacterData { target, .. } => {
                if budget.should_yield(timer) {
                    budget.suspend(timer);
                    return Step::Yield;
                }
                refresh(cx, *target, Source::CharacterData, time, &mut cursor.out);
                // Text inside a <style> also changes the sheet the element mirrors
                if let Some(parent) = cx.dom.parent(*target) {
                    if cx.dom.element_sheet(parent).is_some() {
                        refresh(cx, parent, Source::CharacterData, time, &mut cursor.out);
                    }
                }
            }
            MutationRecord::ChildList { added, removed, .. } => {
                if cursor.stage == Stage::Start {
                    for node in added {
                        add(cx, *node, time, &mut cursor.out);
                    }
                    cursor.stage = Stage::Removals(0);
                }
                while let Stage::Removals(index) = cursor.stage {
                    let Some(node) = removed.get(index) else {
                        break;
                    };
                    if budget.should_yield(timer) {
                        budget.suspend(timer);
                        return Step::Yield;
                    }
                    remove(cx, *node, time, &mut cursor.out);
                    cursor.stage = Stage::Removals(index + 1);
                }
            }
        }
        cursor.record += 1;
        cursor.stage = Stage::Start;
    }
    Step::Done
}

/// Re-read a node's current value into the mirror
fn refresh(cx: &mut Cx<'_>, target: NodeId, source: Source, time: u64, out: &mut BatchOutput) {
    if !cx.dom.is_connected(target) {
        tracing::trace!("skipping {:?} {:?}: detached", source, target);
        return;
    }
    let registry = &cx.session.registry;
    let Some(id) = registry.lookup(target) else {
        tracing::trace!("skipping {:?} {:?}: not mirrored", source, target);
        return;
    };
    let parent = registry.resolve(id).and_then(|v| v.parent);
    let Some(snapshot) = node::describe(cx.dom, cx.privacy, &*cx.layout, registry, target, parent) else {
        return;
    };
    if cx.session.registry.update(id, snapshot) {
        if let Some(value) = cx.session.registry.resolve(id) {
            out.push(ChangeRecord { time, source, value: value.clone() });
        }
    }
}

/// Mirror an added subtree. Never suspends.
fn add(cx: &mut Cx<'_>, root: NodeId, time: u64, out: &mut BatchOutput) {
    if !cx.dom.is_connected(root) {
        tracing::trace!("skipping addition of {:?}: detached", root);
        return;
    }
    let mut walk = SubtreeWalk::new(vec![root]);
    while let Some(node) = walk.pop() {
        if traverse::visit(cx, node, Source::ChildListAdd, time, out) == Visit::Descend {
            walk.descend(cx.dom, node);
        }
    }
}

/// Retire a removed subtree unless the node is back where the mirror has it
fn remove(cx: &mut Cx<'_>, node: NodeId, time: u64, out: &mut BatchOutput) {
    let registry = &cx.session.registry;
    let Some(id) = registry.lookup(node) else {
        tracing::trace!("skipping removal of {:?}: not mirrored", node);
        return;
    };
    if cx.dom.is_connected(node) {
        let mirrored = registry.resolve(id).map(|v| (v.parent, v.previous));
        if traverse::placement(cx.dom, registry, node) == mirrored {
            tracing::trace!("skipping removal of {:?}: still attached", node);
            return;
        }
    }
    traverse::retire(cx, id, time, out);
}
