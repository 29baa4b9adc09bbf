//! Discovery
//!
//! One resumable walk of the whole document per session. Ids are assigned
//! in depth-first document order and the result goes out as a single
//! `Discover` event. Completion arms the live capture path.

use mirror_dom::NodeId;

use crate::cssom;
use crate::encode::{Event, Source};
use crate::scheduler::{Budget, Step, Timer};
use crate::session::Cx;
use crate::traverse::{self, BatchOutput, SubtreeWalk, Visit};

/// Discovery task state
#[derive(Debug, Default)]
pub(crate) struct Discovery {
    timer: Option<Timer>,
    time: u64,
    walk: Option<SubtreeWalk>,
    /// Next node on the walk is the first child of the last one visited
    entering: bool,
    out: BatchOutput,
}

impl Discovery {
    pub(crate) fn new() -> Self {
        // The first node of the walk is the root's first child
        Self { entering: true, ..Self::default() }
    }

    pub(crate) fn run(&mut self, cx: &mut Cx<'_>, budget: &mut Budget) -> Step {
        let timer = match self.timer {
            Some(timer) => timer,
            None => {
                let timer = budget.timer();
                budget.start(timer);
                self.timer = Some(timer);
                self.time = cx.session.shared.now();
                tracing::debug!("discovery started");
                timer
            }
        };
        let walk = self.walk.get_or_insert_with(|| {
            SubtreeWalk::new(traverse::mirror_children(cx.dom, cx.dom.root()))
        });

        // Suspends only between sibling subtrees
        while !walk.is_empty() {
            if !self.entering && budget.should_yield(timer) {
                budget.suspend(timer);
                return Step::Yield;
            }
            let Some(node) = walk.pop() else {
                break;
            };
            self.entering = false;
            if !cx.dom.is_connected(node) {
                tracing::trace!("skipping {:?}: detached during discovery", node);
                continue;
            }
            if traverse::visit(cx, node, Source::Discover, self.time, &mut self.out) == Visit::Descend {
                self.entering = walk.descend(cx.dom, node);
            }
        }

        self.finish(cx, budget, timer);
        Step::Done
    }

    fn finish(&mut self, cx: &mut Cx<'_>, budget: &mut Budget, timer: Timer) {
        let (top, bottom) = cx.layout.boundary_nodes(cx.dom);
        let registry = &cx.session.registry;
        cx.session.boundary = (
            top.and_then(|n| registry.lookup(n)),
            bottom.and_then(|n| registry.lookup(n)),
        );

        cssom::compute(cx);

        let records = std::mem::take(&mut self.out).into_records();
        let count = records.len();
        cx.session.shared.emit(Event::Discover, records, Some(timer), Some(self.time));
        let cost = budget.stop(timer);
        tracing::debug!("discovery complete: {} nodes in {}ms", count, cost);

        arm(cx);
        cx.layout.compute(cx.dom, &cx.session.registry);
    }
}

/// Install the live capture path: observers on the root and every
/// discovered shadow root or frame document, frame load listeners and
/// the style-sheet wrappers. Runs once per session.
fn arm(cx: &mut Cx<'_>) {
    if cx.session.armed {
        return;
    }
    cx.session.armed = true;

    traverse::observe(cx, NodeId::ROOT);
    for root in std::mem::take(&mut cx.session.pending_roots) {
        traverse::observe(cx, root);
    }
    for frame in std::mem::take(&mut cx.session.pending_frames) {
        traverse::monitor(cx, frame);
    }
    cssom::install(cx);
    tracing::debug!("live capture armed with {} observers", cx.session.observed.len());
}
