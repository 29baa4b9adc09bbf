//! Capture - Main entry point

use std::cell::RefCell;
use std::rc::Rc;

use mirror_dom::DomTree;

use crate::config::CaptureConfig;
use crate::cssom;
use crate::discover::Discovery;
use crate::encode::EncodeSink;
use crate::error::{CaptureError, Result};
use crate::layout::{Layout, NoLayout};
use crate::mutation::Normalizer;
use crate::privacy::{DefaultPrivacy, PrivacyClassifier};
use crate::registry::IdentityRegistry;
use crate::scheduler::{Priority, Scheduler, Task};
use crate::session::{Cx, Output, Session, Shared};
use crate::time::Clock;

/// Work the capture engine schedules
#[derive(Debug)]
pub(crate) enum CaptureTask {
    Discover(Discovery),
    Process(Normalizer),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskKind {
    Discover,
    Process,
}

impl Task for CaptureTask {
    type Key = TaskKind;

    fn key(&self) -> TaskKind {
        match self {
            Self::Discover(_) => TaskKind::Discover,
            Self::Process(_) => TaskKind::Process,
        }
    }
}

/// Mutation capture engine
///
/// Owns no document: every call that needs the page takes the host's
/// [`DomTree`]. Between calls the host mutates the tree, delivers
/// mutation records and keeps calling [`Capture::tick`].
pub struct Capture {
    config: CaptureConfig,
    clock: Rc<dyn Clock>,
    output: Rc<RefCell<Output>>,
    privacy: Box<dyn PrivacyClassifier>,
    layout: Box<dyn Layout>,
    scheduler: Scheduler<CaptureTask>,
    session: Option<Session>,
}

impl Capture {
    /// Create an idle engine
    pub fn new(config: CaptureConfig, clock: Rc<dyn Clock>, sink: impl EncodeSink + 'static) -> Self {
        let scheduler = Scheduler::new(Rc::clone(&clock), config.long_task_ms);
        Self {
            config,
            clock,
            output: Rc::new(RefCell::new(Output::new(Box::new(sink)))),
            privacy: Box::new(DefaultPrivacy),
            layout: Box::new(NoLayout),
            scheduler,
            session: None,
        }
    }

    /// Use a custom privacy policy
    pub fn with_privacy(mut self, privacy: impl PrivacyClassifier + 'static) -> Self {
        self.privacy = Box::new(privacy);
        self
    }

    /// Use a custom layout collaborator
    pub fn with_layout(mut self, layout: impl Layout + 'static) -> Self {
        self.layout = Box::new(layout);
        self
    }

    /// Begin a session. Discovery runs on the following ticks.
    pub fn start(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }
        let shared = Rc::new(Shared::new(Rc::clone(&self.clock), Rc::clone(&self.output)));
        shared.set_active(true);
        self.session = Some(Session::new(shared));
        self.scheduler.schedule(CaptureTask::Discover(Discovery::new()), Priority::High);
        tracing::debug!("capture started");
        Ok(())
    }

    /// Run one host turn of capture work. Returns true while work remains.
    pub fn tick(&mut self, dom: &mut DomTree) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if session.shared.pending() > 0 {
            self.scheduler.schedule(CaptureTask::Process(Normalizer::new()), Priority::High);
        }

        let mut cx = Cx {
            dom,
            session,
            privacy: self.privacy.as_ref(),
            layout: self.layout.as_mut(),
            config: &self.config,
        };
        let more = self.scheduler.tick(|task, budget| match task {
            CaptureTask::Discover(discovery) => discovery.run(&mut cx, budget),
            CaptureTask::Process(normalizer) => normalizer.run(&mut cx, budget),
        });
        more || cx.session.shared.pending() > 0
    }

    /// Deliver pending observer records and tick until nothing is left
    pub fn run_until_idle(&mut self, dom: &mut DomTree) {
        loop {
            let delivered = dom.deliver_mutations();
            let more = self.tick(dom);
            if !more && delivered == 0 {
                break;
            }
        }
    }

    /// Adoption diff of every tracked document
    pub fn compute(&mut self, dom: &mut DomTree) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let mut cx = Cx {
            dom,
            session,
            privacy: self.privacy.as_ref(),
            layout: self.layout.as_mut(),
            config: &self.config,
        };
        cssom::compute(&mut cx);
    }

    /// End the session: disconnect observers and listeners, restore
    /// wrapped style-sheet methods and drop queued batches unprocessed.
    /// Stopping an idle engine does nothing.
    pub fn stop(&mut self, dom: &mut DomTree) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.shared.set_active(false);
        for (_, observer) in session.observed.drain() {
            dom.disconnect(observer);
        }
        for listener in session.listeners.drain(..) {
            dom.remove_event_listener(listener);
        }
        cssom::uninstall(dom, &mut session);
        self.scheduler.clear();
        session.shared.discard_pending();
        tracing::debug!("capture stopped after {} ids", session.registry.len());
    }

    pub fn is_active(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.shared.is_active())
    }

    /// Mirror of the running session
    pub fn registry(&self) -> Option<&IdentityRegistry> {
        self.session.as_ref().map(|s| &s.registry)
    }

    /// Ids of the topmost and bottommost visible nodes found by discovery
    pub fn boundary(&self) -> (Option<u32>, Option<u32>) {
        self.session.as_ref().map_or((None, None), |s| s.boundary)
    }

    /// Batches waiting to be processed
    pub fn pending_batches(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.shared.pending())
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }
}

impl std::fmt::Debug for Capture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capture")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .field("active", &self.is_active())
            .finish()
    }
}
