//! Cooperative Scheduler
//!
//! Priority queues of resumable tasks driven by the host run loop. A task
//! runs until it returns [`Step::Yield`] (it stays active and resumes on
//! the next [`Scheduler::tick`]) or [`Step::Done`]. Cost is accounted per
//! [`Timer`] against a fixed millisecond budget.

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::rc::Rc;

use crate::time::Clock;

/// Task priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Normal,
    High,
}

/// Outcome of one run of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Suspended; resume on a later tick from the same state
    Yield,
    /// Finished
    Done,
}

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Running,
    Suspended,
    Done,
    Cancelled,
}

/// Completion handle returned by [`Scheduler::schedule`]
#[derive(Debug, Clone)]
pub struct TaskHandle(Rc<Cell<TaskStatus>>);

impl TaskHandle {
    fn new() -> Self {
        Self(Rc::new(Cell::new(TaskStatus::Queued)))
    }

    pub fn status(&self) -> TaskStatus {
        self.0.get()
    }

    /// Done or cancelled
    pub fn is_finished(&self) -> bool {
        matches!(self.0.get(), TaskStatus::Done | TaskStatus::Cancelled)
    }

    fn set(&self, status: TaskStatus) {
        self.0.set(status);
    }
}

/// Schedulable unit. Tasks with equal keys are de-duplicated.
pub trait Task {
    type Key: Copy + Eq + Debug;

    fn key(&self) -> Self::Key;
}

/// Cost-accounting timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct Timer(u32);

#[derive(Debug, Clone, Copy)]
struct TimerState {
    /// Start of the current slice
    slice_start: u64,
    /// Cost accumulated over finished slices
    cost: u64,
    suspended: bool,
}

/// Time budget shared by all timers of one scheduler
pub struct Budget {
    clock: Rc<dyn Clock>,
    long_task_ms: u64,
    timers: HashMap<Timer, TimerState>,
    next_timer: u32,
}

impl Budget {
    pub fn new(clock: Rc<dyn Clock>, long_task_ms: u64) -> Self {
        Self {
            clock,
            long_task_ms,
            timers: HashMap::new(),
            next_timer: 0,
        }
    }

    /// Allocate a fresh timer
    pub fn timer(&mut self) -> Timer {
        self.next_timer += 1;
        Timer(self.next_timer)
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Begin accounting for `timer`
    pub fn start(&mut self, timer: Timer) {
        let now = self.clock.now();
        self.timers.insert(timer, TimerState { slice_start: now, cost: 0, suspended: false });
    }

    /// Finish accounting, returning the total cost in ms
    pub fn stop(&mut self, timer: Timer) -> u64 {
        match self.timers.remove(&timer) {
            Some(state) if state.suspended => state.cost,
            Some(state) => state.cost + self.clock.now().saturating_sub(state.slice_start),
            None => 0,
        }
    }

    /// True once the current slice exceeds the budget
    pub fn should_yield(&self, timer: Timer) -> bool {
        match self.timers.get(&timer) {
            Some(state) if !state.suspended => {
                self.clock.now().saturating_sub(state.slice_start) > self.long_task_ms
            }
            _ => false,
        }
    }

    /// Close the current slice. The caller returns [`Step::Yield`] next.
    pub fn suspend(&mut self, timer: Timer) {
        let now = self.clock.now();
        if let Some(state) = self.timers.get_mut(&timer) {
            state.cost += now.saturating_sub(state.slice_start);
            state.suspended = true;
        }
    }

    fn resume_suspended(&mut self) {
        let now = self.clock.now();
        for state in self.timers.values_mut().filter(|s| s.suspended) {
            state.slice_start = now;
            state.suspended = false;
        }
    }

    fn clear(&mut self) {
        self.timers.clear();
    }
}

impl Debug for Budget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Budget")
            .field("long_task_ms", &self.long_task_ms)
            .field("timers", &self.timers.len())
            .finish()
    }
}

struct Entry<T> {
    task: T,
    handle: TaskHandle,
}

/// Task scheduler with priority queues
pub struct Scheduler<T: Task> {
    high: VecDeque<Entry<T>>,
    normal: VecDeque<Entry<T>>,
    /// Task currently running or suspended
    active: Option<Entry<T>>,
    budget: Budget,
}

impl<T: Task> Scheduler<T> {
    pub fn new(clock: Rc<dyn Clock>, long_task_ms: u64) -> Self {
        Self {
            high: VecDeque::new(),
            normal: VecDeque::new(),
            active: None,
            budget: Budget::new(clock, long_task_ms),
        }
    }

    /// Queue a task. A task with the same key already queued or active
    /// is reused.
    pub fn schedule(&mut self, task: T, priority: Priority) -> TaskHandle {
        let key = task.key();
        let existing = self.active.iter()
            .chain(self.high.iter())
            .chain(self.normal.iter())
            .find(|entry| entry.task.key() == key);
        if let Some(entry) = existing {
            return entry.handle.clone();
        }

        let handle = TaskHandle::new();
        let entry = Entry { task, handle: handle.clone() };
        match priority {
            Priority::High => self.high.push_back(entry),
            Priority::Normal => self.normal.push_back(entry),
        }
        tracing::trace!("scheduled {:?} at {:?} priority", key, priority);
        handle
    }

    /// Run work until a task yields or nothing is left. Returns true while
    /// work remains.
    pub fn tick(&mut self, mut run: impl FnMut(&mut T, &mut Budget) -> Step) -> bool {
        loop {
            let mut entry = match self.active.take() {
                Some(entry) => {
                    self.budget.resume_suspended();
                    entry
                }
                None => match self.high.pop_front().or_else(|| self.normal.pop_front()) {
                    Some(entry) => entry,
                    None => return false,
                },
            };

            entry.handle.set(TaskStatus::Running);
            match run(&mut entry.task, &mut self.budget) {
                Step::Yield => {
                    entry.handle.set(TaskStatus::Suspended);
                    self.active = Some(entry);
                    return true;
                }
                Step::Done => entry.handle.set(TaskStatus::Done),
            }
        }
    }

    pub fn has_work(&self) -> bool {
        self.active.is_some() || !self.high.is_empty() || !self.normal.is_empty()
    }

    /// Cancel everything, including a suspended task
    pub fn clear(&mut self) {
        let cancelled = self.active.take().into_iter()
            .chain(self.high.drain(..))
            .chain(self.normal.drain(..));
        for entry in cancelled {
            entry.handle.set(TaskStatus::Cancelled);
        }
        self.budget.clear();
    }

    pub fn budget(&self) -> &Budget {
        &self.budget
    }
}

impl<T: Task> Debug for Scheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("high", &self.high.len())
            .field("normal", &self.normal.len())
            .field("active", &self.active.as_ref().map(|e| e.task.key()))
            .field("budget", &self.budget)
            .finish()
    }
}
