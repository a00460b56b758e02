// The tick scheduler: a deadline-ordered queue of self-rescheduling tasks.
//
// Every forward-moving piece of the simulation (movement steps, facing
// turns, any future cadence work) is a `Task` scheduled here. A task holds
// a *delay*; scheduling computes an absolute *deadline* = delay + now, once
// per scheduling. `drain` pops every task whose deadline has arrived, runs
// it, and either re-inserts it with a freshly computed deadline (the task
// may have changed its delay, so periods can drift) or retires it through
// `finish`, which may hand back a follow-up task to schedule.
//
// The heap is a `BinaryHeap` behind reversed ordering, the same min-heap
// pattern as the pathfinder's open set. Ties between equal deadlines are
// broken by a monotonic sequence number, so tasks scheduled for the same
// tick run in FIFO order.
//
// Cancellation is cooperative: `stop(handle)` flags the task, and the next
// drain pass that reaches it retires it instead of running it. There is no
// out-of-band heap removal. Handles are generation-tagged slot indices —
// a task never holds a reference to its own queue entry, and a stale handle
// (task already retired, slot reused) is a harmless no-op.
//
// `run` and `finish` have no error channel; a task that corrupts scheduler
// state (double-scheduling a live handle) is a programming error and is
// caught by debug assertions, not reported upward.

use crate::sim::SimContext;
use crate::types::Tick;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// What a task wants after one unit of work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskControl {
    /// Re-enqueue me; my deadline is recomputed from my current delay.
    Continue,
    /// Retire me; call `finish`.
    Done,
}

/// A scheduled unit of work. Implementations are opaque to the queue beyond
/// this contract.
pub trait Task {
    /// Ticks to wait from the moment the task is (re)scheduled. Read once
    /// per scheduling; a task may change the value between runs.
    fn delay(&self) -> Tick;

    /// Perform one unit of work.
    fn run(&mut self, ctx: &mut SimContext<'_>) -> TaskControl;

    /// Cleanup hook invoked when the task is retired. May return a follow-up
    /// task that is scheduled immediately — the sequencing mechanism for
    /// "do A, then B".
    fn finish(&mut self, ctx: &mut SimContext<'_>) -> Option<Box<dyn Task>> {
        let _ = ctx;
        None
    }

    /// Advisory cancellation. Implementations flag themselves so the next
    /// `run` winds down; the queue also retires flagged tasks directly.
    fn stop(&mut self) {}
}

/// Queue-issued identifier for a scheduled task. Stale handles (the task
/// already retired) are detected by the generation tag and ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskHandle {
    index: u32,
    generation: u32,
}

/// Heap entry: `(deadline, sequence)` gives a total order; reversed so the
/// `BinaryHeap` max-heap behaves as a min-heap.
#[derive(Debug)]
struct QueueEntry {
    deadline: Tick,
    sequence: u64,
    index: u32,
    generation: u32,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse: smallest (deadline, sequence) should be "greatest".
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct TaskSlot {
    task: Option<Box<dyn Task>>,
    generation: u32,
    cancelled: bool,
}

/// Deadline-ordered task queue driving the simulation forward.
#[derive(Default)]
pub struct TaskQueue {
    heap: BinaryHeap<QueueEntry>,
    slots: Vec<TaskSlot>,
    free: Vec<u32>,
    next_sequence: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (scheduled, not cancelled, not yet retired) tasks.
    /// Cancelled tasks awaiting their retirement pass are not counted.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.task.is_some() && !slot.cancelled)
            .count()
    }

    /// True when no heap entries remain at all, including cancelled tasks
    /// that still await retirement.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Schedule a task: deadline = task delay + `now`, computed here and
    /// only here.
    pub fn schedule(&mut self, task: Box<dyn Task>, now: Tick) -> TaskHandle {
        let deadline = now + task.delay();
        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                debug_assert!(slot.task.is_none(), "free list held a live slot");
                slot.task = Some(task);
                slot.cancelled = false;
                index
            }
            None => {
                self.slots.push(TaskSlot {
                    task: Some(task),
                    generation: 0,
                    cancelled: false,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let generation = self.slots[index as usize].generation;
        self.push_entry(deadline, index, generation);
        TaskHandle { index, generation }
    }

    /// Request cooperative cancellation. The task is flagged (and told via
    /// `Task::stop`); the next drain pass retires it through `finish`.
    /// Stale handles are ignored.
    pub fn stop(&mut self, handle: TaskHandle) {
        if let Some(slot) = self.slots.get_mut(handle.index as usize) {
            if slot.generation == handle.generation {
                if let Some(task) = slot.task.as_mut() {
                    task.stop();
                    slot.cancelled = true;
                }
            }
        }
    }

    /// Whether the handle still refers to a live task.
    pub fn is_live(&self, handle: TaskHandle) -> bool {
        self.slots
            .get(handle.index as usize)
            .is_some_and(|slot| slot.generation == handle.generation && slot.task.is_some())
    }

    /// Run every task whose deadline is <= `now`, in `(deadline, sequence)`
    /// order. Tasks returning `Continue` are re-inserted with a fresh
    /// deadline; tasks returning `Done` (and cancelled tasks) are retired
    /// through `finish`, scheduling any follow-up. Tasks spawned through
    /// `SimContext::spawn` during a run are transferred into the queue at
    /// `now`.
    pub fn drain(&mut self, now: Tick, ctx: &mut SimContext<'_>) {
        while self
            .heap
            .peek()
            .is_some_and(|entry| entry.deadline <= now)
        {
            let entry = match self.heap.pop() {
                Some(entry) => entry,
                None => break,
            };
            let slot = &mut self.slots[entry.index as usize];
            if slot.generation != entry.generation {
                // Slot was retired and reused; this heap entry is stale.
                continue;
            }
            let mut task = match slot.task.take() {
                Some(task) => task,
                None => continue,
            };
            let cancelled = slot.cancelled;

            if !cancelled && task.run(ctx) == TaskControl::Continue {
                let deadline = now + task.delay();
                self.slots[entry.index as usize].task = Some(task);
                self.push_entry(deadline, entry.index, entry.generation);
            } else {
                let follow_up = task.finish(ctx);
                self.release_slot(entry.index);
                if let Some(next) = follow_up {
                    self.schedule(next, now);
                }
            }
            self.adopt_spawned(ctx, now);
        }
    }

    fn adopt_spawned(&mut self, ctx: &mut SimContext<'_>, now: Tick) {
        while let Some(task) = ctx.spawned.pop() {
            self.schedule(task, now);
        }
    }

    fn push_entry(&mut self, deadline: Tick, index: u32, generation: u32) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(QueueEntry {
            deadline,
            sequence,
            index,
            generation,
        });
    }

    fn release_slot(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        slot.task = None;
        slot.cancelled = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
    }
}
