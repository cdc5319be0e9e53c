//! Totally-ordered emulated-time event dispatch.
//!
//! Keeps a min-heap of events ordered by fire time, plus two named trigger
//! queues (HBLANK/VBLANK) that DMA and PPU code schedule against, and
//! per-event cancellation.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::cell::Cell;

/// A callback slot a component can register work against.
///
/// Boxed trait objects keep the scheduler decoupled from any particular
/// device.
pub type Callback<Ctx> = Box<dyn FnOnce(&mut Ctx)>;

/// A named queue that converts pending entries into timed events once fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Immediate,
    HBlank,
    VBlank,
}

/// A handle to a scheduled event. Dropping it does not cancel the event;
/// call [`EventHandle::cancel`] explicitly.
#[derive(Clone)]
pub struct EventHandle {
    cancelled: Rc<Cell<bool>>,
}

impl EventHandle {
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

struct TimedEvent<Ctx> {
    fire_time: u64,
    sequence: u64,
    cancelled: Rc<Cell<bool>>,
    callback: Callback<Ctx>,
}

impl<Ctx> PartialEq for TimedEvent<Ctx> {
    fn eq(&self, other: &Self) -> bool {
        self.fire_time == other.fire_time && self.sequence == other.sequence
    }
}
impl<Ctx> Eq for TimedEvent<Ctx> {}

impl<Ctx> PartialOrd for TimedEvent<Ctx> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<Ctx> Ord for TimedEvent<Ctx> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the earliest fire_time (and,
        // within a tie, the earliest insertion) sorts first.
        other
            .fire_time
            .cmp(&self.fire_time)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct PendingEntry<Ctx> {
    delay: u64,
    cancelled: Rc<Cell<bool>>,
    callback: Callback<Ctx>,
}

/// A min-heap of future-timed events plus the HBLANK/VBLANK trigger queues.
pub struct Scheduler<Ctx> {
    now: u64,
    next_sequence: u64,
    heap: BinaryHeap<TimedEvent<Ctx>>,
    hblank_queue: Vec<PendingEntry<Ctx>>,
    vblank_queue: Vec<PendingEntry<Ctx>>,
}

impl<Ctx> Scheduler<Ctx> {
    pub fn new() -> Self {
        Scheduler {
            now: 0,
            next_sequence: 0,
            heap: BinaryHeap::new(),
            hblank_queue: Vec::new(),
            vblank_queue: Vec::new(),
        }
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    /// Schedules `callback` to fire `delay` cycles from now (if `trigger` is
    /// `Immediate`), or stashes it in the named trigger queue to be stamped
    /// and inserted the next time that trigger fires.
    pub fn schedule(
        &mut self,
        trigger: Trigger,
        delay: u64,
        callback: impl FnOnce(&mut Ctx) + 'static,
    ) -> EventHandle {
        let cancelled = Rc::new(Cell::new(false));
        let handle = EventHandle {
            cancelled: cancelled.clone(),
        };
        match trigger {
            Trigger::Immediate => {
                self.push_heap(self.now + delay, cancelled, Box::new(callback));
            }
            Trigger::HBlank => {
                self.hblank_queue.push(PendingEntry {
                    delay,
                    cancelled,
                    callback: Box::new(callback),
                });
            }
            Trigger::VBlank => {
                self.vblank_queue.push(PendingEntry {
                    delay,
                    cancelled,
                    callback: Box::new(callback),
                });
            }
        }
        handle
    }

    fn push_heap(&mut self, fire_time: u64, cancelled: Rc<Cell<bool>>, callback: Callback<Ctx>) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(TimedEvent {
            fire_time,
            sequence,
            cancelled,
            callback,
        });
    }

    /// Drains the named trigger queue, stamping each pending entry with
    /// `now + its remembered delay` and inserting it into the heap.
    pub fn trigger(&mut self, trigger: Trigger) {
        let queue = match trigger {
            Trigger::HBlank => std::mem::take(&mut self.hblank_queue),
            Trigger::VBlank => std::mem::take(&mut self.vblank_queue),
            Trigger::Immediate => return,
        };
        for entry in queue {
            if entry.cancelled.get() {
                continue;
            }
            let fire_time = self.now + entry.delay;
            self.push_heap(fire_time, entry.cancelled, entry.callback);
        }
    }

    /// Advances `now` by `n` cycles.
    pub fn idle(&mut self, n: u64) {
        self.now += n;
    }

    /// Advances `now` to the next event's fire time, or by 1 cycle if the
    /// heap is empty (used to fast-forward through HALT power-down).
    pub fn idle_until_next_event(&mut self) {
        match self.heap.peek() {
            Some(event) if event.fire_time > self.now => self.now = event.fire_time,
            Some(_) => {}
            None => self.now += 1,
        }
    }

    /// Pops and invokes every event whose fire time has been reached,
    /// skipping cancelled ones. Callbacks may schedule further events; those
    /// scheduled at `now` fire on the next call to `process_events`.
    pub fn process_events(&mut self, ctx: &mut Ctx) {
        while let Some(event) = self.heap.peek() {
            if event.fire_time > self.now {
                break;
            }
            let event = self.heap.pop().unwrap();
            if !event.cancelled.get() {
                (event.callback)(ctx);
            }
        }
    }
}

impl<Ctx> Default for Scheduler<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_fire_in_fire_time_order() {
        let mut sched: Scheduler<Vec<u64>> = Scheduler::new();
        let mut ctx = Vec::new();
        sched.schedule(Trigger::Immediate, 5, |ctx: &mut Vec<u64>| ctx.push(5));
        sched.schedule(Trigger::Immediate, 1, |ctx: &mut Vec<u64>| ctx.push(1));
        sched.schedule(Trigger::Immediate, 3, |ctx: &mut Vec<u64>| ctx.push(3));
        sched.idle(10);
        sched.process_events(&mut ctx);
        assert_eq!(ctx, vec![1, 3, 5]);
    }

    #[test]
    fn ties_break_fifo_by_insertion_order() {
        let mut sched: Scheduler<Vec<u64>> = Scheduler::new();
        let mut ctx = Vec::new();
        sched.schedule(Trigger::Immediate, 2, |ctx: &mut Vec<u64>| ctx.push(1));
        sched.schedule(Trigger::Immediate, 2, |ctx: &mut Vec<u64>| ctx.push(2));
        sched.idle(2);
        sched.process_events(&mut ctx);
        assert_eq!(ctx, vec![1, 2]);
    }

    #[test]
    fn cancelled_event_is_skipped() {
        let mut sched: Scheduler<Vec<u64>> = Scheduler::new();
        let mut ctx = Vec::new();
        let handle = sched.schedule(Trigger::Immediate, 1, |ctx: &mut Vec<u64>| ctx.push(1));
        handle.cancel();
        sched.idle(1);
        sched.process_events(&mut ctx);
        assert!(ctx.is_empty());
    }

    #[test]
    fn trigger_queue_stamps_remembered_delay() {
        let mut sched: Scheduler<Vec<u64>> = Scheduler::new();
        let mut ctx = Vec::new();
        sched.schedule(Trigger::HBlank, 4, |ctx: &mut Vec<u64>| ctx.push(99));
        sched.idle(10);
        sched.trigger(Trigger::HBlank);
        sched.idle(3);
        sched.process_events(&mut ctx);
        assert!(ctx.is_empty());
        sched.idle(1);
        sched.process_events(&mut ctx);
        assert_eq!(ctx, vec![99]);
    }

    #[test]
    fn idle_until_next_event_advances_to_fire_time() {
        let mut sched: Scheduler<Vec<u64>> = Scheduler::new();
        sched.schedule(Trigger::Immediate, 42, |_: &mut Vec<u64>| {});
        sched.idle_until_next_event();
        assert_eq!(sched.now(), 42);
    }
}
