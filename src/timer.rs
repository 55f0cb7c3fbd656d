//! One-shot delayed wakeups.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use crate::bucket::BucketId;
use crate::clock::Clock;

/// What to do when a timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// The bucket's reset time has passed; release it for dispatch
    WakeBucket(BucketId),
}

/// Anything that can run an event once after a delay.
pub trait TimerScheduler {
    fn schedule(&mut self, delay: Duration, event: TimerEvent);
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Timer {
    deadline_ms: u64,
    seq: u64,
    event: TimerEvent,
}

impl Ord for Timer {
    // Reversed so the heap pops the earliest deadline, then insertion order
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline_ms
            .cmp(&self.deadline_ms)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Deadline-ordered queue of one-shot timers.
///
/// The owning event loop polls [`TimerQueue::pop_due`]; a popped timer is
/// gone, so every event fires exactly once.
pub struct TimerQueue {
    clock: Arc<dyn Clock>,
    timers: BinaryHeap<Timer>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            timers: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Earliest pending deadline, in Unix milliseconds
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.peek().map(|timer| timer.deadline_ms)
    }

    /// Remove and return every event whose deadline is at or before now
    pub fn pop_due(&mut self) -> Vec<TimerEvent> {
        let now = self.clock.now_ms();
        let mut due = Vec::new();
        while let Some(timer) = self.timers.peek() {
            if timer.deadline_ms > now {
                break;
            }
            if let Some(timer) = self.timers.pop() {
                due.push(timer.event);
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl TimerScheduler for TimerQueue {
    fn schedule(&mut self, delay: Duration, event: TimerEvent) {
        let deadline_ms = self
            .clock
            .now_ms()
            .saturating_add(delay.as_millis() as u64);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.timers.push(Timer {
            deadline_ms,
            seq,
            event,
        });
    }
}
