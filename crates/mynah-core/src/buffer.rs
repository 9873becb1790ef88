//! Reorder/delay buffer for inbound change events.
//!
//! Webhook deliveries can arrive late or out of sequence relative to when
//! the upstream user actually made the change. The buffer restores
//! chronological order by holding every event for a configured grace
//! period: within that window, a late-arriving earlier event still sorts
//! ahead of an already-buffered later one.
//!
//! Ordering is a min-heap keyed by upstream creation timestamp, with a
//! monotonic enqueue sequence as tie-break, so the total order is
//! deterministic even for identical timestamps. `dequeue_next_ready` only
//! ever releases the head: an unready head is *waited on*, never bypassed,
//! so later-timestamped events cannot jump ahead of it. The waits are
//! condvar-based (no busy spin): enqueues wake the consumer, and
//! readiness is re-polled on a short interval.
//!
//! The head's release condition: it has been buffered for at least the
//! configured delay AND its entity type's mirror is ready (bulk load
//! finished). An event failing readiness stays buffered, not dropped.
//! One consequence, flagged rather than solved: an entity type that never
//! becomes ready pins its earliest event at the head whenever that event
//! is the global minimum, stalling every later event behind it.
//!
//! Capacity is unbounded by design; the producer is a low-volume webhook
//! source and no backpressure is applied upstream. That is a documented
//! scaling limit, not something handled silently.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::event::ChangeEvent;

/// How long to yield before re-checking an entity type that has not
/// finished loading.
const READINESS_POLL: Duration = Duration::from_millis(50);

struct Buffered {
    created_ts_ms: i64,
    seq: u64,
    enqueued_at: Instant,
    event: ChangeEvent,
}

impl PartialEq for Buffered {
    fn eq(&self, other: &Self) -> bool {
        (self.created_ts_ms, self.seq) == (other.created_ts_ms, other.seq)
    }
}

impl Eq for Buffered {}

impl PartialOrd for Buffered {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Buffered {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.created_ts_ms, self.seq).cmp(&(other.created_ts_ms, other.seq))
    }
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<Reverse<Buffered>>,
    next_seq: u64,
    closed: bool,
}

/// What the consumer should do after inspecting the head.
enum Head {
    Empty,
    Wait(Duration),
    Release,
}

/// Delay queue ordered by upstream creation time.
pub struct ReorderBuffer {
    delay: Duration,
    inner: Mutex<Inner>,
    wakeup: Condvar,
}

impl ReorderBuffer {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: Mutex::new(Inner::default()),
            wakeup: Condvar::new(),
        }
    }

    /// Enqueue an event. Never blocks beyond the internal lock; safe to
    /// call from any thread, including concurrently with a dequeue.
    pub fn enqueue(&self, event: ChangeEvent) {
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(Reverse(Buffered {
            created_ts_ms: event.created_ts_ms,
            seq,
            enqueued_at: Instant::now(),
            event,
        }));
        // A new event may be the new head (an earlier-created straggler).
        self.wakeup.notify_one();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    /// Close the buffer. No further stragglers can arrive, so the grace
    /// period is waived for everything already buffered (their relative
    /// order is final); once drained, `dequeue_next_ready` returns `None`.
    /// The long-running service never calls this; it exists for one-shot
    /// ingestion and orderly test teardown.
    pub fn close(&self) {
        self.lock().closed = true;
        self.wakeup.notify_all();
    }

    /// Block until the head event satisfies its release condition, then
    /// dequeue and return it. Returns `None` only after [`close`] once the
    /// queue is empty.
    ///
    /// `is_ready` reports whether an entity type's mirror has finished
    /// loading; events for unready entity types stay buffered.
    ///
    /// [`close`]: Self::close
    pub fn dequeue_next_ready<F>(&self, is_ready: F) -> Option<ChangeEvent>
    where
        F: Fn(&str) -> bool,
    {
        let mut inner = self.lock();
        loop {
            let decision = match inner.heap.peek() {
                None => Head::Empty,
                Some(Reverse(head)) => {
                    let buffered_for = head.enqueued_at.elapsed();
                    if !inner.closed && buffered_for < self.delay {
                        Head::Wait(self.delay - buffered_for)
                    } else if is_ready(&head.event.entity_type) {
                        Head::Release
                    } else {
                        Head::Wait(READINESS_POLL)
                    }
                }
            };

            match decision {
                Head::Release => {
                    let Reverse(head) = inner.heap.pop()?;
                    return Some(head.event);
                }
                Head::Empty => {
                    if inner.closed {
                        return None;
                    }
                    inner = self
                        .wakeup
                        .wait(inner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Head::Wait(timeout) => {
                    let (guard, _timed_out) = self
                        .wakeup
                        .wait_timeout(inner, timeout)
                        .unwrap_or_else(PoisonError::into_inner);
                    inner = guard;
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
