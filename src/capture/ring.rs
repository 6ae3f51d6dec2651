//! Triple-cursor ring of device capture slots.
//!
//! ```text
//!          last            wait           capture
//!           │               │               │
//!   ... ────┼───────────────┼───────────────┼──── ...
//!           │◄── ready ────►│◄─ in device ─►│
//!           │◄────────── in_flight ────────►│
//! ```
//!
//! - `submit` hands the slot at `capture` to the device.
//! - `complete` harvests the slot at `wait` once the device reports it.
//! - `deliver` retires the slot at `last` once every consumer has it.
//!
//! Invariants: `ready <= in_flight <= N`; full iff `in_flight == N` and
//! `capture == last`; empty iff `in_flight == 0`.
//!
//! The ring is owned by the capture thread alone, so it has no locking.

use std::time::Duration;

/// One device slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSlot {
    /// Device address (physical address or mmap offset).
    pub address: usize,
    /// Slot capacity in bytes.
    pub capacity: usize,
    /// Valid bytes of the last completed capture.
    pub len: usize,
    /// Timestamp of the last completed capture.
    pub timestamp: Duration,
}

impl CaptureSlot {
    /// An empty slot.
    pub fn new(address: usize, capacity: usize) -> Self {
        Self {
            address,
            capacity,
            len: 0,
            timestamp: Duration::ZERO,
        }
    }
}

/// Fixed-size ring of capture slots with three cursors.
#[derive(Debug, Clone)]
pub struct RingCaptureQueue {
    slots: Vec<CaptureSlot>,
    capture: usize,
    wait: usize,
    last: usize,
    in_flight: usize,
    ready: usize,
}

impl RingCaptureQueue {
    /// Create a ring over `slots`. Returns `None` for an empty slot list.
    pub fn new(slots: Vec<CaptureSlot>) -> Option<Self> {
        if slots.is_empty() {
            return None;
        }
        Some(Self {
            slots,
            capture: 0,
            wait: 0,
            last: 0,
            in_flight: 0,
            ready: 0,
        })
    }

    /// Number of slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Next slot to submit.
    #[inline]
    pub fn capture_cursor(&self) -> usize {
        self.capture
    }

    /// Next slot expected to complete.
    #[inline]
    pub fn wait_cursor(&self) -> usize {
        self.wait
    }

    /// Oldest undelivered slot.
    #[inline]
    pub fn last_cursor(&self) -> usize {
        self.last
    }

    /// Slots submitted and not yet delivered.
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Slots completed and not yet delivered.
    #[inline]
    pub fn ready(&self) -> usize {
        self.ready
    }

    /// Slot by index.
    pub fn slot(&self, index: usize) -> Option<&CaptureSlot> {
        self.slots.get(index)
    }

    #[inline]
    fn advance(&self, cursor: usize) -> usize {
        (cursor + 1) % self.slots.len()
    }

    /// Claim the next slot for the device. `None` when full.
    pub fn submit(&mut self) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        let index = self.capture;
        self.capture = self.advance(self.capture);
        self.in_flight += 1;
        Some(index)
    }

    /// At least one submitted slot has not been harvested yet.
    ///
    /// Counted as `in_flight > ready` rather than from the cursors: the
    /// cursor test `!(ready > 0 && wait == capture)` reports an empty ring
    /// as outstanding, which would make the pump wait on an idle device.
    #[inline]
    pub fn has_outstanding_capture(&self) -> bool {
        self.in_flight > self.ready
    }

    /// Harvest the oldest outstanding slot. `None` if nothing is outstanding.
    pub fn complete(&mut self, len: usize, timestamp: Duration) -> Option<usize> {
        if !self.has_outstanding_capture() {
            return None;
        }
        let index = self.wait;
        let slot = &mut self.slots[index];
        slot.len = len.min(slot.capacity);
        slot.timestamp = timestamp;
        self.wait = self.advance(self.wait);
        self.ready += 1;
        Some(index)
    }

    /// At least one completed slot awaits delivery.
    #[inline]
    pub fn has_ready(&self) -> bool {
        self.ready > 0
    }

    /// Index of the `offset`-th ready slot, oldest first.
    pub fn ready_index(&self, offset: usize) -> Option<usize> {
        (offset < self.ready).then(|| (self.last + offset) % self.slots.len())
    }

    /// Retire the oldest ready slot. `None` if nothing is ready.
    pub fn deliver(&mut self) -> Option<usize> {
        if self.ready == 0 {
            return None;
        }
        let index = self.last;
        self.last = self.advance(self.last);
        self.in_flight -= 1;
        self.ready -= 1;
        Some(index)
    }

    /// Every slot is with the device or waiting for delivery.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.in_flight == self.slots.len() && self.capture == self.last
    }

    /// No slot is in flight.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.in_flight == 0
    }

    /// Overflow policy: still full with at least half the ring ready.
    ///
    /// The caller drops the oldest ready slot rather than stall the device.
    pub fn should_drop_oldest(&self) -> bool {
        self.ready > 0 && self.ready >= self.slots.len() / 2 && self.is_full()
    }

    /// Return every cursor and counter to zero.
    pub fn reset(&mut self) {
        self.capture = 0;
        self.wait = 0;
        self.last = 0;
        self.in_flight = 0;
        self.ready = 0;
        for slot in &mut self.slots {
            slot.len = 0;
            slot.timestamp = Duration::ZERO;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(n: usize) -> RingCaptureQueue {
        RingCaptureQueue::new((0..n).map(|i| CaptureSlot::new(i * 0x1000, 64)).collect()).unwrap()
    }

    fn cursors(q: &RingCaptureQueue) -> (usize, usize, usize, usize, usize) {
        (
            q.capture_cursor(),
            q.wait_cursor(),
            q.last_cursor(),
            q.in_flight(),
            q.ready(),
        )
    }

    #[test]
    fn test_numeric_trace_n4() {
        let mut q = ring(4);
        assert_eq!(cursors(&q), (0, 0, 0, 0, 0));
        assert!(q.is_empty());

        for expected in 0..4 {
            assert_eq!(q.submit(), Some(expected));
        }
        assert_eq!(q.capture_cursor(), 0);
        assert_eq!(q.in_flight(), 4);
        assert!(q.is_full());
        assert_eq!(q.submit(), None);

        assert_eq!(q.complete(64, Duration::from_millis(1)), Some(0));
        assert_eq!(q.wait_cursor(), 1);
        assert_eq!(q.ready(), 1);
        assert!(q.has_outstanding_capture());

        assert_eq!(q.deliver(), Some(0));
        assert_eq!(q.last_cursor(), 1);
        assert_eq!(q.in_flight(), 3);
        assert_eq!(q.ready(), 0);
        assert!(!q.is_full());

        assert_eq!(q.submit(), Some(0));
        assert_eq!(q.capture_cursor(), 1);
        assert_eq!(q.in_flight(), 4);
        assert!(q.is_full());
    }

    #[test]
    fn test_invariants_hold_over_random_walk() {
        let mut q = ring(5);
        // xorshift32, fixed seed.
        let mut x: u32 = 0x2545_f491;
        for _ in 0..2000 {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            match x % 3 {
                0 => {
                    q.submit();
                }
                1 => {
                    q.complete(10, Duration::ZERO);
                }
                _ => {
                    q.deliver();
                }
            }
            let n = q.len();
            assert!(q.ready() <= q.in_flight());
            assert!(q.in_flight() <= n);
            assert_eq!(q.is_full(), q.in_flight() == n);
            assert_eq!(
                (q.capture_cursor() + n - q.last_cursor()) % n,
                q.in_flight() % n
            );
            assert_eq!((q.wait_cursor() + n - q.last_cursor()) % n, q.ready() % n);
        }
    }

    #[test]
    fn test_complete_and_deliver_on_empty() {
        let mut q = ring(2);
        assert!(!q.has_outstanding_capture());
        assert_eq!(q.complete(1, Duration::ZERO), None);
        assert_eq!(q.deliver(), None);
        assert!(!q.has_ready());
    }

    #[test]
    fn test_ready_index_and_slot_record() {
        let mut q = ring(4);
        q.submit();
        q.submit();
        q.complete(100, Duration::from_millis(3));
        q.complete(10, Duration::from_millis(4));
        assert_eq!(q.ready_index(0), Some(0));
        assert_eq!(q.ready_index(1), Some(1));
        assert_eq!(q.ready_index(2), None);
        // Clamped to capacity.
        assert_eq!(q.slot(0).unwrap().len, 64);
        assert_eq!(q.slot(1).unwrap().timestamp, Duration::from_millis(4));
    }

    #[test]
    fn test_drop_oldest_policy() {
        let mut q = ring(4);
        for _ in 0..4 {
            q.submit();
        }
        q.complete(1, Duration::ZERO);
        assert!(!q.should_drop_oldest());
        q.complete(1, Duration::ZERO);
        assert!(q.should_drop_oldest());
        q.deliver();
        assert!(!q.should_drop_oldest());
    }

    #[test]
    fn test_reset() {
        let mut q = ring(3);
        q.submit();
        q.complete(5, Duration::from_millis(1));
        q.reset();
        assert_eq!(cursors(&q), (0, 0, 0, 0, 0));
        assert_eq!(q.slot(0).unwrap().len, 0);
    }

    #[test]
    fn test_empty_slot_list_rejected() {
        assert!(RingCaptureQueue::new(Vec::new()).is_none());
    }
}
