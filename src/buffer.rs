//! Fixed-capacity FIFO of pending events.
//!
//! The buffer never rejects and never evicts: keeping it at or below capacity
//! is the job of [`FlowBuffer`](crate::FlowBuffer), which drains as soon as an
//! append reaches capacity. It is not synchronized on its own and always lives
//! behind the owning component's lock.

use crate::continuation::PendingEvent;

#[derive(Debug)]
pub struct EventBuffer<T> {
    events: Vec<PendingEvent<T>>,
    capacity: usize,
}

impl<T> EventBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { events: Vec::with_capacity(capacity), capacity }
    }

    /// Append at the tail and return the new length.
    pub fn append(&mut self, event: PendingEvent<T>) -> usize {
        self.events.push(event);
        self.events.len()
    }

    /// Take every buffered event in write order, leaving the buffer empty.
    pub fn drain_all(&mut self) -> Vec<PendingEvent<T>> {
        if self.events.is_empty() {
            return Vec::new();
        }
        std::mem::replace(&mut self.events, Vec::with_capacity(self.capacity))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_reports_running_count() {
        let mut buffer = EventBuffer::new(4);
        assert_eq!(buffer.append(PendingEvent::detached(1)), 1);
        assert_eq!(buffer.append(PendingEvent::detached(2)), 2);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn drain_all_preserves_order_and_empties() {
        let mut buffer = EventBuffer::new(8);
        for i in 0..5 {
            buffer.append(PendingEvent::detached(i));
        }
        let drained: Vec<_> = buffer.drain_all().into_iter().map(|e| e.payload).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert!(buffer.is_empty());
        assert!(buffer.drain_all().is_empty());
    }

    #[test]
    fn append_past_capacity_is_not_rejected() {
        // capacity enforcement belongs to the orchestrator
        let mut buffer = EventBuffer::new(1);
        buffer.append(PendingEvent::detached("a"));
        assert_eq!(buffer.append(PendingEvent::detached("b")), 2);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let buffer: EventBuffer<()> = EventBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
    }
}
