/// Deterministic event queue.
///
/// Min-heap on `(scheduled_at, event_id)` built from `BinaryHeap` and the
/// reversed `Ord` on `Event`. IDs only grow, so events sharing an instant
/// pop in the order they were scheduled and equal inputs replay equally.

use std::collections::BinaryHeap;

use crate::device::DeviceId;
use crate::event::{Event, EventId, EventIdGen, EventType};
use crate::time::VirtualTime;

#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    queue: BinaryHeap<Event>,
    ids: EventIdGen,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, at: VirtualTime, context: Option<DeviceId>, payload: EventType) -> EventId {
        let id = self.ids.next_id();
        let event = match context {
            Some(device) => Event::with_context(id, at, device, payload),
            None => Event::new(id, at, payload),
        };
        self.queue.push(event);
        id
    }

    /// Queue a scenario-level event.
    pub fn schedule(&mut self, at: VirtualTime, payload: EventType) -> EventId {
        self.push(at, None, payload)
    }

    /// Queue an event that runs on behalf of `device`.
    pub fn schedule_with_context(
        &mut self,
        at: VirtualTime,
        device: DeviceId,
        payload: EventType,
    ) -> EventId {
        self.push(at, Some(device), payload)
    }

    /// Earliest event, lowest ID first on ties.
    pub fn pop_next(&mut self) -> Option<Event> {
        self.queue.pop()
    }

    /// Like [`pop_next`](Self::pop_next), but leaves anything after `stop`
    /// in the queue.
    pub fn pop_due(&mut self, stop: VirtualTime) -> Option<Event> {
        match self.queue.peek() {
            Some(next) if !stop.is_before(next.scheduled_at) => self.queue.pop(),
            _ => None,
        }
    }

    /// Time of the next event, if any.
    pub fn next_time(&self) -> Option<VirtualTime> {
        self.queue.peek().map(|e| e.scheduled_at)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Queued events carrying `device` as their context.
    pub fn pending_for(&self, device: DeviceId) -> usize {
        self.queue.iter().filter(|e| e.context == Some(device)).count()
    }
}
