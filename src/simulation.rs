/// Simulation execution loop.
///
/// Drives the scheduler: pops events, advances virtual time, dispatches
/// to a handler. The loop is synchronous and single-threaded, one event
/// loop per simulation instance; nothing is shared across instances.

use tracing::{debug, error};

use crate::device::DeviceId;
use crate::error::{CoexError, CoexResult};
use crate::event::{Event, EventId, EventType};
use crate::scheduler::Scheduler;
use crate::time::VirtualTime;

// ── Handler trait ─────────────────────────────────────────────────────

/// Reacts to dispatched events.
///
/// The handler receives a `SimulationContext` so it can schedule follow-up
/// events. An `Err` that is fatal stops the run; anything else is the
/// handler's to log.
pub trait EventHandler {
    fn handle(&mut self, ctx: &mut SimulationContext, event: &Event) -> CoexResult<()>;
}

/// A handler backed by a closure, for tests and one-off scripts.
impl<F> EventHandler for F
where
    F: FnMut(&mut SimulationContext, &Event) -> CoexResult<()>,
{
    fn handle(&mut self, ctx: &mut SimulationContext, event: &Event) -> CoexResult<()> {
        (self)(ctx, event)
    }
}

// ── Simulation Context ───────────────────────────────────────────────

/// Mutable context passed to the handler on every dispatch.
///
/// Borrows the scheduler mutably, so a handler can only affect dispatch
/// order through the schedule API.
pub struct SimulationContext<'a> {
    pub(crate) scheduler: &'a mut Scheduler,
    pub(crate) now: VirtualTime,
}

impl<'a> SimulationContext<'a> {
    #[inline]
    pub fn now(&self) -> VirtualTime {
        self.now
    }

    /// Schedule an event at an absolute virtual time.
    pub fn schedule_at(&mut self, at: VirtualTime, payload: EventType) -> CoexResult<EventId> {
        self.check_causal(at)?;
        Ok(self.scheduler.schedule(at, payload))
    }

    /// Schedule an event `delay` ticks after now.
    pub fn schedule_after(&mut self, delay: u64, payload: EventType) -> CoexResult<EventId> {
        let at = self.now.advance(delay).ok_or(CoexError::TimeOverflow)?;
        Ok(self.scheduler.schedule(at, payload))
    }

    /// Schedule an event `delay` ticks after now, on behalf of `device`.
    pub fn schedule_with_context(
        &mut self,
        delay: u64,
        device: DeviceId,
        payload: EventType,
    ) -> CoexResult<EventId> {
        let at = self.now.advance(delay).ok_or(CoexError::TimeOverflow)?;
        Ok(self.scheduler.schedule_with_context(at, device, payload))
    }

    pub fn pending_count(&self) -> usize {
        self.scheduler.len()
    }

    fn check_causal(&self, at: VirtualTime) -> CoexResult<()> {
        if at.is_before(self.now) {
            return Err(CoexError::NonCausalEvent {
                requested: at.ticks(),
                current: self.now.ticks(),
            });
        }
        Ok(())
    }
}

// ── Simulation ────────────────────────────────────────────────────────

/// Top-level simulation driver.
///
/// Owns the scheduler and the clock. `run` drains the queue, `run_until`
/// stops at a virtual deadline, `step` dispatches exactly one event.
#[derive(Debug, Clone, Default)]
pub struct Simulation {
    scheduler: Scheduler,
    current_time: VirtualTime,
    events_processed: u64,
}

impl Simulation {
    pub fn new() -> Self {
        Simulation {
            scheduler: Scheduler::new(),
            current_time: VirtualTime::ZERO,
            events_processed: 0,
        }
    }

    pub fn current_time(&self) -> VirtualTime {
        self.current_time
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn pending_count(&self) -> usize {
        self.scheduler.len()
    }

    /// Schedule an event before the simulation starts running.
    pub fn schedule(&mut self, at: VirtualTime, payload: EventType) -> EventId {
        self.scheduler.schedule(at, payload)
    }

    /// Schedule a device-context event before the simulation starts running.
    pub fn schedule_with_context(
        &mut self,
        at: VirtualTime,
        device: DeviceId,
        payload: EventType,
    ) -> EventId {
        self.scheduler.schedule_with_context(at, device, payload)
    }

    /// Pop one event, advance time, dispatch.
    ///
    /// `Ok(None)` when the queue is empty. A fatal handler error is
    /// returned; a non-fatal one is logged and the event counts as handled.
    pub fn step(&mut self, handler: &mut dyn EventHandler) -> CoexResult<Option<Event>> {
        match self.scheduler.pop_next() {
            Some(event) => self.dispatch(event, handler).map(Some),
            None => Ok(None),
        }
    }

    /// Run until the event queue is empty.
    ///
    /// Returns the number of events processed during this call. Never
    /// returns while a periodic schedule keeps re-arming itself; use
    /// [`run_until`](Self::run_until) for those.
    pub fn run(&mut self, handler: &mut dyn EventHandler) -> CoexResult<u64> {
        let start = self.events_processed;
        while self.step(handler)?.is_some() {}
        Ok(self.events_processed - start)
    }

    /// Process every event scheduled at or before `stop`, then set the
    /// clock to `stop`. Later events stay queued.
    pub fn run_until(
        &mut self,
        stop: VirtualTime,
        handler: &mut dyn EventHandler,
    ) -> CoexResult<u64> {
        let start = self.events_processed;
        while let Some(event) = self.scheduler.pop_due(stop) {
            self.dispatch(event, handler)?;
        }
        if self.current_time.is_before(stop) {
            self.current_time = stop;
        }
        Ok(self.events_processed - start)
    }

    fn dispatch(&mut self, event: Event, handler: &mut dyn EventHandler) -> CoexResult<Event> {
        if event.scheduled_at.is_before(self.current_time) {
            return Err(CoexError::NonCausalEvent {
                requested: event.scheduled_at.ticks(),
                current: self.current_time.ticks(),
            });
        }
        self.current_time = event.scheduled_at;
        self.events_processed += 1;

        let mut ctx = SimulationContext {
            scheduler: &mut self.scheduler,
            now: self.current_time,
        };
        match handler.handle(&mut ctx, &event) {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                error!(time = %self.current_time, event = %event.payload, error = %e, "fatal error, aborting run");
                return Err(e);
            }
            Err(e) => {
                debug!(time = %self.current_time, event = %event.payload, error = %e, "non-fatal error");
            }
        }
        Ok(event)
    }

    pub fn is_finished(&self) -> bool {
        self.scheduler.is_empty()
    }
}
