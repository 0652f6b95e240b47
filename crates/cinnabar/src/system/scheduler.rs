//! Event queue driving every time-based behaviour of the system.

use crate::Fault;
use std::collections::VecDeque;
use tracing::error;

/// An event handler. Receives the channel the event was scheduled on and how many cycles late it
/// is being dispatched.
pub type Handler<C> = fn(&mut C, u32, u64) -> Result<(), Fault>;

/// A handle to a registered event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(u16);

impl EventHandle {
    /// Registration index of the handler.
    #[inline(always)]
    pub fn index(self) -> u16 {
        self.0
    }
}

/// A pending event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledEvent {
    /// Absolute deadline, in EE cycles.
    pub cycle: u64,
    pub handle: EventHandle,
    pub channel: u32,
    /// Zero for one-shot events.
    pub period: u64,
}

/// An event whose deadline has been reached.
pub struct Due<C> {
    pub handler: Handler<C>,
    pub handle: EventHandle,
    pub channel: u32,
    /// How many cycles past its deadline the event is.
    pub late: u64,
}

pub struct Scheduler<C> {
    elapsed: u64,
    handlers: Vec<Handler<C>>,
    scheduled: VecDeque<ScheduledEvent>,
}

impl<C> std::fmt::Debug for Scheduler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("elapsed", &self.elapsed)
            .field("handlers", &self.handlers.len())
            .field("scheduled", &self.scheduled.len())
            .finish()
    }
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self {
            elapsed: 0,
            handlers: Vec::with_capacity(8),
            scheduled: VecDeque::with_capacity(32),
        }
    }
}

impl<C> Scheduler<C> {
    /// Registers a handler, returning the handle used to schedule it. Handlers are never
    /// unregistered.
    pub fn register(&mut self, handler: Handler<C>) -> EventHandle {
        let index = u16::try_from(self.handlers.len()).unwrap_or(u16::MAX);
        self.handlers.push(handler);
        EventHandle(index)
    }

    #[inline(always)]
    fn deadline_after(&self, after: i64) -> u64 {
        if after < 0 {
            error!(after, now = self.elapsed, "negative schedule delay, clamping to zero");
        }

        self.elapsed + after.max(0).unsigned_abs()
    }

    #[inline(always)]
    fn insert(&mut self, event: ScheduledEvent) {
        let index = self.scheduled.partition_point(|e| e.cycle <= event.cycle);
        self.scheduled.insert(index, event);
    }

    /// Schedules `handle` on `channel` to fire `after` cycles from now, replacing any pending
    /// event for the same pair.
    #[inline(always)]
    pub fn schedule(&mut self, handle: EventHandle, channel: u32, after: i64) {
        let cycle = self.deadline_after(after);
        self.cancel(handle, channel);
        self.insert(ScheduledEvent {
            cycle,
            handle,
            channel,
            period: 0,
        });
    }

    /// Schedules `handle` on `channel` to fire `after` cycles from now and then every `period`
    /// cycles, replacing any pending event for the same pair.
    pub fn schedule_repeating(
        &mut self,
        handle: EventHandle,
        channel: u32,
        after: i64,
        period: u64,
    ) {
        let period = if period == 0 {
            error!(?handle, channel, "repeating event with a zero period, using 1");
            1
        } else {
            period
        };

        let cycle = self.deadline_after(after);
        self.cancel(handle, channel);
        self.insert(ScheduledEvent {
            cycle,
            handle,
            channel,
            period,
        });
    }

    #[inline(always)]
    pub fn cancel(&mut self, handle: EventHandle, channel: u32) {
        self.scheduled
            .retain(|e| e.handle != handle || e.channel != channel);
    }

    #[inline(always)]
    pub fn is_scheduled(&self, handle: EventHandle, channel: u32) -> bool {
        self.deadline(handle, channel).is_some()
    }

    /// Absolute deadline of the pending event for `handle` on `channel`, if any.
    pub fn deadline(&self, handle: EventHandle, channel: u32) -> Option<u64> {
        self.scheduled
            .iter()
            .find(|e| e.handle == handle && e.channel == channel)
            .map(|e| e.cycle)
    }

    /// Pending events, in dispatch order.
    pub fn pending(&self) -> impl Iterator<Item = &ScheduledEvent> + '_ {
        self.scheduled.iter()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.scheduled.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Moves time forward. Does not dispatch anything.
    #[inline(always)]
    pub fn advance(&mut self, count: u64) {
        self.elapsed += count;
    }

    /// How many cycles until the next event is due. Zero if it's already due.
    #[inline(always)]
    pub fn until_next(&self) -> Option<u64> {
        self.scheduled
            .front()
            .map(|e| e.cycle.saturating_sub(self.elapsed))
    }

    /// Removes the earliest due event, if any. Repeating events are rescheduled exactly one
    /// period after their previous deadline.
    pub fn pop(&mut self) -> Option<Due<C>> {
        if self.scheduled.front()?.cycle > self.elapsed {
            return None;
        }

        let event = self.scheduled.pop_front()?;
        if event.period != 0 {
            self.insert(ScheduledEvent {
                cycle: event.cycle + event.period,
                ..event
            });
        }

        Some(Due {
            handler: self.handlers[event.handle.0 as usize],
            handle: event.handle,
            channel: event.channel,
            late: self.elapsed - event.cycle,
        })
    }

    /// Current absolute time, in EE cycles.
    #[inline(always)]
    pub fn now(&self) -> u64 {
        self.elapsed
    }

    /// Drops every pending event and rewinds time to zero. Registered handlers are kept.
    pub fn reset(&mut self) {
        self.elapsed = 0;
        self.scheduled.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct Log {
        fired: Vec<(u32, u64, u64)>,
        now: u64,
    }

    fn record(log: &mut Log, channel: u32, late: u64) -> Result<(), Fault> {
        log.fired.push((channel, log.now, late));
        Ok(())
    }

    fn drain(scheduler: &mut Scheduler<Log>, log: &mut Log) {
        log.now = scheduler.now();
        while let Some(due) = scheduler.pop() {
            (due.handler)(log, due.channel, due.late).unwrap();
        }
    }

    #[test]
    fn same_deadline_fires_in_scheduling_order() {
        let mut scheduler = Scheduler::default();
        let mut log = Log::default();
        let a = scheduler.register(record);
        let b = scheduler.register(record);

        scheduler.schedule(b, 3, 10);
        scheduler.schedule(a, 1, 10);
        scheduler.schedule(a, 2, 5);
        scheduler.schedule(b, 4, 10);

        scheduler.advance(10);
        drain(&mut scheduler, &mut log);

        let channels: Vec<_> = log.fired.iter().map(|f| f.0).collect();
        assert_eq!(channels, [2, 3, 1, 4]);
        assert_eq!(log.fired[0].2, 5);
    }

    #[test]
    fn advance_does_not_fire() {
        let mut scheduler = Scheduler::default();
        let mut log = Log::default();
        let a = scheduler.register(record);

        scheduler.schedule(a, 0, 4);
        scheduler.advance(100);
        assert!(log.fired.is_empty());
        assert_eq!(scheduler.until_next(), Some(0));

        drain(&mut scheduler, &mut log);
        assert_eq!(log.fired, [(0, 100, 96)]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn repeating_events_do_not_drift() {
        const PERIOD: u64 = 1000;

        let mut scheduler = Scheduler::default();
        let mut log = Log::default();
        let a = scheduler.register(record);

        scheduler.schedule_repeating(a, 0, 250, PERIOD);
        let first = scheduler.deadline(a, 0).unwrap();

        // drain late and at irregular intervals
        for step in [300, 1337, 7, 2900, 12, 4444] {
            scheduler.advance(step);
            drain(&mut scheduler, &mut log);
        }

        let now = scheduler.now();
        let deadlines: Vec<_> = log.fired.iter().map(|(_, at, late)| at - late).collect();
        for (k, deadline) in deadlines.iter().enumerate() {
            assert_eq!(*deadline, first + k as u64 * PERIOD);
        }

        assert_eq!(deadlines.len() as u64, (now - first) / PERIOD + 1);
        assert_eq!(
            scheduler.deadline(a, 0),
            Some(first + deadlines.len() as u64 * PERIOD)
        );
    }

    #[test]
    fn negative_delay_is_clamped() {
        let mut scheduler = Scheduler::default();
        let mut log = Log::default();
        let a = scheduler.register(record);

        scheduler.advance(50);
        scheduler.schedule(a, 1, 0);
        scheduler.schedule(a, 2, -20);

        // the clamped event must not jump ahead of the earlier same-cycle event
        assert_eq!(scheduler.deadline(a, 2), Some(50));
        drain(&mut scheduler, &mut log);

        let channels: Vec<_> = log.fired.iter().map(|f| f.0).collect();
        assert_eq!(channels, [1, 2]);
        assert!(log.fired.iter().all(|f| f.2 == 0));
    }

    #[test]
    fn rescheduling_replaces_pending_event() {
        let mut scheduler = Scheduler::default();
        let mut log = Log::default();
        let a = scheduler.register(record);
        let b = scheduler.register(record);

        scheduler.schedule(a, 0, 10);
        scheduler.schedule(b, 0, 10);
        scheduler.schedule(a, 0, 30);
        assert_eq!(scheduler.len(), 2);
        assert_eq!(scheduler.deadline(a, 0), Some(30));

        scheduler.cancel(b, 0);
        assert!(!scheduler.is_scheduled(b, 0));

        scheduler.advance(30);
        drain(&mut scheduler, &mut log);
        assert_eq!(log.fired, [(0, 30, 0)]);
    }
}
