/// Named periodic timers owned by the control thread.
///
/// The control loop asks `until_next_due` how long it may sleep, then
/// `take_due` for the timers to fire; callbacks therefore run serially on one
/// thread.  A timer that fell behind fires once and is rescheduled from now,
/// never in a burst.
use std::time::{Duration, Instant};

pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(45);
pub const RECONNECT_PERIOD: Duration = Duration::from_secs(2);

/// Upper bound on one control-loop sleep when no timer is armed.
const IDLE_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerId {
    Poll,
    Heartbeat,
    Reconnect,
}

impl TimerId {
    pub const ALL: [TimerId; 3] = [TimerId::Poll, TimerId::Heartbeat, TimerId::Reconnect];

    fn index(self) -> usize {
        match self {
            TimerId::Poll => 0,
            TimerId::Heartbeat => 1,
            TimerId::Reconnect => 2,
        }
    }
}

/// What the pipeline may do to the timers.
pub trait TimerControl {
    /// Arm `id`; its first tick comes one period from now.  No-op if running.
    fn start(&mut self, id: TimerId);
    fn stop(&mut self, id: TimerId);
    fn is_running(&self, id: TimerId) -> bool;
    /// Change the period; a running timer is rescheduled from now.
    fn set_period(&mut self, id: TimerId, period: Duration);
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    period: Duration,
    next_due: Option<Instant>,
}

#[derive(Debug)]
pub struct Timers {
    slots: [Slot; 3],
}

impl Timers {
    pub fn new(poll_period: Duration) -> Self {
        let slot = |period| Slot {
            period,
            next_due: None,
        };
        Self {
            slots: [
                slot(poll_period),
                slot(HEARTBEAT_PERIOD),
                slot(RECONNECT_PERIOD),
            ],
        }
    }

    /// Arm `id` so that it fires on the next loop iteration.
    pub fn start_now(&mut self, id: TimerId, now: Instant) {
        self.slots[id.index()].next_due = Some(now);
    }

    pub fn stop_all(&mut self) {
        for slot in &mut self.slots {
            slot.next_due = None;
        }
    }

    pub fn period(&self, id: TimerId) -> Duration {
        self.slots[id.index()].period
    }

    pub fn until_next_due(&self, now: Instant) -> Duration {
        self.slots
            .iter()
            .filter_map(|s| s.next_due)
            .min()
            .map(|due| due.saturating_duration_since(now))
            .unwrap_or(IDLE_WAIT)
    }

    /// Timers due at `now`, in fixed order, each rescheduled one period on.
    pub fn take_due(&mut self, now: Instant) -> Vec<TimerId> {
        let mut due = Vec::new();
        for id in TimerId::ALL {
            let slot = &mut self.slots[id.index()];
            if let Some(at) = slot.next_due {
                if at <= now {
                    let next = at + slot.period;
                    slot.next_due = Some(if next <= now { now + slot.period } else { next });
                    due.push(id);
                }
            }
        }
        due
    }

    fn start_at(&mut self, id: TimerId, now: Instant) {
        let slot = &mut self.slots[id.index()];
        if slot.next_due.is_none() {
            slot.next_due = Some(now + slot.period);
        }
    }
}

impl TimerControl for Timers {
    fn start(&mut self, id: TimerId) {
        self.start_at(id, Instant::now());
    }

    fn stop(&mut self, id: TimerId) {
        self.slots[id.index()].next_due = None;
    }

    fn is_running(&self, id: TimerId) -> bool {
        self.slots[id.index()].next_due.is_some()
    }

    fn set_period(&mut self, id: TimerId, period: Duration) {
        let slot = &mut self.slots[id.index()];
        slot.period = period;
        if slot.next_due.is_some() {
            slot.next_due = Some(Instant::now() + period);
        }
    }
}
