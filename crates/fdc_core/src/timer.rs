/*
    fdcdrv

    Copyright 2025 The fdcdrv Developers

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    timer.rs

    Timer service interface and a deterministic tick based implementation.
*/

//! Delayed continuations used by the driver: motor spin-up, drive select settling and
//! deferred motor-off. Callbacks are delivered as [TimerEvent] values to
//! [crate::FloppyDriver::handle_timer], in interrupt-equivalent context.

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum TimerEvent {
    /// The motor of the armed drive is up to speed.
    MotorReady,
    /// The drive select lines have settled after a DOR write.
    SelectSettled,
    /// Turn the motor of the given drive off.
    MotorOff(u8),
}

pub trait TimerService {
    /// Schedule a single-shot event. Scheduling an event that is already pending replaces it.
    fn schedule_after(&mut self, ticks: u32, event: TimerEvent);
    /// Cancel a pending event. Returns whether it was pending.
    fn cancel(&mut self, event: TimerEvent) -> bool;
}

#[derive(Copy, Clone, Debug)]
struct PendingTimer {
    deadline: u64,
    seq: u64,
    event: TimerEvent,
}

/// A timer that only advances when told to. Events with the same deadline fire in the order
/// they were scheduled.
#[derive(Default)]
pub struct TickTimer {
    now: u64,
    seq: u64,
    pending: Vec<PendingTimer>,
}

impl TickTimer {
    pub fn new() -> Self {
        Default::default()
    }

    #[inline]
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn is_pending(&self, event: TimerEvent) -> bool {
        self.pending.iter().any(|p| p.event == event)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.pending.iter().map(|p| p.deadline).min()
    }

    /// Advance the current time by `ticks` without firing anything.
    pub fn tick(&mut self, ticks: u64) {
        self.now += ticks;
    }

    fn earliest(&self) -> Option<usize> {
        self.pending
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| (p.deadline, p.seq))
            .map(|(i, _)| i)
    }

    /// Remove and return the earliest event whose deadline has passed.
    pub fn pop_expired(&mut self) -> Option<TimerEvent> {
        let idx = self.earliest()?;
        if self.pending[idx].deadline > self.now {
            return None;
        }
        Some(self.pending.remove(idx).event)
    }

    /// Advance time to the earliest deadline, then remove and return that event.
    pub fn advance_to_next(&mut self) -> Option<TimerEvent> {
        let idx = self.earliest()?;
        let timer = self.pending.remove(idx);
        self.now = self.now.max(timer.deadline);
        Some(timer.event)
    }
}

impl TimerService for TickTimer {
    fn schedule_after(&mut self, ticks: u32, event: TimerEvent) {
        self.pending.retain(|p| p.event != event);
        self.seq += 1;
        log::trace!("TickTimer: {} scheduled in {} ticks", event, ticks);
        self.pending.push(PendingTimer {
            deadline: self.now + ticks as u64,
            seq: self.seq,
            event,
        });
    }

    fn cancel(&mut self, event: TimerEvent) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.event != event);
        before != self.pending.len()
    }
}
