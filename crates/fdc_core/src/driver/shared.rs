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

    driver::shared.rs

    Serializes the request path against interrupt and timer delivery.
*/

//! Top half / bottom half serialization.
//!
//! The top half (request submission) may block on the driver lock. The bottom half
//! (interrupt and timer delivery) never blocks: if the lock is taken it posts the event
//! to a bounded queue and returns. Whoever holds the lock drains that queue before and
//! after its own work, and checks it once more after unlocking so an event posted in the
//! window between the last drain and the unlock is not stranded.
//!
//! Deferred events coalesce: an event that is already waiting is not queued again, the
//! same way a second edge on a pending IRQ line is absorbed by the interrupt controller.
//! There are only [DISTINCT_EVENTS] different events, so the queue can never fill.

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
    Mutex,
    MutexGuard,
    PoisonError,
    TryLockError,
};

use crate::{
    driver::{DriverContext, FloppyDriver},
    timer::TimerEvent,
};
use crossbeam_channel::{Receiver, Sender};

pub const EVENT_QUEUE_LEN: usize = 64;
/// Interrupt, MotorReady, SelectSettled and one MotorOff per drive.
pub const DISTINCT_EVENTS: usize = 7;
const _: () = assert!(DISTINCT_EVENTS <= EVENT_QUEUE_LEN);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BottomHalfEvent {
    Interrupt,
    Timer(TimerEvent),
}

impl BottomHalfEvent {
    /// One bit per distinct event.
    fn pending_bit(&self) -> u8 {
        match self {
            BottomHalfEvent::Interrupt => 0x01,
            BottomHalfEvent::Timer(TimerEvent::MotorReady) => 0x02,
            BottomHalfEvent::Timer(TimerEvent::SelectSettled) => 0x04,
            BottomHalfEvent::Timer(TimerEvent::MotorOff(drive)) => 0x08 << (drive & 0x03),
        }
    }
}

#[derive(Clone)]
pub struct SharedDriver {
    inner: Arc<Mutex<FloppyDriver>>,
    deferred_tx: Sender<BottomHalfEvent>,
    deferred_rx: Receiver<BottomHalfEvent>,
    /// [BottomHalfEvent::pending_bit] of every event in the deferral queue.
    deferred_mask: Arc<AtomicU8>,
}

impl SharedDriver {
    pub fn new(driver: FloppyDriver) -> Self {
        let (deferred_tx, deferred_rx) = crossbeam_channel::bounded(EVENT_QUEUE_LEN);
        Self {
            inner: Arc::new(Mutex::new(driver)),
            deferred_tx,
            deferred_rx,
            deferred_mask: Arc::new(AtomicU8::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FloppyDriver> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of bottom-half events waiting for the lock holder.
    pub fn deferred_len(&self) -> usize {
        self.deferred_rx.len()
    }

    /// Run `f` with exclusive access to the driver, without draining deferred events.
    /// Intended for inspection.
    pub fn with_driver<R>(&self, f: impl FnOnce(&mut FloppyDriver) -> R) -> R {
        f(&mut self.lock())
    }

    /// Top half: run `f` under the lock, processing any deferred bottom-half events
    /// around it.
    pub fn locked<R>(
        &self,
        ctx: &mut DriverContext<'_>,
        f: impl FnOnce(&mut FloppyDriver, &mut DriverContext<'_>) -> R,
    ) -> R {
        let result = {
            let mut driver = self.lock();
            self.drain(&mut driver, ctx);
            let result = f(&mut driver, ctx);
            self.drain(&mut driver, ctx);
            result
        };
        self.recheck(ctx);
        result
    }

    /// Top half entry point.
    pub fn request_pump(&self, ctx: &mut DriverContext<'_>) {
        self.locked(ctx, |driver, ctx| driver.request_pump(ctx));
    }

    /// Bottom half: deliver a floppy interrupt.
    pub fn post_interrupt(&self, ctx: &mut DriverContext<'_>) {
        self.post(ctx, BottomHalfEvent::Interrupt);
    }

    /// Bottom half: deliver a timer expiry.
    pub fn post_timer(&self, ctx: &mut DriverContext<'_>, event: TimerEvent) {
        self.post(ctx, BottomHalfEvent::Timer(event));
    }

    fn post(&self, ctx: &mut DriverContext<'_>, event: BottomHalfEvent) {
        match self.inner.try_lock() {
            Ok(mut driver) => {
                self.drain(&mut driver, ctx);
                Self::deliver(&mut driver, ctx, event);
                self.drain(&mut driver, ctx);
            }
            Err(TryLockError::WouldBlock) => {
                self.defer(event);
                return;
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                let mut driver = poisoned.into_inner();
                self.drain(&mut driver, ctx);
                Self::deliver(&mut driver, ctx, event);
                self.drain(&mut driver, ctx);
            }
        }
        self.recheck(ctx);
    }

    fn defer(&self, event: BottomHalfEvent) {
        let bit = event.pending_bit();
        if self.deferred_mask.fetch_or(bit, Ordering::AcqRel) & bit != 0 {
            log::trace!("SharedDriver: {:?} already deferred", event);
            return;
        }
        log::trace!("SharedDriver: lock held, deferring {:?}", event);
        let sent = self.deferred_tx.try_send(event);
        debug_assert!(sent.is_ok(), "deferral queue holds every distinct event");
        if let Err(err) = sent {
            self.deferred_mask.fetch_and(!bit, Ordering::AcqRel);
            log::error!("SharedDriver: could not defer {:?}: {}", event, err);
        }
    }

    fn deliver(driver: &mut FloppyDriver, ctx: &mut DriverContext<'_>, event: BottomHalfEvent) {
        match event {
            BottomHalfEvent::Interrupt => driver.handle_interrupt(ctx),
            BottomHalfEvent::Timer(timer_event) => driver.handle_timer(ctx, timer_event),
        }
    }

    fn drain(&self, driver: &mut FloppyDriver, ctx: &mut DriverContext<'_>) {
        while let Ok(event) = self.deferred_rx.try_recv() {
            self.deferred_mask.fetch_and(!event.pending_bit(), Ordering::AcqRel);
            log::trace!("SharedDriver: delivering deferred {:?}", event);
            Self::deliver(driver, ctx, event);
        }
    }

    /// Called after unlocking. Picks up events that were posted after the last drain.
    fn recheck(&self, ctx: &mut DriverContext<'_>) {
        while !self.deferred_rx.is_empty() {
            match self.inner.try_lock() {
                Ok(mut driver) => self.drain(&mut driver, ctx),
                // The new holder drains on its way out.
                Err(TryLockError::WouldBlock) => return,
                Err(TryLockError::Poisoned(poisoned)) => self.drain(&mut poisoned.into_inner(), ctx),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::FloppyBus,
        driver::config::DriverConfig,
        request::BlockQueue,
        timer::TickTimer,
    };

    /// A controller that never becomes ready.
    struct DeadBus;

    impl FloppyBus for DeadBus {
        fn io_read_u8(&mut self, _port: u16) -> u8 {
            0
        }
        fn io_write_u8(&mut self, _port: u16, _data: u8) {}
        fn mem_read(&self, _addr: u32, _dst: &mut [u8]) {}
        fn mem_write(&mut self, _addr: u32, _src: &[u8]) {}
    }

    fn driver() -> FloppyDriver {
        FloppyDriver::new(DriverConfig {
            poll_budget: 4,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn event_posted_under_lock_is_deferred_not_lost() {
        let shared = SharedDriver::new(driver());
        let bottom_half = shared.clone();
        let (mut queue, _completions) = BlockQueue::new();
        let mut timer = TickTimer::new();
        let mut bus = DeadBus;
        let mut ctx = DriverContext {
            bus: &mut bus,
            timer: &mut timer,
            queue: &mut queue,
        };

        let (mut queue2, _completions2) = BlockQueue::new();
        let mut timer2 = TickTimer::new();
        let mut bus2 = DeadBus;

        shared.locked(&mut ctx, |driver, _ctx| {
            let mut isr_ctx = DriverContext {
                bus: &mut bus2,
                timer: &mut timer2,
                queue: &mut queue2,
            };
            bottom_half.post_interrupt(&mut isr_ctx);
            assert_eq!(bottom_half.deferred_len(), 1);
            assert_eq!(driver.stats().unexpected_interrupts, 0);
        });

        assert_eq!(shared.deferred_len(), 0);
        shared.with_driver(|driver| {
            assert_eq!(driver.stats().unexpected_interrupts, 1);
            // The dead controller times out the SENSE INTERRUPT.
            assert!(driver.session().needs_reset);
        });
    }

    #[test]
    fn repeated_events_under_lock_coalesce() {
        let shared = SharedDriver::new(driver());
        let bottom_half = shared.clone();
        let (mut queue, _completions) = BlockQueue::new();
        let mut timer = TickTimer::new();
        let mut bus = DeadBus;
        let mut ctx = DriverContext {
            bus: &mut bus,
            timer: &mut timer,
            queue: &mut queue,
        };

        let (mut queue2, _completions2) = BlockQueue::new();
        let mut timer2 = TickTimer::new();
        let mut bus2 = DeadBus;

        shared.locked(&mut ctx, |_driver, _ctx| {
            let mut isr_ctx = DriverContext {
                bus: &mut bus2,
                timer: &mut timer2,
                queue: &mut queue2,
            };
            for _ in 0..EVENT_QUEUE_LEN * 2 {
                bottom_half.post_interrupt(&mut isr_ctx);
                for drive in 0..4 {
                    bottom_half.post_timer(&mut isr_ctx, TimerEvent::MotorOff(drive));
                }
                bottom_half.post_timer(&mut isr_ctx, TimerEvent::MotorReady);
                bottom_half.post_timer(&mut isr_ctx, TimerEvent::SelectSettled);
            }
            assert_eq!(bottom_half.deferred_len(), DISTINCT_EVENTS);
        });

        assert_eq!(shared.deferred_len(), 0);
        assert_eq!(shared.with_driver(|d| d.stats().unexpected_interrupts), 1);
    }

    #[test]
    fn event_posted_without_contention_is_handled_immediately() {
        let shared = SharedDriver::new(driver());
        let (mut queue, _completions) = BlockQueue::new();
        let mut timer = TickTimer::new();
        let mut bus = DeadBus;
        let mut ctx = DriverContext {
            bus: &mut bus,
            timer: &mut timer,
            queue: &mut queue,
        };
        shared.post_timer(&mut ctx, TimerEvent::MotorReady);
        shared.post_interrupt(&mut ctx);
        assert_eq!(shared.deferred_len(), 0);
        assert_eq!(shared.with_driver(|d| d.stats().unexpected_interrupts), 1);
    }
}
