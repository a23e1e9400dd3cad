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

    driver::dispatch.rs

    Request dispatcher: admission, addressing, cache service and completion.
*/

use crate::{
    driver::{geometry::geometry_for, motor, state::TransferState, DriverContext, FloppyDriver, InFlightRequest},
    error::FloppyError,
    request::{Direction, Request},
    timer::TimerEvent,
};

impl FloppyDriver {
    /// Start work on queued requests. Returns once a request is armed and waiting on the
    /// hardware, or the queue is empty.
    ///
    /// Reads of a cached track and requests that fail validation complete here without
    /// touching the controller, so one call may complete any number of requests.
    pub fn request_pump(&mut self, ctx: &mut DriverContext<'_>) {
        while self.session.state == TransferState::Idle {
            if self.current.is_none() {
                let Some(request) = ctx.queue.next_request()
                else {
                    return;
                };
                match self.admit(request) {
                    Ok(inflight) => self.current = Some(inflight),
                    Err((request, err)) => {
                        self.complete(ctx, request, Err(err));
                        continue;
                    }
                }
            }
            self.dispatch_current(ctx);
        }
    }

    /// Validate a new request and compute its addressing.
    fn admit(&self, request: Request) -> Result<InFlightRequest, (Request, FloppyError)> {
        let geometry = match geometry_for(request.device.media_type()) {
            Ok(geometry) => geometry,
            Err(err) => return Err((request, err)),
        };
        if !geometry.contains(request.block) {
            let err = FloppyError::OutOfRange {
                block: request.block,
                total: geometry.total_sectors,
            };
            return Err((request, err));
        }
        let chs = geometry.decompose(request.block);
        log::debug!(
            "admit(): tag:{} {} {} block {} -> {}",
            request.tag,
            request.device,
            request.direction,
            request.block,
            chs
        );
        Ok(InFlightRequest {
            request,
            geometry,
            chs,
            error_count: 0,
            whole_track: false,
        })
    }

    /// Serve the current request from the cache or arm the hardware for it.
    fn dispatch_current(&mut self, ctx: &mut DriverContext<'_>) {
        let Some(inflight) = self.current.as_ref()
        else {
            return;
        };
        let drive = inflight.drive();
        let chs = inflight.chs;
        let index = chs.track_index(inflight.geometry);
        let direction = inflight.request.direction;
        let buffer = inflight.request.buffer;

        if self.session.selected_drive != Some(drive) {
            self.session.forget_track();
        }

        if self.cache.matches(drive, chs.seek_track) {
            match direction {
                Direction::Read => {
                    if let Some(sector) = self.cache.sector(drive, chs.seek_track, index) {
                        log::trace!("dispatch_current(): cache hit drive {} {}", drive, chs);
                        ctx.bus.mem_write(buffer.base(), sector);
                        self.stats.cache_hits += 1;
                        self.finish(ctx, Ok(()));
                        return;
                    }
                }
                Direction::Write => {
                    let mut data = vec![0u8; buffer.len()];
                    ctx.bus.mem_read(buffer.base(), &mut data);
                    self.cache.write_sector(drive, chs.seek_track, index, &data);
                }
            }
        }

        self.session.needs_seek = self.session.last_known_track != Some(chs.seek_track);
        self.arm(ctx, drive);
    }

    /// Turn the motor on and wait for it. Nothing is sent to the controller until the
    /// drive is up to speed.
    fn arm(&mut self, ctx: &mut DriverContext<'_>, drive: u8) {
        ctx.timer.cancel(TimerEvent::MotorOff(drive));
        let ticks = motor::motor_on(&mut self.session, ctx.bus, drive, &self.config);
        self.session.set_state(TransferState::MotorWarmup);
        ctx.timer.schedule_after(ticks, TimerEvent::MotorReady);
    }

    /// Complete the request in flight and schedule its motor to stop.
    pub(crate) fn finish(&mut self, ctx: &mut DriverContext<'_>, result: Result<(), FloppyError>) {
        self.plan = None;
        self.session.active_command = None;
        self.session.set_state(TransferState::Idle);
        let Some(inflight) = self.current.take()
        else {
            log::error!("finish(): no request in flight");
            return;
        };
        let drive = inflight.drive();
        if result.is_err() && self.cache.matches(drive, inflight.chs.seek_track) {
            self.cache.invalidate();
        }
        self.complete(ctx, inflight.request, result);
        ctx.timer
            .schedule_after(self.config.motor_off_ticks, TimerEvent::MotorOff(drive));
    }

    fn complete(&mut self, ctx: &mut DriverContext<'_>, request: Request, result: Result<(), FloppyError>) {
        match &result {
            Ok(()) => self.stats.completed += 1,
            Err(_) => self.stats.failed += 1,
        }
        ctx.queue.complete_request(request, result);
    }
}
