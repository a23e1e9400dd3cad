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

    driver::mod.rs

    The floppy transfer engine: stage handlers of the transfer state machine.
*/

//! The floppy transfer engine.
//!
//! A request moves through a fixed pipeline: motor warm-up and drive selection (timer
//! driven), then optionally a controller reset, a recalibration and a seek, and finally the
//! data transfer (interrupt driven). Which handler an interrupt completes is decided by
//! [TransferState], not by the interrupt itself. Failed seeks and transfers are counted
//! against the request and escalate through [state::recovery_policy].
//!
//! All methods here run to completion without blocking. Serialization between the request
//! submission path and interrupt/timer delivery is the job of [shared::SharedDriver].

pub mod cache;
pub mod chs;
pub mod config;
pub mod dispatch;
pub mod dma;
pub mod geometry;
pub mod motor;
pub mod port;
pub mod session;
pub mod shared;
pub mod state;

#[cfg(test)]
mod tests;

use crate::{
    bus::{FloppyBus, InterruptRegistry, FDC_IRQ, FD_DCR, FD_DIR},
    driver::{
        cache::TrackCache,
        chs::ChsAddress,
        config::DriverConfig,
        dma::{DmaBuffers, PhysicalTransferPlan, TransferTarget},
        geometry::DriveGeometry,
        port::{FdcCommand, PortProtocol, TransferCommand},
        session::ControllerSession,
        state::{recovery_policy, RecoveryAction, TransferState},
    },
    error::FloppyError,
    request::{Direction, Request, RequestQueue},
    timer::{TimerEvent, TimerService},
};

/// Bit 7 of the digital input register reflects the disk change line of the selected drive.
pub const DIR_DISK_CHANGED: u8 = 0x80;

/// The collaborators every entry point needs. Built fresh by the caller for each call.
pub struct DriverContext<'a> {
    pub bus: &'a mut dyn FloppyBus,
    pub timer: &'a mut dyn TimerService,
    pub queue: &'a mut dyn RequestQueue,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub completed: u64,
    pub failed: u64,
    pub cache_hits: u64,
    pub seeks: u64,
    pub recalibrates: u64,
    pub resets: u64,
    pub retries: u64,
    pub bounce_transfers: u64,
    pub track_reads: u64,
    pub unexpected_interrupts: u64,
}

/// The request currently being worked on.
#[derive(Clone, Debug)]
pub struct InFlightRequest {
    pub request: Request,
    pub geometry: &'static DriveGeometry,
    pub chs: ChsAddress,
    pub error_count: u32,
    /// Whether the current attempt reads the whole track into the staging buffer.
    pub whole_track: bool,
}

impl InFlightRequest {
    #[inline]
    pub fn drive(&self) -> u8 {
        self.request.device.drive()
    }
}

pub struct FloppyDriver {
    config: DriverConfig,
    port: PortProtocol,
    session: ControllerSession,
    cache: TrackCache,
    dma: DmaBuffers,
    current: Option<InFlightRequest>,
    plan: Option<PhysicalTransferPlan>,
    stats: DriverStats,
}

impl FloppyDriver {
    pub fn new(config: DriverConfig) -> Result<Self, FloppyError> {
        if config.max_errors == 0 {
            return Err(FloppyError::InvalidConfig("max_errors must be nonzero"));
        }
        if config.poll_budget == 0 {
            return Err(FloppyError::InvalidConfig("poll_budget must be nonzero"));
        }
        let dma = DmaBuffers::new(&config)?;
        Ok(Self {
            port: PortProtocol::new(config.poll_budget),
            session: ControllerSession::new(),
            cache: TrackCache::new(),
            dma,
            current: None,
            plan: None,
            stats: DriverStats::default(),
            config,
        })
    }

    /// Bring the controller out of reset with DMA enabled and register the interrupt handler.
    /// The head position of every drive is unknown until the first recalibration.
    pub fn driver_init<P>(&mut self, platform: &mut P)
    where
        P: FloppyBus + InterruptRegistry,
    {
        log::debug!("FloppyDriver: init");
        motor::init_dor(&mut self.session, platform);
        platform.register_handler(FDC_IRQ);
        self.session.needs_recalibrate = true;
        self.session.forget_track();
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }
    pub fn state(&self) -> TransferState {
        self.session.state
    }
    pub fn session(&self) -> &ControllerSession {
        &self.session
    }
    pub fn cache(&self) -> &TrackCache {
        &self.cache
    }
    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }
    pub fn current(&self) -> Option<&InFlightRequest> {
        self.current.as_ref()
    }
    pub fn is_busy(&self) -> bool {
        self.current.is_some() || self.session.state != TransferState::Idle
    }

    /// Return and clear the changed flag of a drive. A change forces a recalibration before
    /// the next transfer.
    ///
    /// When no change has been recorded, the cached track of the drive is dropped so that
    /// the next read goes to the hardware and samples the disk change line. The caller
    /// should issue such a read and query again before trusting a `false` answer.
    pub fn handle_media_change_query(&mut self, drive: u8) -> bool {
        if self.session.take_changed(drive) {
            log::debug!("Drive {}: media change reported", drive);
            self.session.needs_recalibrate = true;
            true
        }
        else {
            self.cache.invalidate_drive(drive);
            false
        }
    }

    /// Floppy interrupt entry point.
    pub fn handle_interrupt(&mut self, ctx: &mut DriverContext<'_>) {
        log::trace!("handle_interrupt(): state: {}", self.session.state);
        let result = match self.session.state {
            TransferState::Idle | TransferState::MotorWarmup => {
                self.unexpected_interrupt(ctx);
                Ok(())
            }
            TransferState::Resetting => self.reset_complete(ctx),
            TransferState::Recalibrating => self.recalibrate_complete(ctx),
            TransferState::Seeking => self.seek_complete(ctx),
            TransferState::Transferring => self.transfer_complete(ctx),
        };
        if let Err(err) = result {
            self.stage_failed(ctx, err);
        }
        self.request_pump(ctx);
    }

    /// Timer expiry entry point.
    pub fn handle_timer(&mut self, ctx: &mut DriverContext<'_>, event: TimerEvent) {
        log::trace!("handle_timer(): {} in state {}", event, self.session.state);
        match event {
            TimerEvent::MotorReady if self.session.state == TransferState::MotorWarmup => {
                self.motor_ready(ctx);
            }
            TimerEvent::SelectSettled if self.session.state == TransferState::MotorWarmup => {
                self.drive_ready(ctx);
            }
            TimerEvent::MotorOff(drive) => {
                if self.current.as_ref().map(|c| c.drive()) != Some(drive) {
                    motor::motor_off(&mut self.session, ctx.bus, drive);
                }
            }
            _ => {
                log::debug!("handle_timer(): stale {} ignored", event);
            }
        }
        self.request_pump(ctx);
    }

    fn motor_ready(&mut self, ctx: &mut DriverContext<'_>) {
        let Some(drive) = self.current.as_ref().map(|c| c.drive())
        else {
            self.session.set_state(TransferState::Idle);
            return;
        };
        if motor::select_drive(&mut self.session, ctx.bus, drive) {
            ctx.timer
                .schedule_after(self.config.select_settle_ticks, TimerEvent::SelectSettled);
        }
        else {
            self.drive_ready(ctx);
        }
    }

    /// The motor is up to speed and the drive is selected. Check for a disk change, then
    /// start whichever stage the session needs first.
    fn drive_ready(&mut self, ctx: &mut DriverContext<'_>) {
        let Some(drive) = self.current.as_ref().map(|c| c.drive())
        else {
            self.session.set_state(TransferState::Idle);
            return;
        };

        if ctx.bus.io_read_u8(FD_DIR) & DIR_DISK_CHANGED != 0 {
            log::debug!("Drive {}: disk change line active", drive);
            self.session.mark_changed(drive);
            self.cache.invalidate();
            self.session.needs_recalibrate = true;
            self.session.forget_track();
        }

        let result = if self.session.needs_reset {
            self.start_reset(ctx);
            Ok(())
        }
        else if self.session.needs_recalibrate {
            self.recalibrate(ctx, drive)
        }
        else {
            self.setup_transfer(ctx)
        };
        if let Err(err) = result {
            self.stage_failed(ctx, err);
        }
    }

    fn start_reset(&mut self, ctx: &mut DriverContext<'_>) {
        log::debug!("start_reset(): resetting controller");
        self.stats.resets += 1;
        self.session.needs_reset = false;
        self.session.forget_controller();
        self.session.needs_recalibrate = true;
        ctx.timer.cancel(TimerEvent::MotorReady);
        ctx.timer.cancel(TimerEvent::SelectSettled);
        self.session.set_state(TransferState::Resetting);
        motor::pulse_reset(&mut self.session, ctx.bus);
    }

    fn reset_complete(&mut self, ctx: &mut DriverContext<'_>) -> Result<(), FloppyError> {
        self.sense_interrupt(ctx)?;
        // Any media will do until the next transfer checks its own spec byte.
        let spec1 = self
            .current
            .as_ref()
            .map(|c| c.geometry.spec1)
            .unwrap_or(geometry::DEFAULT_SPEC1);
        self.specify(ctx, spec1)?;
        self.session.set_state(TransferState::Idle);
        Ok(())
    }

    fn recalibrate(&mut self, ctx: &mut DriverContext<'_>, drive: u8) -> Result<(), FloppyError> {
        log::debug!("recalibrate(): drive {}", drive);
        self.stats.recalibrates += 1;
        self.session.needs_recalibrate = false;
        self.session.forget_track();
        self.session.set_state(TransferState::Recalibrating);
        self.session.active_command = Some(FdcCommand::Recalibrate);
        self.port
            .send_command(&mut self.session, ctx.bus, &port::recalibrate_command(drive))
    }

    fn recalibrate_complete(&mut self, ctx: &mut DriverContext<'_>) -> Result<(), FloppyError> {
        let reply = self.sense_interrupt(ctx)?;
        if reply.len() == 2 && reply.st0() & 0xF8 == 0x20 {
            self.session.last_known_track = reply.get(1);
            self.session.set_state(TransferState::Idle);
            Ok(())
        }
        else {
            log::warn!("recalibrate_complete(): recalibrate failed: {:02X?}", reply.as_slice());
            self.session.needs_reset = true;
            Err(FloppyError::SeekMismatch {
                expected: 0,
                actual: reply.get(1),
            })
        }
    }

    /// Apply the media's controller parameters, then seek if needed or go straight to the
    /// data transfer.
    fn setup_transfer(&mut self, ctx: &mut DriverContext<'_>) -> Result<(), FloppyError> {
        let track_read_max_errors = self.config.track_read_max_errors;
        let Some(inflight) = self.current.as_mut()
        else {
            self.session.set_state(TransferState::Idle);
            return Ok(());
        };
        inflight.whole_track =
            inflight.request.direction == Direction::Read && inflight.error_count < track_read_max_errors;
        let (drive, geometry, chs, whole_track) =
            (inflight.drive(), inflight.geometry, inflight.chs, inflight.whole_track);

        if self.session.last_specify != Some(geometry.spec1) {
            self.specify(ctx, geometry.spec1)?;
        }
        if self.session.last_data_rate != Some(geometry.rate) {
            log::trace!("setup_transfer(): data rate {:02X}", geometry.rate);
            ctx.bus.io_write_u8(FD_DCR, geometry.rate);
            self.session.last_data_rate = Some(geometry.rate);
        }
        if self.session.needs_reset {
            self.session.set_state(TransferState::Idle);
            return Ok(());
        }
        if !self.session.needs_seek {
            return self.start_transfer(ctx);
        }

        let head = if whole_track { 0 } else { chs.head };
        log::debug!("setup_transfer(): seek drive {} to track {}", drive, chs.seek_track);
        self.stats.seeks += 1;
        self.session.set_state(TransferState::Seeking);
        self.session.active_command = Some(FdcCommand::Seek);
        self.port.send_command(
            &mut self.session,
            ctx.bus,
            &port::seek_command(drive, head, chs.seek_track),
        )
    }

    fn seek_complete(&mut self, ctx: &mut DriverContext<'_>) -> Result<(), FloppyError> {
        let expected = self.current.as_ref().map(|c| c.chs.seek_track).unwrap_or(0);
        let reply = self.sense_interrupt(ctx)?;
        if reply.len() != 2 || reply.st0() & 0xF8 != 0x20 || reply.get(1) != Some(expected) {
            log::warn!(
                "seek_complete(): seek to {} failed: {:02X?}",
                expected,
                reply.as_slice()
            );
            self.session.needs_recalibrate = true;
            return Err(FloppyError::SeekMismatch {
                expected,
                actual: reply.get(1),
            });
        }
        self.session.last_known_track = Some(expected);
        self.session.needs_seek = false;
        self.start_transfer(ctx)
    }

    /// Program the DMA channel and issue READ DATA or WRITE DATA.
    fn start_transfer(&mut self, ctx: &mut DriverContext<'_>) -> Result<(), FloppyError> {
        let Some(inflight) = self.current.as_ref()
        else {
            self.session.set_state(TransferState::Idle);
            return Ok(());
        };
        let geometry = inflight.geometry;
        let chs = inflight.chs;
        let whole_track = inflight.whole_track;
        let direction = inflight.request.direction;
        let drive = inflight.drive();
        let buffer = inflight.request.buffer;

        let plan = self.dma.prepare_transfer(
            direction,
            buffer,
            whole_track.then(|| geometry.track_bytes()),
            &mut self.cache,
            ctx.bus,
        );
        match plan.target {
            TransferTarget::TrackBuffer => self.stats.track_reads += 1,
            TransferTarget::Bounce => self.stats.bounce_transfers += 1,
            TransferTarget::Direct => {}
        }
        dma::program_channel(ctx.bus, &plan);
        self.plan = Some(plan);

        let command = TransferCommand {
            direction,
            drive,
            head: if whole_track { 0 } else { chs.head },
            track: chs.track,
            sector_id: if whole_track { 1 } else { chs.sector_id() },
            end_of_track: geometry.sectors_per_track,
            gap: geometry.gap,
        };
        log::debug!(
            "start_transfer(): {} drive {} {} {} bytes via {}",
            command.command(),
            drive,
            chs,
            plan.byte_count(),
            plan.target
        );
        self.session.set_state(TransferState::Transferring);
        self.session.active_command = Some(command.command());
        self.port.send_command(&mut self.session, ctx.bus, &command.to_bytes())
    }

    fn transfer_complete(&mut self, ctx: &mut DriverContext<'_>) -> Result<(), FloppyError> {
        let reply = self.port.read_result(&mut self.session, ctx.bus)?;
        let Some(inflight) = self.current.as_ref()
        else {
            self.session.set_state(TransferState::Idle);
            return Ok(());
        };
        let (drive, chs, geometry, whole_track) = (inflight.drive(), inflight.chs, inflight.geometry, inflight.whole_track);
        let caller = inflight.request.buffer;

        if reply.len() != 7 || reply.st0() & 0xF8 != 0 || reply.st1() & 0xBF != 0 || reply.st2() & 0x73 != 0 {
            if reply.st1() & 0x02 != 0 {
                log::warn!("transfer_complete(): drive {} is write protected", drive);
                self.finish(ctx, Err(FloppyError::WriteProtected { drive }));
                return Ok(());
            }
            if self.cache.matches(drive, chs.seek_track) {
                self.cache.invalidate();
            }
            return Err(FloppyError::BadStatusOnTransfer {
                st0: reply.st0(),
                st1: reply.st1(),
                st2: reply.st2(),
            });
        }

        if whole_track {
            let data = self.dma.staged_track(geometry.track_bytes(), &*ctx.bus);
            self.cache.populate(drive, chs.seek_track, &data);
            if let Some(sector) = self.cache.sector(drive, chs.seek_track, chs.track_index(geometry)) {
                ctx.bus.mem_write(caller.base(), sector);
            }
        }
        else if let Some(plan) = self.plan {
            self.dma.finish_read(&plan, caller, ctx.bus);
        }
        self.finish(ctx, Ok(()));
        Ok(())
    }

    /// An interrupt arrived while nothing was expecting one.
    fn unexpected_interrupt(&mut self, ctx: &mut DriverContext<'_>) {
        log::warn!("unexpected_interrupt(): in state {}", self.session.state);
        self.stats.unexpected_interrupts += 1;
        self.session.forget_track();
        match self.sense_interrupt(ctx) {
            Ok(reply) if reply.len() == 2 && reply.st0() & 0xE0 != 0x60 => {
                self.session.needs_recalibrate = true;
            }
            Ok(_) => {
                self.session.needs_reset = true;
            }
            Err(err) => {
                log::warn!("unexpected_interrupt(): {}", err);
                self.session.needs_reset = true;
            }
        }
    }

    fn sense_interrupt(&mut self, ctx: &mut DriverContext<'_>) -> Result<port::ReplyBuffer, FloppyError> {
        self.session.active_command = Some(FdcCommand::SenseInterrupt);
        self.port
            .send_command_byte(&mut self.session, ctx.bus, FdcCommand::SenseInterrupt.opcode())?;
        self.port.read_result(&mut self.session, ctx.bus)
    }

    fn specify(&mut self, ctx: &mut DriverContext<'_>, spec1: u8) -> Result<(), FloppyError> {
        log::trace!("specify(): {:02X}", spec1);
        self.session.active_command = Some(FdcCommand::Specify);
        self.port
            .send_command(&mut self.session, ctx.bus, &port::specify_command(spec1))?;
        self.session.last_specify = Some(spec1);
        Ok(())
    }

    /// A stage could not complete. Protocol refusals restart the pipeline, everything else
    /// is counted against the request in flight.
    fn stage_failed(&mut self, ctx: &mut DriverContext<'_>, err: FloppyError) {
        match err {
            FloppyError::ResetPending => {
                log::debug!("stage_failed(): reset pending, restarting");
                self.session.set_state(TransferState::Idle);
            }
            err if err.is_retryable() => self.record_failure(ctx, err),
            err => {
                log::error!("stage_failed(): {}", err);
                self.finish(ctx, Err(err));
            }
        }
    }

    /// Count a failure against the request in flight and decide how to recover.
    fn record_failure(&mut self, ctx: &mut DriverContext<'_>, err: FloppyError) {
        self.session.forget_track();
        self.session.set_state(TransferState::Idle);
        let max_errors = self.config.max_errors;
        let Some(inflight) = self.current.as_mut()
        else {
            log::warn!("record_failure(): {} with no request in flight", err);
            return;
        };
        inflight.error_count += 1;
        let (errors, drive, block) = (inflight.error_count, inflight.drive(), inflight.request.block);
        self.stats.retries += 1;

        let action = recovery_policy(errors, max_errors);
        log::warn!(
            "record_failure(): drive {} block {}: {} (error {}, {})",
            drive,
            block,
            err,
            errors,
            action
        );
        match action {
            RecoveryAction::Abandon => {
                self.finish(ctx, Err(FloppyError::RetriesExhausted { drive, block, errors }));
                self.session.needs_reset = true;
            }
            RecoveryAction::Reset => self.session.needs_reset = true,
            RecoveryAction::Recalibrate => self.session.needs_recalibrate = true,
        }
    }
}
