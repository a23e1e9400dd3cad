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

    machine.rs

    Event loop joining the driver, the simulated hardware and a tick timer.
*/

//! A small deterministic machine: simulated floppy hardware, a tick timer and a block
//! queue around one [SharedDriver].
//!
//! [Machine::step] delivers one event at a time: a pending controller interrupt first,
//! then the earliest timer. Time only moves when nothing else is pending, so runs are
//! reproducible for a given seed.

use crate::{
    bus::MemoryRegion,
    devices::{
        floppy_drive::{FloppyDisk, FloppyDriveType},
        SimBus,
    },
    driver::{
        config::DriverConfig,
        session::MAX_DRIVES,
        shared::SharedDriver,
        DriverContext,
        DriverStats,
        FloppyDriver,
    },
    error::FloppyError,
    request::{BlockQueue, Completion, DeviceId, Request, SECTOR_SIZE},
    timer::TickTimer,
};

use crossbeam_channel::Receiver;

pub const DEFAULT_MEMORY_KB: usize = 640;
pub const DEFAULT_STEP_LIMIT: usize = 100_000;
/// Sector buffer the disk change check reads into. Clear of the driver's staging buffers.
pub const CHANGE_CHECK_BUFFER: u32 = 0x09_0000;

pub struct Machine {
    bus: SimBus,
    timer: TickTimer,
    queue: BlockQueue,
    completions: Receiver<Completion>,
    /// Completions received while waiting on an internal request, not yet drained.
    held: Vec<Completion>,
    driver: SharedDriver,
    next_tag: u64,
}

impl Machine {
    pub fn new(config: DriverConfig, memory_kb: usize, seed: u64) -> Result<Self, FloppyError> {
        let installed = memory_kb as u64 * 1024;
        let staging_end = MemoryRegion::new(config.bounce_buffer, SECTOR_SIZE)
            .end()
            .max(config.track_buffer as u64 + crate::driver::geometry::MAX_TRACK_BYTES as u64);
        if staging_end > installed {
            return Err(FloppyError::InvalidConfig("staging buffers lie outside installed memory"));
        }

        let mut driver = FloppyDriver::new(config)?;
        let mut bus = SimBus::new(memory_kb, seed);
        driver.driver_init(&mut bus);
        let (queue, completions) = BlockQueue::new();

        let mut machine = Self {
            bus,
            timer: TickTimer::new(),
            queue,
            completions,
            held: Vec::new(),
            driver: SharedDriver::new(driver),
            next_tag: 1,
        };
        // Let the driver see the interrupt that ends the initial reset.
        machine.run_until_idle(DEFAULT_STEP_LIMIT);
        Ok(machine)
    }

    /// Install a drive of the given type, or the usual one for the media, and insert a
    /// freshly formatted diskette.
    pub fn mount(&mut self, drive: u8, media_type: u8, drive_type: Option<FloppyDriveType>) -> Result<(), FloppyError> {
        let disk = FloppyDisk::formatted(media_type)?;
        let drive_type = drive_type.unwrap_or_else(|| FloppyDriveType::for_media(media_type));
        self.bus.fdc_mut().set_drive_type(drive as usize, drive_type);
        self.insert_disk(drive, disk);
        Ok(())
    }

    pub fn insert_disk(&mut self, drive: u8, disk: FloppyDisk) {
        self.bus.fdc_mut().drive_mut(drive as usize).insert(disk);
    }

    pub fn eject_disk(&mut self, drive: u8) -> Option<FloppyDisk> {
        self.bus.fdc_mut().drive_mut(drive as usize).eject()
    }

    pub fn bus(&self) -> &SimBus {
        &self.bus
    }
    pub fn bus_mut(&mut self) -> &mut SimBus {
        &mut self.bus
    }
    pub fn timer(&self) -> &TickTimer {
        &self.timer
    }
    pub fn driver(&self) -> &SharedDriver {
        &self.driver
    }
    pub fn stats(&self) -> DriverStats {
        self.driver.with_driver(|d| d.stats().clone())
    }

    /// Report whether the disk in `drive` changed since the last query.
    ///
    /// A change already seen by a transfer is answered directly. Otherwise block 0 is read
    /// through the driver so the disk change line is sampled, and the driver is asked again.
    pub fn media_change_query(&mut self, drive: u8) -> bool {
        if self.driver.with_driver(|d| d.handle_media_change_query(drive)) {
            return true;
        }
        if drive >= MAX_DRIVES {
            return false;
        }

        let fdd = self.bus.fdc().drive(drive as usize);
        let media_type = match fdd.disk() {
            Some(disk) => disk.media_type(),
            None => fdd.drive_type().native_media(),
        };
        let tag = self.read(DeviceId::new(drive, media_type), 0, CHANGE_CHECK_BUFFER);
        if !self.wait_for(tag, DEFAULT_STEP_LIMIT) {
            log::warn!("Machine: change check of drive {} did not complete", drive);
        }
        self.driver.with_driver(|d| d.handle_media_change_query(drive))
    }

    /// Step until the request `tag` completes, consuming its completion. Other completions
    /// are kept for [Machine::drain_completions].
    fn wait_for(&mut self, tag: u64, max_steps: usize) -> bool {
        let mut steps = 0;
        loop {
            self.held.extend(self.completions.try_iter());
            if let Some(pos) = self.held.iter().position(|c| c.request.tag == tag) {
                let completion = self.held.remove(pos);
                log::debug!("Machine: tag:{} done: {:?}", tag, completion.result);
                return true;
            }
            if steps == max_steps || !self.step() {
                return false;
            }
            steps += 1;
        }
    }

    /// Queue a request and give the driver a chance to start it.
    pub fn submit(&mut self, request: Request) {
        self.queue.submit(request);
        let mut ctx = DriverContext {
            bus: &mut self.bus,
            timer: &mut self.timer,
            queue: &mut self.queue,
        };
        self.driver.request_pump(&mut ctx);
    }

    fn take_tag(&mut self) -> u64 {
        let tag = self.next_tag;
        self.next_tag += 1;
        tag
    }

    pub fn read(&mut self, device: DeviceId, block: u32, buffer: u32) -> u64 {
        let tag = self.take_tag();
        self.submit(Request::read(tag, device, block, buffer));
        tag
    }

    pub fn write(&mut self, device: DeviceId, block: u32, buffer: u32) -> u64 {
        let tag = self.take_tag();
        self.submit(Request::write(tag, device, block, buffer));
        tag
    }

    /// Deliver one event. Returns false when there is nothing left to do.
    pub fn step(&mut self) -> bool {
        self.bus.run();
        let interrupt = self.bus.take_interrupt();
        let timer_event = if interrupt {
            None
        }
        else {
            self.timer.pop_expired().or_else(|| self.timer.advance_to_next())
        };

        let mut ctx = DriverContext {
            bus: &mut self.bus,
            timer: &mut self.timer,
            queue: &mut self.queue,
        };
        match (interrupt, timer_event) {
            (true, _) => self.driver.post_interrupt(&mut ctx),
            (false, Some(event)) => self.driver.post_timer(&mut ctx, event),
            (false, None) => return false,
        }
        true
    }

    /// Step until nothing is pending or `max_steps` events were delivered. Returns the
    /// number of steps taken.
    pub fn run_until_idle(&mut self, max_steps: usize) -> usize {
        let mut steps = 0;
        while steps < max_steps && self.step() {
            steps += 1;
        }
        if steps == max_steps {
            log::warn!("Machine: still busy after {} steps", max_steps);
        }
        steps
    }

    /// Step until `done` holds. Returns false if the machine went idle or ran out of steps first.
    pub fn run_until(&mut self, max_steps: usize, mut done: impl FnMut(&Machine) -> bool) -> bool {
        for _ in 0..max_steps {
            if done(self) {
                return true;
            }
            if !self.step() {
                return done(self);
            }
        }
        done(self)
    }

    pub fn has_completions(&self) -> bool {
        !self.held.is_empty() || !self.completions.is_empty()
    }

    pub fn drain_completions(&mut self) -> Vec<Completion> {
        let mut done = std::mem::take(&mut self.held);
        done.extend(self.completions.try_iter());
        done
    }

    pub fn read_memory(&self, addr: u32, len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        crate::bus::FloppyBus::mem_read(&self.bus, addr, &mut data);
        data
    }

    pub fn write_memory(&mut self, addr: u32, data: &[u8]) {
        crate::bus::FloppyBus::mem_write(&mut self.bus, addr, data);
    }
}
