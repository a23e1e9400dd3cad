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

    driver::dma.rs

    Transfer planning, bounce buffering and DMA channel 2 programming.
*/

//! DMA resource management.
//!
//! The DMA engine reaches a limited physical range and its address counter cannot carry
//! across a 64KiB boundary. Caller buffers that fail [MemoryRegion::dma_reachable] are
//! transferred through a driver-owned bounce buffer; whole-track reads always go to the
//! driver-owned staging buffer that backs the track cache.

use crate::{
    bus::{FloppyBus, MemoryRegion, DMA_CH2_ADDR, DMA_CH2_COUNT, DMA_CH2_PAGE, DMA_CLEAR_FLIPFLOP, DMA_MODE, DMA_SINGLE_MASK},
    driver::{cache::TrackCache, config::DriverConfig, geometry::MAX_TRACK_BYTES},
    error::FloppyError,
    request::{Direction, SECTOR_SIZE},
};

/// Single mode, address increment, device to memory, channel 2.
pub const DMA_MODE_READ: u8 = 0x46;
/// Single mode, address increment, memory to device, channel 2.
pub const DMA_MODE_WRITE: u8 = 0x4A;
pub const DMA_MASK_CH2: u8 = 0x06;
pub const DMA_UNMASK_CH2: u8 = 0x02;

#[derive(Copy, Clone, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum TransferTarget {
    TrackBuffer,
    Bounce,
    Direct,
}

/// What the DMA channel will be programmed with for one transfer attempt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PhysicalTransferPlan {
    pub direction: Direction,
    pub target: TransferTarget,
    pub region: MemoryRegion,
}

impl PhysicalTransferPlan {
    #[inline]
    pub fn address(&self) -> u32 {
        self.region.base()
    }
    #[inline]
    pub fn byte_count(&self) -> usize {
        self.region.len()
    }
    pub fn mode(&self) -> u8 {
        match self.direction {
            Direction::Read => DMA_MODE_READ,
            Direction::Write => DMA_MODE_WRITE,
        }
    }
}

pub struct DmaBuffers {
    track_buffer: MemoryRegion,
    bounce: MemoryRegion,
    limit: u32,
}

impl DmaBuffers {
    pub fn new(config: &DriverConfig) -> Result<Self, FloppyError> {
        let track_buffer = MemoryRegion::new(config.track_buffer, MAX_TRACK_BYTES);
        let bounce = MemoryRegion::new(config.bounce_buffer, SECTOR_SIZE);

        if !track_buffer.dma_reachable(config.dma_limit) {
            return Err(FloppyError::InvalidConfig("track buffer is not DMA reachable"));
        }
        if !bounce.dma_reachable(config.dma_limit) {
            return Err(FloppyError::InvalidConfig("bounce buffer is not DMA reachable"));
        }
        if (bounce.base() as u64) < track_buffer.end() && (track_buffer.base() as u64) < bounce.end() {
            return Err(FloppyError::InvalidConfig("track and bounce buffers overlap"));
        }
        Ok(Self {
            track_buffer,
            bounce,
            limit: config.dma_limit,
        })
    }

    pub fn track_buffer(&self) -> MemoryRegion {
        self.track_buffer
    }

    pub fn bounce_buffer(&self) -> MemoryRegion {
        self.bounce
    }

    /// Decide where the next transfer goes. `whole_track` carries the track size for
    /// whole-track reads. For bounced writes the caller's data is staged before returning,
    /// so the plan can be armed immediately.
    pub fn prepare_transfer(
        &self,
        direction: Direction,
        caller: MemoryRegion,
        whole_track: Option<usize>,
        cache: &mut TrackCache,
        bus: &mut dyn FloppyBus,
    ) -> PhysicalTransferPlan {
        if let (Direction::Read, Some(track_bytes)) = (direction, whole_track) {
            // The staging buffer backs the cache and is about to be overwritten.
            cache.invalidate();
            return PhysicalTransferPlan {
                direction,
                target: TransferTarget::TrackBuffer,
                region: MemoryRegion::new(self.track_buffer.base(), track_bytes),
            };
        }

        if caller.dma_reachable(self.limit) {
            return PhysicalTransferPlan {
                direction,
                target: TransferTarget::Direct,
                region: caller,
            };
        }

        log::trace!("DmaBuffers: bouncing {} transfer for {}", direction, caller);
        if direction == Direction::Write {
            let mut staging = [0u8; SECTOR_SIZE];
            bus.mem_read(caller.base(), &mut staging);
            bus.mem_write(self.bounce.base(), &staging);
        }
        PhysicalTransferPlan {
            direction,
            target: TransferTarget::Bounce,
            region: MemoryRegion::new(self.bounce.base(), caller.len()),
        }
    }

    /// Copy a completed bounced read out to the caller's buffer.
    pub fn finish_read(&self, plan: &PhysicalTransferPlan, caller: MemoryRegion, bus: &mut dyn FloppyBus) {
        if plan.direction == Direction::Read && plan.target == TransferTarget::Bounce {
            let mut staging = [0u8; SECTOR_SIZE];
            bus.mem_read(self.bounce.base(), &mut staging);
            bus.mem_write(caller.base(), &staging[..caller.len().min(SECTOR_SIZE)]);
        }
    }

    /// Read back the contents of the staging buffer after a whole-track read.
    pub fn staged_track(&self, track_bytes: usize, bus: &dyn FloppyBus) -> Vec<u8> {
        let mut data = vec![0u8; track_bytes];
        bus.mem_read(self.track_buffer.base(), &mut data);
        data
    }
}

/// Program DMA channel 2 for a transfer. The channel stays masked until every register
/// has been written.
pub fn program_channel(bus: &mut dyn FloppyBus, plan: &PhysicalTransferPlan) {
    let addr = plan.address();
    let count = plan.byte_count().saturating_sub(1) as u16;

    log::trace!(
        "program_channel(): mode:{:02X} addr:{:06X} count:{:04X} ({})",
        plan.mode(),
        addr,
        count,
        plan.target
    );

    bus.io_write_u8(DMA_SINGLE_MASK, DMA_MASK_CH2);
    bus.io_write_u8(DMA_CLEAR_FLIPFLOP, plan.mode());
    bus.io_write_u8(DMA_MODE, plan.mode());
    bus.io_write_u8(DMA_CH2_ADDR, addr as u8);
    bus.io_write_u8(DMA_CH2_ADDR, (addr >> 8) as u8);
    bus.io_write_u8(DMA_CH2_PAGE, (addr >> 16) as u8);
    bus.io_write_u8(DMA_CH2_COUNT, count as u8);
    bus.io_write_u8(DMA_CH2_COUNT, (count >> 8) as u8);
    bus.io_write_u8(DMA_SINGLE_MASK, DMA_UNMASK_CH2);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingBus {
        writes: Vec<(u16, u8)>,
        memory: Vec<u8>,
    }

    impl FloppyBus for RecordingBus {
        fn io_read_u8(&mut self, _port: u16) -> u8 {
            0xFF
        }
        fn io_write_u8(&mut self, port: u16, data: u8) {
            self.writes.push((port, data));
        }
        fn mem_read(&self, addr: u32, dst: &mut [u8]) {
            let addr = addr as usize;
            dst.copy_from_slice(&self.memory[addr..addr + dst.len()]);
        }
        fn mem_write(&mut self, addr: u32, src: &[u8]) {
            let addr = addr as usize;
            self.memory[addr..addr + src.len()].copy_from_slice(src);
        }
    }

    #[test]
    fn channel_is_programmed_masked_with_count_minus_one() {
        let mut bus = RecordingBus::default();
        let plan = PhysicalTransferPlan {
            direction: Direction::Read,
            target: TransferTarget::Direct,
            region: MemoryRegion::new(0x0002_3400, 512),
        };
        program_channel(&mut bus, &plan);
        assert_eq!(
            bus.writes,
            vec![
                (DMA_SINGLE_MASK, 0x06),
                (DMA_CLEAR_FLIPFLOP, 0x46),
                (DMA_MODE, 0x46),
                (DMA_CH2_ADDR, 0x00),
                (DMA_CH2_ADDR, 0x34),
                (DMA_CH2_PAGE, 0x02),
                (DMA_CH2_COUNT, 0xFF),
                (DMA_CH2_COUNT, 0x01),
                (DMA_SINGLE_MASK, 0x02),
            ]
        );
    }

    #[test]
    fn unreachable_buffers_bounce_in_both_directions() {
        let config = DriverConfig {
            dma_limit: 0x1_0000,
            track_buffer: 0x4000,
            bounce_buffer: 0x9000,
            ..Default::default()
        };
        let dma = DmaBuffers::new(&config).unwrap();
        let mut cache = TrackCache::new();
        let mut bus = RecordingBus {
            memory: vec![0; 0x2_0000],
            ..Default::default()
        };
        let caller = MemoryRegion::new(0x1_8000, SECTOR_SIZE);
        bus.memory[0x1_8000..0x1_8200].fill(0x5A);

        let plan = dma.prepare_transfer(Direction::Write, caller, None, &mut cache, &mut bus);
        assert_eq!(plan.target, TransferTarget::Bounce);
        assert_eq!(plan.address(), 0x9000);
        assert!(bus.memory[0x9000..0x9200].iter().all(|b| *b == 0x5A));

        let plan = dma.prepare_transfer(Direction::Read, caller, None, &mut cache, &mut bus);
        bus.memory[0x9000..0x9200].fill(0xA5);
        dma.finish_read(&plan, caller, &mut bus);
        assert!(bus.memory[0x1_8000..0x1_8200].iter().all(|b| *b == 0xA5));
    }

    #[test]
    fn whole_track_read_invalidates_cache() {
        let dma = DmaBuffers::new(&DriverConfig::default()).unwrap();
        let mut cache = TrackCache::new();
        cache.populate(0, 1, &[0u8; 9216]);
        let mut bus = RecordingBus::default();
        let plan = dma.prepare_transfer(
            Direction::Read,
            MemoryRegion::new(0x1000, SECTOR_SIZE),
            Some(9216),
            &mut cache,
            &mut bus,
        );
        assert_eq!(plan.target, TransferTarget::TrackBuffer);
        assert_eq!(plan.byte_count(), 9216);
        assert!(!cache.is_valid());
    }

    #[test]
    fn unreachable_driver_buffers_are_rejected() {
        let config = DriverConfig {
            bounce_buffer: 0x20_0000,
            ..Default::default()
        };
        assert!(matches!(DmaBuffers::new(&config), Err(FloppyError::InvalidConfig(_))));
        let config = DriverConfig {
            bounce_buffer: 0x08_1000,
            ..Default::default()
        };
        assert!(matches!(DmaBuffers::new(&config), Err(FloppyError::InvalidConfig(_))));
    }
}
