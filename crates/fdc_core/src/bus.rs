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

    bus.rs

    Port and memory interface shared by the driver and the simulated hardware.
*/

//! The bus is the only path between the driver and the hardware. Port I/O reaches the
//! controller, the DMA controller and the digital output register; memory access is
//! by physical address, as the DMA engine sees it.

use std::fmt::Display;

pub const FDC_IRQ: u8 = 0x06;
pub const FDC_DMA: usize = 2;

// Floppy controller ports
pub const FD_DOR: u16 = 0x03F2;
pub const FD_STATUS: u16 = 0x03F4;
pub const FD_DATA: u16 = 0x03F5;
/// Digital input register on read: bit 7 is the disk change line of the selected drive.
pub const FD_DIR: u16 = 0x03F7;
/// Data rate (configuration control) register on write.
pub const FD_DCR: u16 = 0x03F7;

// 8237 DMA controller ports used for channel 2
pub const DMA_CH2_ADDR: u16 = 0x04;
pub const DMA_CH2_COUNT: u16 = 0x05;
pub const DMA_SINGLE_MASK: u16 = 0x0A;
pub const DMA_MODE: u16 = 0x0B;
pub const DMA_CLEAR_FLIPFLOP: u16 = 0x0C;
pub const DMA_CH2_PAGE: u16 = 0x81;

/// Physical memory and port access as seen from the driver.
pub trait FloppyBus {
    fn io_read_u8(&mut self, port: u16) -> u8;
    fn io_write_u8(&mut self, port: u16, data: u8);
    fn mem_read(&self, addr: u32, dst: &mut [u8]);
    fn mem_write(&mut self, addr: u32, src: &[u8]);
}

/// Interrupt vector registration. The driver registers one handler for [FDC_IRQ]; which
/// stage the interrupt completes is decided by the driver's own state, not by the vector.
pub trait InterruptRegistry {
    fn register_handler(&mut self, irq: u8);
}

/// A contiguous range of physical memory.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MemoryRegion {
    base: u32,
    len:  usize,
}

impl Display for MemoryRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:06X}-{:06X}]", self.base, self.end().saturating_sub(1))
    }
}

impl MemoryRegion {
    pub fn new(base: u32, len: usize) -> Self {
        Self { base, len }
    }
    #[inline]
    pub fn base(&self) -> u32 {
        self.base
    }
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
    /// One past the last byte of the region.
    #[inline]
    pub fn end(&self) -> u64 {
        self.base as u64 + self.len as u64
    }

    /// Return whether the DMA engine can transfer to or from this region directly.
    ///
    /// The region must end at or below `limit`, and must not cross a 64KiB boundary since
    /// the channel's address counter does not carry into the page register.
    pub fn dma_reachable(&self, limit: u32) -> bool {
        if self.len == 0 {
            return true;
        }
        let last = self.end() - 1;
        self.end() <= limit as u64 && (self.base as u64 >> 16) == (last >> 16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_below_limit_is_reachable() {
        let region = MemoryRegion::new(0x0001_0000, 512);
        assert!(region.dma_reachable(0x10_0000));
    }

    #[test]
    fn region_above_limit_is_not_reachable() {
        assert!(!MemoryRegion::new(0x0020_0000, 512).dma_reachable(0x10_0000));
        // Ends one byte past the limit.
        assert!(!MemoryRegion::new(0x000F_FE01, 512).dma_reachable(0x10_0000));
        assert!(MemoryRegion::new(0x000F_FE00, 512).dma_reachable(0x10_0000));
    }

    #[test]
    fn region_crossing_64k_is_not_reachable() {
        let region = MemoryRegion::new(0x0001_FF00, 512);
        assert!(!region.dma_reachable(0x10_0000));
    }
}
