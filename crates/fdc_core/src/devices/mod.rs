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

    devices::mod.rs

    Simulated PC floppy subsystem behind the FloppyBus interface.
*/

//! Simulated hardware: a µPD765 controller with four drive bays, DMA channel 2 of an 8237,
//! and a flat physical memory, joined by [SimBus].

pub mod dma;
pub mod fdc;
pub mod floppy_drive;

use crate::bus::{
    FloppyBus, InterruptRegistry, DMA_CH2_ADDR, DMA_CH2_COUNT, DMA_CH2_PAGE, DMA_CLEAR_FLIPFLOP, DMA_MODE,
    DMA_SINGLE_MASK, FDC_IRQ, FD_DATA, FD_DIR, FD_DOR, FD_STATUS,
};

use dma::DmaChannel;
use fdc::FloppyController;

pub struct SimBus {
    memory: Vec<u8>,
    fdc: FloppyController,
    dma: DmaChannel,
    irq_mask: u16,
    io_writes: u64,
}

impl SimBus {
    pub fn new(memory_kb: usize, seed: u64) -> Self {
        Self {
            memory: vec![0; memory_kb * 1024],
            fdc: FloppyController::new(seed),
            dma: DmaChannel::new(),
            irq_mask: 0,
            io_writes: 0,
        }
    }

    pub fn fdc(&self) -> &FloppyController {
        &self.fdc
    }
    pub fn fdc_mut(&mut self) -> &mut FloppyController {
        &mut self.fdc
    }
    pub fn dma(&self) -> &DmaChannel {
        &self.dma
    }
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }
    pub fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }
    pub fn io_writes(&self) -> u64 {
        self.io_writes
    }
    pub fn irq_registered(&self, irq: u8) -> bool {
        self.irq_mask & (1 << irq) != 0
    }

    /// Let the controller carry out any pending operation.
    pub fn run(&mut self) {
        self.fdc.run(&mut self.dma, &mut self.memory);
    }

    /// Return whether the controller raised an interrupt that has a registered handler.
    pub fn take_interrupt(&mut self) -> bool {
        if !self.fdc.take_interrupt() {
            return false;
        }
        if !self.irq_registered(FDC_IRQ) {
            log::warn!("SimBus: IRQ {} raised with no handler registered", FDC_IRQ);
            return false;
        }
        true
    }
}

impl FloppyBus for SimBus {
    fn io_read_u8(&mut self, port: u16) -> u8 {
        match port {
            FD_DOR | FD_STATUS | FD_DATA | FD_DIR => self.fdc.read_u8(port),
            _ => {
                log::warn!("SimBus: read from unmapped port {:04X}", port);
                0xFF
            }
        }
    }

    fn io_write_u8(&mut self, port: u16, data: u8) {
        self.io_writes += 1;
        match port {
            FD_DOR | FD_STATUS | FD_DATA | FD_DIR => self.fdc.write_u8(port, data),
            DMA_CH2_ADDR | DMA_CH2_COUNT | DMA_SINGLE_MASK | DMA_MODE | DMA_CLEAR_FLIPFLOP | DMA_CH2_PAGE => {
                self.dma.write_u8(port, data);
            }
            _ => log::warn!("SimBus: write to unmapped port {:04X}", port),
        }
    }

    fn mem_read(&self, addr: u32, dst: &mut [u8]) {
        for (i, byte) in dst.iter_mut().enumerate() {
            *byte = self.memory.get(addr as usize + i).copied().unwrap_or(0xFF);
        }
    }

    fn mem_write(&mut self, addr: u32, src: &[u8]) {
        let start = (addr as usize).min(self.memory.len());
        let end = (start + src.len()).min(self.memory.len());
        self.memory[start..end].copy_from_slice(&src[..end - start]);
    }
}

impl InterruptRegistry for SimBus {
    fn register_handler(&mut self, irq: u8) {
        log::debug!("SimBus: handler registered for IRQ {}", irq);
        self.irq_mask |= 1 << irq;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_outside_installed_ram_reads_open_bus() {
        let mut bus = SimBus::new(64, 0);
        bus.mem_write(0xFFFE, &[1, 2, 3, 4]);
        let mut buf = [0u8; 4];
        bus.mem_read(0xFFFE, &mut buf);
        assert_eq!(buf, [1, 2, 0xFF, 0xFF]);
    }

    #[test]
    fn interrupt_needs_registered_handler() {
        let mut bus = SimBus::new(64, 0);
        bus.io_write_u8(FD_DOR, 0x0C);
        assert!(!bus.take_interrupt());
        bus.register_handler(FDC_IRQ);
        bus.io_write_u8(FD_DOR, 0x08);
        bus.io_write_u8(FD_DOR, 0x0C);
        assert!(bus.take_interrupt());
        assert!(!bus.take_interrupt());
    }
}
