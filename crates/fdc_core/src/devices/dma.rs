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

    devices::dma.rs

    Simulated 8237 DMA controller, channel 2 only.
*/

use crate::bus::{DMA_CH2_ADDR, DMA_CH2_COUNT, DMA_CH2_PAGE, DMA_CLEAR_FLIPFLOP, DMA_MODE, DMA_SINGLE_MASK};

pub const DMA_CHANNEL: u8 = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum DmaTransferType {
    Verify,
    /// Device to memory.
    Write,
    /// Memory to device.
    Read,
    Illegal,
}

pub struct DmaChannel {
    flip_flop: bool,
    masked: bool,
    mode: u8,
    page: u8,
    base_address: u16,
    base_count: u16,
    current_address: u16,
    remaining: u32,
    terminal_count: bool,
    programmed_while_unmasked: bool,
}

impl Default for DmaChannel {
    fn default() -> Self {
        Self {
            flip_flop: false,
            masked: true,
            mode: 0,
            page: 0,
            base_address: 0,
            base_count: 0,
            current_address: 0,
            remaining: 0,
            terminal_count: false,
            programmed_while_unmasked: false,
        }
    }
}

impl DmaChannel {
    pub fn new() -> Self {
        Default::default()
    }

    fn write_word(flip_flop: &mut bool, reg: &mut u16, data: u8) {
        if *flip_flop {
            *reg = (*reg & 0x00FF) | ((data as u16) << 8);
        }
        else {
            *reg = (*reg & 0xFF00) | data as u16;
        }
        *flip_flop = !*flip_flop;
    }

    /// Handle a port write. Returns false if the port does not belong to channel 2.
    pub fn write_u8(&mut self, port: u16, data: u8) -> bool {
        match port {
            DMA_SINGLE_MASK => {
                if data & 0x03 == DMA_CHANNEL {
                    self.masked = data & 0x04 != 0;
                    if !self.masked {
                        self.current_address = self.base_address;
                        self.remaining = self.base_count as u32 + 1;
                        self.terminal_count = false;
                        log::trace!(
                            "DmaChannel: armed addr:{:06X} count:{} mode:{:02X}",
                            self.address(),
                            self.remaining,
                            self.mode
                        );
                    }
                }
            }
            DMA_MODE => {
                if data & 0x03 == DMA_CHANNEL {
                    self.mode = data;
                }
            }
            DMA_CLEAR_FLIPFLOP => self.flip_flop = false,
            DMA_CH2_ADDR => {
                self.note_register_write();
                Self::write_word(&mut self.flip_flop, &mut self.base_address, data);
            }
            DMA_CH2_COUNT => {
                self.note_register_write();
                Self::write_word(&mut self.flip_flop, &mut self.base_count, data);
            }
            DMA_CH2_PAGE => {
                self.note_register_write();
                self.page = data;
            }
            _ => return false,
        }
        true
    }

    fn note_register_write(&mut self) {
        if !self.masked {
            log::warn!("DmaChannel: channel programmed while unmasked");
            self.programmed_while_unmasked = true;
        }
    }

    pub fn transfer_type(&self) -> DmaTransferType {
        match (self.mode >> 2) & 0x03 {
            0 => DmaTransferType::Verify,
            1 => DmaTransferType::Write,
            2 => DmaTransferType::Read,
            _ => DmaTransferType::Illegal,
        }
    }

    /// 20 bit physical address the channel was programmed with.
    pub fn address(&self) -> u32 {
        ((self.page as u32) << 16) | self.base_address as u32
    }
    /// Number of bytes the channel was programmed to transfer.
    pub fn byte_count(&self) -> u32 {
        self.base_count as u32 + 1
    }
    pub fn mode(&self) -> u8 {
        self.mode
    }
    pub fn is_masked(&self) -> bool {
        self.masked
    }
    pub fn terminal_count(&self) -> bool {
        self.terminal_count
    }
    pub fn programmed_while_unmasked(&self) -> bool {
        self.programmed_while_unmasked
    }

    pub fn is_ready(&self, transfer_type: DmaTransferType) -> bool {
        !self.masked && !self.terminal_count && self.transfer_type() == transfer_type
    }

    fn next_address(&mut self) -> usize {
        // The address counter wraps within the page; it does not carry into the page register.
        let addr = ((self.page as usize) << 16) | self.current_address as usize;
        self.current_address = self.current_address.wrapping_add(1);
        addr
    }

    fn count_bytes(&mut self, n: usize) {
        self.remaining -= n as u32;
        if self.remaining == 0 {
            log::trace!("DmaChannel: terminal count");
            self.terminal_count = true;
            self.masked = true;
        }
    }

    /// Move bytes from the device into memory. Returns the number of bytes accepted.
    pub fn device_to_memory(&mut self, memory: &mut [u8], data: &[u8]) -> usize {
        if !self.is_ready(DmaTransferType::Write) {
            return 0;
        }
        let n = data.len().min(self.remaining as usize);
        for byte in &data[..n] {
            let addr = self.next_address();
            if let Some(dst) = memory.get_mut(addr) {
                *dst = *byte;
            }
        }
        self.count_bytes(n);
        n
    }

    /// Move up to `len` bytes from memory to the device.
    pub fn memory_to_device(&mut self, memory: &[u8], len: usize) -> Vec<u8> {
        if !self.is_ready(DmaTransferType::Read) {
            return Vec::new();
        }
        let n = len.min(self.remaining as usize);
        let data = (0..n)
            .map(|_| {
                let addr = self.next_address();
                memory.get(addr).copied().unwrap_or(0xFF)
            })
            .collect();
        self.count_bytes(n);
        data
    }
}
