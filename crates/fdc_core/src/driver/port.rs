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

    driver::port.rs

    Byte-level command and result protocol of the µPD765.
*/

//! Byte-level protocol against the controller's main status and data registers.
//!
//! Every byte exchange is gated on the main status register. Each operation polls it a
//! bounded number of times; exhausting the budget marks the controller as needing a reset
//! and forgets the head position. While a reset is pending all port operations are refused.
//!
//! The command and parameter byte layouts are shared with the simulated controller in
//! [crate::devices::fdc].

use crate::{
    bus::{FloppyBus, FD_DATA, FD_STATUS},
    driver::session::ControllerSession,
    error::FloppyError,
    request::Direction,
};

use modular_bitfield::{bitfield, prelude::*};

pub const MAX_REPLIES: usize = 7;

// Main status register bits the protocol cares about
pub const STATUS_BUSY: u8 = 0b0001_0000;
pub const STATUS_DIR: u8 = 0b0100_0000;
pub const STATUS_READY: u8 = 0b1000_0000;

pub const OPCODE_SPECIFY: u8 = 0x03;
pub const OPCODE_WRITE_DATA: u8 = 0x05;
pub const OPCODE_READ_DATA: u8 = 0x06;
pub const OPCODE_RECALIBRATE: u8 = 0x07;
pub const OPCODE_SENSE_INTERRUPT: u8 = 0x08;
pub const OPCODE_SEEK: u8 = 0x0F;

/// Sector size code for 512 byte sectors.
pub const SECTOR_SIZE_CODE: u8 = 2;
/// Data length parameter; unused when the sector size code is nonzero.
pub const DATA_LENGTH_UNUSED: u8 = 0xFF;
/// Head load time field of SPECIFY, in units of 2ms.
pub const HEAD_LOAD_TIME: u8 = 3;

#[bitfield]
#[derive(Copy, Clone)]
pub struct CommandByte {
    pub command: B5,
    pub skip: bool,
    pub mfm: bool,
    pub mt: bool,
}

#[bitfield]
#[derive(Copy, Clone)]
pub struct DriveHeadSelect {
    pub drive: B2,
    pub head:  B1,
    #[skip]
    unused:    B5,
}

#[bitfield]
#[derive(Copy, Clone)]
pub struct HeadLoadDma {
    pub non_dma:   bool,
    pub head_load: B7,
}

/// The controller commands the driver issues.
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum FdcCommand {
    SenseInterrupt,
    Specify,
    Recalibrate,
    Seek,
    ReadData,
    WriteData,
}

impl FdcCommand {
    /// Return the first command byte, with the MT, MFM and SK modifier bits the driver uses.
    pub fn opcode(&self) -> u8 {
        let byte = match self {
            FdcCommand::SenseInterrupt => CommandByte::new().with_command(OPCODE_SENSE_INTERRUPT),
            FdcCommand::Specify => CommandByte::new().with_command(OPCODE_SPECIFY),
            FdcCommand::Recalibrate => CommandByte::new().with_command(OPCODE_RECALIBRATE),
            FdcCommand::Seek => CommandByte::new().with_command(OPCODE_SEEK),
            FdcCommand::ReadData => CommandByte::new()
                .with_command(OPCODE_READ_DATA)
                .with_skip(true)
                .with_mfm(true)
                .with_mt(true),
            FdcCommand::WriteData => CommandByte::new()
                .with_command(OPCODE_WRITE_DATA)
                .with_mfm(true)
                .with_mt(true),
        };
        byte.into_bytes()[0]
    }
}

pub fn drive_head_byte(drive: u8, head: u8) -> u8 {
    DriveHeadSelect::new()
        .with_drive(drive & 0x03)
        .with_head(head & 0x01)
        .into_bytes()[0]
}

pub fn specify_command(spec1: u8) -> [u8; 3] {
    let hld = HeadLoadDma::new().with_head_load(HEAD_LOAD_TIME).with_non_dma(false);
    [FdcCommand::Specify.opcode(), spec1, hld.into_bytes()[0]]
}

pub fn recalibrate_command(drive: u8) -> [u8; 2] {
    [FdcCommand::Recalibrate.opcode(), drive_head_byte(drive, 0)]
}

pub fn seek_command(drive: u8, head: u8, track: u8) -> [u8; 3] {
    [FdcCommand::Seek.opcode(), drive_head_byte(drive, head), track]
}

/// Parameters of a READ DATA or WRITE DATA command.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransferCommand {
    pub direction: Direction,
    pub drive: u8,
    pub head: u8,
    pub track: u8,
    pub sector_id: u8,
    pub end_of_track: u8,
    pub gap: u8,
}

impl TransferCommand {
    pub fn command(&self) -> FdcCommand {
        match self.direction {
            Direction::Read => FdcCommand::ReadData,
            Direction::Write => FdcCommand::WriteData,
        }
    }

    pub fn to_bytes(&self) -> [u8; 9] {
        [
            self.command().opcode(),
            drive_head_byte(self.drive, self.head),
            self.track,
            self.head,
            self.sector_id,
            SECTOR_SIZE_CODE,
            self.end_of_track,
            self.gap,
            DATA_LENGTH_UNUSED,
        ]
    }
}

/// Status bytes returned in a result phase.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplyBuffer {
    bytes: [u8; MAX_REPLIES],
    len:   usize,
}

impl ReplyBuffer {
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut reply = ReplyBuffer::default();
        for byte in bytes.iter().take(MAX_REPLIES) {
            reply.push(*byte);
        }
        reply
    }

    fn push(&mut self, byte: u8) {
        self.bytes[self.len] = byte;
        self.len += 1;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
    pub fn get(&self, idx: usize) -> Option<u8> {
        self.as_slice().get(idx).copied()
    }
    pub fn st0(&self) -> u8 {
        self.bytes[0]
    }
    pub fn st1(&self) -> u8 {
        self.bytes[1]
    }
    pub fn st2(&self) -> u8 {
        self.bytes[2]
    }
    /// For SENSE INTERRUPT, the second byte is the present cylinder number rather than ST1.
    pub fn st3(&self) -> u8 {
        self.bytes[3]
    }
}

pub struct PortProtocol {
    poll_budget: u32,
}

impl PortProtocol {
    pub fn new(poll_budget: u32) -> Self {
        Self { poll_budget }
    }

    pub fn poll_budget(&self) -> u32 {
        self.poll_budget
    }

    fn timeout(&self, session: &mut ControllerSession, what: &str) -> FloppyError {
        log::warn!("PortProtocol: {} timed out after {} polls", what, self.poll_budget);
        session.needs_reset = true;
        session.forget_track();
        FloppyError::ControllerTimeout
    }

    /// Send one byte to the data register once the controller is ready to accept it.
    pub fn send_command_byte(
        &self,
        session: &mut ControllerSession,
        bus: &mut dyn FloppyBus,
        byte: u8,
    ) -> Result<(), FloppyError> {
        if session.needs_reset {
            return Err(FloppyError::ResetPending);
        }
        for _ in 0..self.poll_budget {
            let msr = bus.io_read_u8(FD_STATUS);
            if msr & (STATUS_READY | STATUS_DIR) == STATUS_READY {
                log::trace!("PortProtocol: send {:02X}", byte);
                bus.io_write_u8(FD_DATA, byte);
                return Ok(());
            }
        }
        Err(self.timeout(session, "send"))
    }

    /// Send a complete command, stopping at the first byte that fails.
    pub fn send_command(
        &self,
        session: &mut ControllerSession,
        bus: &mut dyn FloppyBus,
        bytes: &[u8],
    ) -> Result<(), FloppyError> {
        for byte in bytes {
            self.send_command_byte(session, bus, *byte)?;
        }
        Ok(())
    }

    /// Collect the result phase bytes. Ends when the controller stops offering bytes.
    pub fn read_result(
        &self,
        session: &mut ControllerSession,
        bus: &mut dyn FloppyBus,
    ) -> Result<ReplyBuffer, FloppyError> {
        if session.needs_reset {
            return Err(FloppyError::ResetPending);
        }
        let mut reply = ReplyBuffer::default();
        for _ in 0..self.poll_budget {
            let status = bus.io_read_u8(FD_STATUS) & (STATUS_DIR | STATUS_READY | STATUS_BUSY);
            if status == STATUS_READY {
                log::trace!("PortProtocol: result {:02X?}", reply.as_slice());
                return Ok(reply);
            }
            if status == STATUS_DIR | STATUS_READY | STATUS_BUSY {
                if reply.len() >= MAX_REPLIES {
                    log::warn!("PortProtocol: controller sent more than {} result bytes", MAX_REPLIES);
                    break;
                }
                reply.push(bus.io_read_u8(FD_DATA));
            }
        }
        Err(self.timeout(session, "read_result"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A port stub that plays back a fixed main status value and a byte stream.
    struct ScriptedPorts {
        msr: Vec<u8>,
        data: Vec<u8>,
        written: Vec<u8>,
    }

    impl FloppyBus for ScriptedPorts {
        fn io_read_u8(&mut self, port: u16) -> u8 {
            match port {
                FD_STATUS => {
                    if self.msr.len() > 1 {
                        self.msr.remove(0)
                    }
                    else {
                        self.msr[0]
                    }
                }
                FD_DATA => self.data.remove(0),
                _ => 0xFF,
            }
        }
        fn io_write_u8(&mut self, port: u16, data: u8) {
            if port == FD_DATA {
                self.written.push(data);
            }
        }
        fn mem_read(&self, _addr: u32, _dst: &mut [u8]) {}
        fn mem_write(&mut self, _addr: u32, _src: &[u8]) {}
    }

    #[test]
    fn opcodes_match_the_controller_encoding() {
        assert_eq!(FdcCommand::ReadData.opcode(), 0xE6);
        assert_eq!(FdcCommand::WriteData.opcode(), 0xC5);
        assert_eq!(FdcCommand::Seek.opcode(), 0x0F);
        assert_eq!(specify_command(0xCF), [0x03, 0xCF, 0x06]);
        assert_eq!(drive_head_byte(1, 1), 0x05);
    }

    #[test]
    fn send_waits_for_ready() {
        let mut session = ControllerSession::new();
        let mut ports = ScriptedPorts {
            msr: vec![0x00, STATUS_READY | STATUS_DIR, STATUS_READY],
            data: vec![],
            written: vec![],
        };
        let port = PortProtocol::new(10);
        port.send_command(&mut session, &mut ports, &[0x08]).unwrap();
        assert_eq!(ports.written, vec![0x08]);
    }

    #[test]
    fn send_timeout_requests_reset_and_refuses_afterwards() {
        let mut session = ControllerSession::new();
        session.last_known_track = Some(5);
        let mut ports = ScriptedPorts {
            msr: vec![0x00],
            data: vec![],
            written: vec![],
        };
        let port = PortProtocol::new(100);
        assert_eq!(
            port.send_command_byte(&mut session, &mut ports, 0x07),
            Err(FloppyError::ControllerTimeout)
        );
        assert!(session.needs_reset);
        assert_eq!(session.last_known_track, None);
        assert_eq!(
            port.read_result(&mut session, &mut ports),
            Err(FloppyError::ResetPending)
        );
        assert!(ports.written.is_empty());
    }

    #[test]
    fn read_collects_bytes_until_ready() {
        let mut session = ControllerSession::new();
        let offer = STATUS_READY | STATUS_DIR | STATUS_BUSY;
        let mut ports = ScriptedPorts {
            msr: vec![offer, offer, STATUS_READY],
            data: vec![0x20, 0x00],
            written: vec![],
        };
        let reply = PortProtocol::new(10).read_result(&mut session, &mut ports).unwrap();
        assert_eq!(reply.as_slice(), &[0x20, 0x00]);
        assert_eq!(reply.st0(), 0x20);
    }

    #[test]
    fn more_than_seven_result_bytes_is_a_violation() {
        let mut session = ControllerSession::new();
        let mut ports = ScriptedPorts {
            msr: vec![STATUS_READY | STATUS_DIR | STATUS_BUSY],
            data: vec![0; 16],
            written: vec![],
        };
        let result = PortProtocol::new(100).read_result(&mut session, &mut ports);
        assert_eq!(result, Err(FloppyError::ControllerTimeout));
        assert!(session.needs_reset);
    }
}
