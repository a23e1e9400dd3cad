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

    devices::fdc.rs

    Simulated NEC µPD765 floppy disk controller.
*/

//! A NEC µPD765 compatible controller, modeled closely enough to exercise a driver.
//!
//! Commands are received one byte at a time through the data register. Commands that
//! complete at once produce their result phase (or a seek-end interrupt) immediately; data
//! transfers are queued as an [Operation] and carried out by [FloppyController::run]
//! against the DMA channel.
//!
//! A [FaultInjector] can make transfers fail, offset seeks, wedge the status register or
//! inject random CRC errors, so the driver's recovery paths can be driven on demand.

use std::collections::VecDeque;

use crate::{
    bus::{FD_DATA, FD_DCR, FD_DIR, FD_DOR, FD_STATUS},
    devices::{
        dma::{DmaChannel, DmaTransferType},
        floppy_drive::{FloppyDiskDrive, FloppyDriveType},
    },
    driver::port::{
        CommandByte, DriveHeadSelect, OPCODE_READ_DATA, OPCODE_RECALIBRATE, OPCODE_SEEK, OPCODE_SENSE_INTERRUPT,
        OPCODE_SPECIFY, OPCODE_WRITE_DATA, SECTOR_SIZE_CODE,
    },
    request::SECTOR_SIZE,
};

use rand::{rngs::StdRng, Rng, SeedableRng};

pub const FDC_LOG_LEN: usize = 1000;
pub const FDC_MAX_DRIVES: usize = 4;

pub const FDC_STATUS_FDC_BUSY: u8 = 0b0001_0000;
pub const FDC_STATUS_DIO: u8 = 0b0100_0000;
pub const FDC_STATUS_MRQ: u8 = 0b1000_0000;

pub const DOR_DRIVE_SELECT_MASK: u8 = 0b0000_0011;
pub const DOR_FDC_RESET: u8 = 0b0000_0100;
pub const DOR_MOTOR_FDD_A: u8 = 0b0001_0000;

pub const DIR_DISK_CHANGED: u8 = 0b1000_0000;

pub const ST0_HEAD_ACTIVE: u8 = 0b0000_0100;
pub const ST0_NOT_READY: u8 = 0b0000_1000;
pub const ST0_SEEK_END: u8 = 0b0010_0000;
pub const ST0_ABNORMAL_TERMINATION: u8 = 0b0100_0000;
pub const ST0_INVALID_OPCODE: u8 = 0b1000_0000;
pub const ST0_RESET: u8 = 0b1100_0000;

pub const ST1_NO_ID: u8 = 0b0000_0001;
pub const ST1_WRITE_PROTECT: u8 = 0b0000_0010;
pub const ST1_NODATA: u8 = 0b0000_0100;
pub const ST1_OVERRUN: u8 = 0b0001_0000;
pub const ST1_CRC_ERROR: u8 = 0b0010_0000;
pub const ST1_END_OF_CYLINDER: u8 = 0b1000_0000;

pub const ST2_WRONG_CYLINDER: u8 = 0b0001_0000;
pub const ST2_DATA_CRC_ERROR: u8 = 0b0010_0000;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, strum_macros::Display)]
pub enum Command {
    #[default]
    NoCommand,
    Specify,
    SenseIntStatus,
    CalibrateDrive,
    SeekParkHead,
    ReadData,
    WriteData,
    Invalid,
}

/// What the controller saw, in order. Used by tests to check the driver's command stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FdcEvent {
    Reset,
    Command(Command),
    DataRate(u8),
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum IoMode {
    #[default]
    FromCpu,
    ToCpu,
}

#[derive(Copy, Clone, Debug)]
pub struct TransferParams {
    write: bool,
    drive: usize,
    head: u8,
    cylinder: u8,
    sector: u8,
    eot: u8,
    mt: bool,
}

/// Work left over after a command's bytes have been received.
#[derive(Copy, Clone, Debug, Default)]
pub enum Operation {
    #[default]
    NoOperation,
    Transfer(TransferParams),
}

type CommandDispatchFn = fn(&mut FloppyController) -> Continuation;
pub enum Continuation {
    CommandComplete,
    ContinueAsOperation,
}

pub struct FaultInjector {
    fail_transfers: u32,
    seek_offset: i8,
    stuck_status: bool,
    crc_error_rate: f64,
    rng: StdRng,
}

impl FaultInjector {
    pub fn new(seed: u64) -> Self {
        Self {
            fail_transfers: 0,
            seek_offset: 0,
            stuck_status: false,
            crc_error_rate: 0.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Fail the next `n` data transfers with a CRC error.
    pub fn fail_next_transfers(&mut self, n: u32) {
        self.fail_transfers = n;
    }
    /// Land every seek `offset` cylinders away from its target.
    pub fn set_seek_offset(&mut self, offset: i8) {
        self.seek_offset = offset;
    }
    /// Make the main status register read as zero forever.
    pub fn set_stuck_status(&mut self, stuck: bool) {
        self.stuck_status = stuck;
    }
    pub fn set_crc_error_rate(&mut self, rate: f64) {
        self.crc_error_rate = rate.clamp(0.0, 1.0);
    }

    fn take_transfer_failure(&mut self) -> bool {
        if self.fail_transfers > 0 {
            self.fail_transfers -= 1;
            true
        }
        else if self.crc_error_rate > 0.0 {
            self.rng.random_bool(self.crc_error_rate)
        }
        else {
            false
        }
    }
}

pub struct FloppyController {
    dor: u8,
    in_reset: bool,
    reset_flag: bool,

    mrq: bool,
    busy: bool,
    dio: IoMode,

    command: Command,
    command_fn: Option<CommandDispatchFn>,
    command_byte: CommandByte,
    command_byte_n: usize,
    receiving_command: bool,
    data_register_in: VecDeque<u8>,
    data_register_out: VecDeque<u8>,

    operation: Operation,
    seek_result: Option<(usize, u8)>,
    send_interrupt: bool,

    drives: [FloppyDiskDrive; FDC_MAX_DRIVES],
    data_rate: u8,
    specify: Option<(u8, u8)>,

    faults: FaultInjector,
    cmd_log: VecDeque<String>,
    trace: Vec<FdcEvent>,
}

impl FloppyController {
    pub fn new(seed: u64) -> Self {
        Self {
            dor: 0,
            in_reset: true,
            reset_flag: false,
            mrq: false,
            busy: false,
            dio: IoMode::FromCpu,
            command: Command::NoCommand,
            command_fn: None,
            command_byte: CommandByte::new(),
            command_byte_n: 0,
            receiving_command: false,
            data_register_in: VecDeque::new(),
            data_register_out: VecDeque::new(),
            operation: Operation::NoOperation,
            seek_result: None,
            send_interrupt: false,
            drives: std::array::from_fn(|n| FloppyDiskDrive::new(n, FloppyDriveType::default())),
            data_rate: 0x02,
            specify: None,
            faults: FaultInjector::new(seed),
            cmd_log: VecDeque::with_capacity(FDC_LOG_LEN),
            trace: Vec::new(),
        }
    }

    /// Return the controller to its post-reset state. Drives keep their head position.
    pub fn reset_internal(&mut self) {
        self.mrq = true;
        self.busy = false;
        self.dio = IoMode::FromCpu;
        self.command = Command::NoCommand;
        self.command_fn = None;
        self.command_byte_n = 0;
        self.receiving_command = false;
        self.data_register_in.clear();
        self.data_register_out.clear();
        self.operation = Operation::NoOperation;
        self.seek_result = None;
        self.specify = None;
        self.reset_flag = true;
        self.send_interrupt = true;
        self.trace.push(FdcEvent::Reset);
        self.log_str("Controller reset");
    }

    pub fn drive(&self, idx: usize) -> &FloppyDiskDrive {
        &self.drives[idx & 0x03]
    }
    pub fn drive_mut(&mut self, idx: usize) -> &mut FloppyDiskDrive {
        &mut self.drives[idx & 0x03]
    }
    pub fn set_drive_type(&mut self, idx: usize, drive_type: FloppyDriveType) {
        self.drives[idx & 0x03] = FloppyDiskDrive::new(idx & 0x03, drive_type);
    }
    pub fn faults_mut(&mut self) -> &mut FaultInjector {
        &mut self.faults
    }
    pub fn dor(&self) -> u8 {
        self.dor
    }
    pub fn data_rate(&self) -> u8 {
        self.data_rate
    }
    pub fn specify_bytes(&self) -> Option<(u8, u8)> {
        self.specify
    }
    pub fn trace(&self) -> &[FdcEvent] {
        &self.trace
    }
    pub fn clear_trace(&mut self) {
        self.trace.clear();
    }
    /// Number of times a command was started.
    pub fn command_count(&self, command: Command) -> usize {
        self.trace.iter().filter(|e| **e == FdcEvent::Command(command)).count()
    }
    pub fn cmd_log(&self) -> impl Iterator<Item = &String> {
        self.cmd_log.iter()
    }
    pub fn operation_pending(&self) -> bool {
        !matches!(self.operation, Operation::NoOperation)
    }

    /// Return and clear the interrupt request.
    pub fn take_interrupt(&mut self) -> bool {
        std::mem::take(&mut self.send_interrupt)
    }

    pub fn read_u8(&mut self, port: u16) -> u8 {
        match port {
            FD_STATUS => self.handle_status_register_read(),
            FD_DATA => self.handle_data_register_read(),
            FD_DIR => self.handle_dir_read(),
            _ => {
                log::warn!("Read from unhandled port: {:04X}", port);
                0xFF
            }
        }
    }

    pub fn write_u8(&mut self, port: u16, data: u8) {
        match port {
            FD_DOR => self.handle_dor_write(data),
            FD_DATA => self.handle_data_register_write(data),
            FD_DCR => {
                log::trace!("Data rate set to {:02X}", data);
                self.data_rate = data & 0x03;
                self.trace.push(FdcEvent::DataRate(self.data_rate));
            }
            _ => log::warn!("Write to unhandled port: {:04X}", port),
        }
    }

    pub fn handle_status_register_read(&self) -> u8 {
        if self.faults.stuck_status {
            return 0;
        }
        let mut msr = 0;
        if self.mrq {
            msr |= FDC_STATUS_MRQ;
        }
        if self.dio == IoMode::ToCpu {
            msr |= FDC_STATUS_DIO;
        }
        if self.busy {
            msr |= FDC_STATUS_FDC_BUSY;
        }
        msr
    }

    fn handle_dir_read(&self) -> u8 {
        if self.drives[(self.dor & DOR_DRIVE_SELECT_MASK) as usize].disk_changed() {
            DIR_DISK_CHANGED
        }
        else {
            0
        }
    }

    pub fn handle_dor_write(&mut self, data: u8) {
        log::trace!("DOR write: {:02X}", data);
        for (n, drive) in self.drives.iter_mut().enumerate() {
            drive.motor_on = data & (DOR_MOTOR_FDD_A << n) != 0;
        }
        if data & DOR_FDC_RESET == 0 {
            if !self.in_reset {
                log::trace!("Entering reset state");
            }
            self.in_reset = true;
            self.mrq = false;
        }
        else if self.in_reset {
            self.in_reset = false;
            self.reset_internal();
        }
        self.dor = data;
    }

    fn handle_data_register_read(&mut self) -> u8 {
        let Some(byte) = self.data_register_out.pop_front()
        else {
            log::warn!("Data register read with no result pending");
            return 0;
        };
        if self.data_register_out.is_empty() {
            self.busy = false;
            self.dio = IoMode::FromCpu;
        }
        byte
    }

    fn set_command(&mut self, command: Command, n_bytes: usize, command_fn: CommandDispatchFn) {
        self.receiving_command = true;
        self.busy = true;
        self.command = command;
        self.command_fn = Some(command_fn);
        self.command_byte_n = n_bytes;
        self.trace.push(FdcEvent::Command(command));
    }

    fn handle_data_register_write(&mut self, data: u8) {
        if self.in_reset || self.dio == IoMode::ToCpu || self.operation_pending() {
            log::warn!("Data register write {:02X} while not accepting commands", data);
            return;
        }
        if !self.receiving_command {
            self.command_byte = CommandByte::from_bytes([data]);
            match self.command_byte.command() {
                OPCODE_SPECIFY => self.set_command(Command::Specify, 2, FloppyController::command_specify),
                OPCODE_RECALIBRATE => {
                    self.set_command(Command::CalibrateDrive, 1, FloppyController::command_calibrate_drive)
                }
                OPCODE_SEEK => self.set_command(Command::SeekParkHead, 2, FloppyController::command_seek_head),
                OPCODE_READ_DATA => self.set_command(Command::ReadData, 8, FloppyController::command_read_data),
                OPCODE_WRITE_DATA => self.set_command(Command::WriteData, 8, FloppyController::command_write_data),
                OPCODE_SENSE_INTERRUPT => {
                    self.trace.push(FdcEvent::Command(Command::SenseIntStatus));
                    self.command_sense_interrupt();
                }
                _ => {
                    log::warn!("Received invalid command byte: {:02X}", data);
                    self.trace.push(FdcEvent::Command(Command::Invalid));
                    self.send_results(&[ST0_INVALID_OPCODE]);
                }
            }
            return;
        }

        self.data_register_in.push_back(data);
        self.command_byte_n -= 1;
        if self.command_byte_n == 0 {
            self.receiving_command = false;
            let result = match self.command_fn.take() {
                Some(command_fn) => command_fn(self),
                None => Continuation::CommandComplete,
            };
            if let Continuation::CommandComplete = result {
                self.command = Command::NoCommand;
            }
            self.data_register_in.clear();
        }
    }

    fn command_param(&self, idx: usize) -> u8 {
        self.data_register_in.get(idx).copied().unwrap_or(0)
    }

    fn drive_head_param(&self) -> (usize, u8) {
        let dhs = DriveHeadSelect::from_bytes([self.command_param(0)]);
        (dhs.drive() as usize, dhs.head())
    }

    fn send_results(&mut self, bytes: &[u8]) {
        self.data_register_out.clear();
        self.data_register_out.extend(bytes.iter().copied());
        self.mrq = true;
        self.busy = true;
        self.dio = IoMode::ToCpu;
    }

    /// Command phase is over and no result phase follows.
    fn command_idle(&mut self) {
        self.mrq = true;
        self.busy = false;
        self.dio = IoMode::FromCpu;
    }

    fn command_sense_interrupt(&mut self) {
        if self.reset_flag {
            self.reset_flag = false;
            let pcn = self.drives[0].cylinder();
            self.log_cmd(Command::SenseIntStatus, "command_sense_interrupt", "reported reset");
            self.send_results(&[ST0_RESET, pcn]);
        }
        else if let Some((drive, st0)) = self.seek_result.take() {
            let pcn = self.drives[drive].cylinder();
            self.log_cmd(
                Command::SenseIntStatus,
                "command_sense_interrupt",
                &format!("drive {} st0 {:02X} pcn {}", drive, st0, pcn),
            );
            self.send_results(&[st0, pcn]);
        }
        else {
            self.send_results(&[ST0_INVALID_OPCODE]);
        }
    }

    fn command_specify(&mut self) -> Continuation {
        self.specify = Some((self.command_param(0), self.command_param(1)));
        self.log_cmd(
            Command::Specify,
            "command_specify",
            &format!("{:02X} {:02X}", self.command_param(0), self.command_param(1)),
        );
        self.command_idle();
        Continuation::CommandComplete
    }

    fn finish_seek(&mut self, drive: usize, head: u8, target: i16) {
        let base = (head << 2) | drive as u8;
        let drv = &mut self.drives[drive];
        let st0 = if !drv.ready() {
            ST0_SEEK_END | ST0_ABNORMAL_TERMINATION | ST0_NOT_READY | base
        }
        else if target < 0 || target > u8::MAX as i16 || !drv.seek(target as u8) {
            ST0_SEEK_END | ST0_ABNORMAL_TERMINATION | base
        }
        else {
            ST0_SEEK_END | base
        };
        self.seek_result = Some((drive, st0));
        self.command_idle();
        self.send_interrupt = true;
    }

    fn command_calibrate_drive(&mut self) -> Continuation {
        let (drive, _) = self.drive_head_param();
        self.log_cmd(Command::CalibrateDrive, "command_calibrate_drive", &format!("drive {}", drive));
        self.finish_seek(drive, 0, 0);
        Continuation::CommandComplete
    }

    fn command_seek_head(&mut self) -> Continuation {
        let (drive, head) = self.drive_head_param();
        let cylinder = self.command_param(1);
        let target = cylinder as i16 + self.faults.seek_offset as i16;
        self.log_cmd(
            Command::SeekParkHead,
            "command_seek_head",
            &format!("drive {} head {} cylinder {} (lands on {})", drive, head, cylinder, target),
        );
        self.finish_seek(drive, head, target);
        Continuation::CommandComplete
    }

    fn command_transfer(&mut self, write: bool) -> Continuation {
        let (drive, head) = self.drive_head_param();
        let params = TransferParams {
            write,
            drive,
            head,
            cylinder: self.command_param(1),
            sector: self.command_param(3),
            eot: self.command_param(5),
            mt: self.command_byte.mt(),
        };
        self.log_cmd(
            self.command,
            "command_transfer",
            &format!(
                "drive {} head {} c:{} r:{} n:{} eot:{}",
                drive,
                head,
                params.cylinder,
                params.sector,
                self.command_param(4),
                params.eot
            ),
        );
        if !self.drives[drive].ready() {
            let st0 = ST0_ABNORMAL_TERMINATION | ST0_NOT_READY | (head << 2) | drive as u8;
            self.send_transfer_result(&params, st0, 0, 0, params.sector);
            return Continuation::CommandComplete;
        }
        // Execution phase: the data register is unavailable until run() completes.
        self.mrq = false;
        self.busy = true;
        self.operation = Operation::Transfer(params);
        Continuation::ContinueAsOperation
    }

    fn command_read_data(&mut self) -> Continuation {
        self.command_transfer(false)
    }

    fn command_write_data(&mut self) -> Continuation {
        self.command_transfer(true)
    }

    fn send_transfer_result(&mut self, params: &TransferParams, st0: u8, st1: u8, st2: u8, sector: u8) {
        self.send_results(&[st0, st1, st2, params.cylinder, params.head, sector, SECTOR_SIZE_CODE]);
        self.command = Command::NoCommand;
        self.send_interrupt = true;
    }

    /// Carry out a pending operation.
    pub fn run(&mut self, dma: &mut DmaChannel, memory: &mut [u8]) {
        if let Operation::Transfer(params) = std::mem::take(&mut self.operation) {
            self.operation_transfer(params, dma, memory);
        }
    }

    fn operation_transfer(&mut self, p: TransferParams, dma: &mut DmaChannel, memory: &mut [u8]) {
        let mut head = p.head;
        let mut sector = p.sector;
        let base = |head: u8| (head << 2) | p.drive as u8;
        let dma_type = if p.write {
            DmaTransferType::Read
        }
        else {
            DmaTransferType::Write
        };
        let fail = self.faults.take_transfer_failure();
        let data_rate = self.data_rate;
        let drive = &mut self.drives[p.drive];

        let (st0, st1, st2) = 'op: {
            let abnormal = ST0_ABNORMAL_TERMINATION | base(head);
            let rate_ok = drive
                .disk()
                .map(|d| d.geometry().rate == data_rate && drive.supports_rate(data_rate))
                .unwrap_or(false);
            if !rate_ok {
                break 'op (abnormal, ST1_NO_ID, 0);
            }
            match drive.id_cylinder() {
                None => break 'op (abnormal, ST1_NO_ID, 0),
                Some(c) if c != p.cylinder => break 'op (abnormal, ST1_NODATA, ST2_WRONG_CYLINDER),
                Some(_) => {}
            }
            if !dma.is_ready(dma_type) {
                break 'op (abnormal, ST1_OVERRUN, 0);
            }
            if p.write && drive.disk().map(|d| d.write_protected()).unwrap_or(false) {
                break 'op (abnormal, ST1_WRITE_PROTECT, 0);
            }
            if fail {
                break 'op (abnormal, ST1_CRC_ERROR, ST2_DATA_CRC_ERROR);
            }

            loop {
                let Some(disk) = drive.disk_mut()
                else {
                    break 'op (ST0_ABNORMAL_TERMINATION | ST0_NOT_READY | base(head), 0, 0);
                };
                let Some(block) = disk.find_block(p.cylinder, head, sector)
                else {
                    break 'op (ST0_ABNORMAL_TERMINATION | base(head), ST1_NODATA, 0);
                };
                if disk.is_bad(block) {
                    break 'op (ST0_ABNORMAL_TERMINATION | base(head), ST1_CRC_ERROR, ST2_DATA_CRC_ERROR);
                }
                let n = if p.write {
                    let data = dma.memory_to_device(memory, SECTOR_SIZE);
                    disk.block_mut(block)[..data.len()].copy_from_slice(&data);
                    data.len()
                }
                else {
                    dma.device_to_memory(memory, disk.block(block))
                };
                if n < SECTOR_SIZE {
                    break 'op (ST0_ABNORMAL_TERMINATION | base(head), ST1_OVERRUN, 0);
                }
                if dma.terminal_count() {
                    break 'op (base(head), 0, 0);
                }
                if sector == p.eot {
                    if p.mt && head == 0 {
                        head = 1;
                        sector = 1;
                        continue;
                    }
                    break 'op (ST0_ABNORMAL_TERMINATION | base(head), ST1_END_OF_CYLINDER, 0);
                }
                sector += 1;
            }
        };

        self.log_cmd(
            self.command,
            "operation_transfer",
            &format!("complete st0:{:02X} st1:{:02X} st2:{:02X}", st0, st1, st2),
        );
        let params = TransferParams { head, ..p };
        self.send_transfer_result(&params, st0, st1, st2, sector);
    }

    pub fn log_cmd(&mut self, cmd: Command, func: &str, s: &str) {
        self.log_str(&format!("{}: {}", cmd, s));
        log::trace!("{}(): {}", func, s);
    }

    pub fn log_str(&mut self, s: &str) {
        if self.cmd_log.len() == FDC_LOG_LEN {
            self.cmd_log.pop_front();
        }
        self.cmd_log.push_back(s.to_string());
    }
}
