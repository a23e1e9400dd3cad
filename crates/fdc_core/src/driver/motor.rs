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

    driver::motor.rs

    Digital output register management: motors and drive selection.
*/

use crate::{
    bus::{FloppyBus, FD_DOR},
    driver::{config::DriverConfig, session::ControllerSession},
};

pub const DOR_DRIVE_SELECT_MASK: u8 = 0b0000_0011;
/// Controller runs while this bit is set; clearing it holds the controller in reset.
pub const DOR_FDC_ENABLE: u8 = 0b0000_0100;
pub const DOR_DMA_ENABLED: u8 = 0b0000_1000;
pub const DOR_MOTOR_MASK: u8 = 0b1111_0000;
/// Initial DOR value: controller enabled, DMA and interrupts enabled, drive 0 selected,
/// all motors off.
pub const DOR_INITIAL: u8 = DOR_DMA_ENABLED | DOR_FDC_ENABLE;

#[inline]
pub fn motor_bit(drive: u8) -> u8 {
    0x10 << (drive & 0x03)
}

fn write_dor(session: &mut ControllerSession, bus: &mut dyn FloppyBus, dor: u8) {
    log::trace!("write_dor(): {:02X} -> {:02X}", session.dor, dor);
    bus.io_write_u8(FD_DOR, dor);
    session.dor = dor;
}

/// Turn a drive's motor on, returning the number of ticks until it is up to speed.
pub fn motor_on(session: &mut ControllerSession, bus: &mut dyn FloppyBus, drive: u8, config: &DriverConfig) -> u32 {
    if session.motor_running(drive) {
        return 0;
    }
    log::debug!("Drive {}: motor on", drive);
    let dor = session.dor | motor_bit(drive);
    write_dor(session, bus, dor);
    config.motor_spinup_ticks
}

pub fn motor_off(session: &mut ControllerSession, bus: &mut dyn FloppyBus, drive: u8) {
    if session.motor_running(drive) {
        log::debug!("Drive {}: motor off", drive);
        let dor = session.dor & !motor_bit(drive);
        write_dor(session, bus, dor);
    }
}

/// Point the drive select lines at `drive`. Returns true if the selection changed and the
/// lines need time to settle.
pub fn select_drive(session: &mut ControllerSession, bus: &mut dyn FloppyBus, drive: u8) -> bool {
    session.selected_drive = Some(drive);
    if session.dor & DOR_DRIVE_SELECT_MASK == drive & DOR_DRIVE_SELECT_MASK {
        return false;
    }
    let dor = (session.dor & !DOR_DRIVE_SELECT_MASK) | (drive & DOR_DRIVE_SELECT_MASK);
    write_dor(session, bus, dor);
    true
}

/// Pulse the controller reset line, keeping motors and selection.
pub fn pulse_reset(session: &mut ControllerSession, bus: &mut dyn FloppyBus) {
    let dor = session.dor | DOR_FDC_ENABLE;
    bus.io_write_u8(FD_DOR, dor & !DOR_FDC_ENABLE);
    write_dor(session, bus, dor);
}

pub fn init_dor(session: &mut ControllerSession, bus: &mut dyn FloppyBus) {
    write_dor(session, bus, DOR_INITIAL);
}
