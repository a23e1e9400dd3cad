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

    driver::session.rs

    Controller session state owned by the driver.
*/

use crate::driver::{motor::motor_bit, port::FdcCommand, state::TransferState};

/// Drives addressable through the digital output register.
pub const MAX_DRIVES: u8 = 4;

/// Everything the driver knows, or has decided, about the controller and the selected drive.
#[derive(Clone, Debug, Default)]
pub struct ControllerSession {
    pub selected_drive: Option<u8>,
    /// Last value written to the digital output register, including motor bits.
    pub dor: u8,
    pub needs_reset: bool,
    pub needs_recalibrate: bool,
    pub needs_seek: bool,
    /// Physical track under the head, `None` when unknown.
    pub last_known_track: Option<u8>,
    pub last_specify: Option<u8>,
    pub last_data_rate: Option<u8>,
    pub active_command: Option<FdcCommand>,
    pub state: TransferState,
    /// One bit per drive, set when a disk change was observed and not yet queried.
    pub changed_drives: u8,
}

impl ControllerSession {
    pub fn new() -> Self {
        Default::default()
    }

    /// Forget the head position. Any later transfer must seek first.
    pub fn forget_track(&mut self) {
        self.last_known_track = None;
    }

    /// Forget everything a controller reset clears.
    pub fn forget_controller(&mut self) {
        self.last_known_track = None;
        self.last_specify = None;
        self.last_data_rate = None;
        self.active_command = None;
    }

    pub fn set_state(&mut self, state: TransferState) {
        if self.state != state {
            log::trace!("ControllerSession: {} -> {}", self.state, state);
        }
        self.state = state;
    }

    pub fn mark_changed(&mut self, drive: u8) {
        if drive < MAX_DRIVES {
            self.changed_drives |= 1 << drive;
        }
    }

    /// Return and clear the changed bit of a drive. Drives that cannot exist never report
    /// a change.
    pub fn take_changed(&mut self, drive: u8) -> bool {
        if drive >= MAX_DRIVES {
            return false;
        }
        let mask = 1 << drive;
        let changed = self.changed_drives & mask != 0;
        self.changed_drives &= !mask;
        changed
    }

    #[inline]
    pub fn motor_running(&self, drive: u8) -> bool {
        self.dor & motor_bit(drive) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changed_bits_are_per_drive_and_cleared_on_take() {
        let mut session = ControllerSession::new();
        session.mark_changed(2);
        assert!(!session.take_changed(0));
        assert!(session.take_changed(2));
        assert!(!session.take_changed(2));
    }

    #[test]
    fn nonexistent_drives_never_report_a_change() {
        let mut session = ControllerSession::new();
        session.mark_changed(8);
        session.mark_changed(255);
        assert_eq!(session.changed_drives, 0);
        assert!(!session.take_changed(8));
        assert!(!session.take_changed(255));
    }
}
