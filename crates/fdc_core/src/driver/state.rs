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

    driver::state.rs

    Transfer states and the failure recovery policy.
*/

/// The stage of the pipeline that the next interrupt or timer event will complete.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, strum_macros::Display)]
pub enum TransferState {
    #[default]
    Idle,
    /// Waiting for the motor to spin up or the drive select lines to settle.
    MotorWarmup,
    Resetting,
    Recalibrating,
    Seeking,
    Transferring,
}

impl TransferState {
    /// Return whether the controller owes us an interrupt in this state.
    pub fn expects_interrupt(&self) -> bool {
        matches!(
            self,
            TransferState::Resetting
                | TransferState::Recalibrating
                | TransferState::Seeking
                | TransferState::Transferring
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum RecoveryAction {
    Recalibrate,
    Reset,
    Abandon,
}

/// Decide how to recover from a failed seek or transfer, given the error count after the
/// failure has been counted.
pub fn recovery_policy(error_count: u32, max_errors: u32) -> RecoveryAction {
    if error_count > max_errors {
        RecoveryAction::Abandon
    }
    else if error_count > max_errors / 2 {
        RecoveryAction::Reset
    }
    else {
        RecoveryAction::Recalibrate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalation_tiers() {
        let actions: Vec<RecoveryAction> = (1..=13).map(|n| recovery_policy(n, 12)).collect();
        assert!(actions[..6].iter().all(|a| *a == RecoveryAction::Recalibrate));
        assert!(actions[6..12].iter().all(|a| *a == RecoveryAction::Reset));
        assert_eq!(actions[12], RecoveryAction::Abandon);
    }

    #[test]
    fn idle_expects_no_interrupt() {
        assert!(!TransferState::Idle.expects_interrupt());
        assert!(!TransferState::MotorWarmup.expects_interrupt());
        assert!(TransferState::Seeking.expects_interrupt());
    }
}
