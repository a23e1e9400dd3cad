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

    error.rs

    Defines the error type returned by the floppy driver.
*/

use thiserror::Error;

#[derive(Error, Copy, Clone, Debug, PartialEq, Eq)]
pub enum FloppyError {
    #[error("Floppy controller did not respond within the poll budget")]
    ControllerTimeout,
    #[error("Floppy controller command refused: reset pending")]
    ResetPending,
    #[error("Seek ended on track {actual:?}, expected track {expected}")]
    SeekMismatch { expected: u8, actual: Option<u8> },
    #[error("Bad transfer status: ST0: {st0:02X} ST1: {st1:02X} ST2: {st2:02X}")]
    BadStatusOnTransfer { st0: u8, st1: u8, st2: u8 },
    #[error("Drive {drive} is write protected")]
    WriteProtected { drive: u8 },
    #[error("Block {block} is beyond the end of the media ({total} sectors)")]
    OutOfRange { block: u32, total: u32 },
    #[error("Unknown media type: {0}")]
    UnknownMediaType(u8),
    #[error("I/O error: drive {drive}, block {block} failed after {errors} errors")]
    RetriesExhausted { drive: u8, block: u32, errors: u32 },
    #[error("Invalid driver configuration: {0}")]
    InvalidConfig(&'static str),
}

impl FloppyError {
    /// Return whether the recovery policy may retry a request that failed with this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FloppyError::ControllerTimeout
                | FloppyError::ResetPending
                | FloppyError::SeekMismatch { .. }
                | FloppyError::BadStatusOnTransfer { .. }
        )
    }
}
