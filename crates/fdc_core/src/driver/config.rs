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

    driver::config.rs

    Tunable parameters of the transfer engine.
*/

use serde_derive::Deserialize;

pub const DEFAULT_MAX_ERRORS: u32 = 12;
pub const DEFAULT_TRACK_READ_MAX_ERRORS: u32 = 4;
pub const DEFAULT_POLL_BUDGET: u32 = 10_000;
pub const DEFAULT_MOTOR_SPINUP_TICKS: u32 = 50;
pub const DEFAULT_SELECT_SETTLE_TICKS: u32 = 2;
pub const DEFAULT_MOTOR_OFF_TICKS: u32 = 300;
/// The DMA engine addresses the first megabyte only.
pub const DEFAULT_DMA_LIMIT: u32 = 0x10_0000;
pub const DEFAULT_TRACK_BUFFER: u32 = 0x08_0000;
pub const DEFAULT_BOUNCE_BUFFER: u32 = 0x08_8000;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DriverConfig {
    /// A request fails once its error count exceeds this value.
    pub max_errors: u32,
    /// Reads use whole-track mode while the error count is below this value.
    pub track_read_max_errors: u32,
    /// Status register polls before a port operation times out.
    pub poll_budget: u32,
    pub motor_spinup_ticks: u32,
    pub select_settle_ticks: u32,
    pub motor_off_ticks: u32,
    pub dma_limit: u32,
    /// Physical address of the whole-track staging buffer.
    pub track_buffer: u32,
    /// Physical address of the single-sector bounce buffer.
    pub bounce_buffer: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_errors: DEFAULT_MAX_ERRORS,
            track_read_max_errors: DEFAULT_TRACK_READ_MAX_ERRORS,
            poll_budget: DEFAULT_POLL_BUDGET,
            motor_spinup_ticks: DEFAULT_MOTOR_SPINUP_TICKS,
            select_settle_ticks: DEFAULT_SELECT_SETTLE_TICKS,
            motor_off_ticks: DEFAULT_MOTOR_OFF_TICKS,
            dma_limit: DEFAULT_DMA_LIMIT,
            track_buffer: DEFAULT_TRACK_BUFFER,
            bounce_buffer: DEFAULT_BOUNCE_BUFFER,
        }
    }
}
