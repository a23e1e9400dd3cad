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

    driver::chs.rs

    Track, head, sector addressing for floppy transfers.
*/

use crate::driver::geometry::DriveGeometry;
use std::fmt::Display;

/// A decomposed block address.
///  - track: logical track, recorded in the sector ID fields on the medium
///  - head
///  - sector: zero-based index within the track side
///  - seek_track: physical track the head must be stepped to
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq)]
pub struct ChsAddress {
    pub track: u8,
    pub head: u8,
    pub sector: u8,
    pub seek_track: u8,
}

impl Display for ChsAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[c:{:2} h:{} s:{:2}] seek:{}",
            self.track,
            self.head,
            self.sector_id(),
            self.seek_track
        )
    }
}

impl ChsAddress {
    /// Return the sector ID as sent to the controller. Sector IDs are one-based.
    #[inline]
    pub fn sector_id(&self) -> u8 {
        self.sector + 1
    }

    /// Index of this sector within a whole-track (both heads) buffer.
    #[inline]
    pub fn track_index(&self, geom: &DriveGeometry) -> usize {
        self.head as usize * geom.sectors_per_track as usize + self.sector as usize
    }

    /// Return the logical block number this address refers to.
    pub fn to_block(&self, geom: &DriveGeometry) -> u32 {
        (self.track as u32 * geom.heads as u32 + self.head as u32) * geom.sectors_per_track as u32
            + self.sector as u32
    }
}
