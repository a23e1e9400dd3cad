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

    driver::geometry.rs

    Static table of supported floppy media geometries.
*/

//! Static lookup from a media type to its physical geometry and controller parameters.

use crate::{
    driver::chs::ChsAddress,
    error::FloppyError,
    request::SECTOR_SIZE,
};

/// Physical layout and controller parameters for one type of media.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriveGeometry {
    pub total_sectors: u32,
    pub sectors_per_track: u8,
    pub heads: u8,
    pub tracks: u8,
    /// Shift applied to the logical track to get the physical seek target. Set for 40 track
    /// media in an 80 track drive.
    pub stretch: u8,
    /// Gap length parameter of READ and WRITE.
    pub gap: u8,
    /// Data rate code written to the configuration control register.
    pub rate: u8,
    /// First byte of the SPECIFY command (step rate and head unload time).
    pub spec1: u8,
    pub name: &'static str,
}

impl DriveGeometry {
    #[inline]
    pub fn capacity_kb(&self) -> u32 {
        self.total_sectors / 2
    }

    /// Bytes in one cylinder, across all heads.
    #[inline]
    pub fn track_bytes(&self) -> usize {
        self.sectors_per_track as usize * self.heads as usize * SECTOR_SIZE
    }

    #[inline]
    pub fn contains(&self, block: u32) -> bool {
        block < self.total_sectors
    }

    /// Decompose a logical block number into a [ChsAddress]. The caller is responsible for
    /// range checking the block first.
    pub fn decompose(&self, block: u32) -> ChsAddress {
        let spt = self.sectors_per_track as u32;
        let sector = (block % spt) as u8;
        let cylinder = block / spt;
        let head = (cylinder % self.heads as u32) as u8;
        let track = (cylinder / self.heads as u32) as u8;
        ChsAddress {
            track,
            head,
            sector,
            seek_track: track << self.stretch,
        }
    }
}

macro_rules! geometry {
    ($total:expr, $spt:expr, $heads:expr, $tracks:expr, $stretch:expr, $gap:expr, $rate:expr, $spec1:expr, $name:expr) => {
        DriveGeometry {
            total_sectors: $total,
            sectors_per_track: $spt,
            heads: $heads,
            tracks: $tracks,
            stretch: $stretch,
            gap: $gap,
            rate: $rate,
            spec1: $spec1,
            name: $name,
        }
    };
}

pub const MAX_MEDIA_TYPE: u8 = 7;
/// SPECIFY parameter used when no media type is known yet.
pub const DEFAULT_SPEC1: u8 = 0xDF;
/// Size of the largest track in the table, which the staging buffer must hold.
pub const MAX_TRACK_BYTES: usize = 18 * 2 * SECTOR_SIZE;

/// Indexed by media type minus one. Media type 0 means no media.
static GEOMETRY_TABLE: [DriveGeometry; MAX_MEDIA_TYPE as usize] = [
    geometry!(720, 9, 2, 40, 0, 0x2A, 0x02, 0xDF, "360kB PC"),
    geometry!(2400, 15, 2, 80, 0, 0x1B, 0x00, 0xDF, "1.2MB AT"),
    geometry!(720, 9, 2, 40, 1, 0x2A, 0x02, 0xDF, "360kB in 720kB drive"),
    geometry!(1440, 9, 2, 80, 0, 0x2A, 0x02, 0xDF, "3.5\" 720kB"),
    geometry!(720, 9, 2, 40, 1, 0x23, 0x01, 0xDF, "360kB in 1.2MB drive"),
    geometry!(1440, 9, 2, 80, 0, 0x23, 0x01, 0xDF, "720kB in 1.2MB drive"),
    geometry!(2880, 18, 2, 80, 0, 0x1B, 0x00, 0xCF, "1.44MB"),
];

pub fn geometry_for(media_type: u8) -> Result<&'static DriveGeometry, FloppyError> {
    match media_type {
        1..=MAX_MEDIA_TYPE => Ok(&GEOMETRY_TABLE[media_type as usize - 1]),
        _ => Err(FloppyError::UnknownMediaType(media_type)),
    }
}
