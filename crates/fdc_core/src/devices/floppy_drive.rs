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

    devices::floppy_drive.rs

    Simulated floppy disk drive and diskette.
*/

//! A floppy drive and the diskette in it.
//!
//! A diskette is formatted with a fixed geometry from the media table and a recognizable
//! data pattern. The drive tracks the physical head position; a 40 track diskette in an
//! 80 track drive has its tracks on every second physical cylinder.

use crate::{
    driver::geometry::{geometry_for, DriveGeometry},
    error::FloppyError,
    request::SECTOR_SIZE,
};

use fxhash::{FxHashMap, FxHashSet};
use lazy_static::lazy_static;
use serde_derive::Deserialize;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, strum_macros::Display, strum_macros::EnumIter)]
pub enum FloppyDriveType {
    #[default]
    Floppy360K,
    Floppy720K,
    Floppy12M,
    Floppy144M,
}

impl FloppyDriveType {
    /// Return the drive a given media type is normally used in.
    pub fn for_media(media_type: u8) -> Self {
        match media_type {
            1 => FloppyDriveType::Floppy360K,
            3 | 4 => FloppyDriveType::Floppy720K,
            2 | 5 | 6 => FloppyDriveType::Floppy12M,
            _ => FloppyDriveType::Floppy144M,
        }
    }

    /// Return the media type a drive of this type is built for.
    pub fn native_media(&self) -> u8 {
        match self {
            FloppyDriveType::Floppy360K => 1,
            FloppyDriveType::Floppy720K => 4,
            FloppyDriveType::Floppy12M => 2,
            FloppyDriveType::Floppy144M => 7,
        }
    }
}

pub struct DriveCapability {
    /// Number of cylinders the head can be stepped to.
    pub cylinders: u8,
    /// Nominal track count of the drive's native media.
    pub tracks: u8,
    /// Data rate codes the drive electronics accept.
    pub rates: &'static [u8],
}

lazy_static! {
    /// Drives can seek a bit beyond the end of their native media.
    pub static ref DRIVE_CAPABILITIES: FxHashMap<FloppyDriveType, DriveCapability> = {
        let mut map = FxHashMap::default();
        map.insert(
            FloppyDriveType::Floppy360K,
            DriveCapability { cylinders: 42, tracks: 40, rates: &[0x02] },
        );
        map.insert(
            FloppyDriveType::Floppy720K,
            DriveCapability { cylinders: 83, tracks: 80, rates: &[0x02] },
        );
        map.insert(
            FloppyDriveType::Floppy12M,
            DriveCapability { cylinders: 83, tracks: 80, rates: &[0x00, 0x01] },
        );
        map.insert(
            FloppyDriveType::Floppy144M,
            DriveCapability { cylinders: 83, tracks: 80, rates: &[0x00, 0x02] },
        );
        map
    };
}

/// Return the byte at `offset` of the freshly formatted sector `block`.
pub fn pattern_byte(block: u32, offset: usize) -> u8 {
    match offset {
        0..=3 => block.to_le_bytes()[offset],
        _ => (block as usize).wrapping_mul(31).wrapping_add(offset) as u8,
    }
}

pub struct FloppyDisk {
    media_type: u8,
    geometry: &'static DriveGeometry,
    data: Vec<u8>,
    write_protected: bool,
    bad_sectors: FxHashSet<u32>,
}

impl FloppyDisk {
    /// Create a diskette of the given media type filled with [pattern_byte].
    pub fn formatted(media_type: u8) -> Result<Self, FloppyError> {
        let geometry = geometry_for(media_type)?;
        let mut data = vec![0u8; geometry.total_sectors as usize * SECTOR_SIZE];
        for (block, sector) in data.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            for (offset, byte) in sector.iter_mut().enumerate() {
                *byte = pattern_byte(block as u32, offset);
            }
        }
        Ok(Self {
            media_type,
            geometry,
            data,
            write_protected: false,
            bad_sectors: FxHashSet::default(),
        })
    }

    pub fn with_write_protect(mut self, write_protected: bool) -> Self {
        self.write_protected = write_protected;
        self
    }

    pub fn with_bad_sector(mut self, block: u32) -> Self {
        self.bad_sectors.insert(block);
        self
    }

    pub fn media_type(&self) -> u8 {
        self.media_type
    }
    pub fn geometry(&self) -> &'static DriveGeometry {
        self.geometry
    }
    pub fn write_protected(&self) -> bool {
        self.write_protected
    }
    pub fn set_write_protected(&mut self, write_protected: bool) {
        self.write_protected = write_protected;
    }
    pub fn is_bad(&self, block: u32) -> bool {
        self.bad_sectors.contains(&block)
    }

    /// Translate sector ID fields to a block number, if such a sector exists.
    pub fn find_block(&self, track: u8, head: u8, sector_id: u8) -> Option<u32> {
        let geom = self.geometry;
        if track >= geom.tracks || head >= geom.heads || sector_id == 0 || sector_id > geom.sectors_per_track {
            return None;
        }
        Some((track as u32 * geom.heads as u32 + head as u32) * geom.sectors_per_track as u32 + sector_id as u32 - 1)
    }

    pub fn block(&self, block: u32) -> &[u8] {
        let start = block as usize * SECTOR_SIZE;
        &self.data[start..start + SECTOR_SIZE]
    }

    pub fn block_mut(&mut self, block: u32) -> &mut [u8] {
        let start = block as usize * SECTOR_SIZE;
        &mut self.data[start..start + SECTOR_SIZE]
    }
}

pub struct FloppyDiskDrive {
    drive_type: FloppyDriveType,
    drive_n: usize,
    cylinder: u8,
    pub(crate) motor_on: bool,
    disk: Option<FloppyDisk>,
    disk_changed: bool,
}

impl Default for FloppyDiskDrive {
    fn default() -> Self {
        Self {
            drive_type: Default::default(),
            drive_n: 0,
            cylinder: 0,
            motor_on: false,
            disk: None,
            // The change line is active at power on until the first step.
            disk_changed: true,
        }
    }
}

impl FloppyDiskDrive {
    pub fn new(drive_n: usize, drive_type: FloppyDriveType) -> Self {
        Self {
            drive_type,
            drive_n,
            ..Default::default()
        }
    }

    fn capability(&self) -> &'static DriveCapability {
        &DRIVE_CAPABILITIES[&self.drive_type]
    }

    pub fn drive_type(&self) -> FloppyDriveType {
        self.drive_type
    }
    pub fn cylinder(&self) -> u8 {
        self.cylinder
    }
    pub fn motor_on(&self) -> bool {
        self.motor_on
    }
    pub fn disk_present(&self) -> bool {
        self.disk.is_some()
    }
    pub fn ready(&self) -> bool {
        self.motor_on && self.disk.is_some()
    }
    pub fn disk_changed(&self) -> bool {
        self.disk_changed
    }
    pub fn disk(&self) -> Option<&FloppyDisk> {
        self.disk.as_ref()
    }
    pub fn disk_mut(&mut self) -> Option<&mut FloppyDisk> {
        self.disk.as_mut()
    }
    pub fn supports_rate(&self, rate: u8) -> bool {
        self.capability().rates.contains(&rate)
    }

    pub fn insert(&mut self, disk: FloppyDisk) {
        log::debug!(
            "Drive {}: inserted {} diskette",
            self.drive_n,
            disk.geometry().name
        );
        self.disk = Some(disk);
        self.disk_changed = true;
    }

    pub fn eject(&mut self) -> Option<FloppyDisk> {
        self.disk_changed = true;
        self.disk.take()
    }

    /// Step the head to a cylinder. Stepping with a diskette present clears the change line.
    pub fn seek(&mut self, cylinder: u8) -> bool {
        if cylinder >= self.capability().cylinders {
            return false;
        }
        self.cylinder = cylinder;
        if self.disk.is_some() {
            self.disk_changed = false;
        }
        true
    }

    /// Physical cylinders per diskette track: 2 for 40 track media in an 80 track drive.
    pub fn track_pitch(&self) -> u8 {
        match &self.disk {
            Some(disk) if disk.geometry().tracks * 2 <= self.capability().tracks => 2,
            _ => 1,
        }
    }

    /// Return the track number recorded under the head, if the head is over a track.
    pub fn id_cylinder(&self) -> Option<u8> {
        let disk = self.disk.as_ref()?;
        let pitch = self.track_pitch();
        if self.cylinder % pitch != 0 {
            return None;
        }
        let track = self.cylinder / pitch;
        (track < disk.geometry().tracks).then_some(track)
    }
}
