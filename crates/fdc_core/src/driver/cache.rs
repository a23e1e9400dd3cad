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

    driver::cache.rs

    Single slot cache of the most recently read track.
*/

use crate::request::SECTOR_SIZE;

/// Holds one whole track (all heads) of one drive. The entry is valid only after a
/// complete, error-free track read and until the next media change or failed transfer
/// on that track.
#[derive(Clone, Debug, Default)]
pub struct TrackCache {
    drive: u8,
    track: u8,
    valid: bool,
    data:  Vec<u8>,
}

impl TrackCache {
    pub fn new() -> Self {
        Default::default()
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Return the (drive, physical track) held by a valid entry.
    pub fn key(&self) -> Option<(u8, u8)> {
        self.valid.then_some((self.drive, self.track))
    }

    #[inline]
    pub fn matches(&self, drive: u8, track: u8) -> bool {
        self.valid && self.drive == drive && self.track == track
    }

    pub fn lookup(&self, drive: u8, track: u8) -> Option<&[u8]> {
        self.matches(drive, track).then_some(self.data.as_slice())
    }

    /// Return one sector of a cached track by its index within the track buffer.
    pub fn sector(&self, drive: u8, track: u8, index: usize) -> Option<&[u8]> {
        let data = self.lookup(drive, track)?;
        data.get(index * SECTOR_SIZE..(index + 1) * SECTOR_SIZE)
    }

    pub fn populate(&mut self, drive: u8, track: u8, data: &[u8]) {
        log::trace!("TrackCache: populate drive:{} track:{} ({} bytes)", drive, track, data.len());
        self.drive = drive;
        self.track = track;
        self.data.clear();
        self.data.extend_from_slice(data);
        self.valid = true;
    }

    /// Update one sector of a cached track. Returns false if the track is not cached.
    pub fn write_sector(&mut self, drive: u8, track: u8, index: usize, data: &[u8]) -> bool {
        if !self.matches(drive, track) || data.len() < SECTOR_SIZE {
            return false;
        }
        match self.data.get_mut(index * SECTOR_SIZE..(index + 1) * SECTOR_SIZE) {
            Some(sector) => {
                sector.copy_from_slice(&data[..SECTOR_SIZE]);
                true
            }
            None => false,
        }
    }

    pub fn invalidate(&mut self) {
        if self.valid {
            log::trace!("TrackCache: invalidate drive:{} track:{}", self.drive, self.track);
        }
        self.valid = false;
    }

    /// Drop the entry if it belongs to `drive`.
    pub fn invalidate_drive(&mut self, drive: u8) {
        if self.valid && self.drive == drive {
            self.invalidate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track_of(sectors: usize) -> Vec<u8> {
        (0..sectors * SECTOR_SIZE).map(|i| (i / SECTOR_SIZE) as u8).collect()
    }

    #[test]
    fn hit_requires_exact_match() {
        let mut cache = TrackCache::new();
        assert!(cache.lookup(0, 0).is_none());
        cache.populate(1, 4, &track_of(18));
        assert!(cache.lookup(1, 4).is_some());
        assert!(cache.lookup(0, 4).is_none());
        assert!(cache.lookup(1, 5).is_none());
        assert_eq!(cache.sector(1, 4, 9).unwrap()[0], 9);
        assert!(cache.sector(1, 4, 18).is_none());
    }

    #[test]
    fn write_updates_only_matching_track() {
        let mut cache = TrackCache::new();
        cache.populate(0, 2, &track_of(18));
        let new_data = [0xAAu8; SECTOR_SIZE];
        assert!(!cache.write_sector(0, 3, 0, &new_data));
        assert!(cache.write_sector(0, 2, 3, &new_data));
        assert_eq!(cache.sector(0, 2, 3).unwrap(), &new_data[..]);
        assert_eq!(cache.sector(0, 2, 4).unwrap()[0], 4);
    }

    #[test]
    fn invalidate_drops_entry() {
        let mut cache = TrackCache::new();
        cache.populate(0, 0, &track_of(9));
        cache.invalidate();
        assert!(!cache.is_valid());
        assert_eq!(cache.key(), None);
        assert!(cache.lookup(0, 0).is_none());
    }

    #[test]
    fn invalidate_drive_only_drops_that_drive() {
        let mut cache = TrackCache::new();
        cache.populate(1, 4, &track_of(9));
        cache.invalidate_drive(0);
        assert_eq!(cache.key(), Some((1, 4)));
        cache.invalidate_drive(1);
        assert!(!cache.is_valid());
    }
}
