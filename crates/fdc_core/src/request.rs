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

    request.rs

    Block requests and the request queue interface consumed by the driver.
*/

//! Block requests and the queue the driver drains.
//!
//! [BlockQueue] is a simple in-memory implementation of [RequestQueue]: requests are
//! served in submission order and completions are delivered over a channel, which wakes
//! any thread waiting on the receiving end.

use std::{collections::VecDeque, fmt::Display};

use crate::{bus::MemoryRegion, error::FloppyError};
use crossbeam_channel::{Receiver, Sender};

pub const SECTOR_SIZE: usize = 512;

#[derive(Copy, Clone, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum Direction {
    Read,
    Write,
}

/// A floppy device number. The low two bits select the drive, the remaining bits select
/// the media type used to look up the geometry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceId(u16);

impl DeviceId {
    pub fn new(drive: u8, media_type: u8) -> Self {
        Self(((media_type as u16) << 2) | (drive as u16 & 0x03))
    }
    pub fn from_raw(raw: u16) -> Self {
        Self(raw)
    }
    #[inline]
    pub fn raw(&self) -> u16 {
        self.0
    }
    #[inline]
    pub fn drive(&self) -> u8 {
        (self.0 & 0x03) as u8
    }
    /// Media type bits of the device number. A value that does not fit a `u8` is reported
    /// as 0 (no media), which no geometry lookup accepts.
    #[inline]
    pub fn media_type(&self) -> u8 {
        u8::try_from(self.0 >> 2).unwrap_or(0)
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fd{}(type {})", self.drive(), self.media_type())
    }
}

/// A single-sector block request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    /// Caller-chosen identifier, returned untouched on completion.
    pub tag: u64,
    pub device: DeviceId,
    pub block: u32,
    pub direction: Direction,
    pub buffer: MemoryRegion,
}

impl Request {
    pub fn new(tag: u64, device: DeviceId, block: u32, direction: Direction, buffer_addr: u32) -> Self {
        Self {
            tag,
            device,
            block,
            direction,
            buffer: MemoryRegion::new(buffer_addr, SECTOR_SIZE),
        }
    }
    pub fn read(tag: u64, device: DeviceId, block: u32, buffer_addr: u32) -> Self {
        Self::new(tag, device, block, Direction::Read, buffer_addr)
    }
    pub fn write(tag: u64, device: DeviceId, block: u32, buffer_addr: u32) -> Self {
        Self::new(tag, device, block, Direction::Write, buffer_addr)
    }
    #[inline]
    pub fn byte_count(&self) -> usize {
        self.buffer.len()
    }
}

/// The external block request queue.
pub trait RequestQueue {
    fn next_request(&mut self) -> Option<Request>;
    /// Hand a request back to its owner. Called exactly once per request.
    fn complete_request(&mut self, request: Request, result: Result<(), FloppyError>);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub request: Request,
    pub result:  Result<(), FloppyError>,
}

impl Completion {
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct BlockQueue {
    pending: VecDeque<Request>,
    completion_tx: Sender<Completion>,
}

impl BlockQueue {
    /// Create a new queue, returning the receiving end of its completion channel.
    pub fn new() -> (Self, Receiver<Completion>) {
        let (completion_tx, completion_rx) = crossbeam_channel::unbounded();
        (
            Self {
                pending: VecDeque::new(),
                completion_tx,
            },
            completion_rx,
        )
    }

    pub fn submit(&mut self, request: Request) {
        log::trace!(
            "BlockQueue: submit tag:{} {} {} block:{}",
            request.tag,
            request.device,
            request.direction,
            request.block
        );
        self.pending.push_back(request);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl RequestQueue for BlockQueue {
    fn next_request(&mut self) -> Option<Request> {
        self.pending.pop_front()
    }

    fn complete_request(&mut self, request: Request, result: Result<(), FloppyError>) {
        if let Err(e) = &result {
            log::error!("{}: I/O error on block {}: {}", request.device, request.block, e);
        }
        // The receiver may have been dropped by a caller that is no longer interested.
        if self.completion_tx.send(Completion { request, result }).is_err() {
            log::debug!("BlockQueue: completion receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_splits_drive_and_media_type() {
        let dev = DeviceId::new(1, 7);
        assert_eq!(dev.drive(), 1);
        assert_eq!(dev.media_type(), 7);
        assert_eq!(dev.raw(), (7 << 2) | 1);
        assert_eq!(DeviceId::from_raw(0x1A).drive(), 2);
        assert_eq!(DeviceId::from_raw(0x1A).media_type(), 6);
    }

    #[test]
    fn oversized_media_bits_decode_as_no_media() {
        let dev = DeviceId::from_raw(257 << 2 | 1);
        assert_eq!(dev.drive(), 1);
        assert_eq!(dev.media_type(), 0);
        assert_eq!(DeviceId::from_raw(255 << 2).media_type(), 255);
    }

    #[test]
    fn queue_serves_in_order_and_reports_completions() {
        let (mut queue, completions) = BlockQueue::new();
        let dev = DeviceId::new(0, 7);
        queue.submit(Request::read(1, dev, 10, 0x1000));
        queue.submit(Request::write(2, dev, 11, 0x2000));

        let first = queue.next_request().unwrap();
        assert_eq!(first.tag, 1);
        queue.complete_request(first, Ok(()));
        let second = queue.next_request().unwrap();
        assert_eq!(second.tag, 2);
        queue.complete_request(second, Err(FloppyError::WriteProtected { drive: 0 }));
        assert!(queue.next_request().is_none());

        let done: Vec<Completion> = completions.try_iter().collect();
        assert_eq!(done.len(), 2);
        assert!(done[0].success());
        assert_eq!(done[1].result, Err(FloppyError::WriteProtected { drive: 0 }));
    }
}
