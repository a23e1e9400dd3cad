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

    driver::tests.rs

    End to end tests of the transfer engine against the simulated hardware.
*/

use crate::{
    devices::{
        fdc::{Command, FdcEvent},
        floppy_drive::{pattern_byte, FloppyDisk, FloppyDriveType},
    },
    driver::config::DriverConfig,
    error::FloppyError,
    machine::{Machine, DEFAULT_MEMORY_KB, DEFAULT_STEP_LIMIT},
    request::{Completion, DeviceId, SECTOR_SIZE},
    timer::TimerEvent,
};

const BUFFER: u32 = 0x1000;

fn machine_with(config: DriverConfig, memory_kb: usize) -> Machine {
    Machine::new(config, memory_kb, 1234).unwrap()
}

fn machine() -> Machine {
    machine_with(DriverConfig::default(), DEFAULT_MEMORY_KB)
}

fn expected_sector(block: u32) -> Vec<u8> {
    (0..SECTOR_SIZE).map(|i| pattern_byte(block, i)).collect()
}

fn run(machine: &mut Machine) -> Vec<Completion> {
    machine.run_until_idle(DEFAULT_STEP_LIMIT);
    machine.drain_completions()
}

fn count(machine: &Machine, command: Command) -> usize {
    machine.bus().fdc().command_count(command)
}

#[test]
fn read_returns_sector_data() {
    let mut m = machine();
    m.mount(0, 7, None).unwrap();
    let tag = m.read(DeviceId::new(0, 7), 37, BUFFER);
    let done = run(&mut m);

    assert_eq!(done.len(), 1);
    assert_eq!(done[0].request.tag, tag);
    assert_eq!(done[0].result, Ok(()));
    assert_eq!(m.read_memory(BUFFER, SECTOR_SIZE), expected_sector(37));
    assert_eq!(m.stats().track_reads, 1);
}

#[test]
fn invalid_requests_complete_without_touching_the_controller() {
    let mut m = machine();
    m.mount(0, 7, None).unwrap();
    m.bus_mut().fdc_mut().clear_trace();
    let dor = m.bus().fdc().dor();

    m.read(DeviceId::new(0, 7), 2880, BUFFER);
    m.read(DeviceId::new(0, 9), 0, BUFFER);
    m.read(DeviceId::new(0, 0), 0, BUFFER);
    let done = m.drain_completions();

    assert_eq!(done[0].result, Err(FloppyError::OutOfRange { block: 2880, total: 2880 }));
    assert_eq!(done[1].result, Err(FloppyError::UnknownMediaType(9)));
    assert_eq!(done[2].result, Err(FloppyError::UnknownMediaType(0)));
    assert!(m.bus().fdc().trace().is_empty());
    assert_eq!(m.bus().fdc().dor(), dor);
    assert!(!m.driver().with_driver(|d| d.is_busy()));
}

#[test]
fn cached_track_needs_no_second_seek_or_read() {
    let mut m = machine();
    m.mount(0, 7, None).unwrap();
    let dev = DeviceId::new(0, 7);
    m.read(dev, 40, BUFFER);
    run(&mut m);
    let seeks = count(&m, Command::SeekParkHead);
    let reads = count(&m, Command::ReadData);

    // Block 60 is on the other head of the same cylinder.
    m.read(dev, 60, BUFFER + 0x200);
    let done = m.drain_completions();

    assert_eq!(done.len(), 1);
    assert_eq!(done[0].result, Ok(()));
    assert_eq!(count(&m, Command::SeekParkHead), seeks);
    assert_eq!(count(&m, Command::ReadData), reads);
    assert_eq!(m.stats().cache_hits, 1);
    assert_eq!(m.read_memory(BUFFER + 0x200, SECTOR_SIZE), expected_sector(60));
}

#[test]
fn second_head_of_720k_media_in_12m_drive_is_cached() {
    let mut m = machine();
    m.mount(1, 6, None).unwrap();
    let dev = DeviceId::new(1, 6);
    m.read(dev, 18, BUFFER);
    run(&mut m);
    m.read(dev, 26, BUFFER);
    m.read(dev, 35, BUFFER + 0x200);
    run(&mut m);

    assert_eq!(count(&m, Command::ReadData), 1);
    assert_eq!(m.stats().cache_hits, 2);
    assert_eq!(m.read_memory(BUFFER, SECTOR_SIZE), expected_sector(26));
    assert_eq!(m.read_memory(BUFFER + 0x200, SECTOR_SIZE), expected_sector(35));
}

#[test]
fn persistent_failure_is_retried_then_abandoned() {
    let mut m = machine();
    m.mount(0, 7, None).unwrap();
    m.bus_mut().fdc_mut().faults_mut().fail_next_transfers(u32::MAX);
    m.bus_mut().fdc_mut().clear_trace();

    m.read(DeviceId::new(0, 7), 100, BUFFER);
    let done = run(&mut m);

    assert_eq!(done.len(), 1);
    assert_eq!(
        done[0].result,
        Err(FloppyError::RetriesExhausted { drive: 0, block: 100, errors: 13 })
    );
    assert_eq!(count(&m, Command::ReadData), 13);

    let trace = m.bus().fdc().trace();
    let first_reset = trace.iter().position(|e| *e == FdcEvent::Reset).unwrap();
    let reads_before_reset = trace[..first_reset]
        .iter()
        .filter(|e| **e == FdcEvent::Command(Command::ReadData))
        .count();
    assert_eq!(reads_before_reset, 7);

    let stats = m.stats();
    assert_eq!(stats.resets, 6);
    assert_eq!(stats.failed, 1);
    assert!(m.driver().with_driver(|d| d.session().needs_reset));
}

#[test]
fn transient_failure_recovers() {
    let mut m = machine();
    m.mount(0, 7, None).unwrap();
    m.bus_mut().fdc_mut().faults_mut().fail_next_transfers(2);

    m.read(DeviceId::new(0, 7), 5, BUFFER);
    let done = run(&mut m);

    assert_eq!(done[0].result, Ok(()));
    assert_eq!(m.stats().retries, 2);
    assert_eq!(m.stats().resets, 0);
    assert_eq!(m.read_memory(BUFFER, SECTOR_SIZE), expected_sector(5));
}

#[test]
fn write_protected_write_fails_without_retry() {
    let mut m = machine();
    m.bus_mut().fdc_mut().set_drive_type(0, FloppyDriveType::Floppy144M);
    m.insert_disk(0, FloppyDisk::formatted(7).unwrap().with_write_protect(true));

    m.write(DeviceId::new(0, 7), 3, BUFFER);
    let done = run(&mut m);

    assert_eq!(done[0].result, Err(FloppyError::WriteProtected { drive: 0 }));
    assert_eq!(count(&m, Command::WriteData), 1);
    assert_eq!(m.stats().retries, 0);
}

#[test]
fn write_protect_after_transient_failures_is_not_retried() {
    let mut m = machine();
    m.mount(0, 7, None).unwrap();
    m.bus_mut().fdc_mut().faults_mut().fail_next_transfers(3);

    m.write(DeviceId::new(0, 7), 3, BUFFER);
    assert!(m.run_until(DEFAULT_STEP_LIMIT, |m| m.stats().retries == 3));
    assert_eq!(m.driver().with_driver(|d| d.current().map(|c| c.error_count)), Some(3));
    if let Some(disk) = m.bus_mut().fdc_mut().drive_mut(0).disk_mut() {
        disk.set_write_protected(true);
    }
    let done = run(&mut m);

    assert_eq!(done.len(), 1);
    assert_eq!(done[0].result, Err(FloppyError::WriteProtected { drive: 0 }));
    assert_eq!(m.stats().retries, 3);
    assert_eq!(count(&m, Command::WriteData), 4);
    assert!(!m.driver().with_driver(|d| d.is_busy()));
}

#[test]
fn write_updates_disk_and_cached_track() {
    let mut m = machine();
    m.mount(0, 7, None).unwrap();
    let dev = DeviceId::new(0, 7);
    m.read(dev, 0, BUFFER);
    run(&mut m);

    m.write_memory(0x2000, &[0x5A; SECTOR_SIZE]);
    m.write(dev, 1, 0x2000);
    let done = run(&mut m);
    assert_eq!(done[0].result, Ok(()));

    let on_disk = m.bus().fdc().drive(0).disk().unwrap().block(1).to_vec();
    assert_eq!(on_disk, vec![0x5A; SECTOR_SIZE]);

    m.read(dev, 1, 0x3000);
    run(&mut m);
    assert_eq!(m.stats().cache_hits, 1);
    assert_eq!(m.read_memory(0x3000, SECTOR_SIZE), vec![0x5A; SECTOR_SIZE]);
}

#[test]
fn media_change_forces_recalibrate_and_drops_cache() {
    let mut m = machine();
    m.mount(0, 7, None).unwrap();
    let dev = DeviceId::new(0, 7);
    m.read(dev, 0, BUFFER);
    run(&mut m);
    // The first insertion counts as a change.
    assert!(m.media_change_query(0));
    assert!(!m.media_change_query(0));

    let mut disk = FloppyDisk::formatted(7).unwrap();
    disk.block_mut(0).fill(0xAA);
    m.eject_disk(0);
    m.insert_disk(0, disk);

    let recalibrates = m.stats().recalibrates;
    m.read(dev, 72, BUFFER);
    run(&mut m);
    assert_eq!(m.stats().recalibrates, recalibrates + 1);
    assert!(m.media_change_query(0));
    assert!(!m.media_change_query(0));

    m.read(dev, 0, BUFFER);
    run(&mut m);
    assert_eq!(m.read_memory(BUFFER, SECTOR_SIZE), vec![0xAA; SECTOR_SIZE]);
}

#[test]
fn change_query_after_swap_samples_the_drive() {
    let mut m = machine();
    m.mount(0, 7, None).unwrap();
    let dev = DeviceId::new(0, 7);
    m.read(dev, 0, BUFFER);
    run(&mut m);
    assert!(m.media_change_query(0));
    assert!(!m.media_change_query(0));

    // Swap the disk without any transfer in between. Track 0 of the old disk is cached.
    let mut disk = FloppyDisk::formatted(7).unwrap();
    disk.block_mut(0).fill(0xAA);
    m.eject_disk(0);
    m.insert_disk(0, disk);

    assert!(m.media_change_query(0));
    assert!(!m.media_change_query(0));
    // The check reads are internal to the machine.
    assert!(m.drain_completions().is_empty());

    let hits = m.stats().cache_hits;
    m.read(dev, 0, BUFFER);
    let done = run(&mut m);
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].result, Ok(()));
    assert_eq!(m.read_memory(BUFFER, SECTOR_SIZE), vec![0xAA; SECTOR_SIZE]);
    // Served from the track read by the last check, which came from the new disk.
    assert_eq!(m.stats().cache_hits, hits + 1);
}

#[test]
fn change_query_reports_an_emptied_drive() {
    let mut m = machine();
    m.mount(0, 7, None).unwrap();
    m.read(DeviceId::new(0, 7), 0, BUFFER);
    run(&mut m);
    assert!(m.media_change_query(0));
    assert!(!m.media_change_query(0));

    m.eject_disk(0);
    assert!(m.media_change_query(0));
    assert!(m.drain_completions().is_empty());
    assert!(!m.driver().with_driver(|d| d.is_busy()));
}

#[test]
fn change_query_for_nonexistent_drive_is_false() {
    let mut m = machine();
    m.mount(0, 7, None).unwrap();
    m.bus_mut().fdc_mut().clear_trace();
    assert!(!m.media_change_query(4));
    assert!(!m.media_change_query(8));
    assert!(!m.media_change_query(255));
    assert!(m.bus().fdc().trace().is_empty());
}

#[test]
fn oversized_media_type_is_rejected() {
    let mut m = machine();
    m.mount(0, 1, None).unwrap();
    m.bus_mut().fdc_mut().clear_trace();
    // 257 truncated to a byte would be media type 1.
    m.read(DeviceId::from_raw(257 << 2), 0, BUFFER);
    let done = m.drain_completions();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].result, Err(FloppyError::UnknownMediaType(0)));
    assert!(m.bus().fdc().trace().is_empty());
}

#[test]
fn buffer_above_dma_limit_is_bounced() {
    let mut m = machine_with(DriverConfig::default(), 2048);
    m.mount(0, 7, None).unwrap();
    let dev = DeviceId::new(0, 7);
    let high = 0x18_0000;

    m.write_memory(high, &[0x33; SECTOR_SIZE]);
    m.write(dev, 300, high);
    let done = run(&mut m);
    assert_eq!(done[0].result, Ok(()));
    assert_eq!(m.stats().bounce_transfers, 1);
    let on_disk = m.bus().fdc().drive(0).disk().unwrap().block(300).to_vec();
    assert_eq!(on_disk, vec![0x33; SECTOR_SIZE]);

    // Fail the whole-track attempts so the read goes through single-sector mode.
    m.bus_mut().fdc_mut().faults_mut().fail_next_transfers(4);
    m.read(dev, 700, high);
    let done = run(&mut m);
    assert_eq!(done[0].result, Ok(()));
    assert_eq!(m.stats().bounce_transfers, 2);
    assert_eq!(m.read_memory(high, SECTOR_SIZE), expected_sector(700));
    assert!(!m.bus().dma().programmed_while_unmasked());
}

#[test]
fn bad_sector_falls_back_to_single_sector_reads() {
    let mut m = machine();
    m.bus_mut().fdc_mut().set_drive_type(0, FloppyDriveType::Floppy144M);
    m.insert_disk(0, FloppyDisk::formatted(7).unwrap().with_bad_sector(5));

    m.read(DeviceId::new(0, 7), 3, BUFFER);
    let done = run(&mut m);

    assert_eq!(done[0].result, Ok(()));
    assert_eq!(m.stats().retries, 4);
    assert_eq!(count(&m, Command::ReadData), 5);
    assert_eq!(m.read_memory(BUFFER, SECTOR_SIZE), expected_sector(3));
    assert!(!m.driver().with_driver(|d| d.cache().is_valid()));
}

#[test]
fn forty_track_media_in_eighty_track_drive_double_steps() {
    let mut m = machine();
    m.mount(0, 3, None).unwrap();
    let dev = DeviceId::new(0, 3);
    // Track 5, head 0, sector 1.
    m.read(dev, 90, BUFFER);
    let done = run(&mut m);

    assert_eq!(done[0].result, Ok(()));
    assert_eq!(m.bus().fdc().drive(0).cylinder(), 10);
    assert_eq!(m.read_memory(BUFFER, SECTOR_SIZE), expected_sector(90));
}

#[test]
fn specify_and_data_rate_are_sent_once_per_media() {
    let mut m = machine();
    m.mount(0, 7, None).unwrap();
    let dev = DeviceId::new(0, 7);
    for block in [0, 100, 1000] {
        m.read(dev, block, BUFFER);
        run(&mut m);
    }
    let rates = m
        .bus()
        .fdc()
        .trace()
        .iter()
        .filter(|e| matches!(e, FdcEvent::DataRate(_)))
        .count();
    assert_eq!(count(&m, Command::Specify), 1);
    assert_eq!(rates, 1);
    assert_eq!(m.bus().fdc().data_rate(), 0x00);
    assert_eq!(m.bus().fdc().specify_bytes(), Some((0xCF, 0x06)));
}

#[test]
fn motor_stops_after_idle_period() {
    let mut m = machine();
    m.mount(0, 7, None).unwrap();
    m.read(DeviceId::new(0, 7), 0, BUFFER);
    assert!(m.run_until(DEFAULT_STEP_LIMIT, |m| m.has_completions()));
    assert!(m.bus().fdc().drive(0).motor_on());
    assert!(m.timer().is_pending(TimerEvent::MotorOff(0)));

    run(&mut m);
    assert!(!m.bus().fdc().drive(0).motor_on());
}

#[test]
fn rearming_a_drive_cancels_its_motor_off() {
    let mut m = machine();
    m.mount(0, 7, None).unwrap();
    let dev = DeviceId::new(0, 7);
    m.read(dev, 0, BUFFER);
    assert!(m.run_until(DEFAULT_STEP_LIMIT, |m| m.has_completions()));
    m.drain_completions();

    m.read(dev, 500, BUFFER);
    assert!(!m.timer().is_pending(TimerEvent::MotorOff(0)));
    assert!(m.run_until(DEFAULT_STEP_LIMIT, |m| m.has_completions()));
    assert!(m.bus().fdc().drive(0).motor_on());
    assert!(m.timer().is_pending(TimerEvent::MotorOff(0)));
}

#[test]
fn seek_landing_on_wrong_track_is_abandoned() {
    let mut m = machine();
    m.mount(0, 7, None).unwrap();
    m.bus_mut().fdc_mut().faults_mut().set_seek_offset(1);

    m.read(DeviceId::new(0, 7), 200, BUFFER);
    let done = run(&mut m);

    assert!(matches!(done[0].result, Err(FloppyError::RetriesExhausted { errors: 13, .. })));
    assert_eq!(count(&m, Command::ReadData), 0);
    assert_eq!(m.stats().seeks, 13);
}

#[test]
fn stuck_controller_still_completes_request() {
    let config = DriverConfig {
        poll_budget: 16,
        ..Default::default()
    };
    let mut m = machine_with(config, DEFAULT_MEMORY_KB);
    m.mount(0, 7, None).unwrap();
    m.bus_mut().fdc_mut().faults_mut().set_stuck_status(true);

    m.read(DeviceId::new(0, 7), 0, BUFFER);
    let done = run(&mut m);

    assert_eq!(done.len(), 1);
    assert!(matches!(done[0].result, Err(FloppyError::RetriesExhausted { errors: 13, .. })));
    assert!(!m.driver().with_driver(|d| d.is_busy()));
}

#[test]
fn requests_complete_in_order_across_drives() {
    let mut m = machine();
    m.mount(0, 7, None).unwrap();
    m.mount(1, 2, None).unwrap();
    let tags = [
        m.read(DeviceId::new(0, 7), 10, 0x1000),
        m.read(DeviceId::new(1, 2), 10, 0x1200),
        m.read(DeviceId::new(0, 7), 11, 0x1400),
    ];
    let done = run(&mut m);

    let completed: Vec<u64> = done.iter().map(|c| c.request.tag).collect();
    assert_eq!(completed, tags);
    assert!(done.iter().all(|c| c.success()));
    assert_eq!(m.read_memory(0x1200, SECTOR_SIZE), expected_sector(10));
    assert_eq!(m.read_memory(0x1400, SECTOR_SIZE), expected_sector(11));
}
