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

    fdc_headless::lib.rs

    Runs a configured request workload against the simulated controller.
*/

//! Headless front end. Builds a [Machine] from the configuration, inserts the configured
//! diskettes, submits the workload and reports each completion with a digest of the data
//! that was read.

#![forbid(unsafe_code)]

use fdc_config::{ConfigFileParams, RequestOp};
use fdc_core::{
    devices::floppy_drive::{FloppyDisk, FloppyDriveType},
    driver::DriverStats,
    machine::{Machine, DEFAULT_STEP_LIMIT},
    request::{Completion, DeviceId, Direction, Request, SECTOR_SIZE},
};

use colored::*;

#[derive(Debug, Default)]
pub struct WorkloadSummary {
    pub completed: usize,
    pub failed: usize,
    pub stats: DriverStats,
}

pub fn run() {
    env_logger::init();

    let config = match fdc_config::read_config_file("./fdcdrv.toml") {
        Ok(config) => config,
        Err(e) => match e.downcast_ref::<std::io::Error>() {
            Some(e) if e.kind() == std::io::ErrorKind::NotFound => {
                eprintln!(
                    "Configuration file not found! Please create fdcdrv.toml in the current directory \
                               or provide the path to configuration file with --configfile."
                );
                std::process::exit(1);
            }
            Some(e) => {
                eprintln!("Unknown IO error reading configuration file:\n{}", e);
                std::process::exit(1);
            }
            None => {
                eprintln!(
                    "Failed to parse configuration file. There may be a typo or otherwise invalid toml:\n{}",
                    e
                );
                std::process::exit(1);
            }
        },
    };

    match run_workload(&config) {
        Ok(summary) => {
            let s = &summary.stats;
            println!(
                "{} completed, {} failed. cache hits: {} track reads: {} seeks: {} recalibrates: {} resets: {} retries: {} bounced: {}",
                summary.completed,
                summary.failed,
                s.cache_hits,
                s.track_reads,
                s.seeks,
                s.recalibrates,
                s.resets,
                s.retries,
                s.bounce_transfers
            );
            if summary.failed > 0 {
                std::process::exit(2);
            }
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}

fn build_machine(config: &ConfigFileParams) -> Result<Machine, anyhow::Error> {
    let mut machine = Machine::new(config.driver.clone(), config.machine.memory_kb, config.machine.seed)?;

    for entry in &config.drive {
        let mut disk = FloppyDisk::formatted(entry.media_type)?.with_write_protect(entry.write_protect);
        for block in &entry.bad_sectors {
            disk = disk.with_bad_sector(*block);
        }
        let drive_type = entry
            .drive_type
            .unwrap_or_else(|| FloppyDriveType::for_media(entry.media_type));
        log::info!(
            "Drive {}: {} with {} diskette",
            entry.drive,
            drive_type,
            disk.geometry().name
        );
        machine.bus_mut().fdc_mut().set_drive_type(entry.drive as usize, drive_type);
        machine.insert_disk(entry.drive, disk);
    }

    let faults = machine.bus_mut().fdc_mut().faults_mut();
    faults.set_crc_error_rate(config.faults.crc_error_rate);
    faults.fail_next_transfers(config.faults.fail_next_transfers);
    faults.set_seek_offset(config.faults.seek_offset);
    Ok(machine)
}

fn report(machine: &Machine, completion: &Completion, verbose: bool) {
    let request = &completion.request;
    match &completion.result {
        Ok(()) if verbose => {
            let detail = match request.direction {
                Direction::Read => {
                    let data = machine.read_memory(request.buffer.base(), request.byte_count());
                    format!("md5: {:x}", md5::compute(&data))
                }
                Direction::Write => String::new(),
            };
            println!(
                "{} tag:{} {} {} block {} {}",
                "OK".green(),
                request.tag,
                request.device,
                request.direction,
                request.block,
                detail
            );
        }
        Ok(()) => {}
        Err(e) => {
            println!(
                "{} tag:{} {} {} block {}: {}",
                "FAILED".red(),
                request.tag,
                request.device,
                request.direction,
                request.block,
                e
            );
        }
    }
}

/// Submit every request of the workload and run the machine until they have all completed.
pub fn run_workload(config: &ConfigFileParams) -> Result<WorkloadSummary, anyhow::Error> {
    let mut machine = build_machine(config)?;
    let mut summary = WorkloadSummary::default();
    let mut tag = 0;

    for entry in &config.workload.request {
        let media_type = config
            .drive
            .iter()
            .find(|d| d.drive == entry.drive)
            .map(|d| d.media_type)
            .unwrap_or_default();
        let device = DeviceId::new(entry.drive, media_type);

        for i in 0..entry.count.unwrap_or(1) {
            tag += 1;
            let buffer = entry.buffer + i * SECTOR_SIZE as u32;
            let direction = match entry.op {
                RequestOp::Read => Direction::Read,
                RequestOp::Write => {
                    if let Some(fill) = entry.fill {
                        machine.write_memory(buffer, &[fill; SECTOR_SIZE]);
                    }
                    Direction::Write
                }
            };
            machine.submit(Request::new(tag, device, entry.block + i, direction, buffer));
        }
        machine.run_until_idle(DEFAULT_STEP_LIMIT);

        for completion in machine.drain_completions() {
            report(&machine, &completion, config.workload.verbose);
            if completion.success() {
                summary.completed += 1;
            }
            else {
                summary.failed += 1;
            }
        }
    }

    summary.stats = machine.stats();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workload_runs_to_completion() {
        let toml = r#"
            [[drive]]
            drive = 0
            media_type = 7

            [[drive]]
            drive = 1
            media_type = 4
            write_protect = true

            [[workload.request]]
            op = "read"
            drive = 0
            block = 0
            count = 36
            buffer = 0x1000

            [[workload.request]]
            op = "write"
            drive = 1
            block = 0
            buffer = 0x1000
            fill = 0xF6
        "#;
        let config = fdc_config::read_config(toml, Default::default()).unwrap();
        let summary = run_workload(&config).unwrap();
        assert_eq!(summary.completed, 36);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.stats.track_reads, 1);
        assert_eq!(summary.stats.cache_hits, 35);
    }
}
