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

    fdc_config::lib.rs

    Reads the fdcdrv configuration file and overlays command line arguments.
*/

//! Reads `fdcdrv.toml` and overlays command line arguments on top of it. Command line
//! arguments always take priority over the configuration file.
//!
//! Features:
//! - `use_bpaf`: Enable BPAF support for command line argument parsing.

mod mount;

use std::path::{Path, PathBuf};

use fdc_core::{devices::floppy_drive::FloppyDriveType, DriverConfig};

use cfg_if::cfg_if;
use serde_derive::Deserialize;
use thiserror::Error;

pub use mount::MountSpec;

cfg_if! {
    if #[cfg(feature = "use_bpaf")] {
        mod bpaf_config;
        pub use bpaf_config::CmdLineArgs;
        use bpaf_config::cli_args;
    }
    else {
        #[derive(Debug, Default)]
        pub struct CmdLineArgs {
            pub config_file: Option<PathBuf>,
            pub seed: Option<u64>,
            pub max_errors: Option<u32>,
            pub crc_error_rate: Option<f64>,
            pub verbose: bool,
            pub mounts: Vec<MountSpec>,
        }
    }
}

const fn _default_memory_kb() -> usize {
    640
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Drive {0} is configured more than once")]
    DuplicateDrive(u8),
    #[error("Drive number {0} is out of range (0-3)")]
    BadDrive(u8),
    #[error("Workload request {index} names drive {drive}, which has no diskette")]
    UnmountedDrive { index: usize, drive: u8 },
    #[error("Invalid drive type option: {0}")]
    BadDriveType(String),
}

#[derive(Debug, Deserialize)]
pub struct Machine {
    #[serde(default = "_default_memory_kb")]
    pub memory_kb: usize,
    #[serde(default)]
    pub seed: u64,
}

impl Default for Machine {
    fn default() -> Self {
        Self {
            memory_kb: _default_memory_kb(),
            seed: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DriveConfigEntry {
    pub drive: u8,
    pub media_type: u8,
    pub drive_type: Option<FloppyDriveType>,
    #[serde(default)]
    pub write_protect: bool,
    #[serde(default)]
    pub bad_sectors: Vec<u32>,
}

#[derive(Copy, Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestOp {
    Read,
    Write,
}

#[derive(Debug, Deserialize)]
pub struct WorkloadRequest {
    pub op: RequestOp,
    pub drive: u8,
    pub block: u32,
    /// Number of consecutive blocks, one request each.
    #[serde(default)]
    pub count: Option<u32>,
    pub buffer: u32,
    /// Byte written into the buffer before a write.
    #[serde(default)]
    pub fill: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Faults {
    #[serde(default)]
    pub crc_error_rate: f64,
    #[serde(default)]
    pub fail_next_transfers: u32,
    #[serde(default)]
    pub seek_offset: i8,
}

#[derive(Debug, Default, Deserialize)]
pub struct Workload {
    #[serde(default)]
    pub request: Vec<WorkloadRequest>,
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigFileParams {
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub machine: Machine,
    #[serde(default)]
    pub drive: Vec<DriveConfigEntry>,
    #[serde(default)]
    pub faults: Faults,
    #[serde(default)]
    pub workload: Workload,
}

impl ConfigFileParams {
    pub fn overlay(&mut self, shell_args: CmdLineArgs) -> Result<(), ConfigError> {
        if let Some(seed) = shell_args.seed {
            self.machine.seed = seed;
        }
        if let Some(max_errors) = shell_args.max_errors {
            self.driver.max_errors = max_errors;
        }
        if let Some(rate) = shell_args.crc_error_rate {
            self.faults.crc_error_rate = rate;
        }
        self.workload.verbose |= shell_args.verbose;

        // A mount on the command line replaces whatever the file put in that drive.
        for mount in shell_args.mounts {
            let drive_type = match mount.options.get("drive_type") {
                Some(name) => Some(parse_drive_type(name)?),
                None => None,
            };
            self.drive.retain(|d| d.drive != mount.drive);
            self.drive.push(DriveConfigEntry {
                drive: mount.drive,
                media_type: mount.media_type,
                drive_type,
                write_protect: mount.write_protected(),
                bad_sectors: Vec::new(),
            });
        }
        Ok(())
    }

    /// Check cross references the TOML schema cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = 0u8;
        for entry in &self.drive {
            if entry.drive > 3 {
                return Err(ConfigError::BadDrive(entry.drive));
            }
            if seen & (1 << entry.drive) != 0 {
                return Err(ConfigError::DuplicateDrive(entry.drive));
            }
            seen |= 1 << entry.drive;
        }
        for (index, request) in self.workload.request.iter().enumerate() {
            if request.drive > 3 || seen & (1 << request.drive) == 0 {
                return Err(ConfigError::UnmountedDrive {
                    index,
                    drive: request.drive,
                });
            }
        }
        Ok(())
    }
}

fn parse_drive_type(name: &str) -> Result<FloppyDriveType, ConfigError> {
    use strum::IntoEnumIterator;
    FloppyDriveType::iter()
        .find(|t| t.to_string().eq_ignore_ascii_case(name))
        .ok_or_else(|| ConfigError::BadDriveType(name.to_string()))
}

pub fn read_config(toml_string: impl AsRef<str>, shell_args: CmdLineArgs) -> Result<ConfigFileParams, anyhow::Error> {
    let mut toml_args: ConfigFileParams = toml::from_str(toml_string.as_ref())?;
    toml_args.overlay(shell_args)?;
    toml_args.validate()?;
    Ok(toml_args)
}

/// Read the TOML configuration from a file path, parse and overlay command line arguments.
pub fn read_config_file<P>(default_path: P) -> Result<ConfigFileParams, anyhow::Error>
where
    P: AsRef<Path>,
{
    let shell_args: CmdLineArgs;

    cfg_if! {
        if #[cfg(feature = "use_bpaf")] {
            log::debug!("Reading command line arguments...");
            shell_args = cli_args().run();
        } else {
            log::debug!("Argument reading disabled...");
            shell_args = CmdLineArgs::default();
        }
    }

    // Allow configuration file path to be overridden by command line argument 'config_file'
    let config_path: PathBuf = shell_args
        .config_file
        .clone()
        .unwrap_or_else(|| default_path.as_ref().to_path_buf());
    log::debug!("Reading configuration from {}", config_path.display());
    let toml_string = std::fs::read_to_string(config_path)?;

    read_config(toml_string, shell_args)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
        [driver]
        max_errors = 8

        [machine]
        seed = 7

        [[drive]]
        drive = 0
        media_type = 7

        [[drive]]
        drive = 1
        media_type = 3
        drive_type = "Floppy720K"
        write_protect = true
        bad_sectors = [5]

        [[workload.request]]
        op = "read"
        drive = 0
        block = 0
        count = 36
        buffer = 0x1000

        [[workload.request]]
        op = "write"
        drive = 1
        block = 10
        buffer = 0x2000
        fill = 0xE5
    "#;

    #[test]
    fn file_values_are_read_and_defaults_filled() {
        let config = read_config(CONFIG, CmdLineArgs::default()).unwrap();
        assert_eq!(config.driver.max_errors, 8);
        assert_eq!(config.driver.track_read_max_errors, 4);
        assert_eq!(config.machine.memory_kb, 640);
        assert_eq!(config.machine.seed, 7);
        assert_eq!(config.drive.len(), 2);
        assert_eq!(config.drive[1].drive_type, Some(FloppyDriveType::Floppy720K));
        assert!(config.drive[1].write_protect);
        assert_eq!(config.workload.request[0].count, Some(36));
        assert_eq!(config.workload.request[1].op, RequestOp::Write);
        assert_eq!(config.workload.request[1].fill, Some(0xE5));
    }

    #[test]
    fn command_line_overrides_file() {
        let args = CmdLineArgs {
            seed: Some(99),
            max_errors: Some(3),
            mounts: vec!["fd:1:6?drive_type=floppy12m".parse().unwrap()],
            ..Default::default()
        };
        let config = read_config(CONFIG, args).unwrap();
        assert_eq!(config.machine.seed, 99);
        assert_eq!(config.driver.max_errors, 3);
        let drive1: Vec<_> = config.drive.iter().filter(|d| d.drive == 1).collect();
        assert_eq!(drive1.len(), 1);
        assert_eq!(drive1[0].media_type, 6);
        assert_eq!(drive1[0].drive_type, Some(FloppyDriveType::Floppy12M));
        assert!(!drive1[0].write_protect);
    }

    #[test]
    fn request_for_empty_drive_is_rejected() {
        let toml = r#"
            [[workload.request]]
            op = "read"
            drive = 2
            block = 0
            buffer = 0x1000
        "#;
        let err = read_config(toml, CmdLineArgs::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::UnmountedDrive { index: 0, drive: 2 })
        ));
    }
}
