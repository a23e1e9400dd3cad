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

    fdc_config::mount.rs

    Parses --mount arguments.
*/

use fxhash::FxHashMap;
use std::str::FromStr;

/// A diskette to insert, given on the command line as `fd:<drive>:<media type>`, with
/// optional `?key=value&...` options (`wp`, `drive_type`).
#[derive(Debug, PartialEq)]
pub struct MountSpec {
    pub drive: u8,
    pub media_type: u8,
    pub options: FxHashMap<String, String>,
}

impl MountSpec {
    pub fn write_protected(&self) -> bool {
        self.options.get("wp").map(|v| v == "true" || v == "1").unwrap_or(false)
    }
}

impl FromStr for MountSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (main, opt_str) = match s.split_once('?') {
            Some((left, right)) => (left, Some(right)),
            None => (s, None),
        };

        let mut parts = main.splitn(3, ':');
        let device_str = parts.next().ok_or("Missing device type")?;
        let drive_str = parts.next().ok_or("Missing drive number")?;
        let media_str = parts.next().ok_or("Missing media type")?;

        if device_str != "fd" {
            return Err(format!("Unknown device type: {device_str}"));
        }
        let drive: u8 = drive_str
            .parse()
            .ok()
            .filter(|d| *d < 4)
            .ok_or_else(|| format!("Invalid drive number: {drive_str}"))?;
        let media_type: u8 = media_str
            .parse()
            .map_err(|_| format!("Invalid media type: {media_str}"))?;

        let mut options = FxHashMap::default();
        if let Some(opts) = opt_str {
            for entry in opts.split('&') {
                let (k, v) = entry.split_once('=').unwrap_or((entry, "true"));
                options.insert(k.to_string(), v.to_string());
            }
        }

        Ok(MountSpec {
            drive,
            media_type,
            options,
        })
    }
}
