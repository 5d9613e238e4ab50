//! Linux sysfs GPIO (`/sys/class/gpio`)
//!
//! Pins are exported on first use and their value files kept open, so a
//! sample is a seek plus a two-byte read.

use crate::io::sensors::{InputPin, OutputPin};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// udev needs a moment to apply permissions to a freshly exported pin
const EXPORT_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct SysfsGpio {
    root: PathBuf,
}

impl Default for SysfsGpio {
    fn default() -> Self {
        Self { root: PathBuf::from(SYSFS_GPIO_ROOT) }
    }
}

impl SysfsGpio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    pub fn input(&self, pin: u32) -> io::Result<SysfsInput> {
        let dir = self.export(pin)?;
        fs::write(dir.join("direction"), "in")?;
        let file = File::open(dir.join("value"))?;
        debug!(pin = %pin, "gpio_input_ready");
        Ok(SysfsInput { file })
    }

    /// Export `pin` as an output driven low
    pub fn output(&self, pin: u32) -> io::Result<SysfsOutput> {
        let dir = self.export(pin)?;
        fs::write(dir.join("direction"), "low")?;
        let file = OpenOptions::new().read(true).write(true).open(dir.join("value"))?;
        debug!(pin = %pin, "gpio_output_ready");
        Ok(SysfsOutput { file })
    }

    fn export(&self, pin: u32) -> io::Result<PathBuf> {
        let dir = self.root.join(format!("gpio{pin}"));
        if dir.exists() {
            return Ok(dir);
        }

        fs::write(self.root.join("export"), pin.to_string())?;
        let started = Instant::now();
        while !dir.join("value").exists() {
            if started.elapsed() >= EXPORT_TIMEOUT {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("gpio{pin} did not appear after export"),
                ));
            }
            thread::sleep(Duration::from_millis(10));
        }
        Ok(dir)
    }
}

pub struct SysfsInput {
    file: File,
}

impl InputPin for SysfsInput {
    fn is_high(&mut self) -> io::Result<bool> {
        let mut buf = [0u8; 2];
        self.file.seek(SeekFrom::Start(0))?;
        let n = self.file.read(&mut buf)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "empty gpio value"));
        }
        Ok(buf[0] == b'1')
    }
}

pub struct SysfsOutput {
    file: File,
}

impl OutputPin for SysfsOutput {
    fn set_level(&mut self, high: bool) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(if high { b"1" } else { b"0" })
    }
}
