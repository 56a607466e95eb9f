use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::{PlatformIo, TransportError, parse_int};

/// `/proc/acpi/call` + `ec_sys` debugfs + plain sysfs reads.
#[derive(Debug, Clone)]
pub struct LinuxPlatform {
    acpi_call: PathBuf,
    ec_io: PathBuf,
}

impl LinuxPlatform {
    pub fn new(acpi_call: impl Into<PathBuf>, ec_io: impl Into<PathBuf>) -> Self {
        Self {
            acpi_call: acpi_call.into(),
            ec_io: ec_io.into(),
        }
    }

    pub fn acpi_call_path(&self) -> &Path {
        &self.acpi_call
    }

    pub fn ec_io_path(&self) -> &Path {
        &self.ec_io
    }
}

impl PlatformIo for LinuxPlatform {
    fn evaluate_acpi(&self, expression: &str) -> Result<String, TransportError> {
        if !self.acpi_call.exists() {
            return Err(TransportError::MissingModule {
                path: self.acpi_call.clone(),
                module: "acpi_call",
            });
        }
        // acpi_call 是"写入表达式, 再读回结果"的接口
        fs::write(&self.acpi_call, format!("{expression}\n"))
            .map_err(|e| TransportError::io(&self.acpi_call, e))?;
        let raw = fs::read(&self.acpi_call).map_err(|e| TransportError::io(&self.acpi_call, e))?;
        Ok(String::from_utf8_lossy(&raw)
            .trim_end_matches('\0')
            .trim()
            .to_string())
    }

    fn read_ec_byte(&self, offset: u16) -> Result<u8, TransportError> {
        if !self.ec_io.exists() {
            return Err(TransportError::MissingDebugfs {
                path: self.ec_io.clone(),
            });
        }
        let mut file = File::open(&self.ec_io).map_err(|e| TransportError::io(&self.ec_io, e))?;
        file.seek(SeekFrom::Start(u64::from(offset)))
            .map_err(|e| TransportError::io(&self.ec_io, e))?;
        let mut byte = [0u8; 1];
        let got = file
            .read(&mut byte)
            .map_err(|e| TransportError::io(&self.ec_io, e))?;
        if got != 1 {
            return Err(TransportError::ShortIo {
                path: self.ec_io.clone(),
                op: "read",
                expected: 1,
                got,
            });
        }
        Ok(byte[0])
    }

    fn read_sysfs_int(&self, path: &Path) -> Result<u64, TransportError> {
        let text = fs::read_to_string(path).map_err(|e| TransportError::io(path, e))?;
        parse_int(&text).ok_or_else(|| TransportError::Malformed {
            origin: path.display().to_string(),
            value: text.trim().to_string(),
        })
    }
}
