use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use super::{HidTransport, RetryPolicy, TransportError};

const HIDRAW_IOCTL_TYPE: u8 = b'H';
const HIDIOC_NR_SET_FEATURE: u8 = 0x06;
const HIDIOC_NR_GET_FEATURE: u8 = 0x07;

// asm-generic/ioctl.h
const IOC_NRBITS: u32 = 8;
const IOC_TYPEBITS: u32 = 8;
const IOC_SIZEBITS: u32 = 14;
const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;
const IOC_READ_WRITE: u32 = 3;

/// Largest buffer the 14-bit ioctl size field can describe.
pub const MAX_FEATURE_REPORT_LEN: usize = (1 << IOC_SIZEBITS) - 1;

const fn ioctl_code(direction: u32, kind: u8, nr: u8, size: usize) -> libc::c_ulong {
    ((direction << IOC_DIRSHIFT)
        | ((kind as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)) as libc::c_ulong
}

pub(crate) fn hidiocgfeature(len: usize) -> libc::c_ulong {
    ioctl_code(IOC_READ_WRITE, HIDRAW_IOCTL_TYPE, HIDIOC_NR_GET_FEATURE, len)
}

pub(crate) fn hidiocsfeature(len: usize) -> libc::c_ulong {
    ioctl_code(IOC_READ_WRITE, HIDRAW_IOCTL_TYPE, HIDIOC_NR_SET_FEATURE, len)
}

/// `/dev/hidraw*` feature-report transport.
///
/// The node is reopened for every attempt so a device that re-enumerated
/// across suspend does not leave a stale descriptor behind.
#[derive(Debug, Clone, Default)]
pub struct Hidraw {
    retry: RetryPolicy,
}

impl Hidraw {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    fn open(device: &Path) -> Result<File, TransportError> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(device)
            .map_err(|e| TransportError::io(device, e))
    }
}

fn check_len(len: usize) -> Result<(), TransportError> {
    if len == 0 || len > MAX_FEATURE_REPORT_LEN {
        return Err(TransportError::InvalidArgument(format!(
            "feature report length {len} outside 1..={MAX_FEATURE_REPORT_LEN}"
        )));
    }
    Ok(())
}

impl HidTransport for Hidraw {
    fn get_feature(
        &self,
        device: &Path,
        report_id: u8,
        length: usize,
    ) -> Result<Vec<u8>, TransportError> {
        check_len(length)?;
        self.retry.run(|| {
            let file = Self::open(device)?;
            let mut buf = vec![0u8; length];
            buf[0] = report_id;
            // SAFETY: `buf` is a live, writable allocation of exactly `length` bytes,
            // which is the size encoded in the request code.
            let rc = unsafe {
                libc::ioctl(file.as_raw_fd(), hidiocgfeature(length), buf.as_mut_ptr())
            };
            if rc < 0 {
                return Err(TransportError::last_ioctl(device, "HIDIOCGFEATURE"));
            }
            if rc == 0 {
                return Err(TransportError::ShortIo {
                    path: device.to_path_buf(),
                    op: "feature read",
                    expected: length,
                    got: 0,
                });
            }
            Ok(buf)
        })
    }

    fn set_feature(&self, device: &Path, report: &[u8]) -> Result<(), TransportError> {
        check_len(report.len())?;
        self.retry.run(|| {
            let file = Self::open(device)?;
            let mut buf = report.to_vec();
            // SAFETY: `buf` owns `report.len()` bytes, matching the encoded size;
            // the kernel only reads from it for HIDIOCSFEATURE.
            let rc = unsafe {
                libc::ioctl(file.as_raw_fd(), hidiocsfeature(buf.len()), buf.as_mut_ptr())
            };
            if rc < 0 {
                return Err(TransportError::last_ioctl(device, "HIDIOCSFEATURE"));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_codes_match_kernel_macros() {
        // HIDIOCGFEATURE(256) / HIDIOCSFEATURE(256) from linux/hidraw.h
        assert_eq!(hidiocgfeature(256), 0xC100_4807);
        assert_eq!(hidiocsfeature(256), 0xC100_4806);
    }

    #[test]
    fn rejects_zero_length_before_touching_device() {
        let err = Hidraw::default()
            .get_feature(Path::new("/nonexistent/hidraw9"), 3, 0)
            .unwrap_err();
        assert_eq!(err.kind(), "invalid-argument");
    }

    #[test]
    fn missing_node_is_not_retried() {
        let err = Hidraw::default()
            .get_feature(Path::new("/nonexistent/hidraw9"), 3, 256)
            .unwrap_err();
        assert_eq!(err.kind(), "missing-node");
    }
}
