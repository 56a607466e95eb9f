use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use super::{I2cTransport, RetryPolicy, TransportError};

// linux/i2c-dev.h
const I2C_SLAVE: libc::c_ulong = 0x0703;
const I2C_SLAVE_FORCE: libc::c_ulong = 0x0706;
const I2C_RDWR: libc::c_ulong = 0x0707;
const I2C_M_RD: u16 = 0x0001;

#[repr(C)]
struct I2cMsg {
    addr: u16,
    flags: u16,
    len: u16,
    buf: *mut u8,
}

#[repr(C)]
struct I2cRdwrIoctlData {
    msgs: *mut I2cMsg,
    nmsgs: u32,
}

/// `/dev/i2c-N` character device transport.
///
/// With `force` the slave address is claimed through `I2C_SLAVE_FORCE`, which is
/// needed while `i2c-hid` already owns the digitizer address.
#[derive(Debug, Clone)]
pub struct I2cBus {
    retry: RetryPolicy,
    force: bool,
}

impl Default for I2cBus {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl I2cBus {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry, force: true }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    fn open(&self, device: &Path, address: u16) -> Result<File, TransportError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device)
            .map_err(|e| TransportError::io(device, e))?;
        let (request, name) = if self.force {
            (I2C_SLAVE_FORCE, "I2C_SLAVE_FORCE")
        } else {
            (I2C_SLAVE, "I2C_SLAVE")
        };
        // SAFETY: I2C_SLAVE* takes the address by value; no memory is shared with the kernel.
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), request, libc::c_ulong::from(address)) };
        if rc < 0 {
            return Err(TransportError::last_ioctl(device, name));
        }
        Ok(file)
    }
}

fn msg_len(len: usize) -> Result<u16, TransportError> {
    u16::try_from(len)
        .ok()
        .filter(|len| *len > 0)
        .ok_or_else(|| TransportError::InvalidArgument(format!("i2c message length {len}")))
}

impl I2cTransport for I2cBus {
    fn write(&self, device: &Path, address: u16, payload: &[u8]) -> Result<(), TransportError> {
        msg_len(payload.len())?;
        self.retry.run(|| {
            let mut file = self.open(device, address)?;
            let mut offset = 0;
            while offset < payload.len() {
                let written = file
                    .write(&payload[offset..])
                    .map_err(|e| TransportError::io(device, e))?;
                if written == 0 {
                    return Err(TransportError::ShortIo {
                        path: device.to_path_buf(),
                        op: "write",
                        expected: payload.len(),
                        got: offset,
                    });
                }
                offset += written;
            }
            Ok(())
        })
    }

    fn write_then_read(
        &self,
        device: &Path,
        address: u16,
        write: &[u8],
        read_length: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let write_len = msg_len(write.len())?;
        let read_len = msg_len(read_length)?;
        self.retry.run(|| {
            let file = self.open(device, address)?;
            let mut write_buf = write.to_vec();
            let mut read_buf = vec![0u8; read_length];
            let mut msgs = [
                I2cMsg {
                    addr: address,
                    flags: 0,
                    len: write_len,
                    buf: write_buf.as_mut_ptr(),
                },
                I2cMsg {
                    addr: address,
                    flags: I2C_M_RD,
                    len: read_len,
                    buf: read_buf.as_mut_ptr(),
                },
            ];
            let mut data = I2cRdwrIoctlData {
                msgs: msgs.as_mut_ptr(),
                nmsgs: 2,
            };
            // SAFETY: both message buffers outlive the call and their `len` fields
            // match the allocations; `data` points at the two-element `msgs` array.
            let rc = unsafe { libc::ioctl(file.as_raw_fd(), I2C_RDWR, &mut data) };
            if rc < 0 {
                return Err(TransportError::last_ioctl(device, "I2C_RDWR"));
            }
            Ok(read_buf)
        })
    }
}
