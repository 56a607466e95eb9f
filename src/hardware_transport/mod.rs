pub mod error;
pub mod hidraw;
pub mod i2c;
pub mod platform;
pub mod retry;

use std::path::Path;

pub use error::TransportError;
pub use hidraw::Hidraw;
pub use i2c::I2cBus;
pub use platform::LinuxPlatform;
pub use retry::RetryPolicy;

/// 固件侧的只读信号源: ACPI 求值器, EC 寄存器, sysfs 整数节点
pub trait PlatformIo {
    /// 通过 ACPI 求值器执行固件方法, 返回原始文本回复
    fn evaluate_acpi(&self, expression: &str) -> Result<String, TransportError>;

    fn read_ec_byte(&self, offset: u16) -> Result<u8, TransportError>;

    fn read_sysfs_int(&self, path: &Path) -> Result<u64, TransportError>;
}

/// hidraw feature report 收发
pub trait HidTransport {
    /// 返回 `length` 字节的缓冲区, 首字节为 `report_id`, 其余由设备填充
    fn get_feature(
        &self,
        device: &Path,
        report_id: u8,
        length: usize,
    ) -> Result<Vec<u8>, TransportError>;

    fn set_feature(&self, device: &Path, report: &[u8]) -> Result<(), TransportError>;
}

/// I2C 原始写入以及 write-then-read (repeated start) 事务
pub trait I2cTransport {
    fn write(&self, device: &Path, address: u16, payload: &[u8]) -> Result<(), TransportError>;

    fn write_then_read(
        &self,
        device: &Path,
        address: u16,
        write: &[u8],
        read_length: usize,
    ) -> Result<Vec<u8>, TransportError>;
}

impl<T: PlatformIo + ?Sized> PlatformIo for &T {
    fn evaluate_acpi(&self, expression: &str) -> Result<String, TransportError> {
        (**self).evaluate_acpi(expression)
    }

    fn read_ec_byte(&self, offset: u16) -> Result<u8, TransportError> {
        (**self).read_ec_byte(offset)
    }

    fn read_sysfs_int(&self, path: &Path) -> Result<u64, TransportError> {
        (**self).read_sysfs_int(path)
    }
}

impl<T: HidTransport + ?Sized> HidTransport for &T {
    fn get_feature(
        &self,
        device: &Path,
        report_id: u8,
        length: usize,
    ) -> Result<Vec<u8>, TransportError> {
        (**self).get_feature(device, report_id, length)
    }

    fn set_feature(&self, device: &Path, report: &[u8]) -> Result<(), TransportError> {
        (**self).set_feature(device, report)
    }
}

impl<T: I2cTransport + ?Sized> I2cTransport for &T {
    fn write(&self, device: &Path, address: u16, payload: &[u8]) -> Result<(), TransportError> {
        (**self).write(device, address, payload)
    }

    fn write_then_read(
        &self,
        device: &Path,
        address: u16,
        write: &[u8],
        read_length: usize,
    ) -> Result<Vec<u8>, TransportError> {
        (**self).write_then_read(device, address, write, read_length)
    }
}

/// Parses `0x`-prefixed hex or plain decimal, the two shapes firmware and sysfs hand back.
pub fn parse_int(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        return u64::from_str_radix(hex, 16).ok();
    }
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}
