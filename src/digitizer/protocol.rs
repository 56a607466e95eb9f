use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::discovery::{HidEnumerator, HidrawCandidate};
use super::i2c_payload::{self, I2cPayload};
use super::report::{DigitizerReport, ModeField, ReportError};
use super::{DigitizerMode, ObservedMode};
use crate::config::DigitizerConfig;
use crate::hardware_transport::{HidTransport, I2cTransport, TransportError};

/// Backend selection requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// hidraw first, I2C when hidraw fails.
    #[default]
    Auto,
    Hidraw,
    I2c,
}

impl BackendChoice {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Hidraw => "hidraw",
            Self::I2c => "i2c",
        }
    }
}

/// The backend that actually carried a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Hidraw,
    I2c,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SwitchRequest {
    pub backend: BackendChoice,
    /// Compute the patch and report it without writing anything.
    pub dry_run: bool,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("short I2C query response ({0} bytes)")]
    ShortQuery(usize),
}

/// Per-device trace of one hidraw switch attempt.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceRow {
    #[serde(flatten)]
    pub candidate: HidrawCandidate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_mode: Option<ObservedMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_bytes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_bytes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_mode: Option<ObservedMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_bytes: Option<String>,
    pub already: bool,
    pub wrote: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeviceRow {
    fn new(candidate: HidrawCandidate) -> Self {
        Self {
            candidate,
            before_mode: None,
            before_bytes: None,
            after_bytes: None,
            verify_mode: None,
            verify_bytes: None,
            already: false,
            wrote: false,
            error: None,
        }
    }
}

/// Trace of one I2C switch attempt.
#[derive(Debug, Clone, Serialize)]
pub struct I2cRow {
    pub dev: PathBuf,
    pub addr: String,
    /// Deltas of the payloads written, in order.
    pub writes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_mode: Option<ObservedMode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwitchOutcome {
    pub mode: DigitizerMode,
    pub backend: Backend,
    pub attempted: Vec<Backend>,
    /// Every device already carried the target encoding; nothing was written.
    pub already_satisfied: bool,
    pub dry_run: bool,
    pub devices: Vec<DeviceRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub i2c: Option<I2cRow>,
    /// Failures of an earlier backend that a later one recovered from.
    pub recovered_failures: Vec<String>,
}

#[derive(Debug, Error, Serialize)]
#[error("digitizer switch to {mode} failed: {}", .failures.join("; "))]
pub struct SwitchError {
    pub mode: DigitizerMode,
    pub attempted: Vec<Backend>,
    pub failures: Vec<String>,
    pub devices: Vec<DeviceRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub i2c: Option<I2cRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    #[serde(flatten)]
    pub candidate: HidrawCandidate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ObservedMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode_bytes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct I2cQueryStatus {
    pub enabled: bool,
    pub dev: PathBuf,
    pub addr: String,
    pub tail_offset: String,
    pub tail: Option<String>,
    pub mode: Option<ObservedMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModeStatus {
    pub mode: Option<ObservedMode>,
    pub mode_source: Option<&'static str>,
    pub report_id: String,
    pub report_len: usize,
    pub patch_offset: usize,
    pub expected_half_bytes: String,
    pub expected_full_bytes: String,
    pub devices: Vec<DeviceStatus>,
    pub i2c_query: I2cQueryStatus,
}

#[derive(Default)]
struct Attempt {
    devices: Vec<DeviceRow>,
    i2c: Option<I2cRow>,
    failures: Vec<String>,
    already: bool,
}

/// 数位板半屏/全屏切换协议
///
/// 不保存任何状态, 每次调用都重新枚举设备。
pub struct DigitizerProtocol<H, I, E> {
    hid: H,
    i2c: I,
    enumerator: E,
    config: DigitizerConfig,
}

impl<H, I, E> DigitizerProtocol<H, I, E>
where
    H: HidTransport,
    I: I2cTransport,
    E: HidEnumerator,
{
    pub fn new(hid: H, i2c: I, enumerator: E, config: DigitizerConfig) -> Self {
        Self {
            hid,
            i2c,
            enumerator,
            config,
        }
    }

    pub fn config(&self) -> &DigitizerConfig {
        &self.config
    }

    pub fn discover(&self) -> Vec<HidrawCandidate> {
        let all = self.enumerator.enumerate();
        let total = all.len();
        let selected = self.config.matcher().select(all);
        debug!(total, selected = selected.len(), "hidraw discovery");
        selected
    }

    pub fn read_report(&self, device: &HidrawCandidate) -> Result<DigitizerReport, ProtocolError> {
        let bytes =
            self.hid
                .get_feature(&device.dev, self.config.report_id, self.config.report_len)?;
        Ok(DigitizerReport::new(bytes, self.config.mode_offset)?)
    }

    pub fn get_mode(&self, device: &HidrawCandidate) -> Result<ObservedMode, ProtocolError> {
        Ok(self.read_report(device)?.mode(&self.config.encoding))
    }

    /// Mode according to the vendor I2C read-back query.
    pub fn query_i2c_mode(&self) -> Result<([u8; 2], ObservedMode), ProtocolError> {
        let response = self.i2c.write_then_read(
            &self.config.i2c_dev,
            self.config.i2c_address,
            &i2c_payload::QUERY_WRITE,
            i2c_payload::QUERY_READ_LEN,
        )?;
        i2c_payload::classify_query(&response, &self.config.encoding)
            .ok_or(ProtocolError::ShortQuery(response.len()))
    }

    pub fn set_mode(
        &self,
        target: DigitizerMode,
        request: SwitchRequest,
    ) -> Result<SwitchOutcome, SwitchError> {
        let mut attempted = Vec::new();
        let mut hid_failures = Vec::new();
        let mut hid_rows = Vec::new();

        if matches!(request.backend, BackendChoice::Auto | BackendChoice::Hidraw) {
            attempted.push(Backend::Hidraw);
            let attempt = self.attempt_hidraw(target, request.dry_run);
            if attempt.failures.is_empty() {
                info!(mode = %target, already = attempt.already, "digitizer switched via hidraw");
                return Ok(SwitchOutcome {
                    mode: target,
                    backend: Backend::Hidraw,
                    attempted,
                    already_satisfied: attempt.already,
                    dry_run: request.dry_run,
                    devices: attempt.devices,
                    i2c: None,
                    recovered_failures: Vec::new(),
                });
            }
            warn!(mode = %target, failures = ?attempt.failures, "hidraw switch failed");
            if request.backend == BackendChoice::Hidraw {
                return Err(SwitchError {
                    mode: target,
                    attempted,
                    failures: attempt.failures,
                    devices: attempt.devices,
                    i2c: None,
                });
            }
            hid_failures = attempt.failures;
            hid_rows = attempt.devices;
        }

        attempted.push(Backend::I2c);
        let attempt = self.attempt_i2c(target, request.dry_run);
        if attempt.failures.is_empty() {
            info!(mode = %target, "digitizer switched via i2c");
            return Ok(SwitchOutcome {
                mode: target,
                backend: Backend::I2c,
                attempted,
                already_satisfied: false,
                dry_run: request.dry_run,
                devices: hid_rows,
                i2c: attempt.i2c,
                recovered_failures: hid_failures,
            });
        }
        warn!(mode = %target, failures = ?attempt.failures, "i2c switch failed");
        hid_failures.extend(attempt.failures);
        Err(SwitchError {
            mode: target,
            attempted,
            failures: hid_failures,
            devices: hid_rows,
            i2c: attempt.i2c,
        })
    }

    /// 所有设备先读, 全部成功才开始写; 写入中途失败时尽量恢复已写入的设备
    fn attempt_hidraw(&self, target: DigitizerMode, dry_run: bool) -> Attempt {
        let target_field = self.config.encoding.field_for(target);
        let candidates = self.discover();
        let mut attempt = Attempt::default();
        if candidates.is_empty() {
            attempt.failures.push(format!(
                "no hidraw candidates found (need {:04x}:{:04x} or name {:?})",
                self.config.vendor_id, self.config.product_id, self.config.name_patterns
            ));
            return attempt;
        }

        let mut reports = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let mut row = DeviceRow::new(candidate);
            match self.read_report(&row.candidate) {
                Ok(report) => {
                    row.before_mode = Some(report.mode(&self.config.encoding));
                    row.before_bytes = Some(report.mode_field().to_hex());
                    row.already = report.mode_field() == target_field;
                    reports.push(Some(report));
                }
                Err(e) => {
                    attempt
                        .failures
                        .push(format!("{}: {e}", row.candidate.dev.display()));
                    row.error = Some(e.to_string());
                    reports.push(None);
                }
            }
            attempt.devices.push(row);
        }
        if !attempt.failures.is_empty() {
            return attempt;
        }

        let mut written: Vec<(usize, DigitizerReport)> = Vec::new();
        for (index, (row, report)) in attempt.devices.iter_mut().zip(&reports).enumerate() {
            let Some(report) = report else { continue };
            if row.already {
                continue;
            }
            let patched = report.with_mode_field(target_field);
            row.after_bytes = Some(target_field.to_hex());
            if dry_run {
                continue;
            }
            match self.hid.set_feature(&row.candidate.dev, patched.as_bytes()) {
                Ok(()) => {
                    row.wrote = true;
                    written.push((index, report.clone()));
                }
                Err(e) => {
                    attempt
                        .failures
                        .push(format!("{}: {e}", row.candidate.dev.display()));
                    row.error = Some(e.to_string());
                    break;
                }
            }
        }
        if !attempt.failures.is_empty() {
            self.roll_back(&mut attempt.devices, &written);
            return attempt;
        }

        attempt.already = attempt.devices.iter().all(|row| row.already);
        for row in attempt.devices.iter_mut().filter(|row| row.wrote) {
            match self.read_report(&row.candidate) {
                Ok(verify) => {
                    let field = verify.mode_field();
                    row.verify_mode = Some(verify.mode(&self.config.encoding));
                    row.verify_bytes = Some(field.to_hex());
                    if field != target_field {
                        attempt.failures.push(format!(
                            "{}: verify mismatch (got {})",
                            row.candidate.dev.display(),
                            field.to_hex()
                        ));
                    }
                }
                Err(e) => {
                    attempt.failures.push(format!(
                        "{}: verify failed {e}",
                        row.candidate.dev.display()
                    ));
                    row.error = Some(e.to_string());
                }
            }
        }
        attempt
    }

    fn roll_back(&self, rows: &mut [DeviceRow], written: &[(usize, DigitizerReport)]) {
        for (index, original) in written {
            let Some(row) = rows.get_mut(*index) else { continue };
            match self.hid.set_feature(&row.candidate.dev, original.as_bytes()) {
                Ok(()) => {
                    debug!(dev = %row.candidate.dev.display(), "restored original report");
                    row.wrote = false;
                }
                Err(e) => warn!(
                    dev = %row.candidate.dev.display(),
                    "failed to restore original report: {e}"
                ),
            }
        }
    }

    /// 与厂商工具一致: 先写全零 delta, 进入半屏时再写目标 delta
    fn attempt_i2c(&self, target: DigitizerMode, dry_run: bool) -> Attempt {
        let dev = &self.config.i2c_dev;
        let address = self.config.i2c_address;
        let mut sequence = vec![I2cPayload::neutral()];
        if target == DigitizerMode::Half {
            sequence.push(I2cPayload::with_delta(self.config.encoding.half));
        }
        let mut row = I2cRow {
            dev: dev.clone(),
            addr: format!("0x{address:02x}"),
            writes: sequence.iter().map(|p| p.delta().to_hex()).collect(),
            tail: None,
            verify_mode: None,
        };
        let mut attempt = Attempt::default();

        if dry_run {
            attempt.i2c = Some(row);
            return attempt;
        }

        for payload in &sequence {
            if let Err(e) = self.i2c.write(dev, address, payload.as_bytes()) {
                attempt.failures.push(format!("i2c write failed: {e}"));
                attempt.i2c = Some(row);
                return attempt;
            }
        }

        match self.query_i2c_mode() {
            Ok((tail, observed)) => {
                row.tail = Some(ModeField::tail_hex(tail));
                row.verify_mode = Some(observed);
                if !observed.is(target) {
                    attempt.failures.push(format!(
                        "i2c verify mismatch (tail {}, mode {observed})",
                        ModeField::tail_hex(tail)
                    ));
                }
            }
            Err(e) => attempt.failures.push(format!("i2c verify failed: {e}")),
        }
        attempt.i2c = Some(row);
        attempt
    }

    pub fn status(&self, i2c_query: bool) -> ModeStatus {
        let encoding = &self.config.encoding;
        let devices: Vec<DeviceStatus> = self
            .discover()
            .into_iter()
            .map(|candidate| match self.read_report(&candidate) {
                Ok(report) => DeviceStatus {
                    mode: Some(report.mode(encoding)),
                    mode_bytes: Some(report.mode_field().to_hex()),
                    report_sha256: Some(report.sha256_hex()),
                    error: None,
                    candidate,
                },
                Err(e) => DeviceStatus {
                    mode: None,
                    mode_bytes: None,
                    report_sha256: None,
                    error: Some(e.to_string()),
                    candidate,
                },
            })
            .collect();

        let mut query = I2cQueryStatus {
            enabled: i2c_query,
            dev: self.config.i2c_dev.clone(),
            addr: format!("0x{:02x}", self.config.i2c_address),
            tail_offset: format!("0x{:x}", i2c_payload::QUERY_TAIL_OFFSET),
            tail: None,
            mode: None,
            error: None,
        };
        let mut mode = None;
        let mut mode_source = None;

        // I2C 查询结果优先作为模式来源
        if i2c_query {
            match self.query_i2c_mode() {
                Ok((tail, observed)) => {
                    query.tail = Some(ModeField::tail_hex(tail));
                    query.mode = Some(observed);
                    mode = Some(observed);
                    mode_source = Some("i2c_query");
                }
                Err(e) => query.error = Some(e.to_string()),
            }
        }
        if mode.is_none() {
            let modes: Vec<ObservedMode> = devices
                .iter()
                .filter_map(|d| d.mode)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            if let [only] = modes.as_slice() {
                mode = Some(*only);
                mode_source = Some("hidraw");
            }
        }

        ModeStatus {
            mode,
            mode_source,
            report_id: format!("0x{:02x}", self.config.report_id),
            report_len: self.config.report_len,
            patch_offset: self.config.mode_offset,
            expected_half_bytes: encoding.half.to_hex(),
            expected_full_bytes: encoding.full.to_hex(),
            devices,
            i2c_query: query,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};
    use std::path::Path;

    use super::*;
    use crate::digitizer::i2c_payload::{DELTA_OFFSET, QUERY_READ_LEN, QUERY_TAIL_OFFSET};
    use crate::digitizer::report::ModeEncoding;

    /// In-memory digitizer: feature reports per node, plus an I2C slave that
    /// remembers the last delta written to it.
    #[derive(Default)]
    struct FakeDigitizer {
        reports: RefCell<HashMap<PathBuf, Vec<u8>>>,
        hid_writes: RefCell<Vec<PathBuf>>,
        fail_reads: HashSet<PathBuf>,
        fail_writes: HashSet<PathBuf>,
        /// Writes are acknowledged but the device keeps its old bytes.
        ignore_writes: bool,
        i2c_tail: RefCell<[u8; 2]>,
        i2c_writes: RefCell<Vec<Vec<u8>>>,
        i2c_broken: bool,
    }

    impl FakeDigitizer {
        fn with_device(self, dev: &str, field: ModeField) -> Self {
            let mut bytes = vec![0xA5u8; 256];
            bytes[0] = 0x03;
            bytes[10..16].copy_from_slice(&field.0);
            self.reports.borrow_mut().insert(PathBuf::from(dev), bytes);
            self
        }

        fn field_of(&self, dev: &str) -> ModeField {
            let reports = self.reports.borrow();
            let mut field = [0u8; 6];
            field.copy_from_slice(&reports[Path::new(dev)][10..16]);
            ModeField(field)
        }
    }

    fn busy(dev: &Path) -> TransportError {
        TransportError::Ioctl {
            path: dev.to_path_buf(),
            request: "HIDIOCSFEATURE",
            errno: libc::EIO,
        }
    }

    impl HidTransport for FakeDigitizer {
        fn get_feature(
            &self,
            device: &Path,
            _report_id: u8,
            length: usize,
        ) -> Result<Vec<u8>, TransportError> {
            if self.fail_reads.contains(device) {
                return Err(busy(device));
            }
            let mut bytes = self.reports.borrow()[device].clone();
            bytes.resize(length, 0);
            Ok(bytes)
        }

        fn set_feature(&self, device: &Path, report: &[u8]) -> Result<(), TransportError> {
            if self.fail_writes.contains(device) {
                return Err(busy(device));
            }
            self.hid_writes.borrow_mut().push(device.to_path_buf());
            if !self.ignore_writes {
                self.reports
                    .borrow_mut()
                    .insert(device.to_path_buf(), report.to_vec());
            }
            Ok(())
        }
    }

    impl I2cTransport for FakeDigitizer {
        fn write(&self, device: &Path, _address: u16, payload: &[u8]) -> Result<(), TransportError> {
            if self.i2c_broken {
                return Err(TransportError::MissingNode {
                    path: device.to_path_buf(),
                });
            }
            self.i2c_writes.borrow_mut().push(payload.to_vec());
            *self.i2c_tail.borrow_mut() = [payload[DELTA_OFFSET + 4], payload[DELTA_OFFSET + 5]];
            Ok(())
        }

        fn write_then_read(
            &self,
            device: &Path,
            _address: u16,
            _write: &[u8],
            read_length: usize,
        ) -> Result<Vec<u8>, TransportError> {
            if self.i2c_broken {
                return Err(TransportError::MissingNode {
                    path: device.to_path_buf(),
                });
            }
            let mut resp = vec![0u8; read_length];
            resp[QUERY_TAIL_OFFSET..QUERY_TAIL_OFFSET + 2].copy_from_slice(&*self.i2c_tail.borrow());
            Ok(resp)
        }
    }

    impl HidEnumerator for FakeDigitizer {
        fn enumerate(&self) -> Vec<HidrawCandidate> {
            let mut devs: Vec<PathBuf> = self.reports.borrow().keys().cloned().collect();
            devs.sort();
            devs.into_iter()
                .map(|dev| HidrawCandidate {
                    dev,
                    vendor_id: Some(0x056A),
                    product_id: Some(0x52BA),
                    name: Some("WACF2200:00".into()),
                    driver: Some("wacom".into()),
                })
                .collect()
        }
    }

    fn protocol(fake: &FakeDigitizer) -> DigitizerProtocol<&FakeDigitizer, &FakeDigitizer, &FakeDigitizer> {
        DigitizerProtocol::new(fake, fake, fake, DigitizerConfig::default())
    }

    fn half() -> ModeField {
        ModeEncoding::default().half
    }

    #[test]
    fn set_same_mode_writes_nothing() {
        let fake = FakeDigitizer::default().with_device("/dev/hidraw1", half());
        let outcome = protocol(&fake)
            .set_mode(DigitizerMode::Half, SwitchRequest::default())
            .unwrap();
        assert!(outcome.already_satisfied);
        assert_eq!(outcome.backend, Backend::Hidraw);
        assert!(fake.hid_writes.borrow().is_empty());
        assert!(fake.i2c_writes.borrow().is_empty());
    }

    #[test]
    fn hid_round_trip_both_modes() {
        let fake = FakeDigitizer::default()
            .with_device("/dev/hidraw1", ModeField::ZERO)
            .with_device("/dev/hidraw2", ModeField::ZERO);
        let proto = protocol(&fake);

        proto.set_mode(DigitizerMode::Half, SwitchRequest::default()).unwrap();
        for dev in proto.discover() {
            assert_eq!(proto.get_mode(&dev).unwrap(), ObservedMode::Half);
        }
        // 其余字节保持不变
        assert_eq!(fake.reports.borrow()[Path::new("/dev/hidraw1")][20], 0xA5);

        proto.set_mode(DigitizerMode::Full, SwitchRequest::default()).unwrap();
        for dev in proto.discover() {
            assert_eq!(proto.get_mode(&dev).unwrap(), ObservedMode::Full);
        }
    }

    #[test]
    fn read_failure_aborts_batch_before_any_write() {
        let mut fake = FakeDigitizer::default()
            .with_device("/dev/hidraw1", ModeField::ZERO)
            .with_device("/dev/hidraw2", ModeField::ZERO);
        fake.fail_reads.insert(PathBuf::from("/dev/hidraw2"));
        let err = protocol(&fake)
            .set_mode(
                DigitizerMode::Half,
                SwitchRequest {
                    backend: BackendChoice::Hidraw,
                    dry_run: false,
                },
            )
            .unwrap_err();
        assert!(fake.hid_writes.borrow().is_empty());
        assert_eq!(err.attempted, vec![Backend::Hidraw]);
        assert_eq!(err.failures.len(), 1);
        assert!(err.failures[0].starts_with("/dev/hidraw2"));
    }

    #[test]
    fn write_failure_rolls_back_earlier_devices() {
        let mut fake = FakeDigitizer::default()
            .with_device("/dev/hidraw1", ModeField::ZERO)
            .with_device("/dev/hidraw2", ModeField::ZERO);
        fake.fail_writes.insert(PathBuf::from("/dev/hidraw2"));
        fake.i2c_broken = true;
        let err = protocol(&fake)
            .set_mode(DigitizerMode::Half, SwitchRequest::default())
            .unwrap_err();
        assert_eq!(fake.field_of("/dev/hidraw1"), ModeField::ZERO);
        assert_eq!(err.attempted, vec![Backend::Hidraw, Backend::I2c]);
        assert!(err.failures.iter().any(|f| f.starts_with("i2c write failed")));
    }

    #[test]
    fn verify_mismatch_falls_back_to_i2c() {
        let mut fake = FakeDigitizer::default().with_device("/dev/hidraw1", ModeField::ZERO);
        fake.ignore_writes = true;
        let outcome = protocol(&fake)
            .set_mode(DigitizerMode::Half, SwitchRequest::default())
            .unwrap();
        assert_eq!(outcome.backend, Backend::I2c);
        assert_eq!(outcome.attempted, vec![Backend::Hidraw, Backend::I2c]);
        assert!(outcome.recovered_failures[0].contains("verify mismatch"));

        // 先写全零, 再写目标 delta
        let writes = fake.i2c_writes.borrow();
        assert_eq!(writes.len(), 2);
        assert_eq!(&writes[0][DELTA_OFFSET..DELTA_OFFSET + 6], &[0u8; 6]);
        assert_eq!(&writes[1][DELTA_OFFSET..DELTA_OFFSET + 6], &half().0);
    }

    #[test]
    fn verify_mismatch_is_fatal_without_fallback() {
        let mut fake = FakeDigitizer::default().with_device("/dev/hidraw1", ModeField::ZERO);
        fake.ignore_writes = true;
        let err = protocol(&fake)
            .set_mode(
                DigitizerMode::Half,
                SwitchRequest {
                    backend: BackendChoice::Hidraw,
                    dry_run: false,
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("verify mismatch"));
        assert!(fake.i2c_writes.borrow().is_empty());
    }

    #[test]
    fn i2c_round_trip_both_modes() {
        let fake = FakeDigitizer::default();
        let proto = protocol(&fake);
        let request = SwitchRequest {
            backend: BackendChoice::I2c,
            dry_run: false,
        };

        let outcome = proto.set_mode(DigitizerMode::Half, request).unwrap();
        assert_eq!(outcome.backend, Backend::I2c);
        assert_eq!(proto.query_i2c_mode().unwrap().1, ObservedMode::Half);

        proto.set_mode(DigitizerMode::Full, request).unwrap();
        assert_eq!(proto.query_i2c_mode().unwrap().1, ObservedMode::Full);
        // 全屏只需一次全零写入
        assert_eq!(fake.i2c_writes.borrow().len(), 3);
    }

    #[test]
    fn no_candidates_still_tries_i2c() {
        let fake = FakeDigitizer::default();
        let outcome = protocol(&fake)
            .set_mode(DigitizerMode::Full, SwitchRequest::default())
            .unwrap();
        assert_eq!(outcome.backend, Backend::I2c);
        assert!(outcome.recovered_failures[0].starts_with("no hidraw candidates"));
    }

    #[test]
    fn dry_run_writes_nothing() {
        let fake = FakeDigitizer::default().with_device("/dev/hidraw1", ModeField::ZERO);
        let outcome = protocol(&fake)
            .set_mode(
                DigitizerMode::Half,
                SwitchRequest {
                    backend: BackendChoice::Auto,
                    dry_run: true,
                },
            )
            .unwrap();
        assert!(outcome.dry_run);
        assert_eq!(outcome.devices[0].after_bytes.as_deref(), Some("9c 18 2c 28 33 1a"));
        assert!(fake.hid_writes.borrow().is_empty());
    }

    #[test]
    fn status_prefers_i2c_query() {
        let fake = FakeDigitizer::default().with_device("/dev/hidraw1", half());
        let proto = protocol(&fake);

        let status = proto.status(true);
        assert_eq!(status.mode, Some(ObservedMode::Full));
        assert_eq!(status.mode_source, Some("i2c_query"));
        assert_eq!(status.devices[0].mode, Some(ObservedMode::Half));
        assert_eq!(status.devices[0].report_sha256.as_ref().map(String::len), Some(64));

        let status = proto.status(false);
        assert_eq!(status.mode, Some(ObservedMode::Half));
        assert_eq!(status.mode_source, Some("hidraw"));
    }

    #[test]
    fn short_query_is_reported() {
        struct Short;
        impl I2cTransport for Short {
            fn write(&self, _: &Path, _: u16, _: &[u8]) -> Result<(), TransportError> {
                Ok(())
            }
            fn write_then_read(
                &self,
                _: &Path,
                _: u16,
                _: &[u8],
                _: usize,
            ) -> Result<Vec<u8>, TransportError> {
                Ok(vec![0; 4])
            }
        }
        let fake = FakeDigitizer::default();
        let proto = DigitizerProtocol::new(&fake, Short, &fake, DigitizerConfig::default());
        assert!(matches!(
            proto.query_i2c_mode(),
            Err(ProtocolError::ShortQuery(4))
        ));
        assert!(QUERY_READ_LEN > QUERY_TAIL_OFFSET);
    }
}
