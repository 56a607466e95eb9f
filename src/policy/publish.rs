use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::dmi::DmiInfo;
use crate::digitizer::DigitizerMode;
use crate::dock_state::DockState;
use crate::output::utc_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateEvent {
    ApplyInitialPending,
    ApplyInitial,
    DockChangeCandidate,
    DockChangePending,
    DockChange,
    EnforceApply,
    EnforceCheckError,
}

/// 状态文件内容, 每次整体替换
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    pub ts: String,
    pub event: StateEvent,
    pub dmi: DmiInfo,
    pub dock: DockState,
    pub desired: DigitizerMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_docked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_docked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce_s: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_rc: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digitizer_expected: Option<DigitizerMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digitizer_observed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
}

impl StateDocument {
    pub fn new(event: StateEvent, dmi: DmiInfo, dock: DockState, desired: DigitizerMode) -> Self {
        Self {
            ts: utc_timestamp(),
            event,
            dmi,
            dock,
            desired,
            from_docked: None,
            to_docked: None,
            debounce_s: None,
            apply_rc: None,
            digitizer_expected: None,
            digitizer_observed: None,
            status_error: None,
            status: None,
        }
    }

    pub fn transition(mut self, from_docked: bool, to_docked: bool) -> Self {
        self.from_docked = Some(from_docked);
        self.to_docked = Some(to_docked);
        self
    }
}

pub trait StateSink {
    fn publish(&mut self, document: &StateDocument) -> io::Result<()>;
}

/// State file replaced atomically so pollers never read a partial document.
#[derive(Debug, Clone)]
pub struct AtomicStateFile {
    path: PathBuf,
}

impl AtomicStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateSink for AtomicStateFile {
    fn publish(&mut self, document: &StateDocument) -> io::Result<()> {
        write_json_atomic(&self.path, document)
    }
}

/// 临时文件 + fsync + rename, 最后改成 0644 让普通用户的进程也能读
pub fn write_json_atomic(path: &Path, value: &impl Serialize) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let prefix = format!(
        "{}.",
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    );
    let mut tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)?;
    serde_json::to_writer(&mut tmp, value)?;
    tmp.write_all(b"\n")?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    fn document(event: StateEvent, rc: i32) -> StateDocument {
        let mut doc = StateDocument::new(
            event,
            DmiInfo::default(),
            DockState::from_signal(Some(true), Some(1)),
            DigitizerMode::Half,
        )
        .transition(false, true);
        doc.apply_rc = Some(rc);
        doc
    }

    #[test]
    fn event_names() {
        assert_eq!(
            serde_json::to_value(StateEvent::DockChangeCandidate).unwrap(),
            "dock_change_candidate"
        );
        assert_eq!(
            serde_json::to_value(StateEvent::EnforceCheckError).unwrap(),
            "enforce_check_error"
        );
    }

    #[test]
    fn writes_world_readable_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("state.json");
        let mut sink = AtomicStateFile::new(&path);
        sink.publish(&document(StateEvent::DockChange, 0)).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
        let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["event"], "dock_change");
        assert_eq!(value["dock"]["docked"], true);
        assert_eq!(value["desired"], "half");
        assert_eq!(value["to_docked"], true);
        assert!(value.get("status_error").is_none());
        // 没有遗留的临时文件
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn concurrent_reader_never_sees_partial_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut sink = AtomicStateFile::new(&path);
        sink.publish(&document(StateEvent::DockChange, 0)).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let done = done.clone();
            let path = path.clone();
            std::thread::spawn(move || {
                let mut reads = 0;
                loop {
                    let finished = done.load(Ordering::Relaxed);
                    let text = fs::read_to_string(&path).unwrap();
                    let doc: StateDocument = serde_json::from_str(&text).unwrap();
                    // 同一次写入的字段总是一致
                    let rc = doc.apply_rc.unwrap();
                    let expected = if rc % 2 == 0 {
                        StateEvent::DockChange
                    } else {
                        StateEvent::EnforceApply
                    };
                    assert_eq!(doc.event, expected);
                    reads += 1;
                    if finished {
                        break reads;
                    }
                }
            })
        };

        for rc in 0..200 {
            let event = if rc % 2 == 0 {
                StateEvent::DockChange
            } else {
                StateEvent::EnforceApply
            };
            sink.publish(&document(event, rc)).unwrap();
        }
        done.store(true, Ordering::Relaxed);
        assert!(reader.join().unwrap() > 0);
    }
}
