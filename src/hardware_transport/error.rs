use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// 硬件访问失败的分类
///
/// 调用方按 [`TransportError::kind`] 分支处理，而不是把所有失败当成同一种故障。
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{} missing (need {module} kernel module?)", .path.display())]
    MissingModule { path: PathBuf, module: &'static str },

    #[error("{} missing (need ec_sys + mounted debugfs?)", .path.display())]
    MissingDebugfs { path: PathBuf },

    #[error("{} missing", .path.display())]
    MissingNode { path: PathBuf },

    #[error("short {op} on {}: expected {expected} bytes, got {got}", .path.display())]
    ShortIo {
        path: PathBuf,
        op: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{request} on {} failed: {}", .path.display(), errno_text(.errno))]
    Ioctl {
        path: PathBuf,
        request: &'static str,
        errno: i32,
    },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed value from {origin}: {value:?}")]
    Malformed { origin: String, value: String },

    #[error("invalid request: {0}")]
    InvalidArgument(String),
}

fn errno_text(errno: &i32) -> String {
    io::Error::from_raw_os_error(*errno).to_string()
}

impl TransportError {
    /// Stable tag used in JSON output and by callers that branch on the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingModule { .. } => "missing-module",
            Self::MissingDebugfs { .. } => "missing-debugfs",
            Self::MissingNode { .. } => "missing-node",
            Self::ShortIo { .. } => "short-io",
            Self::Ioctl { .. } => "ioctl-error",
            Self::Io { .. } => "io-error",
            Self::Malformed { .. } => "malformed",
            Self::InvalidArgument(_) => "invalid-argument",
        }
    }

    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Ioctl { errno, .. } => Some(*errno),
            Self::Io { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Source is absent from this machine (module not loaded, node not present).
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::MissingModule { .. } | Self::MissingDebugfs { .. } | Self::MissingNode { .. }
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            Self::MissingNode { path }
        } else {
            Self::Io { path, source }
        }
    }

    /// Captures `errno` right after a failed ioctl.
    pub(crate) fn last_ioctl(path: impl Into<PathBuf>, request: &'static str) -> Self {
        Self::Ioctl {
            path: path.into(),
            request,
            errno: io::Error::last_os_error().raw_os_error().unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ioctl_error_reports_errno_and_kind() {
        let err = TransportError::Ioctl {
            path: PathBuf::from("/dev/hidraw3"),
            request: "HIDIOCGFEATURE",
            errno: libc::EBUSY,
        };
        assert_eq!(err.kind(), "ioctl-error");
        assert_eq!(err.errno(), Some(libc::EBUSY));
        let text = err.to_string();
        assert!(text.contains("/dev/hidraw3"));
        assert!(text.contains("HIDIOCGFEATURE"));
    }

    #[test]
    fn not_found_maps_to_missing_node() {
        let err = TransportError::io(
            "/sys/devices/platform/dock.0/docked",
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert_eq!(err.kind(), "missing-node");
        assert!(err.is_unavailable());
    }
}
