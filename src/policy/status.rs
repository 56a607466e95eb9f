use std::collections::BTreeSet;

use serde_json::Value;

/// The only thing the policy loop needs from a status command's output.
///
/// Status tools report in different shapes; everything except the mode
/// fields is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalStatus {
    pub mode: Option<String>,
}

impl ExternalStatus {
    pub fn parse(stdout: &str) -> Result<(Self, Value), serde_json::Error> {
        let value: Value = serde_json::from_str(stdout.trim())?;
        Ok((Self::from_value(&value), value))
    }

    /// Top-level `mode` first; then the per-device modes, unanimous if
    /// possible, otherwise any `half` beats any `full`.
    pub fn from_value(value: &Value) -> Self {
        if let Some(mode) = value.get("mode").and_then(Value::as_str).filter(|m| !m.is_empty()) {
            return Self {
                mode: Some(mode.to_string()),
            };
        }
        let Some(devices) = value.get("devices").and_then(Value::as_array) else {
            return Self::default();
        };
        let modes: BTreeSet<&str> = devices
            .iter()
            .filter_map(|dev| dev.get("mode").and_then(Value::as_str))
            .filter(|m| !m.is_empty())
            .collect();

        let mode = if modes.len() == 1 {
            modes.first().copied()
        } else if modes.contains("half") {
            Some("half")
        } else if modes.contains("full") {
            Some("full")
        } else {
            None
        };
        Self {
            mode: mode.map(str::to_string),
        }
    }

    pub fn is(&self, mode: &str) -> bool {
        self.mode.as_deref() == Some(mode)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn mode_of(value: Value) -> Option<String> {
        ExternalStatus::from_value(&value).mode
    }

    #[test]
    fn top_level_mode_wins() {
        assert_eq!(
            mode_of(json!({"mode": "full", "devices": [{"mode": "half"}]})),
            Some("full".into())
        );
        // 空字符串等同于没有
        assert_eq!(mode_of(json!({"mode": "", "devices": [{"mode": "half"}]})), Some("half".into()));
    }

    #[test]
    fn device_modes() {
        assert_eq!(mode_of(json!({"devices": [{"mode": "unknown"}, {"mode": "unknown"}]})), Some("unknown".into()));
        assert_eq!(mode_of(json!({"devices": [{"mode": "full"}, {"mode": "half"}]})), Some("half".into()));
        assert_eq!(mode_of(json!({"devices": [{"mode": "full"}, {"mode": "unknown"}]})), Some("full".into()));
        assert_eq!(mode_of(json!({"devices": [{"mode": "weird"}, {"mode": "unknown"}]})), None);
        assert_eq!(mode_of(json!({"devices": []})), None);
        assert_eq!(mode_of(json!({"devices": ["junk", {"dev": "/dev/hidraw1"}]})), None);
        assert_eq!(mode_of(json!([1, 2, 3])), None);
    }

    #[test]
    fn parses_command_output() {
        let (status, raw) = ExternalStatus::parse("{\"mode\":\"half\",\"extra\":1}\n").unwrap();
        assert!(status.is("half"));
        assert_eq!(raw["extra"], 1);
        assert!(ExternalStatus::parse("not json").is_err());
    }
}
