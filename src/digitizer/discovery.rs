use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use tracing::debug;

/// 一个候选 hidraw 节点, 每次切换前重新枚举, 不做缓存
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HidrawCandidate {
    pub dev: PathBuf,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub name: Option<String>,
    pub driver: Option<String>,
}

impl HidrawCandidate {
    pub fn id_pair(&self) -> Option<(u16, u16)> {
        self.vendor_id.zip(self.product_id)
    }
}

pub trait HidEnumerator {
    fn enumerate(&self) -> Vec<HidrawCandidate>;
}

impl<T: HidEnumerator + ?Sized> HidEnumerator for &T {
    fn enumerate(&self) -> Vec<HidrawCandidate> {
        (**self).enumerate()
    }
}

/// Walks `/dev/hidraw*` and reads each node's `uevent` from sysfs.
#[derive(Debug, Clone)]
pub struct SysfsHidEnumerator {
    dev_dir: PathBuf,
    class_dir: PathBuf,
}

impl Default for SysfsHidEnumerator {
    fn default() -> Self {
        Self::new("/dev", "/sys/class/hidraw")
    }
}

impl SysfsHidEnumerator {
    pub fn new(dev_dir: impl Into<PathBuf>, class_dir: impl Into<PathBuf>) -> Self {
        Self {
            dev_dir: dev_dir.into(),
            class_dir: class_dir.into(),
        }
    }

    fn describe(&self, dev: PathBuf, node: &str) -> Option<HidrawCandidate> {
        let sysfs = self.class_dir.join(node).join("device");
        if !sysfs.exists() {
            return None;
        }
        let uevent = fs::read_to_string(sysfs.join("uevent")).unwrap_or_default();
        let kv = parse_uevent(&uevent);
        let ids = kv.get("HID_ID").and_then(|id| parse_hid_id(id));
        Some(HidrawCandidate {
            dev,
            vendor_id: ids.map(|(v, _)| v),
            product_id: ids.map(|(_, p)| p),
            name: kv.get("HID_NAME").cloned(),
            driver: kv.get("DRIVER").cloned(),
        })
    }
}

impl HidEnumerator for SysfsHidEnumerator {
    fn enumerate(&self) -> Vec<HidrawCandidate> {
        let entries = match fs::read_dir(&self.dev_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("unable to list {}: {e}", self.dev_dir.display());
                return Vec::new();
            }
        };
        let mut nodes: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with("hidraw"))
            .collect();
        nodes.sort_by_key(|name| node_index(name));

        nodes
            .iter()
            .filter_map(|node| self.describe(self.dev_dir.join(node), node))
            .collect()
    }
}

fn node_index(name: &str) -> (usize, String) {
    let digits = name.trim_start_matches("hidraw");
    (digits.parse().unwrap_or(usize::MAX), name.to_string())
}

pub fn parse_uevent(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// `HID_ID` has the shape `BBBB:VVVVVVVV:PPPPPPPP` (bus, vendor, product).
pub fn parse_hid_id(hid_id: &str) -> Option<(u16, u16)> {
    let mut parts = hid_id.trim().split(':');
    let (bus, vendor, product) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || bus.len() != 4 || vendor.len() != 8 || product.len() != 8 {
        return None;
    }
    u16::from_str_radix(bus, 16).ok()?;
    let vendor = u32::from_str_radix(vendor, 16).ok()?;
    let product = u32::from_str_radix(product, 16).ok()?;
    Some(((vendor & 0xFFFF) as u16, (product & 0xFFFF) as u16))
}

/// Selects the digitizer nodes: exact vendor/product match first, name
/// substrings only for nodes whose ids are missing or do not match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMatcher {
    pub vendor_id: u16,
    pub product_id: u16,
    pub name_patterns: Vec<String>,
}

impl DeviceMatcher {
    pub fn matches(&self, candidate: &HidrawCandidate) -> bool {
        if candidate.id_pair() == Some((self.vendor_id, self.product_id)) {
            return true;
        }
        let name = candidate.name.as_deref().unwrap_or_default();
        self.name_patterns
            .iter()
            .any(|pattern| !pattern.is_empty() && name.contains(pattern.as_str()))
    }

    pub fn select(&self, candidates: Vec<HidrawCandidate>) -> Vec<HidrawCandidate> {
        candidates.into_iter().filter(|c| self.matches(c)).collect()
    }
}
