use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub const DMI_ROOT: &str = "/sys/class/dmi/id";

/// Machine type codes of the X1 Fold 16 Gen 1.
const MACHINE_TYPES: [&str; 2] = ["21ES", "21ET"];

/// SMBIOS identification, best effort: unreadable fields are left out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmiInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys_vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_sku: Option<String>,
}

impl DmiInfo {
    pub fn read_from(root: &Path) -> Self {
        let field = |name: &str| {
            fs::read_to_string(root.join(name))
                .ok()
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty())
        };
        Self {
            sys_vendor: field("sys_vendor"),
            product_name: field("product_name"),
            product_version: field("product_version"),
            product_sku: field("product_sku"),
        }
    }

    pub fn read_system() -> Self {
        Self::read_from(Path::new(DMI_ROOT))
    }

    /// A missing vendor does not disqualify; a non-Lenovo vendor does.
    pub fn looks_like_x1fold(&self) -> bool {
        if self
            .sys_vendor
            .as_deref()
            .is_some_and(|vendor| !vendor.eq_ignore_ascii_case("LENOVO"))
        {
            return false;
        }
        let named = [&self.product_version, &self.product_sku, &self.product_name]
            .into_iter()
            .flatten()
            .any(|value| value.contains("ThinkPad X1 Fold"));
        named
            || self
                .product_name
                .as_deref()
                .is_some_and(|name| MACHINE_TYPES.iter().any(|mt| name.starts_with(mt)))
    }
}
