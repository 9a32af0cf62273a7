//! Host inspection shared by the daemon and the CLI
//!
//! The DMI product name drives profile auto-detection; the input device
//! inventory is what profile identities are matched against.

use std::io;
use std::path::{Path, PathBuf};

use evdev::Device;

use crate::model::DeviceIdentity;

/// Where the kernel exposes the DMI product name.
pub const DMI_PRODUCT_NAME: &str = "/sys/class/dmi/id/product_name";

/// Read the DMI product name, if the platform exposes one.
pub fn read_product_name(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(name) => Some(name.trim().to_string()),
        Err(e) => {
            tracing::debug!("Could not read {}: {}", path.display(), e);
            None
        }
    }
}

/// Information about an input device
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub name: String,
    /// Physical path (bus address)
    pub phys: Option<String>,
    pub vendor: u16,
    pub product: u16,
}

impl DeviceInfo {
    /// Get vendor:product string (e.g., "045e:028e")
    pub fn vendor_product(&self) -> String {
        format!("{:04x}:{:04x}", self.vendor, self.product)
    }
}

/// Enumerate all `/dev/input/event*` devices, sorted by path.
///
/// Devices that cannot be opened are skipped.
pub fn enumerate_devices() -> io::Result<Vec<DeviceInfo>> {
    let mut devices = Vec::new();

    for entry in std::fs::read_dir("/dev/input")? {
        let path = entry?.path();

        // Only look at event* devices
        if !path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("event"))
            .unwrap_or(false)
        {
            continue;
        }

        match Device::open(&path) {
            Ok(device) => {
                let id = device.input_id();
                devices.push(DeviceInfo {
                    name: device.name().unwrap_or("Unknown").to_string(),
                    phys: device.physical_path().map(str::to_string),
                    vendor: id.vendor(),
                    product: id.product(),
                    path,
                });
            }
            Err(e) => {
                tracing::debug!("Could not open {}: {}", path.display(), e);
            }
        }
    }

    // /dev/input order is arbitrary; keep lookups deterministic
    devices.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(devices)
}

/// Find the device a profile identity refers to.
pub fn find_device<'a>(
    devices: &'a [DeviceInfo],
    identity: &DeviceIdentity,
) -> Option<&'a DeviceInfo> {
    devices
        .iter()
        .find(|d| identity.matches(&d.name, d.phys.as_deref()))
}
