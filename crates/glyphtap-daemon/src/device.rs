//! Keyboard discovery

use std::path::{Path, PathBuf};

use anyhow::Result;
use evdev::Device;

use crate::virtual_device::VIRTUAL_DEVICE_NAME;

/// Information about an input device
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub name: String,
    pub vendor: u16,
    pub product: u16,
    pub keyboard: bool,
}

impl DeviceInfo {
    fn from_device(path: &Path, device: &Device) -> Self {
        let id = device.input_id();
        Self {
            path: path.to_path_buf(),
            name: device.name().unwrap_or("Unknown").to_string(),
            vendor: id.vendor(),
            product: id.product(),
            keyboard: is_keyboard(device),
        }
    }

    /// Get vendor:product string (e.g., "3434:0361")
    pub fn vendor_product(&self) -> String {
        format!("{:04x}:{:04x}", self.vendor, self.product)
    }

    /// Whether the tap should grab this device.
    pub fn should_grab(&self) -> bool {
        self.keyboard && self.name != VIRTUAL_DEVICE_NAME
    }
}

fn is_event_node(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("event"))
}

/// Enumerate all input devices
pub fn enumerate_devices() -> Result<Vec<DeviceInfo>> {
    let mut devices = Vec::new();

    for entry in std::fs::read_dir("/dev/input")? {
        let path = entry?.path();
        if !is_event_node(&path) {
            continue;
        }

        match Device::open(&path) {
            Ok(device) => devices.push(DeviceInfo::from_device(&path, &device)),
            Err(e) => {
                tracing::debug!("Could not open {}: {}", path.display(), e);
            }
        }
    }

    devices.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(devices)
}

/// Physical keyboards, excluding our own virtual device.
pub fn keyboards() -> Result<Vec<DeviceInfo>> {
    Ok(enumerate_devices()?
        .into_iter()
        .filter(DeviceInfo::should_grab)
        .collect())
}

/// Check if a device is a keyboard
pub fn is_keyboard(device: &Device) -> bool {
    device
        .supported_events()
        .contains(evdev::EventType::KEY)
        && device
            .supported_keys()
            .is_some_and(|keys| keys.contains(evdev::Key::KEY_A))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, keyboard: bool) -> DeviceInfo {
        DeviceInfo {
            path: PathBuf::from("/dev/input/event3"),
            name: name.to_string(),
            vendor: 0x3434,
            product: 0x361,
            keyboard,
        }
    }

    #[test]
    fn test_vendor_product() {
        assert_eq!(info("Keychron K3", true).vendor_product(), "3434:0361");
    }

    #[test]
    fn test_should_grab() {
        assert!(info("Keychron K3", true).should_grab());
        assert!(!info("Logitech Mouse", false).should_grab());
        assert!(!info(VIRTUAL_DEVICE_NAME, true).should_grab());
    }

    #[test]
    fn test_is_event_node() {
        assert!(is_event_node(Path::new("/dev/input/event12")));
        assert!(!is_event_node(Path::new("/dev/input/mouse0")));
        assert!(!is_event_node(Path::new("/dev/input/by-id")));
    }
}
