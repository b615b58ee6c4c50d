//! Minimal sysfs readers for NVIDIA PCI functions and mediated devices.

use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;

use crate::error::ValidatorError;

pub const NVIDIA_VENDOR_ID: u16 = 0x10de;
/// PCI base class of display controllers.
const DISPLAY_CLASS: u32 = 0x03;

/// A PCI function as described by sysfs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PciDevice {
    pub address: String,
    pub vendor: u16,
    pub class: u32,
    /// Name of the bound kernel driver, empty when unbound.
    pub driver: String,
}

impl PciDevice {
    pub fn is_nvidia_gpu(&self) -> bool {
        self.vendor == NVIDIA_VENDOR_ID && self.class >> 16 == DISPLAY_CLASS
    }
}

fn sysfs_error(message: impl Into<String>) -> ValidatorError {
    ValidatorError::Sysfs {
        message: message.into(),
    }
}

fn read_hex(path: &Path) -> Result<u32, Report<ValidatorError>> {
    let raw = fs::read_to_string(path)
        .change_context_lazy(|| sysfs_error(format!("unable to read {}", path.display())))?;
    let trimmed = raw.trim();
    u32::from_str_radix(trimmed.trim_start_matches("0x"), 16)
        .change_context_lazy(|| sysfs_error(format!("{} is not hex: {trimmed}", path.display())))
}

fn bound_driver(device_dir: &Path) -> Result<String, Report<ValidatorError>> {
    match fs::read_link(device_dir.join("driver")) {
        Ok(target) => Ok(target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(Report::new(e).change_context(sysfs_error(format!(
            "unable to read driver of {}",
            device_dir.display()
        )))),
    }
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>, Report<ValidatorError>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(Report::new(e)
                .change_context(sysfs_error(format!("unable to list {}", dir.display()))))
        }
    };

    let mut paths = entries
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()
        .change_context_lazy(|| sysfs_error(format!("unable to list {}", dir.display())))?;
    paths.sort();
    Ok(paths)
}

/// Reads devices under a sysfs mount.
#[derive(Debug, Clone)]
pub struct Sysfs {
    root: PathBuf,
}

impl Sysfs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Every PCI function on the system.
    pub fn pci_devices(&self) -> Result<Vec<PciDevice>, Report<ValidatorError>> {
        read_dir_sorted(&self.root.join("bus/pci/devices"))?
            .into_iter()
            .map(|dir| {
                let address = dir
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Ok::<_, Report<ValidatorError>>(PciDevice {
                    vendor: read_hex(&dir.join("vendor"))? as u16,
                    class: read_hex(&dir.join("class"))?,
                    driver: bound_driver(&dir)?,
                    address,
                })
            })
            .collect()
    }

    /// NVIDIA display controllers.
    pub fn nvidia_gpus(&self) -> Result<Vec<PciDevice>, Report<ValidatorError>> {
        Ok(self
            .pci_devices()?
            .into_iter()
            .filter(PciDevice::is_nvidia_gpu)
            .collect())
    }

    /// UUIDs of mediated devices whose parent is an NVIDIA device.
    pub fn nvidia_mdev_devices(&self) -> Result<Vec<String>, Report<ValidatorError>> {
        let mut devices = Vec::new();
        for link in read_dir_sorted(&self.root.join("bus/mdev/devices"))? {
            let device = fs::canonicalize(&link).change_context_lazy(|| {
                sysfs_error(format!("unable to resolve {}", link.display()))
            })?;
            let Some(parent) = device.parent() else {
                continue;
            };
            if read_hex(&parent.join("vendor"))? != u32::from(NVIDIA_VENDOR_ID) {
                continue;
            }
            if let Some(uuid) = link.file_name() {
                devices.push(uuid.to_string_lossy().into_owned());
            }
        }
        Ok(devices)
    }
}
