//! Locating the GPU driver.
//!
//! The same validator image runs against several host layouts (`=` means the
//! container path maps to that host path):
//!
//! - a) `/host = /`, `/run/nvidia/driver = /run/nvidia/driver` (driver container)
//! - b) `/host = /`, `/run/nvidia/driver = /home/kubernetes/bin/nvidia`
//!   (driver pre-installed on the host in a custom path)
//! - c) `/host = /` with `/host/usr/bin/nvidia-smi` present
//! - d) `/host = /custom-driver` with `/host/usr/bin/nvidia-smi` present
//!
//! Cases c) and d) are detected by the host binary, b) by the driver root not
//! being a filesystem we can chroot into, and a) is what remains.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use tracing::info;

use crate::config::HostPaths;

/// Subdirectories a driver root needs before it can be chrooted into.
const ESSENTIAL_DIRS: &[&str] = &["dev"];

const NVIDIA_SMI: &str = "nvidia-smi";

/// Filesystem facts the resolution depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverRootFacts {
    /// `nvidia-smi` exists under the host root and is not empty.
    pub host_binary_present: bool,
    /// The driver container root carries every essential directory.
    pub container_root_chrootable: bool,
}

impl DriverRootFacts {
    pub fn inspect(paths: &HostPaths) -> Self {
        let host_binary_present = fs::symlink_metadata(paths.host_nvidia_smi())
            .map(|metadata| metadata.len() != 0)
            .unwrap_or(false);

        Self {
            host_binary_present,
            container_root_chrootable: is_chrootable(&paths.driver_container_root),
        }
    }
}

fn is_chrootable(root: &Path) -> bool {
    for subdir in ESSENTIAL_DIRS {
        if !root.join(subdir).exists() {
            info!("Detected driver root on the host missing {subdir}, which means can not chroot");
            return false;
        }
    }
    true
}

/// Which of the supported layouts the driver was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverLocation {
    /// Pre-installed on the host at the standard location.
    Host,
    /// Pre-installed on the host under a platform specific directory.
    HostCustomPath,
    /// Installed by the driver container.
    Container,
}

/// Where the driver lives and how to probe it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverRoot {
    pub location: DriverLocation,
    /// Directory to chroot into before running the probe command.
    pub chroot_root: PathBuf,
    /// Probe command, resolved inside `chroot_root`.
    pub probe_command: String,
    /// Root used when creating device nodes and `/dev/char` symlinks.
    pub driver_root: PathBuf,
    /// Whether device nodes should be created for this driver.
    pub create_device_nodes: bool,
}

impl DriverRoot {
    /// Inspect the filesystem and resolve the driver root.
    pub fn discover(paths: &HostPaths) -> Self {
        Self::resolve(DriverRootFacts::inspect(paths), paths)
    }

    pub fn resolve(facts: DriverRootFacts, paths: &HostPaths) -> Self {
        if facts.host_binary_present {
            info!("Detected pre-installed driver on the host");
            return Self {
                location: DriverLocation::Host,
                chroot_root: paths.host_root.clone(),
                probe_command: NVIDIA_SMI.to_string(),
                driver_root: paths.host_root.clone(),
                create_device_nodes: true,
            };
        }

        if !facts.container_root_chrootable {
            info!(
                "Detected pre-installed driver on the host on {} driver path",
                paths.driver_host_root.display()
            );
            return Self {
                location: DriverLocation::HostCustomPath,
                chroot_root: paths.host_root.clone(),
                probe_command: paths
                    .driver_host_root
                    .join("bin")
                    .join(NVIDIA_SMI)
                    .display()
                    .to_string(),
                driver_root: paths.driver_container_root.clone(),
                create_device_nodes: false,
            };
        }

        Self {
            location: DriverLocation::Container,
            chroot_root: paths.driver_container_root.clone(),
            probe_command: NVIDIA_SMI.to_string(),
            driver_root: paths.driver_container_root.clone(),
            create_device_nodes: true,
        }
    }

    /// Whether the driver was installed on the host rather than by the
    /// driver container.
    pub const fn is_host_installed(&self) -> bool {
        !matches!(self.location, DriverLocation::Container)
    }
}
