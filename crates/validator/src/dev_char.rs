//! `/dev/char` symlinks for NVIDIA character devices.
//!
//! Container runtimes using systemd cgroup management look devices up by
//! `/dev/char/<major>:<minor>`, which udev does not populate for NVIDIA
//! device nodes.

use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::fs::MetadataExt;
use std::os::unix::fs::symlink;
use std::path::Path;
use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::ValidatorError;
use crate::probe::Probe;
use crate::probe::ProbeExecutor;

/// A character device node and its device number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharDevice {
    pub path: PathBuf,
    pub major: u32,
    pub minor: u32,
}

impl CharDevice {
    pub fn link_name(&self) -> String {
        format!("{}:{}", self.major, self.minor)
    }
}

fn symlink_error(message: impl Into<String>) -> ValidatorError {
    ValidatorError::DevCharSymlinks {
        message: message.into(),
    }
}

fn is_nvidia_node(name: &str) -> bool {
    name.starts_with("nvidia")
}

/// Creates `/dev/char` symlinks for every NVIDIA device under a dev root.
pub struct DevCharLinker {
    /// Directory whose `dev` subdirectory holds the device nodes.
    dev_root: PathBuf,
    /// Root the driver tools run in when creating device nodes.
    driver_root: PathBuf,
    /// Host `/dev/char`, as mounted in this container.
    dev_char: PathBuf,
    create_device_nodes: bool,
}

impl DevCharLinker {
    pub fn new(
        dev_root: impl Into<PathBuf>,
        driver_root: impl Into<PathBuf>,
        dev_char: impl Into<PathBuf>,
    ) -> Self {
        Self {
            dev_root: dev_root.into(),
            driver_root: driver_root.into(),
            dev_char: dev_char.into(),
            create_device_nodes: false,
        }
    }

    /// Load the kernel modules and create missing device nodes before linking.
    pub fn create_device_nodes(mut self, enabled: bool) -> Self {
        self.create_device_nodes = enabled;
        self
    }

    /// NVIDIA character devices under `<dev root>/dev`, including MIG
    /// capability nodes under `nvidia-caps`.
    pub fn discover(&self) -> Result<Vec<CharDevice>, Report<ValidatorError>> {
        let dev = self.dev_root.join("dev");
        let mut devices = scan_char_devices(&dev, is_nvidia_node)?;
        devices.extend(scan_char_devices(&dev.join("nvidia-caps"), |_| true)?);
        Ok(devices)
    }

    /// Create (or repair) one symlink per device.
    pub fn link(&self, devices: &[CharDevice]) -> Result<(), Report<ValidatorError>> {
        fs::create_dir_all(&self.dev_char).change_context_lazy(|| {
            symlink_error(format!("unable to create {}", self.dev_char.display()))
        })?;

        for device in devices {
            let link = self.dev_char.join(device.link_name());
            match fs::read_link(&link) {
                Ok(target) if target == device.path => {
                    debug!(link = %link.display(), "symlink already present");
                    continue;
                }
                Ok(_) => fs::remove_file(&link).change_context_lazy(|| {
                    symlink_error(format!("unable to replace {}", link.display()))
                })?,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                    fs::remove_file(&link).change_context_lazy(|| {
                        symlink_error(format!("unable to replace {}", link.display()))
                    })?
                }
                Err(e) => {
                    return Err(Report::new(e).change_context(symlink_error(format!(
                        "unable to inspect {}",
                        link.display()
                    ))))
                }
            }

            info!(
                "creating link {} => {}",
                link.display(),
                device.path.display()
            );
            symlink(&device.path, &link).change_context_lazy(|| {
                symlink_error(format!("unable to create symlink {}", link.display()))
            })?;
        }
        Ok(())
    }

    /// Make sure the device nodes exist, then link all of them.
    pub async fn create_links(&self, executor: &ProbeExecutor) -> Result<(), Report<ValidatorError>> {
        if self.create_device_nodes {
            let modprobe = Probe::new(
                "chroot",
                [
                    self.driver_root.display().to_string(),
                    "nvidia-modprobe".to_string(),
                    "-u".to_string(),
                    "-m".to_string(),
                    "-c".to_string(),
                    "0".to_string(),
                ],
            );
            executor
                .run(&modprobe, false)
                .await
                .change_context(symlink_error("unable to create NVIDIA device nodes"))?;
        }

        let devices = self.discover()?;
        info!(count = devices.len(), "found NVIDIA character devices");
        self.link(&devices)
    }
}

fn scan_char_devices(
    dir: &Path,
    accept: impl Fn(&str) -> bool,
) -> Result<Vec<CharDevice>, Report<ValidatorError>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(Report::new(e)
                .change_context(symlink_error(format!("unable to list {}", dir.display()))))
        }
    };

    let mut devices = Vec::new();
    for entry in entries {
        let entry = entry
            .change_context_lazy(|| symlink_error(format!("unable to list {}", dir.display())))?;
        if !accept(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let path = entry.path();
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            // Dangling links left behind by a previous driver.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "skipping device entry without a target");
                continue;
            }
            Err(e) => {
                return Err(Report::new(e).change_context(symlink_error(format!(
                    "unable to stat {}",
                    path.display()
                ))))
            }
        };
        if !metadata.file_type().is_char_device() {
            continue;
        }
        devices.push(CharDevice {
            major: libc::major(metadata.rdev()),
            minor: libc::minor(metadata.rdev()),
            path,
        });
    }
    devices.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(devices)
}
