//! Readiness markers.
//!
//! Every fact this binary establishes is published as a file under the output
//! directory. Presence means ready; absence means not evaluated yet or not
//! ready. Other containers on the node simply `stat` these paths.

use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use derive_more::Display;
use error_stack::Report;
use error_stack::ResultExt;
use tracing::debug;

use crate::error::ValidatorError;

/// Well known marker names.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusFile {
    #[display("driver-ready")]
    DriverReady,
    #[display("host-driver-ready")]
    HostDriverReady,
    #[display("nvidia-fs-ready")]
    NvidiaFsReady,
    #[display("toolkit-ready")]
    ToolkitReady,
    #[display("plugin-ready")]
    PluginReady,
    #[display("cuda-ready")]
    CudaReady,
    #[display("mofed-ready")]
    MofedReady,
    #[display("vfio-pci-ready")]
    VfioPciReady,
    #[display("vgpu-manager-ready")]
    VgpuManagerReady,
    #[display("host-vgpu-manager-ready")]
    HostVgpuManagerReady,
    #[display("vgpu-devices-ready")]
    VgpuDevicesReady,
    #[display("cc-manager-ready")]
    CcManagerReady,
    /// Carries the node's GPU workload configuration as a single line.
    #[display("workload-type")]
    WorkloadType,
}

/// Creates and removes markers inside one output directory.
#[derive(Debug, Clone)]
pub struct StatusLedger {
    dir: PathBuf,
}

impl StatusLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, file: StatusFile) -> PathBuf {
        self.dir.join(file.to_string())
    }

    /// Make sure the output directory exists, optionally wiping everything a
    /// previous run left behind.
    pub fn prepare(&self, cleanup_all: bool) -> Result<(), Report<ValidatorError>> {
        if cleanup_all {
            match fs::remove_dir_all(&self.dir) {
                Ok(()) => debug!(dir = %self.dir.display(), "removed previous status files"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Report::new(e).change_context(ValidatorError::StatusFile {
                        path: self.dir.clone(),
                    }))
                }
            }
        }

        fs::create_dir_all(&self.dir).change_context(ValidatorError::StatusFile {
            path: self.dir.clone(),
        })
    }

    /// Remove a marker. Missing markers are not an error.
    pub fn clear(&self, file: StatusFile) -> Result<(), Report<ValidatorError>> {
        let path = self.path(file);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "cleared status file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Report::new(e)
                .change_context(ValidatorError::StatusFile { path })
                .attach_printable("unable to remove status file")),
        }
    }

    /// Create (or truncate) an empty marker.
    pub fn publish(&self, file: StatusFile) -> Result<(), Report<ValidatorError>> {
        self.publish_with_content(file, "")
    }

    pub fn publish_with_content(
        &self,
        file: StatusFile,
        content: &str,
    ) -> Result<(), Report<ValidatorError>> {
        let path = self.path(file);
        fs::write(&path, content)
            .change_context(ValidatorError::StatusFile { path: path.clone() })
            .attach_printable("unable to create status file")?;
        debug!(path = %path.display(), "published status file");
        Ok(())
    }

    pub fn is_present(&self, file: StatusFile) -> bool {
        self.path(file).exists()
    }

    pub fn read(&self, file: StatusFile) -> Option<String> {
        fs::read_to_string(self.path(file)).ok()
    }
}
