use std::str::FromStr;

use derive_more::Display;

use crate::status::StatusFile;

/// GPU stack components this binary knows how to validate.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    #[display("driver")]
    Driver,
    #[display("nvidia-fs")]
    NvidiaFs,
    #[display("toolkit")]
    Toolkit,
    #[display("cuda")]
    Cuda,
    #[display("plugin")]
    Plugin,
    #[display("mofed")]
    Mofed,
    #[display("metrics")]
    Metrics,
    #[display("vfio-pci")]
    VfioPci,
    #[display("vgpu-manager")]
    VgpuManager,
    #[display("vgpu-devices")]
    VgpuDevices,
    #[display("cc-manager")]
    CcManager,
}

impl Component {
    pub const ALL: [Component; 11] = [
        Component::Driver,
        Component::NvidiaFs,
        Component::Toolkit,
        Component::Cuda,
        Component::Plugin,
        Component::Mofed,
        Component::Metrics,
        Component::VfioPci,
        Component::VgpuManager,
        Component::VgpuDevices,
        Component::CcManager,
    ];

    /// Human readable subject used when reporting a failed validation.
    pub const fn description(self) -> &'static str {
        match self {
            Component::Driver => "driver installation",
            Component::NvidiaFs => "nvidia-fs driver installation",
            Component::Toolkit => "toolkit installation",
            Component::Cuda => "cuda workload",
            Component::Plugin => "plugin installation",
            Component::Mofed => "MOFED driver installation",
            Component::Metrics => "validation-metrics exporter",
            Component::VfioPci => "vfio-pci driver installation",
            Component::VgpuManager => "vGPU Manager installation",
            Component::VgpuDevices => "vGPU devices",
            Component::CcManager => "CC Manager installation",
        }
    }

    /// Markers owned by this component. All of them are cleared before a run;
    /// at most one is published afterwards.
    pub const fn status_files(self) -> &'static [StatusFile] {
        match self {
            Component::Driver => &[StatusFile::DriverReady, StatusFile::HostDriverReady],
            Component::NvidiaFs => &[StatusFile::NvidiaFsReady],
            Component::Toolkit => &[StatusFile::ToolkitReady],
            Component::Cuda => &[StatusFile::CudaReady],
            Component::Plugin => &[StatusFile::PluginReady],
            Component::Mofed => &[StatusFile::MofedReady],
            Component::Metrics => &[],
            Component::VfioPci => &[StatusFile::VfioPciReady],
            Component::VgpuManager => &[
                StatusFile::VgpuManagerReady,
                StatusFile::HostVgpuManagerReady,
            ],
            Component::VgpuDevices => &[StatusFile::VgpuDevicesReady],
            Component::CcManager => &[StatusFile::CcManagerReady],
        }
    }

    /// Whether the component cannot be validated without knowing the node.
    pub const fn requires_node_name(self) -> bool {
        matches!(
            self,
            Component::Plugin
                | Component::Cuda
                | Component::VfioPci
                | Component::VgpuManager
                | Component::VgpuDevices
                | Component::CcManager
        )
    }

    /// Whether the component creates verification pods in the operator namespace.
    pub const fn requires_namespace(self) -> bool {
        matches!(self, Component::Plugin | Component::Cuda)
    }
}

impl FromStr for Component {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("must not be empty string".to_string());
        }
        Component::ALL
            .into_iter()
            .find(|component| component.to_string() == s)
            .ok_or_else(|| format!("unknown component `{s}`"))
    }
}
