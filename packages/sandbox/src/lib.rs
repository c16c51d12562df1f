// ABOUTME: Sandbox orchestration for agent-driven video rendering projects
// ABOUTME: One provider contract over local containers and managed cloud sandboxes

pub mod command;
pub mod error;
pub mod factory;
pub mod ports;
pub mod providers;
pub mod reaper;
pub mod registry;
pub mod settings;
pub mod snapshot;
pub mod types;
pub mod validation;

pub use error::{Result, SandboxError, RECREATE_HINT};
pub use factory::{
    backend_kind, create_provider, install_provider, is_cloud_backend, sandbox_provider,
    start_idle_reaper,
};
pub use ports::PortPool;
pub use providers::{CloudProvider, DockerProvider, SandboxProvider};
pub use reaper::{IdleReaper, ReapReport, ReaperHandle};
pub use registry::{InstanceStore, MemoryRegistry};
pub use settings::{LifecycleSettings, SandboxSettings};
pub use snapshot::{inspect_snapshot, SnapshotManifest};
pub use types::{
    BackendKind, CommandResult, FileType, RunOptions, SandboxFile, SandboxInstance,
    SandboxStatus, Template, UploadResult,
};
