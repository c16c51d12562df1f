// ABOUTME: Provider trait shared by the local container and cloud sandbox backends
// ABOUTME: Every operation is keyed by sandbox id; the instance registry is a cache, not the truth

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::registry::InstanceStore;
use crate::types::{
    BackendKind, CommandResult, RunOptions, SandboxFile, SandboxInstance, SandboxStatus, Template,
    UploadResult,
};

pub mod cloud;
pub mod cloud_api;
pub mod docker;
pub mod process;

pub use cloud::CloudProvider;
pub use cloud_api::CloudApi;
pub use docker::DockerProvider;
pub use process::{ProcessOutput, ProcessRunner, TokioProcessRunner};

/// Sandbox backend contract
///
/// Callers never learn which backend served them. Paths are relative to the
/// sandbox working root and pass the path guard before any backend I/O.
/// Command failures come back as data in [`CommandResult`]; `Err` is reserved
/// for infrastructure failures and lost sandboxes.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether the backing daemon or API is reachable
    async fn is_available(&self) -> bool;

    /// Provision a unit for `project_id`; on any failure nothing is left behind
    async fn create(&self, project_id: &str, template: Template) -> Result<SandboxInstance>;

    /// Tear down a unit; unknown or already-removed ids succeed
    async fn destroy(&self, sandbox_id: &str) -> Result<()>;

    /// Write UTF-8 text, creating parent directories
    async fn write_file(&self, sandbox_id: &str, path: &str, content: &str) -> Result<()>;

    async fn read_file(&self, sandbox_id: &str, path: &str) -> Result<String>;

    async fn write_binary(&self, sandbox_id: &str, path: &str, content: &[u8]) -> Result<()>;

    async fn read_file_raw(&self, sandbox_id: &str, path: &str) -> Result<Vec<u8>>;

    async fn list_files(
        &self,
        sandbox_id: &str,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<SandboxFile>>;

    async fn run_command(
        &self,
        sandbox_id: &str,
        command: &str,
        options: RunOptions,
    ) -> Result<CommandResult>;

    /// Have the sandbox fetch `url` itself; fetch failures come back in the result
    async fn upload_media(&self, sandbox_id: &str, url: &str, dest: &str) -> Result<UploadResult>;

    /// Gzip tar of `paths` (template defaults when None), relative to the working root
    async fn export_snapshot(&self, sandbox_id: &str, paths: Option<&[String]>)
        -> Result<Vec<u8>>;

    /// Unpack a snapshot over the working root; `false` when the unit rejected it
    async fn import_snapshot(&self, sandbox_id: &str, archive: &[u8]) -> Result<bool>;

    /// Registry-only lookup; never reconnects
    async fn get_status(&self, sandbox_id: &str) -> Option<SandboxStatus>;

    /// Lookup that may recover a unit created by another process
    async fn get_instance(&self, sandbox_id: &str) -> Result<Option<SandboxInstance>>;

    async fn list_instances(&self) -> Vec<SandboxInstance>;
}

/// Mark the start of an operation; the unit is busy until `finish_activity`
pub(crate) async fn begin_activity(registry: &Arc<dyn InstanceStore>, sandbox_id: &str) {
    registry.touch(sandbox_id, Some(SandboxStatus::Busy)).await;
}

pub(crate) async fn finish_activity(registry: &Arc<dyn InstanceStore>, sandbox_id: &str) {
    registry.touch(sandbox_id, Some(SandboxStatus::Ready)).await;
}

/// Default snapshot directories for an instance, or the caller's override
pub(crate) fn snapshot_paths(template: Template, paths: Option<&[String]>) -> Result<Vec<String>> {
    match paths {
        Some(paths) => paths
            .iter()
            .map(|p| crate::validation::validate_sandbox_path(p))
            .collect(),
        None => Ok(template
            .snapshot_dirs()
            .iter()
            .map(|d| d.to_string())
            .collect()),
    }
}
