// ABOUTME: Cloud sandbox backend over the managed sandbox API
// ABOUTME: Tags remote sandboxes with metadata so a restarted process can reconnect to them

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::cloud_api::{CloudApi, CommandResponse, RemoteSandbox};
use super::{begin_activity, finish_activity, snapshot_paths, SandboxProvider};
use crate::command::{self, to_shell_line, WORKDIR};
use crate::error::{Result, SandboxError};
use crate::registry::{InstanceStore, MemoryRegistry};
use crate::settings::{CloudSettings, CommandSettings, SandboxSettings};
use crate::snapshot::inspect_snapshot;
use crate::types::{
    BackendKind, CommandResult, RunOptions, SandboxFile, SandboxInstance, SandboxStatus, Template,
    UploadResult,
};
use crate::validation::{
    validate_media_url, validate_project_id, validate_sandbox_id, validate_sandbox_path,
};

pub const META_SANDBOX_ID: &str = "reelboxSandboxId";
pub const META_PROJECT_ID: &str = "projectId";
pub const META_TEMPLATE: &str = "template";
pub const META_CREATED_AT: &str = "createdAt";

/// Public origin of a port inside a remote sandbox
pub fn proxy_url(port: u16, remote_id: &str, domain: &str) -> String {
    format!("https://{}-{}.{}", port, remote_id, domain)
}

pub struct CloudProvider {
    api: CloudApi,
    settings: CloudSettings,
    commands: CommandSettings,
    registry: Arc<dyn InstanceStore>,
}

impl CloudProvider {
    pub fn new(settings: &SandboxSettings) -> Result<Self> {
        Self::with_registry(settings, Arc::new(MemoryRegistry::new()))
    }

    pub fn with_registry(
        settings: &SandboxSettings,
        registry: Arc<dyn InstanceStore>,
    ) -> Result<Self> {
        let api_key = settings.cloud.api_key.clone().ok_or_else(|| {
            SandboxError::Config(
                "Cloud backend requires REELBOX_CLOUD_API_KEY (or E2B_API_KEY)".to_string(),
            )
        })?;

        Ok(Self {
            api: CloudApi::new(&settings.cloud.api_url, api_key)?,
            settings: settings.cloud.clone(),
            commands: settings.commands.clone(),
            registry,
        })
    }

    fn instance_from_remote(&self, sandbox_id: &str, remote: &RemoteSandbox) -> Option<SandboxInstance> {
        let template = match remote.metadata.get(META_TEMPLATE).map(|t| t.parse::<Template>()) {
            Some(Ok(template)) => template,
            _ => {
                warn!(sandbox_id, remote_id = %remote.sandbox_id, "Remote sandbox has no usable template tag");
                return None;
            }
        };

        let mut instance = SandboxInstance::new(
            sandbox_id,
            remote.metadata.get(META_PROJECT_ID).cloned().unwrap_or_default(),
            template,
            remote.sandbox_id.clone(),
        );
        instance.status = SandboxStatus::Ready;
        instance.proxy_base_url = Some(proxy_url(
            template.dev_server_port(),
            &remote.sandbox_id,
            &self.settings.domain,
        ));
        if let Some(created) = remote
            .metadata
            .get(META_CREATED_AT)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .or(remote.started_at)
        {
            instance.created_at = created;
        }
        instance.last_activity_at = instance.created_at;
        Some(instance)
    }

    /// Reconnect to a sandbox created by an earlier process; failures degrade to None
    async fn recover(&self, sandbox_id: &str) -> Option<SandboxInstance> {
        let matches = match self
            .api
            .list_sandboxes(&[(META_SANDBOX_ID, sandbox_id)])
            .await
        {
            Ok(matches) => matches,
            Err(e) => {
                warn!(sandbox_id, error = %e, "Cloud reconnection lookup failed");
                return None;
            }
        };

        let remote = matches.iter().find(|remote| {
            remote.is_running()
                && remote.metadata.get(META_SANDBOX_ID).map(String::as_str) == Some(sandbox_id)
        })?;

        let instance = self.instance_from_remote(sandbox_id, remote)?;
        self.registry.insert(instance.clone()).await;
        info!(
            sandbox_id,
            remote_id = %remote.sandbox_id,
            project_id = %instance.project_id,
            "Reconnected to cloud sandbox"
        );
        Some(instance)
    }

    /// Kill remote sandboxes tagged with an id whose create call never returned
    async fn release_orphans(&self, sandbox_id: &str) {
        let matches = match self
            .api
            .list_sandboxes(&[(META_SANDBOX_ID, sandbox_id)])
            .await
        {
            Ok(matches) => matches,
            Err(e) => {
                warn!(sandbox_id, error = %e, "Could not look up sandboxes left by a failed create");
                return;
            }
        };

        for remote in matches
            .iter()
            .filter(|r| r.metadata.get(META_SANDBOX_ID).map(String::as_str) == Some(sandbox_id))
        {
            match self.api.kill_sandbox(&remote.sandbox_id).await {
                Ok(_) => info!(sandbox_id, remote_id = %remote.sandbox_id, "Released orphaned cloud sandbox"),
                Err(e) => {
                    warn!(sandbox_id, remote_id = %remote.sandbox_id, error = %e, "Could not release orphaned cloud sandbox")
                }
            }
        }
    }

    async fn resolve(&self, sandbox_id: &str) -> Result<SandboxInstance> {
        validate_sandbox_id(sandbox_id)?;
        if let Some(instance) = self.registry.get(sandbox_id).await {
            return Ok(instance);
        }
        self.recover(sandbox_id)
            .await
            .ok_or_else(|| SandboxError::NotFound(sandbox_id.to_string()))
    }

    /// Prune the registry when the service reports the sandbox gone
    async fn checked<T>(&self, instance: &SandboxInstance, result: Result<T>) -> Result<T> {
        match result {
            Err(SandboxError::NotFound(_)) => {
                warn!(sandbox_id = %instance.id, remote_id = %instance.handle, "Cloud sandbox is gone, pruning");
                self.registry.remove(&instance.id).await;
                Err(SandboxError::NotFound(instance.id.clone()))
            }
            other => other,
        }
    }

    /// Run an argv as one command line under a client-side deadline
    async fn exec(
        &self,
        instance: &SandboxInstance,
        argv: &[String],
        timeout: Duration,
    ) -> Result<Option<CommandResponse>> {
        let line = to_shell_line(argv);
        let call = self
            .api
            .run_command(&instance.handle, &line, WORKDIR, false, timeout);

        match tokio::time::timeout(timeout, call).await {
            Ok(result) => self.checked(instance, result).await.map(Some),
            Err(_) => Ok(None),
        }
    }

    async fn exec_file_op(
        &self,
        instance: &SandboxInstance,
        argv: &[String],
        what: &str,
    ) -> Result<CommandResponse> {
        begin_activity(&self.registry, &instance.id).await;
        let result = self.exec(instance, argv, self.commands.max_timeout).await;
        finish_activity(&self.registry, &instance.id).await;

        result?.ok_or_else(|| {
            SandboxError::Backend(format!(
                "{} timed out after {}ms",
                what,
                self.commands.max_timeout.as_millis()
            ))
        })
    }
}

#[async_trait]
impl SandboxProvider for CloudProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    async fn is_available(&self) -> bool {
        match self.api.health().await {
            Ok(healthy) => healthy,
            Err(e) => {
                debug!(error = %e, "Cloud API is not reachable");
                false
            }
        }
    }

    async fn create(&self, project_id: &str, template: Template) -> Result<SandboxInstance> {
        validate_project_id(project_id)?;

        let template_id = self.settings.templates.get(&template).ok_or_else(|| {
            SandboxError::TemplateNotConfigured {
                template: template.as_str().to_string(),
                backend: BackendKind::Cloud.to_string(),
                hint: format!(
                    "{}{}",
                    reelbox_config::constants::REELBOX_CLOUD_TEMPLATE_PREFIX,
                    template.env_suffix()
                ),
            }
        })?;

        let sandbox_id = format!("sbx-{}", uuid::Uuid::new_v4().simple());
        let created_at = Utc::now();
        let metadata: HashMap<String, String> = [
            (META_SANDBOX_ID, sandbox_id.clone()),
            (META_PROJECT_ID, project_id.to_string()),
            (META_TEMPLATE, template.as_str().to_string()),
            (META_CREATED_AT, created_at.to_rfc3339()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        info!(sandbox_id = %sandbox_id, project_id, template = %template, "Creating cloud sandbox");

        let remote = match self
            .api
            .create_sandbox(template_id, &metadata, self.settings.sandbox_lifetime)
            .await
        {
            Ok(remote) => remote,
            Err(SandboxError::Api { status, message }) => {
                return Err(SandboxError::Provisioning(format!(
                    "Cloud sandbox creation failed ({}): {}. Check that template '{}' exists.",
                    status, message, template_id
                )));
            }
            Err(e @ (SandboxError::Http(_) | SandboxError::Json(_))) => {
                // The request may have landed even though the response did not
                self.release_orphans(&sandbox_id).await;
                return Err(SandboxError::Unavailable(format!(
                    "Cloud API unreachable: {}",
                    e
                )));
            }
            Err(other) => return Err(other),
        };

        let mut instance =
            SandboxInstance::new(&sandbox_id, project_id, template, remote.sandbox_id.clone());
        instance.created_at = created_at;
        instance.last_activity_at = created_at;
        instance.proxy_base_url = Some(proxy_url(
            template.dev_server_port(),
            &remote.sandbox_id,
            &self.settings.domain,
        ));
        self.registry.insert(instance.clone()).await;

        let probe = command::user_command(template.health_check());
        match self.exec(&instance, &probe, self.commands.default_timeout).await {
            Ok(Some(out)) if out.exit_code == 0 => {
                debug!(sandbox_id = %sandbox_id, version = %out.stdout.trim(), "Health probe passed")
            }
            Ok(Some(out)) => {
                warn!(sandbox_id = %sandbox_id, stderr = %out.stderr.trim(), "Health probe failed")
            }
            Ok(None) => warn!(sandbox_id = %sandbox_id, "Health probe timed out"),
            Err(e) => {
                warn!(sandbox_id = %sandbox_id, error = %e, "Health probe errored, rolling back");
                let _ = self.api.kill_sandbox(&remote.sandbox_id).await;
                self.registry.remove(&sandbox_id).await;
                return Err(SandboxError::Provisioning(format!(
                    "Cloud sandbox did not respond after creation: {}",
                    e
                )));
            }
        }

        self.registry.touch(&sandbox_id, Some(SandboxStatus::Ready)).await;
        instance.status = SandboxStatus::Ready;
        info!(
            sandbox_id = %sandbox_id,
            remote_id = %remote.sandbox_id,
            url = ?instance.proxy_base_url,
            "Cloud sandbox ready"
        );
        Ok(instance)
    }

    async fn destroy(&self, sandbox_id: &str) -> Result<()> {
        validate_sandbox_id(sandbox_id)?;

        let instance = match self.registry.get(sandbox_id).await {
            Some(instance) => instance,
            None => match self.recover(sandbox_id).await {
                Some(instance) => instance,
                None => {
                    debug!(sandbox_id, "Destroy of unknown cloud sandbox, nothing to do");
                    return Ok(());
                }
            },
        };

        match self.api.kill_sandbox(&instance.handle).await {
            Ok(_) | Err(SandboxError::NotFound(_)) => {
                self.registry.remove(sandbox_id).await;
                info!(sandbox_id, remote_id = %instance.handle, "Cloud sandbox destroyed");
                Ok(())
            }
            Err(e) => {
                self.registry.set_status(sandbox_id, SandboxStatus::Error).await;
                warn!(sandbox_id, error = %e, "Failed to destroy cloud sandbox");
                Err(e)
            }
        }
    }

    async fn write_file(&self, sandbox_id: &str, path: &str, content: &str) -> Result<()> {
        self.write_binary(sandbox_id, path, content.as_bytes()).await
    }

    async fn read_file(&self, sandbox_id: &str, path: &str) -> Result<String> {
        let bytes = self.read_file_raw(sandbox_id, path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn write_binary(&self, sandbox_id: &str, path: &str, content: &[u8]) -> Result<()> {
        let relative = validate_sandbox_path(path)?;
        if relative == "." {
            return Err(SandboxError::invalid_path(path, "cannot write to the working root"));
        }
        let instance = self.resolve(sandbox_id).await?;

        begin_activity(&self.registry, sandbox_id).await;
        let result = self
            .api
            .write_file(&instance.handle, &command::resolve(&relative), content)
            .await;
        finish_activity(&self.registry, sandbox_id).await;

        self.checked(&instance, result).await?;
        debug!(sandbox_id, path = %relative, bytes = content.len(), "Wrote file");
        Ok(())
    }

    async fn read_file_raw(&self, sandbox_id: &str, path: &str) -> Result<Vec<u8>> {
        let relative = validate_sandbox_path(path)?;
        let instance = self.resolve(sandbox_id).await?;

        begin_activity(&self.registry, sandbox_id).await;
        let result = self
            .api
            .read_file(&instance.handle, &command::resolve(&relative))
            .await;
        finish_activity(&self.registry, sandbox_id).await;

        match self.checked(&instance, result).await {
            Err(SandboxError::FileNotFound(_)) => Err(SandboxError::FileNotFound(relative)),
            other => other,
        }
    }

    async fn list_files(
        &self,
        sandbox_id: &str,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<SandboxFile>> {
        let relative = validate_sandbox_path(path)?;
        let instance = self.resolve(sandbox_id).await?;

        let output = self
            .exec_file_op(
                &instance,
                &command::list_files(&command::resolve(&relative), recursive),
                "list",
            )
            .await?;

        if output.exit_code != 0 {
            return Err(if output.stderr.contains("No such file") {
                SandboxError::FileNotFound(relative)
            } else {
                SandboxError::Backend(format!(
                    "Failed to list {}: {}",
                    relative,
                    output.stderr.trim()
                ))
            });
        }
        Ok(command::parse_listing(&output.stdout, WORKDIR))
    }

    async fn run_command(
        &self,
        sandbox_id: &str,
        command: &str,
        options: RunOptions,
    ) -> Result<CommandResult> {
        if command.trim().is_empty() {
            return Err(SandboxError::InvalidRequest(
                "Command cannot be empty".to_string(),
            ));
        }
        let instance = self.resolve(sandbox_id).await?;
        let argv = command::user_command(command);

        if options.background {
            let result = self
                .api
                .run_command(
                    &instance.handle,
                    &to_shell_line(&argv),
                    WORKDIR,
                    true,
                    self.commands.max_timeout,
                )
                .await;
            let output = self.checked(&instance, result).await?;
            self.registry.touch(sandbox_id, None).await;
            info!(sandbox_id, "Dispatched background command");
            return Ok(if output.exit_code == 0 {
                CommandResult::dispatched()
            } else {
                CommandResult::from_output(
                    output.exit_code,
                    output.stdout.as_bytes(),
                    output.stderr.as_bytes(),
                )
            });
        }

        let timeout = self.commands.effective_timeout(options.timeout);
        begin_activity(&self.registry, sandbox_id).await;
        let result = self.exec(&instance, &argv, timeout).await;
        finish_activity(&self.registry, sandbox_id).await;

        match result? {
            Some(output) => Ok(CommandResult::from_output(
                output.exit_code,
                output.stdout.as_bytes(),
                output.stderr.as_bytes(),
            )),
            None => {
                warn!(sandbox_id, timeout_ms = timeout.as_millis() as u64, "Command timed out");
                Ok(CommandResult::timed_out(timeout))
            }
        }
    }

    async fn upload_media(&self, sandbox_id: &str, url: &str, dest: &str) -> Result<UploadResult> {
        let url = validate_media_url(url)?;
        let relative = validate_sandbox_path(dest)?;
        if relative == "." {
            return Err(SandboxError::invalid_path(dest, "destination must name a file"));
        }
        let instance = self.resolve(sandbox_id).await?;

        let argv = command::fetch_url(url.as_str(), &command::resolve(&relative));
        let output = match self.exec_file_op(&instance, &argv, "media fetch").await {
            Ok(output) => output,
            Err(SandboxError::Backend(message)) => return Ok(UploadResult::failed(message)),
            Err(e) => return Err(e),
        };

        if output.exit_code != 0 {
            let stderr = output.stderr.trim().to_string();
            warn!(sandbox_id, url = %url, stderr = %stderr, "Media fetch failed");
            return Ok(UploadResult::failed(if stderr.is_empty() {
                format!("fetch exited with code {}", output.exit_code)
            } else {
                stderr
            }));
        }

        let size = command::parse_fetched_size(&output.stdout);
        info!(sandbox_id, path = %relative, size = ?size, "Media fetched into sandbox");
        Ok(UploadResult::ok(size))
    }

    async fn export_snapshot(
        &self,
        sandbox_id: &str,
        paths: Option<&[String]>,
    ) -> Result<Vec<u8>> {
        let instance = self.resolve(sandbox_id).await?;
        let dirs = snapshot_paths(instance.template, paths)?;
        let archive = command::scratch_archive_path();

        let packed = self
            .exec_file_op(
                &instance,
                &command::export_snapshot(&archive, WORKDIR, &dirs),
                "snapshot export",
            )
            .await?;
        if packed.exit_code != 0 {
            return Err(SandboxError::Backend(format!(
                "Snapshot export failed: {}",
                packed.stderr.trim()
            )));
        }

        let read = self.api.read_file(&instance.handle, &archive).await;
        match self
            .exec_file_op(&instance, &command::remove_file(&archive), "cleanup")
            .await
        {
            Ok(out) if out.exit_code == 0 => {}
            Ok(out) => {
                warn!(sandbox_id, archive = %archive, stderr = %out.stderr.trim(), "Could not remove scratch archive")
            }
            Err(e) => warn!(sandbox_id, archive = %archive, error = %e, "Could not remove scratch archive"),
        }
        let bytes = self.checked(&instance, read).await?;

        let manifest = inspect_snapshot(&bytes)?;
        info!(
            sandbox_id,
            entries = manifest.entries,
            bytes = bytes.len(),
            "Exported snapshot"
        );
        Ok(bytes)
    }

    async fn import_snapshot(&self, sandbox_id: &str, archive: &[u8]) -> Result<bool> {
        validate_sandbox_id(sandbox_id)?;
        let manifest = inspect_snapshot(archive)?;
        let instance = self.resolve(sandbox_id).await?;
        let scratch = command::scratch_archive_path();

        let staged = self.api.write_file(&instance.handle, &scratch, archive).await;
        if let Err(e) = self.checked(&instance, staged).await {
            if e.is_not_found() {
                return Err(e);
            }
            warn!(sandbox_id, error = %e, "Could not stage snapshot archive");
            return Ok(false);
        }

        let unpacked = self
            .exec_file_op(
                &instance,
                &command::import_snapshot(&scratch, WORKDIR),
                "snapshot import",
            )
            .await?;
        if unpacked.exit_code != 0 {
            warn!(sandbox_id, stderr = %unpacked.stderr.trim(), "Snapshot extraction failed");
            return Ok(false);
        }

        info!(
            sandbox_id,
            entries = manifest.entries,
            top_level = ?manifest.top_level,
            "Imported snapshot"
        );
        Ok(true)
    }

    async fn get_status(&self, sandbox_id: &str) -> Option<SandboxStatus> {
        self.registry.get(sandbox_id).await.map(|i| i.status)
    }

    async fn get_instance(&self, sandbox_id: &str) -> Result<Option<SandboxInstance>> {
        validate_sandbox_id(sandbox_id)?;
        if let Some(instance) = self.registry.get(sandbox_id).await {
            return Ok(Some(instance));
        }
        Ok(self.recover(sandbox_id).await)
    }

    async fn list_instances(&self) -> Vec<SandboxInstance> {
        self.registry.list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SandboxSettings {
        let mut settings = SandboxSettings::default();
        settings.backend = BackendKind::Cloud;
        settings.cloud.api_key = Some("test-key".to_string());
        settings.cloud.api_url = "http://127.0.0.1:9".to_string();
        settings
    }

    #[test]
    fn test_proxy_url() {
        assert_eq!(
            proxy_url(3000, "i3k2j1", "e2b.app"),
            "https://3000-i3k2j1.e2b.app"
        );
    }

    #[test]
    fn test_requires_api_key() {
        let mut settings = settings();
        settings.cloud.api_key = None;
        assert!(matches!(
            CloudProvider::new(&settings),
            Err(SandboxError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_unconfigured_template_fails_before_http() {
        let provider = CloudProvider::new(&settings()).unwrap();
        let err = provider.create("proj-1", Template::Manim).await.unwrap_err();
        match err {
            SandboxError::TemplateNotConfigured { template, hint, .. } => {
                assert_eq!(template, "manim");
                assert_eq!(hint, "REELBOX_CLOUD_TEMPLATE_MANIM");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_instance_from_remote_metadata() {
        let provider = CloudProvider::new(&settings()).unwrap();
        let remote: RemoteSandbox = serde_json::from_str(
            r#"{"sandboxID":"rmt1","state":"running","metadata":{
                "reelboxSandboxId":"sbx-1","projectId":"proj-9","template":"motion-canvas",
                "createdAt":"2026-01-02T03:04:05Z"}}"#,
        )
        .unwrap();

        let instance = provider.instance_from_remote("sbx-1", &remote).unwrap();
        assert_eq!(instance.project_id, "proj-9");
        assert_eq!(instance.template, Template::MotionCanvas);
        assert_eq!(instance.status, SandboxStatus::Ready);
        assert_eq!(
            instance.endpoint().as_deref(),
            Some("https://9000-rmt1.e2b.app")
        );
        assert_eq!(instance.created_at.to_rfc3339(), "2026-01-02T03:04:05+00:00");
    }
}
