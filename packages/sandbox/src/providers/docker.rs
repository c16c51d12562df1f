// ABOUTME: Local container backend driving the docker CLI through the process port
// ABOUTME: Owns port allocation, resource ceilings, label-based recovery and unit remediation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use super::process::{ProcessOutput, ProcessRunner, TokioProcessRunner};
use super::{begin_activity, finish_activity, snapshot_paths, SandboxProvider};
use crate::command::{self, WORKDIR};
use crate::error::{Result, SandboxError};
use crate::ports::PortPool;
use crate::registry::{InstanceStore, MemoryRegistry};
use crate::settings::{CommandSettings, LocalSettings, SandboxSettings};
use crate::snapshot::inspect_snapshot;
use crate::types::{
    BackendKind, CommandResult, RunOptions, SandboxFile, SandboxInstance, SandboxStatus, Template,
    UploadResult,
};
use crate::validation::{
    validate_media_url, validate_project_id, validate_sandbox_id, validate_sandbox_path,
};

pub const CONTAINER_PREFIX: &str = "reelbox-";
pub const LABEL_MANAGED: &str = "reelbox.managed";
pub const LABEL_SANDBOX_ID: &str = "reelbox.sandbox_id";
pub const LABEL_PROJECT_ID: &str = "reelbox.project_id";
pub const LABEL_TEMPLATE: &str = "reelbox.template";
pub const LABEL_PORT: &str = "reelbox.port";
pub const LABEL_CREATED_AT: &str = "reelbox.created_at";

pub fn container_name(sandbox_id: &str) -> String {
    format!("{}{}", CONTAINER_PREFIX, sandbox_id)
}

/// Subset of `docker inspect` output the backend reads
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    state: InspectState,
    config: InspectConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
    #[serde(default)]
    running: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

impl InspectEntry {
    fn label(&self, key: &str) -> Option<&str> {
        self.config
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }
}

pub struct DockerProvider {
    runner: Arc<dyn ProcessRunner>,
    settings: LocalSettings,
    commands: CommandSettings,
    registry: Arc<dyn InstanceStore>,
    ports: PortPool,
    network_ready: OnceCell<()>,
}

impl DockerProvider {
    pub fn new(settings: &SandboxSettings) -> Self {
        Self::with_runner(
            settings,
            Arc::new(TokioProcessRunner),
            Arc::new(MemoryRegistry::new()),
        )
    }

    /// Build with an injected process runner and instance store
    pub fn with_runner(
        settings: &SandboxSettings,
        runner: Arc<dyn ProcessRunner>,
        registry: Arc<dyn InstanceStore>,
    ) -> Self {
        Self {
            runner,
            settings: settings.local.clone(),
            commands: settings.commands.clone(),
            registry,
            ports: PortPool::new(settings.local.port_range_start, settings.local.port_range_end),
            network_ready: OnceCell::new(),
        }
    }

    /// Toggle the host bind probe run before handing out a port
    pub fn with_host_port_probe(mut self, enabled: bool) -> Self {
        self.ports = PortPool::new(self.settings.port_range_start, self.settings.port_range_end)
            .with_host_probe(enabled);
        self
    }

    pub fn ports(&self) -> &PortPool {
        &self.ports
    }

    async fn docker(&self, args: Vec<String>, stdin: Option<&[u8]>) -> Result<ProcessOutput> {
        debug!(command = %args.first().map(String::as_str).unwrap_or(""), "docker");
        self.runner
            .run(&self.settings.docker_bin, &args, stdin)
            .await
            .map_err(|e| self.spawn_error(e))
    }

    fn spawn_error(&self, e: io::Error) -> SandboxError {
        if e.kind() == io::ErrorKind::NotFound {
            SandboxError::Unavailable(format!(
                "'{}' was not found. Install Docker or set REELBOX_DOCKER_BIN.",
                self.settings.docker_bin
            ))
        } else {
            SandboxError::Io(e)
        }
    }

    /// Host ports currently published by any managed container, running or not
    async fn live_ports(&self) -> Result<HashSet<u16>> {
        let output = self
            .docker(
                vec![
                    "ps".into(),
                    "-a".into(),
                    "--filter".into(),
                    format!("label={}=true", LABEL_MANAGED),
                    "--format".into(),
                    format!("{{{{.Label \"{}\"}}}}", LABEL_PORT),
                ],
                None,
            )
            .await?;

        if !output.success() {
            return Err(SandboxError::Unavailable(format!(
                "Could not list sandbox containers: {}",
                output.stderr_text()
            )));
        }

        Ok(output
            .stdout_text()
            .lines()
            .filter_map(|line| line.trim().parse::<u16>().ok())
            .collect())
    }

    async fn ensure_network(&self) -> Result<()> {
        self.network_ready
            .get_or_try_init(|| async move {
                let network = self.settings.network.clone();
                let inspect = self
                    .docker(vec!["network".into(), "inspect".into(), network.clone()], None)
                    .await?;
                if inspect.success() {
                    return Ok::<(), SandboxError>(());
                }

                let created = self
                    .docker(
                        vec![
                            "network".into(),
                            "create".into(),
                            "--driver".into(),
                            "bridge".into(),
                            network.clone(),
                        ],
                        None,
                    )
                    .await?;
                let stderr = created.stderr_text();
                if created.success() || stderr.contains("already exists") {
                    info!(network = %network, "Sandbox network ready");
                    Ok(())
                } else {
                    Err(SandboxError::Provisioning(format!(
                        "Could not create network '{}': {}",
                        network, stderr
                    )))
                }
            })
            .await
            .map(|_| ())
    }

    fn run_args(&self, instance: &SandboxInstance, image: &str, port: u16) -> Vec<String> {
        let labels = [
            (LABEL_MANAGED, "true".to_string()),
            (LABEL_SANDBOX_ID, instance.id.clone()),
            (LABEL_PROJECT_ID, instance.project_id.clone()),
            (LABEL_TEMPLATE, instance.template.as_str().to_string()),
            (LABEL_PORT, port.to_string()),
            (LABEL_CREATED_AT, instance.created_at.to_rfc3339()),
        ];

        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            instance.handle.clone(),
            "--network".into(),
            self.settings.network.clone(),
            "--memory".into(),
            self.settings.memory.clone(),
            "--memory-swap".into(),
            self.settings.memory_swap.clone(),
            "--cpus".into(),
            self.settings.cpus.clone(),
            "--pids-limit".into(),
            self.settings.pids_limit.to_string(),
            "--security-opt".into(),
            "no-new-privileges".into(),
            "--cap-drop".into(),
            "ALL".into(),
            "--init".into(),
            "-p".into(),
            format!("127.0.0.1:{}:{}", port, instance.template.dev_server_port()),
        ];
        for (key, value) in labels {
            args.push("--label".into());
            args.push(format!("{}={}", key, value));
        }
        args.extend([
            "-w".into(),
            WORKDIR.into(),
            image.to_string(),
            "tail".into(),
            "-f".into(),
            "/dev/null".into(),
        ]);
        args
    }

    async fn provision(&self, instance: &SandboxInstance, image: &str, port: u16) -> Result<()> {
        self.ensure_network().await?;

        let output = self.docker(self.run_args(instance, image, port), None).await?;
        if !output.success() {
            let stderr = output.stderr_text();
            let env_var = format!(
                "{}{}",
                reelbox_config::constants::REELBOX_LOCAL_IMAGE_PREFIX,
                instance.template.env_suffix()
            );
            return Err(if stderr.contains("Unable to find image") || stderr.contains("No such image") {
                SandboxError::Provisioning(format!(
                    "Image '{}' is not available. Build or pull it, or point {} at another image.",
                    image, env_var
                ))
            } else {
                SandboxError::Provisioning(format!("docker run failed: {}", stderr))
            });
        }

        // A missing toolchain is surfaced to the caller later, on first use
        let probe = instance.template.health_check();
        match self
            .exec(
                &instance.handle,
                command::user_command(probe),
                None,
                self.commands.default_timeout,
            )
            .await
        {
            Ok(Some(out)) if out.success() => {
                debug!(sandbox_id = %instance.id, version = %out.stdout_text().trim(), "Health probe passed")
            }
            Ok(Some(out)) => warn!(
                sandbox_id = %instance.id,
                probe,
                stderr = %out.stderr_text(),
                "Health probe failed"
            ),
            Ok(None) => warn!(sandbox_id = %instance.id, probe, "Health probe timed out"),
            Err(e) => warn!(sandbox_id = %instance.id, probe, error = %e, "Health probe errored"),
        }

        Ok(())
    }

    /// `docker exec` under a deadline; `None` when the deadline passed
    async fn exec(
        &self,
        handle: &str,
        argv: Vec<String>,
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<Option<ProcessOutput>> {
        let mut args: Vec<String> = vec!["exec".into()];
        if stdin.is_some() {
            args.push("-i".into());
        }
        args.push(handle.to_string());
        args.extend(argv);

        match tokio::time::timeout(timeout, self.docker(args, stdin)).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// `exec` for file plumbing, where running out of time is an error
    async fn exec_file_op(
        &self,
        instance: &SandboxInstance,
        argv: Vec<String>,
        stdin: Option<&[u8]>,
        what: &str,
    ) -> Result<ProcessOutput> {
        begin_activity(&self.registry, &instance.id).await;
        let result = self
            .exec(&instance.handle, argv, stdin, self.commands.max_timeout)
            .await;
        finish_activity(&self.registry, &instance.id).await;

        result?.ok_or_else(|| {
            SandboxError::Backend(format!(
                "{} timed out after {}ms",
                what,
                self.commands.max_timeout.as_millis()
            ))
        })
    }

    async fn inspect(&self, handle: &str) -> Result<Option<InspectEntry>> {
        let output = self
            .docker(
                vec![
                    "inspect".into(),
                    "--type".into(),
                    "container".into(),
                    handle.to_string(),
                ],
                None,
            )
            .await?;

        if !output.success() {
            let stderr = output.stderr_text();
            if stderr.contains("No such") {
                return Ok(None);
            }
            return Err(SandboxError::Backend(format!(
                "docker inspect {} failed: {}",
                handle, stderr
            )));
        }

        let mut entries: Vec<InspectEntry> = serde_json::from_slice(&output.stdout)?;
        Ok(entries.pop())
    }

    /// Rebuild a registry entry from container labels
    async fn recover(&self, sandbox_id: &str) -> Result<Option<SandboxInstance>> {
        let handle = container_name(sandbox_id);
        let Some(entry) = self.inspect(&handle).await? else {
            return Ok(None);
        };

        if entry.label(LABEL_MANAGED) != Some("true")
            || entry.label(LABEL_SANDBOX_ID) != Some(sandbox_id)
        {
            debug!(sandbox_id, "Container exists but is not a managed sandbox");
            return Ok(None);
        }

        let template = match entry.label(LABEL_TEMPLATE).map(str::parse::<Template>) {
            Some(Ok(template)) => template,
            _ => {
                warn!(sandbox_id, "Managed container has no usable template label");
                return Ok(None);
            }
        };

        let mut instance = SandboxInstance::new(
            sandbox_id,
            entry.label(LABEL_PROJECT_ID).unwrap_or_default(),
            template,
            handle,
        );
        instance.status = SandboxStatus::Ready;
        instance.port = entry.label(LABEL_PORT).and_then(|p| p.parse().ok());
        if let Some(created) = entry
            .label(LABEL_CREATED_AT)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        {
            instance.created_at = created.with_timezone(&Utc);
        }
        // Activity before the restart is unknown; the next operation touches it
        instance.last_activity_at = instance.created_at;

        if let Some(port) = instance.port {
            self.ports.claim(port).await;
        }
        self.registry.insert(instance.clone()).await;

        info!(
            sandbox_id,
            project_id = %instance.project_id,
            template = %template,
            port = ?instance.port,
            state = %entry.state.status,
            "Recovered sandbox from container labels"
        );
        Ok(Some(instance))
    }

    /// Drop every trace of a unit that can no longer serve requests
    async fn forget(&self, instance: &SandboxInstance) {
        let _ = self
            .docker(
                vec!["rm".into(), "-f".into(), instance.handle.clone()],
                None,
            )
            .await;
        if let Some(port) = instance.port {
            self.ports.release(port).await;
        }
        self.registry.remove(&instance.id).await;
    }

    /// Resolve an id to a live unit, restarting a stopped one once
    async fn ensure_running(&self, sandbox_id: &str) -> Result<SandboxInstance> {
        validate_sandbox_id(sandbox_id)?;

        let instance = match self.registry.get(sandbox_id).await {
            Some(instance) => instance,
            None => self
                .recover(sandbox_id)
                .await?
                .ok_or_else(|| SandboxError::NotFound(sandbox_id.to_string()))?,
        };

        let Some(entry) = self.inspect(&instance.handle).await? else {
            warn!(sandbox_id, "Container is gone, pruning sandbox");
            self.forget(&instance).await;
            return Err(SandboxError::NotFound(sandbox_id.to_string()));
        };

        if entry.state.running {
            return Ok(instance);
        }

        let state = entry.state.status;
        if matches!(state.as_str(), "created" | "exited" | "restarting") {
            warn!(sandbox_id, state = %state, "Container not running, attempting restart");
            let started = self
                .docker(vec!["start".into(), instance.handle.clone()], None)
                .await?;
            if started.success() {
                info!(sandbox_id, "Container restarted");
                return Ok(instance);
            }
            error!(sandbox_id, stderr = %started.stderr_text(), "Container restart failed");
        }

        self.forget(&instance).await;
        Err(SandboxError::Unhealthy {
            id: sandbox_id.to_string(),
            reason: state,
        })
    }
}

#[async_trait]
impl SandboxProvider for DockerProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn is_available(&self) -> bool {
        match self
            .docker(
                vec![
                    "info".into(),
                    "--format".into(),
                    "{{.ServerVersion}}".into(),
                ],
                None,
            )
            .await
        {
            Ok(output) => output.success(),
            Err(e) => {
                debug!(error = %e, "Docker is not available");
                false
            }
        }
    }

    async fn create(&self, project_id: &str, template: Template) -> Result<SandboxInstance> {
        validate_project_id(project_id)?;

        let image = self
            .settings
            .images
            .get(&template)
            .cloned()
            .ok_or_else(|| SandboxError::TemplateNotConfigured {
                template: template.as_str().to_string(),
                backend: BackendKind::Local.to_string(),
                hint: format!(
                    "{}{}",
                    reelbox_config::constants::REELBOX_LOCAL_IMAGE_PREFIX,
                    template.env_suffix()
                ),
            })?;

        let sandbox_id = format!("sbx-{}", uuid::Uuid::new_v4().simple());
        let live = self.live_ports().await?;
        let port = self.ports.allocate(&live).await?;

        let mut instance =
            SandboxInstance::new(&sandbox_id, project_id, template, container_name(&sandbox_id));
        instance.port = Some(port);
        self.registry.insert(instance.clone()).await;

        info!(
            sandbox_id = %sandbox_id,
            project_id,
            template = %template,
            port,
            image = %image,
            "Creating sandbox"
        );

        if let Err(e) = self.provision(&instance, &image, port).await {
            error!(sandbox_id = %sandbox_id, error = %e, "Sandbox provisioning failed, rolling back");
            self.forget(&instance).await;
            return Err(e);
        }

        self.registry.touch(&sandbox_id, Some(SandboxStatus::Ready)).await;
        instance.status = SandboxStatus::Ready;
        if let Some(current) = self.registry.get(&sandbox_id).await {
            instance = current;
        }

        info!(sandbox_id = %sandbox_id, port, "Sandbox ready");
        Ok(instance)
    }

    async fn destroy(&self, sandbox_id: &str) -> Result<()> {
        validate_sandbox_id(sandbox_id)?;

        let instance = match self.registry.get(sandbox_id).await {
            Some(instance) => instance,
            None => match self.recover(sandbox_id).await? {
                Some(instance) => instance,
                None => {
                    debug!(sandbox_id, "Destroy of unknown sandbox, nothing to do");
                    return Ok(());
                }
            },
        };

        let output = self
            .docker(
                vec!["rm".into(), "-f".into(), instance.handle.clone()],
                None,
            )
            .await?;

        if !output.success() && !output.stderr_text().contains("No such container") {
            let stderr = output.stderr_text();
            self.registry.set_status(sandbox_id, SandboxStatus::Error).await;
            error!(sandbox_id, stderr = %stderr, "Failed to remove sandbox container");
            return Err(SandboxError::Backend(format!(
                "Failed to remove sandbox {}: {}",
                sandbox_id, stderr
            )));
        }

        if let Some(port) = instance.port {
            self.ports.release(port).await;
        }
        self.registry.remove(sandbox_id).await;
        info!(sandbox_id, "Sandbox destroyed");
        Ok(())
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
        let instance = self.ensure_running(sandbox_id).await?;

        let output = self
            .exec_file_op(
                &instance,
                command::write_file(&command::resolve(&relative)),
                Some(content),
                "write",
            )
            .await?;

        if !output.success() {
            return Err(SandboxError::Backend(format!(
                "Failed to write {}: {}",
                relative,
                output.stderr_text()
            )));
        }
        debug!(sandbox_id, path = %relative, bytes = content.len(), "Wrote file");
        Ok(())
    }

    async fn read_file_raw(&self, sandbox_id: &str, path: &str) -> Result<Vec<u8>> {
        let relative = validate_sandbox_path(path)?;
        let instance = self.ensure_running(sandbox_id).await?;

        let output = self
            .exec_file_op(
                &instance,
                command::read_file(&command::resolve(&relative)),
                None,
                "read",
            )
            .await?;

        if !output.success() {
            let stderr = output.stderr_text();
            return Err(if stderr.contains("No such file") {
                SandboxError::FileNotFound(relative)
            } else {
                SandboxError::Backend(format!("Failed to read {}: {}", relative, stderr))
            });
        }
        Ok(output.stdout)
    }

    async fn list_files(
        &self,
        sandbox_id: &str,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<SandboxFile>> {
        let relative = validate_sandbox_path(path)?;
        let instance = self.ensure_running(sandbox_id).await?;

        let output = self
            .exec_file_op(
                &instance,
                command::list_files(&command::resolve(&relative), recursive),
                None,
                "list",
            )
            .await?;

        if !output.success() {
            let stderr = output.stderr_text();
            return Err(if stderr.contains("No such file") {
                SandboxError::FileNotFound(relative)
            } else {
                SandboxError::Backend(format!("Failed to list {}: {}", relative, stderr))
            });
        }
        Ok(command::parse_listing(&output.stdout_text(), WORKDIR))
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
        let instance = self.ensure_running(sandbox_id).await?;
        let argv = command::user_command(command);

        if options.background {
            let mut args: Vec<String> = vec!["exec".into(), "-d".into(), instance.handle.clone()];
            args.extend(argv);
            let output = self.docker(args, None).await?;
            self.registry.touch(sandbox_id, None).await;
            info!(sandbox_id, "Dispatched background command");
            return Ok(if output.success() {
                CommandResult::dispatched()
            } else {
                CommandResult::from_output(output.code.unwrap_or(-1), &output.stdout, &output.stderr)
            });
        }

        let timeout = self.commands.effective_timeout(options.timeout);
        begin_activity(&self.registry, sandbox_id).await;
        let result = self.exec(&instance.handle, argv, None, timeout).await;
        finish_activity(&self.registry, sandbox_id).await;

        match result? {
            Some(output) => {
                let result =
                    CommandResult::from_output(output.code.unwrap_or(-1), &output.stdout, &output.stderr);
                debug!(sandbox_id, exit_code = result.exit_code, "Command finished");
                Ok(result)
            }
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
        let instance = self.ensure_running(sandbox_id).await?;

        let argv = command::fetch_url(url.as_str(), &command::resolve(&relative));
        let output = match self.exec_file_op(&instance, argv, None, "media fetch").await {
            Ok(output) => output,
            Err(SandboxError::Backend(message)) => return Ok(UploadResult::failed(message)),
            Err(e) => return Err(e),
        };

        if !output.success() {
            let stderr = output.stderr_text();
            warn!(sandbox_id, url = %url, stderr = %stderr, "Media fetch failed");
            return Ok(UploadResult::failed(if stderr.is_empty() {
                format!("fetch exited with code {}", output.code.unwrap_or(-1))
            } else {
                stderr
            }));
        }

        let size = command::parse_fetched_size(&output.stdout_text());
        info!(sandbox_id, path = %relative, size = ?size, "Media fetched into sandbox");
        Ok(UploadResult::ok(size))
    }

    async fn export_snapshot(
        &self,
        sandbox_id: &str,
        paths: Option<&[String]>,
    ) -> Result<Vec<u8>> {
        validate_sandbox_id(sandbox_id)?;
        let instance = self.ensure_running(sandbox_id).await?;
        let dirs = snapshot_paths(instance.template, paths)?;
        let archive = command::scratch_archive_path();

        let packed = self
            .exec_file_op(
                &instance,
                command::export_snapshot(&archive, WORKDIR, &dirs),
                None,
                "snapshot export",
            )
            .await?;
        if !packed.success() {
            return Err(SandboxError::Backend(format!(
                "Snapshot export failed: {}",
                packed.stderr_text()
            )));
        }

        let read = self
            .exec_file_op(&instance, command::read_file(&archive), None, "snapshot read")
            .await;
        match self
            .exec_file_op(&instance, command::remove_file(&archive), None, "cleanup")
            .await
        {
            Ok(out) if out.success() => {}
            Ok(out) => {
                warn!(sandbox_id, archive = %archive, stderr = %out.stderr_text(), "Could not remove scratch archive")
            }
            Err(e) => warn!(sandbox_id, archive = %archive, error = %e, "Could not remove scratch archive"),
        }
        let read = read?;
        if !read.success() {
            return Err(SandboxError::Backend(format!(
                "Could not read snapshot archive: {}",
                read.stderr_text()
            )));
        }

        let manifest = inspect_snapshot(&read.stdout)?;
        info!(
            sandbox_id,
            entries = manifest.entries,
            bytes = read.stdout.len(),
            "Exported snapshot"
        );
        Ok(read.stdout)
    }

    async fn import_snapshot(&self, sandbox_id: &str, archive: &[u8]) -> Result<bool> {
        validate_sandbox_id(sandbox_id)?;
        let manifest = inspect_snapshot(archive)?;
        let instance = self.ensure_running(sandbox_id).await?;
        let scratch = command::scratch_archive_path();

        let staged = self
            .exec_file_op(
                &instance,
                command::write_file(&scratch),
                Some(archive),
                "snapshot upload",
            )
            .await?;
        if !staged.success() {
            warn!(sandbox_id, stderr = %staged.stderr_text(), "Could not stage snapshot archive");
            return Ok(false);
        }

        let unpacked = self
            .exec_file_op(
                &instance,
                command::import_snapshot(&scratch, WORKDIR),
                None,
                "snapshot import",
            )
            .await?;
        if !unpacked.success() {
            warn!(sandbox_id, stderr = %unpacked.stderr_text(), "Snapshot extraction failed");
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
        self.recover(sandbox_id).await
    }

    async fn list_instances(&self) -> Vec<SandboxInstance> {
        self.registry.list().await
    }
}
