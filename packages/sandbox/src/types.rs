// ABOUTME: Core type definitions for sandbox orchestration
// ABOUTME: Defines instances, templates, file listings, command results and lifecycle status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::SandboxError;

/// Which backend implementation is serving the provider contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Containers on the local container runtime
    Local,
    /// Managed remote sandbox service
    Cloud,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Cloud => "cloud",
        }
    }
}

impl FromStr for BackendKind {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "docker" => Ok(Self::Local),
            "cloud" | "e2b" => Ok(Self::Cloud),
            other => Err(SandboxError::Config(format!(
                "Unknown sandbox backend '{}'. Expected 'local' or 'cloud'.",
                other
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sandbox lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Creating,
    Ready,
    Busy,
    Destroyed,
    Error,
}

impl SandboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Destroyed => "destroyed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pre-built environment flavor, one per rendering engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Template {
    Remotion,
    MotionCanvas,
    Manim,
}

impl Template {
    pub const ALL: [Template; 3] = [Template::Remotion, Template::MotionCanvas, Template::Manim];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remotion => "remotion",
            Self::MotionCanvas => "motion-canvas",
            Self::Manim => "manim",
        }
    }

    /// Suffix used by per-template environment variables
    pub fn env_suffix(&self) -> &'static str {
        match self {
            Self::Remotion => "REMOTION",
            Self::MotionCanvas => "MOTION_CANVAS",
            Self::Manim => "MANIM",
        }
    }

    /// Port the template's dev/preview server listens on inside the unit
    pub fn dev_server_port(&self) -> u16 {
        match self {
            Self::Remotion => 3000,
            Self::MotionCanvas => 9000,
            Self::Manim => 8000,
        }
    }

    /// Command proving the template's toolchain is reachable
    pub fn health_check(&self) -> &'static str {
        match self {
            Self::Remotion | Self::MotionCanvas => "node --version",
            Self::Manim => "manim --version",
        }
    }

    /// Source and generated-media directories exported by default
    pub fn snapshot_dirs(&self) -> &'static [&'static str] {
        match self {
            Self::Remotion | Self::MotionCanvas => &["src", "public"],
            Self::Manim => &["src", "media"],
        }
    }
}

impl FromStr for Template {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "remotion" => Ok(Self::Remotion),
            "motion-canvas" | "motion_canvas" | "motioncanvas" => Ok(Self::MotionCanvas),
            "manim" => Ok(Self::Manim),
            other => Err(SandboxError::UnsupportedTemplate(other.to_string())),
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical descriptor of one sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxInstance {
    /// Stable caller-visible identifier
    pub id: String,
    pub project_id: String,
    pub status: SandboxStatus,
    /// Backend-native handle: container name or remote sandbox id
    #[serde(skip)]
    pub(crate) handle: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Host port bound to the dev server (local backend)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Public proxy origin for the dev server (cloud backend)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_base_url: Option<String>,
    pub template: Template,
}

impl SandboxInstance {
    pub(crate) fn new(
        id: impl Into<String>,
        project_id: impl Into<String>,
        template: Template,
        handle: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            project_id: project_id.into(),
            status: SandboxStatus::Creating,
            handle: handle.into(),
            created_at: now,
            last_activity_at: now,
            port: None,
            proxy_base_url: None,
            template,
        }
    }

    /// URL of the exposed dev-server endpoint, if any
    pub fn endpoint(&self) -> Option<String> {
        if self.status == SandboxStatus::Destroyed {
            return None;
        }
        match (&self.proxy_base_url, self.port) {
            (Some(url), _) => Some(url.clone()),
            (None, Some(port)) => Some(format!("http://127.0.0.1:{}", port)),
            (None, None) => None,
        }
    }

    /// How long since the last file/command operation
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_activity_at).to_std().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Directory,
}

/// Entry returned by directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxFile {
    /// Path relative to the sandbox working root
    pub path: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Result of a command executed inside a sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    /// Exit code reported for commands abandoned at their deadline
    pub const TIMEOUT_EXIT_CODE: i32 = 124;

    pub fn from_output(exit_code: i32, stdout: &[u8], stderr: &[u8]) -> Self {
        Self {
            success: exit_code == 0,
            stdout: String::from_utf8_lossy(stdout).into_owned(),
            stderr: String::from_utf8_lossy(stderr).into_owned(),
            exit_code,
        }
    }

    pub fn timed_out(timeout: Duration) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: format!("Command timed out after {}ms", timeout.as_millis()),
            exit_code: Self::TIMEOUT_EXIT_CODE,
        }
    }

    /// Result for a background command that was dispatched successfully
    pub fn dispatched() -> Self {
        Self {
            success: true,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
        }
    }
}

/// Options for `run_command`
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Return once dispatched instead of awaiting completion
    pub background: bool,
    /// Foreground deadline; capped by the configured ceiling
    pub timeout: Option<Duration>,
}

impl RunOptions {
    pub fn background() -> Self {
        Self {
            background: true,
            timeout: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            background: false,
            timeout: Some(timeout),
        }
    }
}

/// Outcome of a sandbox-side media fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadResult {
    pub fn ok(size: Option<u64>) -> Self {
        Self {
            success: true,
            size,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            size: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_parsing() {
        assert_eq!("remotion".parse::<Template>().unwrap(), Template::Remotion);
        assert_eq!(
            "Motion-Canvas".parse::<Template>().unwrap(),
            Template::MotionCanvas
        );
        assert!(matches!(
            "blender".parse::<Template>(),
            Err(SandboxError::UnsupportedTemplate(_))
        ));
    }

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("docker".parse::<BackendKind>().unwrap(), BackendKind::Local);
        assert_eq!(" CLOUD ".parse::<BackendKind>().unwrap(), BackendKind::Cloud);
        assert!("k8s".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_endpoint_hidden_after_destroy() {
        let mut instance = SandboxInstance::new("sbx-1", "proj-1", Template::Remotion, "c");
        assert_eq!(instance.endpoint(), None);

        instance.port = Some(4100);
        assert_eq!(instance.endpoint().as_deref(), Some("http://127.0.0.1:4100"));

        instance.status = SandboxStatus::Destroyed;
        assert_eq!(instance.endpoint(), None);
    }

    #[test]
    fn test_instance_serialization_hides_handle() {
        let mut instance = SandboxInstance::new("sbx-1", "proj-1", Template::Manim, "secret-handle");
        instance.proxy_base_url = Some("https://8000-abc.e2b.app".to_string());
        let json = serde_json::to_value(&instance).unwrap();

        assert_eq!(json["projectId"], "proj-1");
        assert_eq!(json["template"], "manim");
        assert_eq!(json["status"], "creating");
        assert!(json.get("handle").is_none());
        assert!(json.get("port").is_none());
    }

    #[test]
    fn test_command_result_shapes() {
        let ok = CommandResult::from_output(0, b"hi\n", b"");
        assert!(ok.success);
        assert_eq!(ok.stdout, "hi\n");

        let failed = CommandResult::from_output(2, b"", b"boom");
        assert!(!failed.success);
        assert_eq!(failed.exit_code, 2);

        let timed_out = CommandResult::timed_out(Duration::from_millis(100));
        assert!(!timed_out.success);
        assert_eq!(timed_out.exit_code, CommandResult::TIMEOUT_EXIT_CODE);
        assert!(timed_out.stderr.contains("100ms"));
    }
}
