// ABOUTME: Error types for sandbox orchestration
// ABOUTME: Covers provisioning, not-found, unhealthy units, invalid input and transport failures

use thiserror::Error;

/// Suffix appended to every error that means the sandbox is gone for good.
pub const RECREATE_HINT: &str = "Create a new sandbox to continue.";

/// Main error type for sandbox operations
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Could not provision a compute unit
    #[error("Sandbox provisioning failed: {0}")]
    Provisioning(String),

    /// Every port in the configured range is taken
    #[error(
        "No free sandbox ports in range {start}-{end}. Destroy idle sandboxes or widen REELBOX_PORT_RANGE_START/END."
    )]
    PortsExhausted { start: u16, end: u16 },

    /// Template name not recognised at all
    #[error("Unsupported template: {0}")]
    UnsupportedTemplate(String),

    /// Template known, but the active backend has no image for it
    #[error("Template '{template}' has no {backend} image configured. Set {hint} to enable it.")]
    TemplateNotConfigured {
        template: String,
        backend: String,
        hint: String,
    },

    /// Backend daemon or API is unreachable
    #[error("Sandbox backend unavailable: {0}")]
    Unavailable(String),

    /// No live unit and nothing recoverable
    #[error("Sandbox {0} not found. Create a new sandbox to continue.")]
    NotFound(String),

    /// Unit existed but was stopped/crashed and remediation failed
    #[error("Sandbox {id} is not running ({reason}) and could not be restarted. Create a new sandbox to continue.")]
    Unhealthy { id: String, reason: String },

    /// Path rejected by the safety guard
    #[error("Invalid sandbox path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Malformed caller input other than paths
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Requested file does not exist inside the sandbox
    #[error("File not found in sandbox: {0}")]
    FileNotFound(String),

    /// Snapshot archive is corrupt or unsafe to unpack
    #[error("Invalid snapshot archive: {0}")]
    InvalidSnapshot(String),

    /// Container runtime returned an unexpected failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// Remote sandbox API returned an error status
    #[error("Cloud API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SandboxError {
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True when the caller should recreate the sandbox
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Unhealthy { .. })
    }

    /// True for failures raised while creating a sandbox
    pub fn is_provisioning(&self) -> bool {
        matches!(
            self,
            Self::Provisioning(_)
                | Self::PortsExhausted { .. }
                | Self::UnsupportedTemplate(_)
                | Self::TemplateNotConfigured { .. }
                | Self::Unavailable(_)
        )
    }
}

/// Type alias for Results that return SandboxError
pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_carries_hint() {
        let err = SandboxError::NotFound("sbx-1".to_string());
        assert_eq!(
            err.to_string(),
            "Sandbox sbx-1 not found. Create a new sandbox to continue."
        );
        assert!(err.is_not_found());
        assert!(!err.is_provisioning());
    }

    #[test]
    fn test_unhealthy_counts_as_not_found() {
        let err = SandboxError::Unhealthy {
            id: "sbx-2".to_string(),
            reason: "exited".to_string(),
        };
        assert!(err.is_not_found());
        assert!(err.to_string().contains(RECREATE_HINT));
        assert!(err.to_string().contains("exited"));
    }

    #[test]
    fn test_provisioning_classification() {
        assert!(SandboxError::PortsExhausted { start: 1, end: 2 }.is_provisioning());
        assert!(SandboxError::UnsupportedTemplate("x".into()).is_provisioning());
        assert!(!SandboxError::FileNotFound("a".into()).is_provisioning());
    }
}
