// ABOUTME: Selects and builds the sandbox backend from settings
// ABOUTME: Holds the process-wide provider so every caller shares one registry and port pool

use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::info;

use reelbox_config::constants::{REELBOX_SANDBOX_BACKEND, SANDBOX_BACKEND};
use reelbox_config::env::env_string_or_alias;

use crate::error::Result;
use crate::providers::{CloudProvider, DockerProvider, SandboxProvider};
use crate::reaper::{IdleReaper, ReaperHandle};
use crate::settings::SandboxSettings;
use crate::types::BackendKind;

static PROVIDER: OnceCell<Arc<dyn SandboxProvider>> = OnceCell::new();
static REAPER: OnceCell<ReaperHandle> = OnceCell::new();

/// Build a fresh provider for `settings.backend`
pub fn create_provider(settings: &SandboxSettings) -> Result<Arc<dyn SandboxProvider>> {
    settings.validate()?;

    let provider: Arc<dyn SandboxProvider> = match settings.backend {
        BackendKind::Local => Arc::new(DockerProvider::new(settings)),
        BackendKind::Cloud => Arc::new(CloudProvider::new(settings)?),
    };

    info!(backend = %settings.backend, "Sandbox provider initialised");
    Ok(provider)
}

/// Process-wide provider, built from the environment on first use
pub fn sandbox_provider() -> Result<Arc<dyn SandboxProvider>> {
    PROVIDER
        .get_or_try_init(|| {
            let settings = SandboxSettings::from_env()?;
            create_provider(&settings)
        })
        .cloned()
}

/// Install a provider ahead of first use; false if one is already in place
pub fn install_provider(provider: Arc<dyn SandboxProvider>) -> bool {
    PROVIDER.set(provider).is_ok()
}

/// Start the idle reaper over the process-wide provider; false if it is already running.
/// Must be called from inside a tokio runtime.
pub fn start_idle_reaper() -> Result<bool> {
    if REAPER.get().is_some() {
        return Ok(false);
    }
    let provider = sandbox_provider()?;
    let settings = SandboxSettings::from_env()?;

    let mut started = false;
    REAPER.get_or_init(|| {
        started = true;
        IdleReaper::from_settings(provider, &settings.lifecycle).spawn()
    });
    Ok(started)
}

/// Backend in use, or the one the environment selects if nothing is built yet
pub fn backend_kind() -> BackendKind {
    if let Some(provider) = PROVIDER.get() {
        return provider.kind();
    }
    env_string_or_alias(REELBOX_SANDBOX_BACKEND, SANDBOX_BACKEND)
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(BackendKind::Local)
}

pub fn is_cloud_backend() -> bool {
    backend_kind() == BackendKind::Cloud
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SandboxError;

    #[tokio::test]
    async fn test_local_backend_by_default() {
        let provider = create_provider(&SandboxSettings::default()).unwrap();
        assert_eq!(provider.kind(), BackendKind::Local);
    }

    #[tokio::test]
    async fn test_cloud_backend_needs_key() {
        let mut settings = SandboxSettings::default();
        settings.backend = BackendKind::Cloud;
        assert!(matches!(
            create_provider(&settings),
            Err(SandboxError::Config(_))
        ));

        settings.cloud.api_key = Some("key".to_string());
        let provider = create_provider(&settings).unwrap();
        assert_eq!(provider.kind(), BackendKind::Cloud);
    }

    #[tokio::test]
    async fn test_idle_reaper_starts_once() {
        let _ = install_provider(create_provider(&SandboxSettings::default()).unwrap());

        assert!(start_idle_reaper().unwrap());
        assert!(!start_idle_reaper().unwrap());
        assert!(REAPER.get().is_some_and(ReaperHandle::is_running));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut settings = SandboxSettings::default();
        settings.local.port_range_start = 5000;
        settings.local.port_range_end = 4000;
        assert!(create_provider(&settings).is_err());
    }
}
