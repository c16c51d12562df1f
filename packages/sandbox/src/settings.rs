// ABOUTME: Typed sandbox settings assembled from environment variables
// ABOUTME: Backend selection, per-template images, resource ceilings, lifecycle and timeout knobs

use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

use reelbox_config::constants::*;
use reelbox_config::env::{env_checked, env_or, env_string, env_string_or_alias};

use crate::error::{Result, SandboxError};
use crate::types::{BackendKind, Template};

pub const DEFAULT_PORT_RANGE_START: u16 = 4100;
pub const DEFAULT_PORT_RANGE_END: u16 = 4199;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30 * 60;
pub const DEFAULT_REAPER_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_COMMAND_TIMEOUT_MAX_MS: u64 = 5 * 60_000;
pub const DEFAULT_CLOUD_API_URL: &str = "https://api.e2b.dev";
pub const DEFAULT_CLOUD_DOMAIN: &str = "e2b.app";
pub const DEFAULT_CLOUD_LIFETIME_SECS: u64 = 4 * 60 * 60;
pub const DEFAULT_NETWORK: &str = "reelbox-sandboxes";

#[derive(Debug, Clone, Serialize)]
pub struct SandboxSettings {
    pub backend: BackendKind,
    pub local: LocalSettings,
    pub cloud: CloudSettings,
    pub lifecycle: LifecycleSettings,
    pub commands: CommandSettings,
}

/// Local container backend
#[derive(Debug, Clone, Serialize)]
pub struct LocalSettings {
    pub docker_bin: String,
    pub network: String,
    pub memory: String,
    pub memory_swap: String,
    pub cpus: String,
    pub pids_limit: u32,
    pub port_range_start: u16,
    pub port_range_end: u16,
    pub images: HashMap<Template, String>,
}

#[derive(Clone, Serialize)]
pub struct CloudSettings {
    pub api_url: String,
    #[serde(skip)]
    pub api_key: Option<String>,
    pub domain: String,
    pub sandbox_lifetime: Duration,
    /// Templates without an entry are unsupported on this backend
    pub templates: HashMap<Template, String>,
}

impl std::fmt::Debug for CloudSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudSettings")
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("domain", &self.domain)
            .field("sandbox_lifetime", &self.sandbox_lifetime)
            .field("templates", &self.templates)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LifecycleSettings {
    pub idle_timeout: Duration,
    pub reaper_interval: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandSettings {
    pub default_timeout: Duration,
    pub max_timeout: Duration,
}

impl CommandSettings {
    /// Requested timeout, or the default, capped at the ceiling
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.default_timeout)
            .min(self.max_timeout)
    }
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            local: LocalSettings::default(),
            cloud: CloudSettings::default(),
            lifecycle: LifecycleSettings {
                idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
                reaper_interval: Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECS),
            },
            commands: CommandSettings {
                default_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
                max_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MAX_MS),
            },
        }
    }
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            network: DEFAULT_NETWORK.to_string(),
            memory: "2g".to_string(),
            memory_swap: "2g".to_string(),
            cpus: "2".to_string(),
            pids_limit: 512,
            port_range_start: DEFAULT_PORT_RANGE_START,
            port_range_end: DEFAULT_PORT_RANGE_END,
            images: Template::ALL
                .iter()
                .map(|t| (*t, default_local_image(*t)))
                .collect(),
        }
    }
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_CLOUD_API_URL.to_string(),
            api_key: None,
            domain: DEFAULT_CLOUD_DOMAIN.to_string(),
            sandbox_lifetime: Duration::from_secs(DEFAULT_CLOUD_LIFETIME_SECS),
            templates: HashMap::new(),
        }
    }
}

fn default_local_image(template: Template) -> String {
    format!("reelbox/sandbox-{}:latest", template.as_str())
}

impl SandboxSettings {
    /// Build settings from the process environment
    ///
    /// Unparseable numeric values fall back to defaults with a warning; an
    /// unknown backend name is an error.
    pub fn from_env() -> Result<Self> {
        let backend = match env_string_or_alias(REELBOX_SANDBOX_BACKEND, SANDBOX_BACKEND) {
            Some(raw) => raw.parse::<BackendKind>()?,
            None => BackendKind::Local,
        };

        let defaults = LocalSettings::default();
        let local = LocalSettings {
            docker_bin: env_string(REELBOX_DOCKER_BIN).unwrap_or(defaults.docker_bin),
            network: env_string(REELBOX_DOCKER_NETWORK).unwrap_or(defaults.network),
            memory: env_string(REELBOX_SANDBOX_MEMORY).unwrap_or(defaults.memory),
            memory_swap: env_string(REELBOX_SANDBOX_MEMORY_SWAP)
                .unwrap_or(defaults.memory_swap),
            cpus: env_string(REELBOX_SANDBOX_CPUS).unwrap_or(defaults.cpus),
            pids_limit: env_checked(
                REELBOX_SANDBOX_PIDS_LIMIT,
                defaults.pids_limit,
                |v| *v > 0,
            ),
            port_range_start: env_checked(
                REELBOX_PORT_RANGE_START,
                DEFAULT_PORT_RANGE_START,
                |v| *v >= 1024,
            ),
            port_range_end: env_checked(
                REELBOX_PORT_RANGE_END,
                DEFAULT_PORT_RANGE_END,
                |v| *v >= 1024,
            ),
            images: Template::ALL
                .iter()
                .map(|t| {
                    let var = format!("{}{}", REELBOX_LOCAL_IMAGE_PREFIX, t.env_suffix());
                    (*t, env_string(&var).unwrap_or_else(|| default_local_image(*t)))
                })
                .collect(),
        };

        let cloud = CloudSettings {
            api_url: env_string(REELBOX_CLOUD_API_URL)
                .unwrap_or_else(|| DEFAULT_CLOUD_API_URL.to_string()),
            api_key: env_string_or_alias(REELBOX_CLOUD_API_KEY, E2B_API_KEY),
            domain: env_string(REELBOX_CLOUD_DOMAIN)
                .unwrap_or_else(|| DEFAULT_CLOUD_DOMAIN.to_string()),
            sandbox_lifetime: Duration::from_secs(env_checked(
                REELBOX_CLOUD_SANDBOX_LIFETIME_SECS,
                DEFAULT_CLOUD_LIFETIME_SECS,
                |v| *v > 0,
            )),
            templates: Template::ALL
                .iter()
                .filter_map(|t| {
                    let var = format!("{}{}", REELBOX_CLOUD_TEMPLATE_PREFIX, t.env_suffix());
                    env_string(&var).map(|id| (*t, id))
                })
                .collect(),
        };

        let lifecycle = LifecycleSettings {
            idle_timeout: Duration::from_secs(env_checked(
                REELBOX_IDLE_TIMEOUT_SECS,
                DEFAULT_IDLE_TIMEOUT_SECS,
                |v| *v > 0,
            )),
            reaper_interval: Duration::from_secs(env_checked(
                REELBOX_REAPER_INTERVAL_SECS,
                DEFAULT_REAPER_INTERVAL_SECS,
                |v| *v > 0,
            )),
        };

        let commands = CommandSettings {
            default_timeout: Duration::from_millis(env_or(
                REELBOX_COMMAND_TIMEOUT_MS,
                DEFAULT_COMMAND_TIMEOUT_MS,
            )),
            max_timeout: Duration::from_millis(env_or(
                REELBOX_COMMAND_TIMEOUT_MAX_MS,
                DEFAULT_COMMAND_TIMEOUT_MAX_MS,
            )),
        };

        let settings = Self {
            backend,
            local,
            cloud,
            lifecycle,
            commands,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.local.port_range_start > self.local.port_range_end {
            return Err(SandboxError::Config(format!(
                "Port range is inverted: {} > {} (check {} and {})",
                self.local.port_range_start,
                self.local.port_range_end,
                REELBOX_PORT_RANGE_START,
                REELBOX_PORT_RANGE_END
            )));
        }

        if self.commands.default_timeout.is_zero() || self.commands.max_timeout.is_zero() {
            return Err(SandboxError::Config(
                "Command timeouts must be greater than zero".to_string(),
            ));
        }

        if self.commands.default_timeout > self.commands.max_timeout {
            return Err(SandboxError::Config(format!(
                "{} ({}ms) exceeds {} ({}ms)",
                REELBOX_COMMAND_TIMEOUT_MS,
                self.commands.default_timeout.as_millis(),
                REELBOX_COMMAND_TIMEOUT_MAX_MS,
                self.commands.max_timeout.as_millis()
            )));
        }

        if self.lifecycle.idle_timeout.is_zero() || self.lifecycle.reaper_interval.is_zero() {
            return Err(SandboxError::Config(
                "Idle timeout and reaper interval must be greater than zero".to_string(),
            ));
        }

        if self.backend == BackendKind::Cloud && self.cloud.api_key.is_none() {
            return Err(SandboxError::Config(format!(
                "Cloud backend selected but no API key is set. Set {} (or {}).",
                REELBOX_CLOUD_API_KEY, E2B_API_KEY
            )));
        }

        Ok(())
    }

    /// Name of the variable that configures `template` on the active backend
    pub fn template_env_var(&self, template: Template) -> String {
        let prefix = match self.backend {
            BackendKind::Local => REELBOX_LOCAL_IMAGE_PREFIX,
            BackendKind::Cloud => REELBOX_CLOUD_TEMPLATE_PREFIX,
        };
        format!("{}{}", prefix, template.env_suffix())
    }
}
