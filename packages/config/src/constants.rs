// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Reelbox

// Backend Selection
pub const REELBOX_SANDBOX_BACKEND: &str = "REELBOX_SANDBOX_BACKEND";
pub const SANDBOX_BACKEND: &str = "SANDBOX_BACKEND"; // Legacy

// Local Container Backend
pub const REELBOX_DOCKER_BIN: &str = "REELBOX_DOCKER_BIN";
pub const REELBOX_DOCKER_NETWORK: &str = "REELBOX_DOCKER_NETWORK";
pub const REELBOX_SANDBOX_MEMORY: &str = "REELBOX_SANDBOX_MEMORY";
pub const REELBOX_SANDBOX_MEMORY_SWAP: &str = "REELBOX_SANDBOX_MEMORY_SWAP";
pub const REELBOX_SANDBOX_CPUS: &str = "REELBOX_SANDBOX_CPUS";
pub const REELBOX_SANDBOX_PIDS_LIMIT: &str = "REELBOX_SANDBOX_PIDS_LIMIT";

/// Prefix for per-template local images, e.g. `REELBOX_LOCAL_IMAGE_REMOTION`
pub const REELBOX_LOCAL_IMAGE_PREFIX: &str = "REELBOX_LOCAL_IMAGE_";

// Port Pool
pub const REELBOX_PORT_RANGE_START: &str = "REELBOX_PORT_RANGE_START";
pub const REELBOX_PORT_RANGE_END: &str = "REELBOX_PORT_RANGE_END";

// Cloud Sandbox Backend
pub const REELBOX_CLOUD_API_URL: &str = "REELBOX_CLOUD_API_URL";
pub const REELBOX_CLOUD_API_KEY: &str = "REELBOX_CLOUD_API_KEY";
pub const E2B_API_KEY: &str = "E2B_API_KEY"; // Fallback
pub const REELBOX_CLOUD_DOMAIN: &str = "REELBOX_CLOUD_DOMAIN";
pub const REELBOX_CLOUD_SANDBOX_LIFETIME_SECS: &str = "REELBOX_CLOUD_SANDBOX_LIFETIME_SECS";

/// Prefix for per-template remote template ids, e.g. `REELBOX_CLOUD_TEMPLATE_MANIM`
pub const REELBOX_CLOUD_TEMPLATE_PREFIX: &str = "REELBOX_CLOUD_TEMPLATE_";

// Idle Reaper
pub const REELBOX_IDLE_TIMEOUT_SECS: &str = "REELBOX_IDLE_TIMEOUT_SECS";
pub const REELBOX_REAPER_INTERVAL_SECS: &str = "REELBOX_REAPER_INTERVAL_SECS";

// Command Execution
pub const REELBOX_COMMAND_TIMEOUT_MS: &str = "REELBOX_COMMAND_TIMEOUT_MS";
pub const REELBOX_COMMAND_TIMEOUT_MAX_MS: &str = "REELBOX_COMMAND_TIMEOUT_MAX_MS";

// Logging
pub const RUST_LOG: &str = "RUST_LOG";
