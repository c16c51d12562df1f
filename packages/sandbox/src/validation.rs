// ABOUTME: Validation utilities for sandbox operations
// ABOUTME: Rejects path traversal, null bytes and unsafe identifiers before any I/O happens

use crate::command::WORKDIR;
use crate::error::{Result, SandboxError};

const MAX_PATH_LEN: usize = 4096;
const MAX_ID_LEN: usize = 128;

/// Validates a sandbox-relative path and returns its normalised form
///
/// Accepts paths relative to the working root (`src/App.tsx`, `./public`) and
/// absolute paths inside it (`/app/src`). Rejects:
/// - empty paths
/// - null bytes and other control characters
/// - backslashes
/// - any `..` sequence
/// - absolute paths outside the working root
///
/// The root itself normalises to `"."`.
///
/// # Examples
///
/// ```
/// use reelbox_sandbox::validation::validate_sandbox_path;
///
/// assert_eq!(validate_sandbox_path("./src//App.tsx").unwrap(), "src/App.tsx");
/// assert!(validate_sandbox_path("../etc/passwd").is_err());
/// ```
pub fn validate_sandbox_path(path: &str) -> Result<String> {
    if path.is_empty() {
        return Err(SandboxError::invalid_path(path, "path cannot be empty"));
    }

    if path.len() > MAX_PATH_LEN {
        return Err(SandboxError::invalid_path(
            path.chars().take(64).collect::<String>(),
            "path is too long",
        ));
    }

    if path.contains('\0') {
        return Err(SandboxError::invalid_path(
            path.replace('\0', "\\0"),
            "contains null byte",
        ));
    }

    if path.chars().any(|c| c.is_control()) {
        return Err(SandboxError::invalid_path(
            path.escape_debug().to_string(),
            "contains control characters",
        ));
    }

    if path.contains('\\') {
        return Err(SandboxError::invalid_path(path, "contains backslash"));
    }

    // Stricter than component matching: `a..b` is refused as well
    if path.contains("..") {
        return Err(SandboxError::invalid_path(
            path,
            "contains path traversal sequence",
        ));
    }

    let relative = if let Some(rest) = path.strip_prefix('/') {
        let root = WORKDIR.trim_start_matches('/');
        if rest == root {
            ""
        } else if let Some(inner) = rest.strip_prefix(root).and_then(|r| r.strip_prefix('/')) {
            inner
        } else {
            return Err(SandboxError::invalid_path(
                path,
                format!("absolute paths must stay inside {}", WORKDIR),
            ));
        }
    } else {
        path
    };

    let parts: Vec<&str> = relative
        .split('/')
        .filter(|component| !component.is_empty() && *component != ".")
        .collect();

    if parts.is_empty() {
        Ok(".".to_string())
    } else {
        Ok(parts.join("/"))
    }
}

/// Validates a project ID for security
///
/// Project IDs end up in container labels and remote metadata, so they must
/// not carry separators, traversal sequences or control characters.
pub fn validate_project_id(project_id: &str) -> Result<()> {
    if project_id.is_empty() {
        return Err(SandboxError::InvalidRequest(
            "Project ID cannot be empty".to_string(),
        ));
    }

    if project_id.len() > MAX_ID_LEN {
        return Err(SandboxError::InvalidRequest(format!(
            "Project ID is longer than {} characters",
            MAX_ID_LEN
        )));
    }

    if project_id.contains("..") {
        return Err(SandboxError::InvalidRequest(format!(
            "Invalid project ID '{}': contains path traversal sequence",
            project_id
        )));
    }

    if project_id.contains('/') || project_id.contains('\\') {
        return Err(SandboxError::InvalidRequest(format!(
            "Invalid project ID '{}': contains path separator",
            project_id
        )));
    }

    // Covers null bytes and newlines (log injection)
    if project_id.chars().any(|c| c.is_control()) {
        return Err(SandboxError::InvalidRequest(format!(
            "Invalid project ID '{}': contains control characters",
            project_id.escape_debug()
        )));
    }

    Ok(())
}

/// Validates a sandbox ID before it is used to derive container names or metadata filters
pub fn validate_sandbox_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(SandboxError::InvalidRequest(format!(
            "Invalid sandbox ID '{}'",
            id.escape_debug()
        )));
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(SandboxError::InvalidRequest(format!(
            "Invalid sandbox ID '{}': only letters, digits, '-' and '_' are allowed",
            id.escape_debug()
        )));
    }

    Ok(())
}

/// Validates a remote media URL; only plain http(s) is fetched by sandboxes
pub fn validate_media_url(url: &str) -> Result<reqwest::Url> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| SandboxError::InvalidRequest(format!("Invalid media URL '{}': {}", url, e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(SandboxError::InvalidRequest(format!(
            "Invalid media URL '{}': only http and https are supported",
            url
        )));
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(SandboxError::InvalidRequest(format!(
            "Invalid media URL '{}': missing host",
            url
        )));
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_paths_are_normalised() {
        assert_eq!(validate_sandbox_path("src/App.tsx").unwrap(), "src/App.tsx");
        assert_eq!(validate_sandbox_path("./src//App.tsx").unwrap(), "src/App.tsx");
        assert_eq!(validate_sandbox_path("/app/public/a.mp4").unwrap(), "public/a.mp4");
        assert_eq!(validate_sandbox_path("/app").unwrap(), ".");
        assert_eq!(validate_sandbox_path(".").unwrap(), ".");
        assert_eq!(validate_sandbox_path("src/").unwrap(), "src");
        assert_eq!(validate_sandbox_path("my file.tsx").unwrap(), "my file.tsx");
    }

    #[test]
    fn test_empty_path() {
        assert!(validate_sandbox_path("").is_err());
    }

    #[test]
    fn test_path_traversal() {
        assert!(validate_sandbox_path("..").is_err());
        assert!(validate_sandbox_path("../etc").is_err());
        assert!(validate_sandbox_path("src/../../etc").is_err());
        assert!(validate_sandbox_path("/app/../etc/passwd").is_err());
    }

    #[test]
    fn test_any_double_dot_is_rejected() {
        assert!(validate_sandbox_path("src/..hidden").is_err());
        assert!(validate_sandbox_path("a..b").is_err());
        assert_eq!(validate_sandbox_path("src/.env").unwrap(), "src/.env");
    }

    #[test]
    fn test_absolute_outside_root() {
        assert!(validate_sandbox_path("/etc/passwd").is_err());
        assert!(validate_sandbox_path("/application/x").is_err());
    }

    #[test]
    fn test_null_bytes_and_controls() {
        assert!(validate_sandbox_path("src/App\0.tsx").is_err());
        assert!(validate_sandbox_path("\0").is_err());
        assert!(validate_sandbox_path("src/a\nb").is_err());
        assert!(validate_sandbox_path("src\\App.tsx").is_err());
    }

    #[test]
    fn test_project_ids() {
        assert!(validate_project_id("proj-1").is_ok());
        assert!(validate_project_id("").is_err());
        assert!(validate_project_id("../etc").is_err());
        assert!(validate_project_id("a/b").is_err());
        assert!(validate_project_id("test\0null").is_err());
        assert!(validate_project_id("test\nline").is_err());
    }

    #[test]
    fn test_sandbox_ids() {
        assert!(validate_sandbox_id("sbx-0123abcd").is_ok());
        assert!(validate_sandbox_id("sbx_1").is_ok());
        assert!(validate_sandbox_id("").is_err());
        assert!(validate_sandbox_id("sbx 1").is_err());
        assert!(validate_sandbox_id("sbx;rm").is_err());
        assert!(validate_sandbox_id("../x").is_err());
    }

    #[test]
    fn test_media_urls() {
        assert!(validate_media_url("https://cdn.example.com/a.mp4").is_ok());
        assert!(validate_media_url("http://10.0.0.2:9000/bucket/a.png").is_ok());
        assert!(validate_media_url("file:///etc/passwd").is_err());
        assert!(validate_media_url("ftp://example.com/a").is_err());
        assert!(validate_media_url("not a url").is_err());
    }
}
