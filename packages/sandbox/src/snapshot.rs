// ABOUTME: In-process inspection of gzip-compressed tar snapshots
// ABOUTME: Rejects corrupt or unsafe archives before they are unpacked into a sandbox

use flate2::read::GzDecoder;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};

use crate::error::{Result, SandboxError};

/// Summary of a snapshot archive's contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotManifest {
    pub entries: usize,
    /// Sum of regular file sizes, uncompressed
    pub total_bytes: u64,
    /// First path component of every entry, sorted
    pub top_level: Vec<String>,
}

/// Walk every entry of `bytes` and validate it
///
/// An archive with no entries is valid (a project with no source yet); a zero
/// length byte string is not, since gzip always emits a header.
pub fn inspect_snapshot(bytes: &[u8]) -> Result<SnapshotManifest> {
    if bytes.is_empty() {
        return Err(SandboxError::InvalidSnapshot(
            "archive is empty".to_string(),
        ));
    }

    let mut archive = Archive::new(GzDecoder::new(bytes));
    let entries = archive
        .entries()
        .map_err(|e| SandboxError::InvalidSnapshot(format!("unreadable archive: {}", e)))?;

    let mut manifest = SnapshotManifest::default();
    let mut top_level = BTreeSet::new();
    let mut files: HashSet<PathBuf> = HashSet::new();

    for entry in entries {
        let entry =
            entry.map_err(|e| SandboxError::InvalidSnapshot(format!("corrupt entry: {}", e)))?;
        let path = entry
            .path()
            .map_err(|e| SandboxError::InvalidSnapshot(format!("bad entry path: {}", e)))?
            .into_owned();

        let depth = checked_depth(&path)?;
        if depth == 0 {
            continue;
        }

        match entry.header().entry_type() {
            // GNU tar emits these for files sharing an inode; the target is
            // archive-relative and always precedes the link
            EntryType::Link => {
                let target = entry
                    .link_name()
                    .map_err(|e| SandboxError::InvalidSnapshot(e.to_string()))?
                    .map(|t| t.into_owned())
                    .unwrap_or_default();
                if checked_depth(&target)? == 0 || !files.contains(&normalise(&target)) {
                    return Err(SandboxError::InvalidSnapshot(format!(
                        "hard link {} points outside the archive: {}",
                        path.display(),
                        target.display()
                    )));
                }
            }
            EntryType::Symlink => {
                let target = entry
                    .link_name()
                    .map_err(|e| SandboxError::InvalidSnapshot(e.to_string()))?
                    .ok_or_else(|| {
                        SandboxError::InvalidSnapshot(format!(
                            "symlink without target: {}",
                            path.display()
                        ))
                    })?;
                check_symlink(&path, &target)?;
            }
            EntryType::Regular | EntryType::Continuous => {
                manifest.total_bytes += entry.size();
                files.insert(normalise(&path));
            }
            _ => {}
        }

        if let Some(Component::Normal(first)) = path
            .components()
            .find(|c| !matches!(c, Component::CurDir))
        {
            top_level.insert(first.to_string_lossy().into_owned());
        }
        manifest.entries += 1;
    }

    manifest.top_level = top_level.into_iter().collect();
    Ok(manifest)
}

/// Depth of a relative entry path, rejecting absolute and traversing paths
fn checked_depth(path: &Path) -> Result<usize> {
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(SandboxError::InvalidSnapshot(format!(
                    "entry escapes archive root: {}",
                    path.display()
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(SandboxError::InvalidSnapshot(format!(
                    "absolute entry path: {}",
                    path.display()
                )));
            }
        }
    }
    Ok(depth)
}

/// `./src/a` and `src/a` name the same entry
fn normalise(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

/// Symlink targets must resolve inside the archive root
fn check_symlink(path: &Path, target: &Path) -> Result<()> {
    if target.is_absolute() {
        return Err(SandboxError::InvalidSnapshot(format!(
            "symlink {} points to absolute path {}",
            path.display(),
            target.display()
        )));
    }

    // Start from the link's parent directory
    let mut depth = path
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count() as isize
        - 1;

    for component in target.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return Err(SandboxError::InvalidSnapshot(format!(
                        "symlink {} escapes archive root",
                        path.display()
                    )));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tar::{Builder, Header};

    fn archive(build: impl FnOnce(&mut Builder<GzEncoder<Vec<u8>>>)) -> Vec<u8> {
        let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        build(&mut builder);
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn add_file(builder: &mut Builder<GzEncoder<Vec<u8>>>, path: &str, data: &[u8]) {
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, data).unwrap();
    }

    fn add_link(
        builder: &mut Builder<GzEncoder<Vec<u8>>>,
        kind: EntryType,
        path: &str,
        target: &str,
    ) {
        let mut header = Header::new_gnu();
        header.set_entry_type(kind);
        header.set_size(0);
        builder.append_link(&mut header, path, target).unwrap();
    }

    #[test]
    fn test_manifest_of_valid_archive() {
        let bytes = archive(|b| {
            add_file(b, "src/App.tsx", b"export const App = () => null;\n");
            add_file(b, "src/index.ts", b"import './App';\n");
            add_file(b, "public/logo.png", &[0u8; 64]);
        });

        let manifest = inspect_snapshot(&bytes).unwrap();
        assert_eq!(manifest.entries, 3);
        assert_eq!(manifest.top_level, vec!["public", "src"]);
        assert_eq!(manifest.total_bytes, 31 + 16 + 64);
    }

    #[test]
    fn test_empty_archive_is_valid_but_empty_bytes_are_not() {
        let bytes = archive(|_| {});
        assert_eq!(inspect_snapshot(&bytes).unwrap().entries, 0);
        assert!(inspect_snapshot(&[]).is_err());
    }

    #[test]
    fn test_corrupt_bytes_rejected() {
        let err = inspect_snapshot(b"definitely not gzip").unwrap_err();
        assert!(matches!(err, SandboxError::InvalidSnapshot(_)));
    }

    #[test]
    fn test_inner_symlink_allowed() {
        let bytes = archive(|b| {
            add_file(b, "src/a.ts", b"a");
            add_link(b, EntryType::Symlink, "src/b.ts", "a.ts");
            add_link(b, EntryType::Symlink, "src/deep/c.ts", "../a.ts");
        });
        assert!(inspect_snapshot(&bytes).is_ok());
    }

    #[test]
    fn test_escaping_symlinks_rejected() {
        let absolute = archive(|b| add_link(b, EntryType::Symlink, "src/passwd", "/etc/passwd"));
        assert!(inspect_snapshot(&absolute).is_err());

        let relative = archive(|b| add_link(b, EntryType::Symlink, "src/up", "../../etc"));
        assert!(inspect_snapshot(&relative).is_err());
    }

    #[test]
    fn test_hard_link_to_earlier_entry_allowed() {
        let bytes = archive(|b| {
            add_file(b, "public/a.png", &[7u8; 32]);
            add_link(b, EntryType::Link, "public/b.png", "public/a.png");
        });
        let manifest = inspect_snapshot(&bytes).unwrap();
        assert_eq!(manifest.entries, 2);
        assert_eq!(manifest.total_bytes, 32);
    }

    #[test]
    fn test_hard_links_outside_archive_rejected() {
        let absolute = archive(|b| add_link(b, EntryType::Link, "src/shadow", "/etc/shadow"));
        assert!(inspect_snapshot(&absolute).is_err());

        let traversing = archive(|b| add_link(b, EntryType::Link, "src/x", "../outside"));
        assert!(inspect_snapshot(&traversing).is_err());

        let dangling = archive(|b| add_link(b, EntryType::Link, "src/b.ts", "src/missing.ts"));
        assert!(inspect_snapshot(&dangling).is_err());
    }

    #[test]
    fn test_checked_depth() {
        assert_eq!(checked_depth(Path::new("./src/a")).unwrap(), 2);
        assert_eq!(checked_depth(Path::new(".")).unwrap(), 0);
        assert!(checked_depth(Path::new("/etc/passwd")).is_err());
        assert!(checked_depth(Path::new("src/../../x")).is_err());
    }
}
