// ABOUTME: Runs the in-sandbox shell scripts against a scratch directory on the host
// ABOUTME: Exercises write, snapshot export/import, listing and fetch with real sh, tar and find

use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use reelbox_sandbox::command;
use reelbox_sandbox::providers::{ProcessOutput, ProcessRunner, TokioProcessRunner};
use reelbox_sandbox::{inspect_snapshot, FileType};

async fn run(argv: Vec<String>, stdin: Option<&[u8]>) -> ProcessOutput {
    let (program, args) = argv.split_first().unwrap();
    TokioProcessRunner.run(program, args, stdin).await.unwrap()
}

/// Snapshot and listing scripts rely on GNU tar and GNU find options
async fn gnu_tools() -> bool {
    let tar = run(command::shell("tar --version"), None).await;
    let find = run(command::shell("find . -maxdepth 0 -printf x"), None).await;
    let ok = tar.success() && tar.stdout_text().contains("GNU tar") && find.success();
    if !ok {
        eprintln!("GNU tar and find not available, skipping");
    }
    ok
}

fn text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn project(root: &Path) {
    fs::create_dir_all(root.join("src/scenes")).unwrap();
    fs::create_dir_all(root.join("public")).unwrap();
    fs::create_dir_all(root.join("node_modules/react")).unwrap();
    fs::write(root.join("src/App.tsx"), "export const App = () => null;\n").unwrap();
    fs::write(root.join("src/scenes/Intro.tsx"), "intro\n").unwrap();
    fs::write(root.join("public/logo.png"), [0x89u8, b'P', b'N', b'G', 0, 1, 2, 3]).unwrap();
    fs::hard_link(root.join("public/logo.png"), root.join("public/logo-copy.png")).unwrap();
    fs::write(root.join("node_modules/react/index.js"), "skip\n").unwrap();
}

#[tokio::test]
async fn test_write_script_creates_parents_and_keeps_bytes() {
    let root = tempfile::tempdir().unwrap();
    let dest = root.path().join("public/deep/clip.bin");
    let payload: Vec<u8> = (0..=255u8).collect();

    let output = run(command::write_file(&text(&dest)), Some(&payload)).await;
    assert!(output.success(), "{}", output.stderr_text());
    assert_eq!(fs::read(&dest).unwrap(), payload);
}

#[tokio::test]
async fn test_export_skips_missing_dirs_and_keeps_hard_links() {
    if !gnu_tools().await {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    project(root.path());
    let archive = scratch.path().join("snapshot.tar.gz");

    let dirs = ["src", "public", "media"].map(String::from);
    let output = run(
        command::export_snapshot(&text(&archive), &text(root.path()), &dirs),
        None,
    )
    .await;
    assert!(output.success(), "{}", output.stderr_text());

    let manifest = inspect_snapshot(&fs::read(&archive).unwrap()).unwrap();
    assert_eq!(manifest.top_level, vec!["public", "src"]);
    // Linked pair stored once: App.tsx + Intro.tsx + logo.png
    assert_eq!(manifest.total_bytes, 31 + 6 + 8);
}

#[tokio::test]
async fn test_export_with_nothing_to_pack_is_empty_archive() {
    if !gnu_tools().await {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let archive = scratch.path().join("empty.tar.gz");

    let output = run(
        command::export_snapshot(&text(&archive), &text(root.path()), &["media".to_string()]),
        None,
    )
    .await;
    assert!(output.success(), "{}", output.stderr_text());
    assert_eq!(inspect_snapshot(&fs::read(&archive).unwrap()).unwrap().entries, 0);
}

#[tokio::test]
async fn test_export_then_import_into_fresh_root() {
    if !gnu_tools().await {
        return;
    }
    let source = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    project(source.path());
    let archive = scratch.path().join("snapshot.tar.gz");

    let dirs = ["src", "public"].map(String::from);
    let exported = run(
        command::export_snapshot(&text(&archive), &text(source.path()), &dirs),
        None,
    )
    .await;
    assert!(exported.success(), "{}", exported.stderr_text());

    let restored_root = target.path().join("app");
    let imported = run(
        command::import_snapshot(&text(&archive), &text(&restored_root)),
        None,
    )
    .await;
    assert!(imported.success(), "{}", imported.stderr_text());

    assert_eq!(
        fs::read_to_string(restored_root.join("src/scenes/Intro.tsx")).unwrap(),
        "intro\n"
    );
    assert_eq!(
        fs::read(restored_root.join("public/logo-copy.png")).unwrap(),
        fs::read(source.path().join("public/logo.png")).unwrap()
    );
    assert!(!restored_root.join("node_modules").exists());
    assert!(!archive.exists());
}

#[tokio::test]
async fn test_import_of_garbage_fails_and_removes_archive() {
    let target = tempfile::tempdir().unwrap();
    let archive = target.path().join("upload.tar.gz");
    fs::write(&archive, b"not a tarball").unwrap();

    let output = run(
        command::import_snapshot(&text(&archive), &text(&target.path().join("app"))),
        None,
    )
    .await;
    assert!(!output.success());
    assert!(!archive.exists());
}

#[tokio::test]
async fn test_listing_handles_symlinked_dirs_and_odd_names() {
    if !gnu_tools().await {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let root_text = text(root.path());
    fs::create_dir_all(root.path().join("assets/fonts")).unwrap();
    fs::write(root.path().join("assets/fonts/Inter.ttf"), b"font").unwrap();
    fs::write(root.path().join("notes\nfinal.txt"), b"abc").unwrap();
    symlink(root.path().join("assets"), root.path().join("media")).unwrap();
    symlink(root.path().join("nowhere"), root.path().join("broken")).unwrap();

    let flat = run(command::list_files(&root_text, false), None).await;
    assert!(flat.success(), "{}", flat.stderr_text());
    let files = command::parse_listing(&flat.stdout_text(), &root_text);

    let kinds: Vec<(&str, FileType, Option<u64>)> = files
        .iter()
        .map(|f| (f.path.as_str(), f.file_type, f.size))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("assets", FileType::Directory, None),
            ("broken", FileType::File, None),
            ("media", FileType::Directory, None),
            ("notes\nfinal.txt", FileType::File, Some(3)),
        ]
    );

    let deep = run(command::list_files(&root_text, true), None).await;
    let files = command::parse_listing(&deep.stdout_text(), &root_text);
    assert!(files.iter().any(|f| f.path == "assets/fonts/Inter.ttf" && f.size == Some(4)));
    // find does not descend through symlinks
    assert!(!files.iter().any(|f| f.path.starts_with("media/")));
}

#[tokio::test]
async fn test_fetch_script_reports_size() {
    let curl = run(command::shell("command -v curl"), None).await;
    if !curl.success() {
        eprintln!("curl not available, skipping");
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let source = root.path().join("source.mp4");
    fs::write(&source, vec![7u8; 2048]).unwrap();
    let dest = root.path().join("public/media/clip.mp4");

    let url = format!("file://{}", text(&source));
    let output = run(command::fetch_url(&url, &text(&dest)), None).await;
    assert!(output.success(), "{}", output.stderr_text());
    assert_eq!(command::parse_fetched_size(&output.stdout_text()), Some(2048));
    assert_eq!(fs::metadata(&dest).unwrap().len(), 2048);

    let missing = format!("file://{}", text(&root.path().join("missing.mp4")));
    let failed = run(command::fetch_url(&missing, &text(&root.path().join("gone.mp4"))), None).await;
    assert!(!failed.success());
    assert!(!root.path().join("gone.mp4").exists());
}
