// ABOUTME: Argument-vector builders for every command executed inside a sandbox
// ABOUTME: Paths travel as positional arguments to fixed scripts, never interpolated into shell text

use crate::types::{FileType, SandboxFile};

/// Working root inside every sandbox; caller paths are relative to it
pub const WORKDIR: &str = "/app";

/// Toolchain binaries are not guaranteed to be on PATH through container env inheritance
pub const PATH_SETUP: &str = "export PATH=\"/usr/local/bin:/usr/local/sbin:/usr/sbin:/usr/bin:/sbin:/bin:/app/node_modules/.bin:$HOME/.local/bin:$PATH\"";

/// `$1` = absolute destination; payload arrives on stdin
pub const WRITE_FILE_SCRIPT: &str = r#"mkdir -p "$(dirname "$1")" && cat > "$1""#;

/// `$1` = url, `$2` = absolute destination; prints the byte size on success
pub const FETCH_URL_SCRIPT: &str = r#"mkdir -p "$(dirname "$2")" || exit 1
if command -v curl >/dev/null 2>&1; then
  curl -fsSL --max-time 300 -o "$2" "$1"
elif command -v wget >/dev/null 2>&1; then
  wget -q -T 300 -O "$2" "$1"
else
  echo "neither curl nor wget is available in this sandbox" >&2
  exit 127
fi
rc=$?
if [ "$rc" -ne 0 ]; then rm -f "$2"; exit "$rc"; fi
wc -c < "$2""#;

/// `$1` = archive path, `$2` = root, `$3..` = directories relative to the root.
/// Missing directories are skipped; unreadable files do not fail the export.
pub const EXPORT_SNAPSHOT_SCRIPT: &str = r#"out="$1"; root="$2"; shift 2
cd "$root" || exit 1
n=$#
for p in "$@"; do
  if [ -e "$p" ]; then set -- "$@" "$p"; fi
done
shift "$n"
if [ $# -eq 0 ]; then
  tar -czf "$out" -T /dev/null
else
  tar -czf "$out" --ignore-failed-read "$@"
  rc=$?
  if [ "$rc" -gt 1 ]; then exit "$rc"; fi
fi
test -f "$out""#;

/// `$1` = archive path, `$2` = root; unpacks over the root then removes the archive
pub const IMPORT_SNAPSHOT_SCRIPT: &str = r#"mkdir -p "$2" && tar -xzf "$1" -C "$2" --no-same-owner
rc=$?
rm -f "$1"
exit "$rc""#;

/// `find -printf` format: type, link target type, size, full path. Records end
/// in NUL (find expands the `\0` escape) so names may contain newlines.
pub const LIST_FORMAT: &str = "%y\t%Y\t%s\t%p\\0";

pub fn shell(script: impl Into<String>) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.into()]
}

/// `sh -c <script> sh <args...>` so the script sees the arguments as `$1..`
pub fn shell_with_args<I, S>(script: impl Into<String>, args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut argv = shell(script);
    argv.push("sh".to_string());
    argv.extend(args.into_iter().map(Into::into));
    argv
}

/// Caller command run from the working root with the PATH prefix applied
pub fn user_command(command: &str) -> Vec<String> {
    shell(format!("{}; cd {} && {}", PATH_SETUP, WORKDIR, command))
}

/// Map a validated relative path into the working root
pub fn resolve(relative: &str) -> String {
    if relative == "." || relative.is_empty() {
        WORKDIR.to_string()
    } else {
        format!("{}/{}", WORKDIR, relative)
    }
}

pub fn write_file(absolute: &str) -> Vec<String> {
    shell_with_args(WRITE_FILE_SCRIPT, [absolute])
}

pub fn read_file(absolute: &str) -> Vec<String> {
    vec!["cat".to_string(), "--".to_string(), absolute.to_string()]
}

pub fn remove_file(absolute: &str) -> Vec<String> {
    vec![
        "rm".to_string(),
        "-f".to_string(),
        "--".to_string(),
        absolute.to_string(),
    ]
}

pub fn list_files(absolute: &str, recursive: bool) -> Vec<String> {
    let mut argv = vec![
        "find".to_string(),
        absolute.to_string(),
        "-mindepth".to_string(),
        "1".to_string(),
    ];
    if !recursive {
        argv.push("-maxdepth".to_string());
        argv.push("1".to_string());
    }
    argv.push("-printf".to_string());
    argv.push(LIST_FORMAT.to_string());
    argv
}

pub fn fetch_url(url: &str, absolute: &str) -> Vec<String> {
    shell_with_args(format!("{}\n{}", PATH_SETUP, FETCH_URL_SCRIPT), [url, absolute])
}

pub fn export_snapshot(archive: &str, root: &str, relative_dirs: &[String]) -> Vec<String> {
    let mut args = vec![archive.to_string(), root.to_string()];
    args.extend(relative_dirs.iter().cloned());
    shell_with_args(EXPORT_SNAPSHOT_SCRIPT, args)
}

pub fn import_snapshot(archive: &str, root: &str) -> Vec<String> {
    shell_with_args(IMPORT_SNAPSHOT_SCRIPT, [archive, root])
}

/// Scratch location for snapshot archives inside a sandbox
pub fn scratch_archive_path() -> String {
    format!("/tmp/reelbox-snapshot-{}.tar.gz", uuid::Uuid::new_v4().simple())
}

/// Quote an argv into one shell line for transports that only accept a string
pub fn to_shell_line(argv: &[String]) -> String {
    shell_words::join(argv)
}

/// Map `find -printf LIST_FORMAT` output to entries relative to `root`.
/// Symlinks to directories list as directories; other symlinks as sizeless files.
pub fn parse_listing(output: &str, root: &str) -> Vec<SandboxFile> {
    let root_prefix = format!("{}/", root.trim_end_matches('/'));
    let mut files: Vec<SandboxFile> = output
        .split('\0')
        .filter_map(|record| {
            let mut fields = record.splitn(4, '\t');
            let kind = fields.next()?;
            let target = fields.next()?;
            let size = fields.next()?;
            let full_path = fields.next()?;

            let relative = full_path.strip_prefix(&root_prefix)?;
            if relative.is_empty() {
                return None;
            }

            let (file_type, size) = match (kind, target) {
                ("d", _) | ("l", "d") => (FileType::Directory, None),
                ("f", _) => (FileType::File, size.parse::<u64>().ok()),
                ("l", _) => (FileType::File, None),
                _ => return None,
            };

            Some(SandboxFile {
                path: relative.to_string(),
                file_type,
                size,
            })
        })
        .collect();

    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

/// Last non-empty stdout line of the fetch script is the byte count
pub fn parse_fetched_size(stdout: &str) -> Option<u64> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_paths_are_positional_arguments() {
        let argv = write_file("/app/src/$(reboot).tsx");
        assert_eq!(argv[0], "sh");
        assert_eq!(argv[2], WRITE_FILE_SCRIPT);
        assert_eq!(argv[3], "sh");
        assert_eq!(argv[4], "/app/src/$(reboot).tsx");
        assert!(!argv[2].contains("reboot"));
    }

    #[test]
    fn test_user_command_prefix() {
        let argv = user_command("ls src");
        assert_eq!(argv.len(), 3);
        assert!(argv[2].starts_with(PATH_SETUP));
        assert!(argv[2].ends_with("cd /app && ls src"));
    }

    #[test]
    fn test_list_files_depth() {
        let flat = list_files("/app/src", false);
        assert!(flat.contains(&"-maxdepth".to_string()));

        let deep = list_files("/app/src", true);
        assert!(!deep.contains(&"-maxdepth".to_string()));
        assert_eq!(deep.last().map(String::as_str), Some(LIST_FORMAT));
    }

    #[test]
    fn test_resolve() {
        assert_eq!(resolve("."), "/app");
        assert_eq!(resolve("src/App.tsx"), "/app/src/App.tsx");
    }

    #[test]
    fn test_snapshot_args_carry_root() {
        let argv = export_snapshot("/tmp/a.tar.gz", WORKDIR, &["src".to_string(), "public".to_string()]);
        assert_eq!(&argv[3..], ["sh", "/tmp/a.tar.gz", "/app", "src", "public"]);

        let argv = import_snapshot("/tmp/a.tar.gz", WORKDIR);
        assert_eq!(&argv[3..], ["sh", "/tmp/a.tar.gz", "/app"]);
    }

    #[test]
    fn test_shell_line_quotes_arguments() {
        let line = to_shell_line(&read_file("/app/my file; rm -rf /"));
        assert_eq!(line, "cat -- '/app/my file; rm -rf /'");
    }

    #[test]
    fn test_parse_listing_relative_and_sorted() {
        let output = "d\td\t4096\t/app/src/components\0\
                      f\tf\t120\t/app/src/App.tsx\0\
                      l\tf\t9\t/app/src/link\0\
                      s\ts\t0\t/app/src/socket\0\
                      d\td\t4096\t/app\0\
                      garbage record\0";
        let files = parse_listing(output, WORKDIR);

        assert_eq!(
            files,
            vec![
                SandboxFile {
                    path: "src/App.tsx".to_string(),
                    file_type: FileType::File,
                    size: Some(120),
                },
                SandboxFile {
                    path: "src/components".to_string(),
                    file_type: FileType::Directory,
                    size: None,
                },
                SandboxFile {
                    path: "src/link".to_string(),
                    file_type: FileType::File,
                    size: None,
                },
            ]
        );
    }

    #[test]
    fn test_parse_listing_symlinked_dir_and_newline_name() {
        let output = "l\td\t11\t/app/assets\0f\tf\t3\t/app/notes\nfinal.txt\0l\tN\t7\t/app/broken\0";
        let files = parse_listing(output, WORKDIR);

        assert_eq!(files.len(), 3);
        assert_eq!(files[0].path, "assets");
        assert_eq!(files[0].file_type, FileType::Directory);
        assert_eq!(files[1].path, "broken");
        assert_eq!(files[1].file_type, FileType::File);
        assert_eq!(files[2].path, "notes\nfinal.txt");
        assert_eq!(files[2].size, Some(3));
    }

    #[test]
    fn test_parse_listing_other_root() {
        let output = "f\tf\t5\t/tmp/x/a.txt\0f\tf\t5\t/tmp/xy/b.txt\0";
        let files = parse_listing(output, "/tmp/x/");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "a.txt");
    }

    #[test]
    fn test_parse_fetched_size() {
        assert_eq!(parse_fetched_size("  2048\n"), Some(2048));
        assert_eq!(parse_fetched_size("noise\n512\n\n"), Some(512));
        assert_eq!(parse_fetched_size(""), None);
    }
}
