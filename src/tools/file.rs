//! File tools confined to a set of allowed directory roots.

use std::path::{Component, Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};
use tokio::io::AsyncWriteExt;

use crate::tools::{opt_bool, opt_str, req_str, Tool, ToolError, ToolResult};

/// Resolves user-supplied paths and rejects anything outside the roots.
#[derive(Debug, Clone)]
pub struct PathGuard {
    roots: Vec<PathBuf>,
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

impl PathGuard {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        let roots = roots.iter().map(|r| absolute(r)).collect();
        Self { roots }
    }

    fn allowed(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| path.starts_with(root))
    }

    /// Absolute path inside one of the roots, with every existing component
    /// resolved through symlinks. Paths that do not exist yet are checked
    /// via their deepest existing ancestor.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let denied = || ToolError::AccessDenied(format!("{raw} is outside allowed paths"));
        let path = absolute(Path::new(raw));
        if !self.allowed(&path) {
            return Err(denied());
        }
        let real = canonicalize_existing(&path).map_err(|_| denied())?;
        let real_roots: Vec<PathBuf> = self
            .roots
            .iter()
            .map(|r| std::fs::canonicalize(r).unwrap_or_else(|_| r.clone()))
            .collect();
        if !real_roots.iter().any(|root| real.starts_with(root)) {
            return Err(denied());
        }
        Ok(real)
    }
}

/// Canonicalize the deepest existing ancestor of `path` and re-attach the
/// components below it. A dangling symlink anywhere on the way is an error.
fn canonicalize_existing(path: &Path) -> std::io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut missing = Vec::new();
    loop {
        match std::fs::canonicalize(&existing) {
            Ok(mut real) => {
                real.extend(missing.iter().rev());
                return Ok(real);
            }
            Err(err) => {
                if std::fs::symlink_metadata(&existing).is_ok() {
                    return Err(err);
                }
                match (existing.file_name(), existing.parent()) {
                    (Some(name), Some(parent)) => {
                        missing.push(name.to_os_string());
                        existing = parent.to_path_buf();
                    }
                    _ => return Err(err),
                }
            }
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        normalize(&cwd.join(path))
    }
}

fn check_encoding(args: &Map<String, Value>) -> Result<(), ToolError> {
    match opt_str(args, "encoding")? {
        None => Ok(()),
        Some(enc) if enc.eq_ignore_ascii_case("utf-8") || enc.eq_ignore_ascii_case("utf8") => {
            Ok(())
        }
        Some(enc) => Err(ToolError::InvalidArgument(format!(
            "Unsupported encoding: {enc}"
        ))),
    }
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

pub struct FileReadTool {
    guard: PathGuard,
    max_bytes: u64,
}

impl FileReadTool {
    pub fn new(guard: PathGuard, max_bytes: u64) -> Self {
        Self { guard, max_bytes }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read contents of a file"
    }

    fn category(&self) -> &str {
        "file"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Path to the file to read"},
                "encoding": {"type": "string", "description": "File encoding", "default": "utf-8"}
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let raw = req_str(args, "file_path")?;
        check_encoding(args)?;
        let path = self.guard.resolve(raw)?;

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|_| ToolError::NotFound(format!("File not found: {raw}")))?;
        if !meta.is_file() {
            return Err(ToolError::InvalidArgument(format!("Not a file: {raw}")));
        }
        if meta.len() > self.max_bytes {
            return Err(ToolError::InvalidArgument(format!(
                "File too large: {:.2}MB > {:.2}MB",
                megabytes(meta.len()),
                megabytes(self.max_bytes)
            )));
        }

        let content = tokio::fs::read_to_string(&path).await?;
        Ok(ToolResult::success(Value::String(content))
            .with_meta("file_path", path.display().to_string())
            .with_meta("size_bytes", meta.len()))
    }
}

pub struct FileWriteTool {
    guard: PathGuard,
    max_bytes: u64,
}

impl FileWriteTool {
    pub fn new(guard: PathGuard, max_bytes: u64) -> Self {
        Self { guard, max_bytes }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write content to a file"
    }

    fn category(&self) -> &str {
        "file"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Path to the file to write"},
                "content": {"type": "string", "description": "Content to write to the file"},
                "mode": {
                    "type": "string",
                    "description": "Write mode: 'w' (overwrite), 'a' (append), 'x' (exclusive)",
                    "enum": ["w", "a", "x"],
                    "default": "w"
                },
                "encoding": {"type": "string", "description": "File encoding", "default": "utf-8"}
            },
            "required": ["file_path", "content"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let raw = req_str(args, "file_path")?;
        let content = req_str(args, "content")?;
        let mode = opt_str(args, "mode")?.unwrap_or("w");
        check_encoding(args)?;
        let path = self.guard.resolve(raw)?;

        let size = content.len() as u64;
        if size > self.max_bytes {
            return Err(ToolError::InvalidArgument(format!(
                "Content too large: {:.2}MB > {:.2}MB",
                megabytes(size),
                megabytes(self.max_bytes)
            )));
        }

        let mut options = tokio::fs::OpenOptions::new();
        match mode {
            "w" => options.write(true).create(true).truncate(true),
            "a" => options.append(true).create(true),
            "x" => options.write(true).create_new(true),
            other => {
                return Err(ToolError::InvalidArgument(format!(
                    "Invalid mode: {other}. Use 'w', 'a', or 'x'"
                )))
            }
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = options.open(&path).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        Ok(ToolResult::success(json!(format!(
            "Successfully wrote {} characters to {raw}",
            content.chars().count()
        )))
        .with_meta("file_path", path.display().to_string())
        .with_meta("size_bytes", size))
    }
}

/// Translate a shell glob (`*`, `?`, `[...]`) into an anchored regex over a
/// single file name.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, ToolError> {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            '[' => {
                re.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    re.push('^');
                }
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    if c == '\\' {
                        re.push('\\');
                    }
                    re.push(c);
                }
                re.push(']');
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| ToolError::InvalidArgument(format!("Invalid pattern: {e}")))
}

pub struct FileListTool {
    guard: PathGuard,
}

impl FileListTool {
    pub fn new(guard: PathGuard) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for FileListTool {
    fn name(&self) -> &str {
        "file_list"
    }

    fn description(&self) -> &str {
        "List files in a directory"
    }

    fn category(&self) -> &str {
        "file"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "directory": {"type": "string", "description": "Directory path to list files from"},
                "pattern": {
                    "type": "string",
                    "description": "File pattern to match (e.g., '*.py')",
                    "default": "*"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Search recursively in subdirectories",
                    "default": false
                }
            },
            "required": ["directory"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let raw = req_str(args, "directory")?;
        let matcher = glob_to_regex(opt_str(args, "pattern")?.unwrap_or("*"))?;
        let recursive = opt_bool(args, "recursive")?.unwrap_or(false);
        let root = self.guard.resolve(raw)?;

        let meta = tokio::fs::metadata(&root)
            .await
            .map_err(|_| ToolError::NotFound(format!("Directory not found: {raw}")))?;
        if !meta.is_dir() {
            return Err(ToolError::InvalidArgument(format!("Not a directory: {raw}")));
        }

        let mut files = Vec::new();
        let mut pending = vec![root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if recursive {
                        pending.push(entry.path());
                    }
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                if !matcher.is_match(&name) {
                    continue;
                }
                let meta = entry.metadata().await?;
                let modified = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs_f64());
                files.push(json!({
                    "path": entry.path().display().to_string(),
                    "name": name,
                    "size": meta.len(),
                    "modified": modified,
                }));
            }
        }
        files.sort_by(|a, b| a["path"].as_str().cmp(&b["path"].as_str()));

        let count = files.len();
        Ok(ToolResult::success(Value::Array(files))
            .with_meta("directory", root.display().to_string())
            .with_meta("count", count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_guard_rejects_escapes() {
        let dir = TempDir::new().unwrap();
        let guard = PathGuard::new(vec![dir.path().to_path_buf()]);
        let inside = dir.path().join("a.txt");
        assert!(guard.resolve(inside.to_str().unwrap()).is_ok());

        let escape = format!("{}/../../etc/passwd", dir.path().display());
        assert!(matches!(guard.resolve(&escape), Err(ToolError::AccessDenied(_))));
        assert!(guard.resolve("/etc/passwd").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_directory_cannot_escape_roots() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("out")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("ghost.txt"),
            dir.path().join("ghost.txt"),
        )
        .unwrap();

        let guard = PathGuard::new(vec![dir.path().to_path_buf()]);
        let writer = FileWriteTool::new(guard.clone(), 1024);

        // Not yet existing file below a symlinked directory.
        let target = dir.path().join("out/new/evil.txt");
        let err = writer
            .execute(&args(json!({"file_path": target.to_str().unwrap(), "content": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::AccessDenied(_)));
        assert!(!outside.path().join("new").exists());

        // Dangling symlink pointing outside.
        let ghost = dir.path().join("ghost.txt");
        assert!(matches!(
            guard.resolve(ghost.to_str().unwrap()),
            Err(ToolError::AccessDenied(_))
        ));
        assert!(!outside.path().join("ghost.txt").exists());

        // Plain new paths inside the root still resolve.
        let fresh = dir.path().join("a/b/c.txt");
        let resolved = guard.resolve(fresh.to_str().unwrap()).unwrap();
        assert!(resolved.ends_with("a/b/c.txt"));
    }

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("*.py").unwrap();
        assert!(re.is_match("main.py"));
        assert!(!re.is_match("main.pyc"));
        let re = glob_to_regex("log?.[0-9]").unwrap();
        assert!(re.is_match("log1.7"));
        assert!(!re.is_match("log1.x"));
        let re = glob_to_regex("[!a]*").unwrap();
        assert!(!re.is_match("abc"));
        assert!(re.is_match("bcd"));
    }

    #[tokio::test]
    async fn test_write_read_list_roundtrip() {
        let dir = TempDir::new().unwrap();
        let guard = PathGuard::new(vec![dir.path().to_path_buf()]);
        let writer = FileWriteTool::new(guard.clone(), 1024);
        let reader = FileReadTool::new(guard.clone(), 1024);
        let lister = FileListTool::new(guard);

        let path = dir.path().join("sub/notes.txt");
        let path_str = path.to_str().unwrap();

        let result = writer
            .execute(&args(json!({"file_path": path_str, "content": "안녕"})))
            .await
            .unwrap();
        assert_eq!(result.data, json!(format!("Successfully wrote 2 characters to {path_str}")));

        writer
            .execute(&args(json!({"file_path": path_str, "content": "!", "mode": "a"})))
            .await
            .unwrap();
        let read = reader
            .execute(&args(json!({"file_path": path_str})))
            .await
            .unwrap();
        assert_eq!(read.data, json!("안녕!"));

        let exclusive = writer
            .execute(&args(json!({"file_path": path_str, "content": "x", "mode": "x"})))
            .await;
        assert!(exclusive.is_err());

        let flat = lister
            .execute(&args(json!({"directory": dir.path().to_str().unwrap()})))
            .await
            .unwrap();
        assert_eq!(flat.metadata["count"], json!(0));

        let deep = lister
            .execute(&args(json!({
                "directory": dir.path().to_str().unwrap(),
                "pattern": "*.txt",
                "recursive": true
            })))
            .await
            .unwrap();
        assert_eq!(deep.metadata["count"], json!(1));
        assert_eq!(deep.data[0]["name"], "notes.txt");
    }

    #[tokio::test]
    async fn test_size_cap() {
        let dir = TempDir::new().unwrap();
        let guard = PathGuard::new(vec![dir.path().to_path_buf()]);
        let writer = FileWriteTool::new(guard, 4);
        let path = dir.path().join("big.txt");
        let err = writer
            .execute(&args(json!({"file_path": path.to_str().unwrap(), "content": "too long"})))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Content too large"));
    }
}
