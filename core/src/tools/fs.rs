use std::path::{Component, Path, PathBuf};

use tracing::info;

use crate::errors::{OpgError, Result};
use crate::tools::{ToolInvocation, arg_str, arg_str_opt};

/// Executes one whitelisted filesystem operation inside the sandbox.
///
/// Every path is normalized (resolving `..` and symlinks) and verified to be
/// a descendant of the sandbox root before any content I/O happens; a path
/// that escapes fails with `SandboxViolation` without touching the file.
pub fn execute(invocation: &ToolInvocation, sandbox_root: &Path) -> Result<String> {
    match invocation.operation.as_str() {
        "read_file" => {
            let path = arg_str(&invocation.arguments, "path")?;
            let resolved = resolve_existing(sandbox_root, &path)?;
            info!(path = %resolved.display(), "tool read_file");
            std::fs::read_to_string(&resolved)
                .map_err(|e| OpgError::Tool(format!("failed to read {path}: {e}")))
        }
        "list_directory" => {
            let path = arg_str_opt(&invocation.arguments, "path", ".");
            let resolved = resolve_existing(sandbox_root, &path)?;
            info!(path = %resolved.display(), "tool list_directory");
            let entries = std::fs::read_dir(&resolved)
                .map_err(|e| OpgError::Tool(format!("failed to list {path}: {e}")))?;
            let mut names = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| OpgError::Tool(e.to_string()))?;
                let mut name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    name.push('/');
                }
                names.push(name);
            }
            names.sort();
            Ok(names.join("\n"))
        }
        "write_file" => {
            let path = arg_str(&invocation.arguments, "path")?;
            let content = arg_str(&invocation.arguments, "content")?;
            let resolved = resolve_for_write(sandbox_root, &path)?;
            info!(path = %resolved.display(), bytes = content.len(), "tool write_file");
            std::fs::write(&resolved, content)
                .map_err(|e| OpgError::Tool(format!("failed to write {path}: {e}")))?;
            Ok(format!("wrote {path}"))
        }
        other => Err(OpgError::Tool(format!("unsupported operation: {other}"))),
    }
}

fn canonical_root(sandbox_root: &Path) -> Result<PathBuf> {
    sandbox_root.canonicalize().map_err(|e| {
        OpgError::Tool(format!(
            "sandbox root {} is not accessible: {e}",
            sandbox_root.display()
        ))
    })
}

/// Resolves a path that must already exist, rejecting sandbox escapes.
fn resolve_existing(sandbox_root: &Path, path: &str) -> Result<PathBuf> {
    let root = canonical_root(sandbox_root)?;
    let candidate = join_candidate(&root, path);
    // Lexical check first, so an escape whose target does not even exist is
    // still classified as a violation rather than a resolution failure.
    ensure_inside(&lexical_normalize(&candidate), &root, path)?;
    let resolved = candidate
        .canonicalize()
        .map_err(|e| OpgError::Tool(format!("cannot resolve {path}: {e}")))?;
    ensure_inside(&resolved, &root, path)?;
    Ok(resolved)
}

/// Resolves a path that may not exist yet: the parent directory must exist
/// and sit inside the sandbox; the file name is appended after the check.
/// A pre-existing final component is re-resolved so a symlink planted inside
/// the sandbox cannot redirect the write outside it.
fn resolve_for_write(sandbox_root: &Path, path: &str) -> Result<PathBuf> {
    let root = canonical_root(sandbox_root)?;
    let candidate = join_candidate(&root, path);
    ensure_inside(&lexical_normalize(&candidate), &root, path)?;
    let file_name = candidate
        .file_name()
        .ok_or_else(|| OpgError::Tool(format!("invalid target path: {path}")))?
        .to_owned();
    let parent = candidate.parent().unwrap_or(&root);
    let resolved_parent = parent
        .canonicalize()
        .map_err(|e| OpgError::Tool(format!("cannot resolve parent of {path}: {e}")))?;
    ensure_inside(&resolved_parent, &root, path)?;

    let target = resolved_parent.join(file_name);
    if target.symlink_metadata().is_ok() {
        // Writing through a symlink lands at its target, including a broken
        // link whose target would be created by the write.
        let resolved = target
            .canonicalize()
            .map_err(|e| OpgError::Tool(format!("cannot resolve {path}: {e}")))?;
        ensure_inside(&resolved, &root, path)?;
        return Ok(resolved);
    }
    Ok(target)
}

/// Normalizes `.` and `..` components without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

fn join_candidate(root: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

fn ensure_inside(resolved: &Path, root: &Path, original: &str) -> Result<()> {
    if resolved.starts_with(root) {
        Ok(())
    } else {
        Err(OpgError::SandboxViolation(format!(
            "{original} resolves outside the sandbox root"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn invocation(op: &str, args: serde_json::Value) -> ToolInvocation {
        ToolInvocation {
            operation: op.into(),
            arguments: args,
            span: 0..0,
        }
    }

    #[test]
    fn read_inside_sandbox() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "hello").unwrap();

        let out = execute(
            &invocation("read_file", json!({"path": "notes.txt"})),
            tmp.path(),
        )
        .unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn parent_traversal_is_a_sandbox_violation() {
        let tmp = TempDir::new().unwrap();
        let err = execute(
            &invocation("read_file", json!({"path": "../../etc/passwd"})),
            tmp.path(),
        )
        .unwrap_err();
        assert!(matches!(err, OpgError::SandboxViolation(_)));
    }

    #[test]
    fn absolute_escape_is_a_sandbox_violation() {
        let tmp = TempDir::new().unwrap();
        let err = execute(
            &invocation("read_file", json!({"path": "/etc/hostname"})),
            tmp.path(),
        )
        .unwrap_err();
        assert!(matches!(err, OpgError::SandboxViolation(_)));
    }

    #[test]
    fn write_escape_performs_no_io() {
        let tmp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("escaped.txt");

        let err = execute(
            &invocation(
                "write_file",
                json!({"path": target.to_str().unwrap(), "content": "x"}),
            ),
            tmp.path(),
        )
        .unwrap_err();
        assert!(matches!(err, OpgError::SandboxViolation(_)));
        assert!(!target.exists());
    }

    #[cfg(unix)]
    #[test]
    fn write_through_symlink_cannot_leave_sandbox() {
        let tmp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let victim = outside.path().join("victim.txt");
        std::fs::write(&victim, "untouched").unwrap();
        std::os::unix::fs::symlink(&victim, tmp.path().join("link.txt")).unwrap();

        let err = execute(
            &invocation(
                "write_file",
                json!({"path": "link.txt", "content": "overwritten"}),
            ),
            tmp.path(),
        )
        .unwrap_err();
        assert!(matches!(err, OpgError::SandboxViolation(_)));
        assert_eq!(std::fs::read_to_string(&victim).unwrap(), "untouched");
    }

    #[cfg(unix)]
    #[test]
    fn symlink_inside_sandbox_is_followed() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("real.txt"), "old").unwrap();
        std::os::unix::fs::symlink(tmp.path().join("real.txt"), tmp.path().join("alias.txt"))
            .unwrap();

        execute(
            &invocation("write_file", json!({"path": "alias.txt", "content": "new"})),
            tmp.path(),
        )
        .unwrap();
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("real.txt")).unwrap(),
            "new"
        );
    }

    #[test]
    fn escape_to_missing_target_is_still_a_violation() {
        let tmp = TempDir::new().unwrap();
        let err = execute(
            &invocation(
                "read_file",
                json!({"path": "../no-such-dir/missing.txt"}),
            ),
            tmp.path(),
        )
        .unwrap_err();
        assert!(matches!(err, OpgError::SandboxViolation(_)));
    }

    #[test]
    fn write_then_list() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();

        execute(
            &invocation(
                "write_file",
                json!({"path": "sub/out.txt", "content": "data"}),
            ),
            tmp.path(),
        )
        .unwrap();

        let listing = execute(
            &invocation("list_directory", json!({"path": "sub"})),
            tmp.path(),
        )
        .unwrap();
        assert_eq!(listing, "out.txt");

        let root_listing = execute(&invocation("list_directory", json!({})), tmp.path()).unwrap();
        assert_eq!(root_listing, "sub/");
    }

    #[test]
    fn unsupported_operation_is_a_tool_error() {
        let tmp = TempDir::new().unwrap();
        let err = execute(
            &invocation("delete_everything", json!({"path": "."})),
            tmp.path(),
        )
        .unwrap_err();
        assert!(matches!(err, OpgError::Tool(_)));
    }
}
