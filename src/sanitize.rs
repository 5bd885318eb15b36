use std::path::{Path, PathBuf};

use crate::error::{BundleError, Result};

/// Stand-in for a component that cleans down to nothing.
pub const PLACEHOLDER: &str = "_unnamed";

const DISALLOWED: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Clean one path component: disallowed and control characters become `_`,
/// whitespace and underscore runs collapse, and edge dots/underscores are
/// trimmed. A single leading dot of a hidden name survives.
pub fn clean_component(component: &str) -> String {
    let mut cleaned = String::with_capacity(component.len());
    for ch in component.chars() {
        let ch = if DISALLOWED.contains(&ch) || ch.is_control() {
            '_'
        } else if ch.is_whitespace() {
            ' '
        } else {
            ch
        };
        let repeated = match cleaned.chars().last() {
            Some(' ') => ch == ' ',
            Some('_') => ch == '_',
            _ => false,
        };
        if !repeated {
            cleaned.push(ch);
        }
    }

    let hidden = cleaned.starts_with('.');
    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c == '_' || c == ' ');
    if trimmed.is_empty() {
        PLACEHOLDER.to_string()
    } else if hidden {
        format!(".{trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// Turn an untrusted bundle path into a clean relative path. `.`, `..`, empty
/// components and any root or drive prefix are dropped.
pub fn relative_path(raw: &str) -> PathBuf {
    let normalized = raw.replace('\\', "/");
    let parts: PathBuf = normalized
        .split('/')
        .map(str::trim)
        .filter(|c| !c.is_empty() && *c != "." && *c != "..")
        .map(clean_component)
        .collect();
    if parts.as_os_str().is_empty() {
        PathBuf::from(PLACEHOLDER)
    } else {
        parts
    }
}

/// Canonicalize the deepest existing ancestor of `path` and re-append the
/// components below it, so symlinked directories are seen through.
fn resolve_existing_prefix(path: &Path) -> std::io::Result<PathBuf> {
    let mut existing = path;
    let mut rest = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }
    let mut resolved = existing.canonicalize()?;
    resolved.extend(rest.into_iter().rev());
    Ok(resolved)
}

/// Map a raw bundle path to a destination strictly below `root`.
///
/// The returned path has its parent directories resolved. The final component
/// is not followed, so a symlink sitting at the destination itself can be
/// unlinked by the writer instead of written through.
pub fn sanitize_path(root: &Path, raw: &str) -> Result<PathBuf> {
    let root_real = root
        .canonicalize()
        .map_err(|e| BundleError::io(root, e))?;
    let relative = relative_path(raw);
    let candidate = root_real.join(&relative);

    let resolved = match (candidate.parent(), candidate.file_name()) {
        (Some(parent), Some(name)) => resolve_existing_prefix(parent)
            .map_err(|e| BundleError::io(parent, e))?
            .join(name),
        _ => candidate.clone(),
    };

    if resolved == root_real || !resolved.starts_with(&root_real) {
        return Err(BundleError::PathSecurity {
            raw: raw.to_string(),
            resolved,
        });
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_component() {
        assert_eq!(clean_component("ok.txt"), "ok.txt");
        assert_eq!(clean_component("a<b>c"), "a_b_c");
        assert_eq!(clean_component("what??.md"), "what_.md");
        assert_eq!(clean_component("many   spaces\there"), "many spaces here");
        assert_eq!(clean_component("__init__.py"), "init_.py");
        assert_eq!(clean_component("trailing..."), "trailing");
        assert_eq!(clean_component(".gitignore"), ".gitignore");
        assert_eq!(clean_component("...."), PLACEHOLDER);
        assert_eq!(clean_component("***"), PLACEHOLDER);
    }

    #[test]
    fn test_relative_path_drops_traversal() {
        assert_eq!(relative_path("../../etc/passwd"), PathBuf::from("etc/passwd"));
        assert_eq!(relative_path("/etc/passwd"), PathBuf::from("etc/passwd"));
        assert_eq!(relative_path("a/../../b"), PathBuf::from("a/b"));
        assert_eq!(relative_path("a\\b\\.\\c.txt"), PathBuf::from("a/b/c.txt"));
        assert_eq!(relative_path("C:\\x.txt"), PathBuf::from("C/x.txt"));
        assert_eq!(relative_path("../.."), PathBuf::from(PLACEHOLDER));
    }

    #[test]
    fn test_sanitized_paths_stay_under_root() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();
        for raw in ["../../etc/passwd", "/etc/passwd", "a/../../b", "./x/y.txt"] {
            let out = sanitize_path(&root, raw).unwrap();
            assert!(out.starts_with(&root), "{raw} -> {}", out.display());
            assert_ne!(out, root);
        }
        assert_eq!(
            sanitize_path(&root, "../../etc/passwd").unwrap(),
            root.join("etc/passwd")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directory_escape_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("out");
        let outside = temp.path().join("outside");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

        let err = sanitize_path(&root, "link/evil.txt").unwrap_err();
        assert!(matches!(err, BundleError::PathSecurity { .. }));

        let err = sanitize_path(&root, "link/deeper/evil.txt").unwrap_err();
        assert!(matches!(err, BundleError::PathSecurity { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_inside_root_is_allowed() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();
        std::fs::create_dir_all(root.join("real")).unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("alias")).unwrap();

        let out = sanitize_path(&root, "alias/file.txt").unwrap();
        assert_eq!(out, root.join("real/file.txt"));
    }
}
