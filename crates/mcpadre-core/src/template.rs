//! Path & template resolver (§4.1): resolves `{{dirs.*}}` / `{{parentEnv.*}}`
//! placeholders in path and command templates to absolute paths.
//!
//! No direct precedent elsewhere in this codebase for `{{...}}` templating;
//! written from scratch but matching this crate's prevailing style (small
//! pure functions, a `thiserror` error type, colocated unit tests). Templates
//! are evaluated lazily at runner start and are never cached across
//! invocations — callers call [`resolve`] fresh every time they need a value.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// The two-level variable namespace templates may reference:
/// `{{dirs.home}}`, `{{parentEnv.PATH}}`, etc.
#[derive(Clone, Debug, Default)]
pub struct Variables {
    pub dirs: HashMap<String, PathBuf>,
    pub parent_env: HashMap<String, String>,
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unterminated `{{{{` placeholder in template `{template}`")]
    Unterminated { template: String },
    #[error("resolved path `{resolved}` is not absolute and no workspace root was given to make it so")]
    NotAbsolute { resolved: String },
}

/// Replace every `{{a.b}}` placeholder in `template` with its looked-up
/// value. Unknown variables (unknown namespace, or a known namespace missing
/// the requested key) resolve to the empty string — per spec this is not an
/// error.
pub fn resolve(template: &str, vars: &Variables) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' && bytes.get(i + 1) == Some(&b'{') {
            let Some(end) = template[i..].find("}}") else {
                return Err(TemplateError::Unterminated {
                    template: template.to_string(),
                });
            };
            let inner = &template[i + 2..i + end];
            out.push_str(&lookup(inner, vars));
            i += end + 2;
        } else {
            let ch = template[i..].chars().next().unwrap_or('\u{0}');
            out.push(ch);
            i += ch.len_utf8();
        }
    }
    Ok(out)
}

fn lookup(path_expr: &str, vars: &Variables) -> String {
    let mut parts = path_expr.splitn(2, '.');
    let namespace = parts.next().unwrap_or_default();
    let Some(key) = parts.next() else {
        return String::new();
    };

    match namespace {
        "dirs" => vars
            .dirs
            .get(key)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default(),
        "parentEnv" => vars.parent_env.get(key).cloned().unwrap_or_default(),
        _ => String::new(),
    }
}

/// Resolve `template` and interpret the result as a path: relative paths are
/// resolved against `workspace_root` so the result is always absolute,
/// matching §4.1's requirement that every path entering the finalized
/// sandbox set passes an absolute-path check.
pub fn resolve_path(
    template: &str,
    vars: &Variables,
    workspace_root: &Path,
) -> Result<PathBuf, TemplateError> {
    let resolved = resolve(template, vars)?;
    let path = PathBuf::from(&resolved);
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(workspace_root.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> Variables {
        Variables {
            dirs: [("workspace".to_string(), PathBuf::from("/ws"))]
                .into_iter()
                .collect(),
            parent_env: [("HOME".to_string(), "/home/x".to_string())]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn resolves_known_dir_and_env_vars() {
        let out = resolve("{{dirs.workspace}}/bin and {{parentEnv.HOME}}", &vars()).unwrap();
        assert_eq!(out, "/ws/bin and /home/x");
    }

    #[test]
    fn unknown_variable_resolves_to_empty_string() {
        let out = resolve("prefix-{{dirs.nope}}-{{parentEnv.NOPE}}-suffix", &vars()).unwrap();
        assert_eq!(out, "prefix--suffix");
    }

    #[test]
    fn unterminated_placeholder_is_an_error() {
        let err = resolve("{{dirs.workspace", &vars()).unwrap_err();
        assert!(matches!(err, TemplateError::Unterminated { .. }));
    }

    #[test]
    fn relative_path_resolves_against_workspace_root() {
        let resolved = resolve_path("sub/dir", &vars(), Path::new("/root/ws")).unwrap();
        assert_eq!(resolved, PathBuf::from("/root/ws/sub/dir"));
    }

    #[test]
    fn template_producing_absolute_path_is_used_verbatim() {
        let resolved = resolve_path("{{dirs.workspace}}/x", &vars(), Path::new("/other")).unwrap();
        assert_eq!(resolved, PathBuf::from("/ws/x"));
    }
}
