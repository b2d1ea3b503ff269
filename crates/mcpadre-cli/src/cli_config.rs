//! Config file discovery and parsing.
//!
//! Loading a `WorkspaceConfig` from disk is this binary's job, not
//! `mcpadre_core::config`'s: the core only consumes an already-validated
//! in-memory value. Grounded in `crates/codex/src/mcp/config.rs`'s
//! `McpConfigManager::load_table`, generalized from one fixed TOML path to
//! a two-format (`mcpadre.toml` / `mcpadre.json`) upward directory search.
//! YAML is not supported: no YAML crate is part of this workspace's
//! dependency stack.

use std::path::{Path, PathBuf};

use mcpadre_core::config::WorkspaceConfig;

use crate::errors::CliError;

const CANDIDATE_FILENAMES: [&str; 2] = ["mcpadre.toml", "mcpadre.json"];

/// Search `start`, then (if `walk_upward`) each ancestor directory in turn,
/// for one of the recognized config filenames.
pub fn find_project_config(start: &Path, walk_upward: bool) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        for candidate in CANDIDATE_FILENAMES {
            let path = dir.join(candidate);
            if path.is_file() {
                return Some(path);
            }
        }
        if !walk_upward {
            return None;
        }
        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => return None,
        }
    }
}

pub fn load_config_file(path: &Path) -> Result<WorkspaceConfig, CliError> {
    let contents = std::fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&contents).map_err(|source| CliError::ConfigParseToml {
            path: path.to_path_buf(),
            source,
        }),
        _ => serde_json::from_str(&contents).map_err(|source| CliError::ConfigParseJson {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_config_in_start_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mcpadre.toml"), "version = 1\n").unwrap();
        let found = find_project_config(dir.path(), false).unwrap();
        assert_eq!(found, dir.path().join("mcpadre.toml"));
    }

    #[test]
    fn walks_upward_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mcpadre.json"), "{}").unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        assert!(find_project_config(&nested, false).is_none());
        let found = find_project_config(&nested, true).unwrap();
        assert_eq!(found, dir.path().join("mcpadre.json"));
    }

    #[test]
    fn loads_json_and_toml_equivalently() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("mcpadre.json");
        std::fs::write(
            &json_path,
            r#"{"version":1,"mcpServers":{"s":{"type":"shell","command":"cat"}}}"#,
        )
        .unwrap();
        let from_json = load_config_file(&json_path).unwrap();

        let toml_path = dir.path().join("other").join("mcpadre.toml");
        std::fs::create_dir_all(toml_path.parent().unwrap()).unwrap();
        std::fs::write(
            &toml_path,
            "version = 1\n\n[mcpServers.s]\ntype = \"shell\"\ncommand = \"cat\"\n",
        )
        .unwrap();
        let from_toml = load_config_file(&toml_path).unwrap();

        assert_eq!(from_json, from_toml);
    }
}
