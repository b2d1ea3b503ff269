//! Configuration contract consumed by the core (§3, §6.1).
//!
//! These are plain `serde`-derived data types; parsing YAML/JSON/TOML config
//! files into them is out of scope (an external collaborator's job per the
//! Non-goals) — the core only consumes an already-validated in-memory value.
//! Grounded in `crates/codex/src/mcp/config.rs`'s `McpServerDefinition`/
//! `McpTransport` tagged-enum shape, generalized from two transports
//! (`Stdio`/`StreamableHttp`) to mcpadre's five server kinds.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level validated workspace config, as produced by the (external) config
/// loader.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceConfig {
    pub version: u32,
    #[serde(rename = "mcpServers")]
    pub mcp_servers: BTreeMap<String, ServerRecord>,
    #[serde(default)]
    pub env: BTreeMap<String, EnvValue>,
    #[serde(default)]
    pub hosts: BTreeMap<String, bool>,
    #[serde(default)]
    pub options: WorkspaceOptions,
}

/// Workspace-wide options (§6.1).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceOptions {
    #[serde(default)]
    pub log_mcp_traffic: bool,
    #[serde(default)]
    pub install_implicitly_upgrades_changed_packages: bool,
    #[serde(default)]
    pub skip_gitignore_on_install: bool,
    #[serde(default)]
    pub disable_all_sandboxes: bool,
    #[serde(default)]
    pub extra_allow_read: Vec<String>,
    #[serde(default)]
    pub extra_allow_write: Vec<String>,
}

/// Sandbox options attached to a server record (before merge with workspace
/// options; see `crate::sandbox`).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SandboxOptions {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub networking: Option<bool>,
    #[serde(default)]
    pub omit_system_paths: Option<bool>,
    #[serde(default)]
    pub omit_workspace_path: Option<bool>,
    #[serde(default)]
    pub allow_read: Vec<String>,
    #[serde(default)]
    pub allow_read_write: Vec<String>,
}

/// A named container volume mount (container servers only).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub container_path: String,
    #[serde(default)]
    pub host_path: Option<String>,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub skip_gitignore: bool,
}

/// Fields shared by every server record variant.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerCommon {
    #[serde(default)]
    pub env: BTreeMap<String, EnvValue>,
    #[serde(default)]
    pub sandbox: SandboxOptions,
    #[serde(default)]
    pub log_mcp_traffic: Option<bool>,
    #[serde(default)]
    pub install_may_upgrade: Option<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShellServer {
    pub command: String,
    #[serde(default)]
    pub cwd: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PythonServer {
    pub package: String,
    pub version: String,
    #[serde(default)]
    pub python_version: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeServer {
    pub package: String,
    pub version: String,
    #[serde(default)]
    pub node_version: Option<String>,
    #[serde(default)]
    pub bin: Option<String>,
    #[serde(default)]
    pub args: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerServer {
    pub image: String,
    pub tag: String,
    #[serde(default)]
    pub pull_when_digest_changes: Option<bool>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeMount>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpServer {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, EnvValue>,
}

/// A server record: tagged variant over the five supported backend kinds,
/// plus the fields every variant shares.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerRecord {
    Shell {
        #[serde(flatten)]
        shell: ShellServer,
        #[serde(flatten)]
        common: ServerCommon,
    },
    Python {
        #[serde(flatten)]
        python: PythonServer,
        #[serde(flatten)]
        common: ServerCommon,
    },
    Node {
        #[serde(flatten)]
        node: NodeServer,
        #[serde(flatten)]
        common: ServerCommon,
    },
    Container {
        #[serde(flatten)]
        container: ContainerServer,
        #[serde(flatten)]
        common: ServerCommon,
    },
    Http {
        #[serde(flatten)]
        http: HttpServer,
        #[serde(flatten)]
        common: ServerCommon,
    },
}

impl ServerRecord {
    pub fn common(&self) -> &ServerCommon {
        match self {
            ServerRecord::Shell { common, .. }
            | ServerRecord::Python { common, .. }
            | ServerRecord::Node { common, .. }
            | ServerRecord::Container { common, .. }
            | ServerRecord::Http { common, .. } => common,
        }
    }

    pub fn kind(&self) -> crate::backend::BackendKind {
        match self {
            ServerRecord::Shell { .. } => crate::backend::BackendKind::Shell,
            ServerRecord::Python { .. } => crate::backend::BackendKind::Python,
            ServerRecord::Node { .. } => crate::backend::BackendKind::Node,
            ServerRecord::Container { .. } => crate::backend::BackendKind::Container,
            ServerRecord::Http { .. } => crate::backend::BackendKind::Http,
        }
    }
}

/// An env value recipe (§3): a sum type describing how to produce one env
/// var's string value.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum EnvValue {
    /// `{pass: NAME}` — copy `parentEnv[NAME]`; absent yields `""`.
    Pass { pass: String },
    /// `{special: K}` — the resolver's directory for `K`.
    Special { special: SpecialDir },
    /// `{command: SHELLCMD}` — stdout of a subcommand.
    Command { command: String },
    /// `{string: TEMPLATE}` — a template with `{{dirs.*}}`/`{{parentEnv.*}}`.
    StringTemplate { string: String },
    /// A bare literal template string.
    Literal(String),
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpecialDir {
    Home,
    Config,
    Cache,
    Data,
    Log,
    Temp,
    Workspace,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_value_untagged_variants_round_trip() {
        let literal: EnvValue = serde_json::from_str(r#""{{dirs.home}}/x""#).unwrap();
        assert_eq!(literal, EnvValue::Literal("{{dirs.home}}/x".to_string()));

        let pass: EnvValue = serde_json::from_str(r#"{"pass": "PATH"}"#).unwrap();
        assert_eq!(
            pass,
            EnvValue::Pass {
                pass: "PATH".to_string()
            }
        );

        let special: EnvValue = serde_json::from_str(r#"{"special": "workspace"}"#).unwrap();
        assert_eq!(
            special,
            EnvValue::Special {
                special: SpecialDir::Workspace
            }
        );
    }

    #[test]
    fn server_record_shell_decodes_shared_and_variant_fields() {
        let json = r#"{
            "type": "shell",
            "command": "cat",
            "logMcpTraffic": true
        }"#;
        let record: ServerRecord = serde_json::from_str(json).unwrap();
        match &record {
            ServerRecord::Shell { shell, common } => {
                assert_eq!(shell.command, "cat");
                assert_eq!(common.log_mcp_traffic, Some(true));
            }
            _ => panic!("expected shell variant"),
        }
        assert_eq!(record.kind(), crate::backend::BackendKind::Shell);
    }
}
