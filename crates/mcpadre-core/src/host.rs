//! Host key enum (§6.1/§6.2): interface only. Host-config injection itself
//! (rewriting an editor's own config file to point at `mcpadre run <name>`)
//! is an external collaborator and stays out of scope; this type exists so
//! workspace config round-trips through a typed value instead of a bare
//! string.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKey {
    ClaudeCode,
    ClaudeDesktop,
    Cursor,
    Opencode,
    Zed,
    Vscode,
}

impl HostKey {
    pub const ALL: [HostKey; 6] = [
        HostKey::ClaudeCode,
        HostKey::ClaudeDesktop,
        HostKey::Cursor,
        HostKey::Opencode,
        HostKey::Zed,
        HostKey::Vscode,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HostKey::ClaudeCode => "claude-code",
            HostKey::ClaudeDesktop => "claude-desktop",
            HostKey::Cursor => "cursor",
            HostKey::Opencode => "opencode",
            HostKey::Zed => "zed",
            HostKey::Vscode => "vscode",
        }
    }

    /// Hosts that only make sense bound to a project workspace (editor
    /// workspace-scoped MCP config) versus ones with a user-level config
    /// path too. Per §6.1, user-mode config cannot enable project-only hosts.
    pub fn is_project_only(self) -> bool {
        matches!(self, HostKey::Vscode)
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown host key `{0}`")]
pub struct UnknownHostKey(pub String);

impl FromStr for HostKey {
    type Err = UnknownHostKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HostKey::ALL
            .into_iter()
            .find(|h| h.as_str() == s)
            .ok_or_else(|| UnknownHostKey(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_from_str() {
        for host in HostKey::ALL {
            let parsed: HostKey = host.to_string().parse().unwrap();
            assert_eq!(parsed, host);
        }
    }

    #[test]
    fn unknown_host_key_is_rejected() {
        assert!("not-a-host".parse::<HostKey>().is_err());
    }
}
