// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner tool selection.
//!
//! The orchestrator offers every runner archive it knows about; the provider
//! picks the one matching the instance it is about to boot. Archive metadata
//! uses the runner project's naming (`linux`/`win`, `x64`/`arm64`/`arm`).

use thiserror::Error;

use crate::params::{OsArch, OsType, RunnerApplicationDownload};

/// Tool selection errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolsError {
    /// The OS family has no runner archives.
    #[error("unsupported OS type: {0}")]
    UnsupportedOsType(OsType),

    /// The architecture has no runner archives.
    #[error("unsupported OS arch: {0:?}")]
    UnsupportedOsArch(String),

    /// None of the offered archives matches.
    #[error("failed to find tools for OS {os_type} and arch {os_arch}")]
    NotFound {
        /// Requested OS family.
        os_type: OsType,
        /// Requested architecture.
        os_arch: String,
    },
}

fn tool_os_name(os_type: OsType) -> Result<&'static str, ToolsError> {
    match os_type {
        OsType::Linux => Ok("linux"),
        OsType::Windows => Ok("win"),
        OsType::Unknown => Err(ToolsError::UnsupportedOsType(os_type)),
    }
}

fn tool_arch_name(os_arch: &OsArch) -> Result<&'static str, ToolsError> {
    match os_arch {
        OsArch::Amd64 | OsArch::Unspecified => Ok("x64"),
        OsArch::Arm64 => Ok("arm64"),
        OsArch::Arm => Ok("arm"),
        OsArch::Other(s) => Err(ToolsError::UnsupportedOsArch(s.clone())),
    }
}

/// Pick the archive matching `os_type`/`os_arch` from `tools`.
///
/// Entries with a missing OS or architecture are skipped.
pub fn select_tools(
    os_type: OsType,
    os_arch: &OsArch,
    tools: &[RunnerApplicationDownload],
) -> Result<RunnerApplicationDownload, ToolsError> {
    let want_os = tool_os_name(os_type)?;
    let want_arch = tool_arch_name(os_arch)?;

    tools
        .iter()
        .find(|tool| {
            matches!(
                (tool.os.as_deref(), tool.architecture.as_deref()),
                (Some(os), Some(arch)) if os == want_os && arch == want_arch
            )
        })
        .cloned()
        .ok_or_else(|| ToolsError::NotFound {
            os_type,
            os_arch: os_arch.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(os: &str, arch: &str) -> RunnerApplicationDownload {
        RunnerApplicationDownload {
            os: Some(os.to_string()),
            architecture: Some(arch.to_string()),
            download_url: Some(format!("https://example.com/{os}-{arch}.tgz")),
            filename: Some(format!("{os}-{arch}.tgz")),
            ..Default::default()
        }
    }

    #[test]
    fn test_select_tools_matches_os_and_arch() {
        let tools = vec![tool("linux", "x64"), tool("linux", "arm64"), tool("win", "x64")];

        let picked = select_tools(OsType::Linux, &OsArch::Arm64, &tools).unwrap();
        assert_eq!(picked.filename.as_deref(), Some("linux-arm64.tgz"));

        let picked = select_tools(OsType::Windows, &OsArch::Amd64, &tools).unwrap();
        assert_eq!(picked.filename.as_deref(), Some("win-x64.tgz"));
    }

    #[test]
    fn test_select_tools_skips_incomplete_entries() {
        let tools = vec![
            RunnerApplicationDownload {
                os: Some("linux".to_string()),
                ..Default::default()
            },
            tool("linux", "x64"),
        ];
        let picked = select_tools(OsType::Linux, &OsArch::Unspecified, &tools).unwrap();
        assert_eq!(picked.filename.as_deref(), Some("linux-x64.tgz"));
    }

    #[test]
    fn test_select_tools_not_found() {
        let tools = vec![tool("linux", "x64")];
        let err = select_tools(OsType::Linux, &OsArch::Arm, &tools).unwrap_err();
        assert!(err.to_string().contains("failed to find tools"));
    }

    #[test]
    fn test_select_tools_rejects_unknown_os() {
        let err = select_tools(OsType::Unknown, &OsArch::Amd64, &[]).unwrap_err();
        assert_eq!(err, ToolsError::UnsupportedOsType(OsType::Unknown));
    }
}
