//! MCP protocol version table and negotiation.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Supported MCP protocol versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum McpVersion {
    /// Original protocol without streamable HTTP (introduced 2024-11-05)
    V2024_11_05,
    /// Protocol including streamable HTTP (introduced 2025-03-26)
    V2025_03_26,
    /// Protocol with structured _meta and elicitation (introduced 2025-06-18)
    V2025_06_18,
    /// Protocol with tasks and icons (introduced 2025-11-25)
    V2025_11_25,
}

/// Every version this implementation speaks, newest first
pub const SUPPORTED_PROTOCOL_VERSIONS: &[McpVersion] = &[
    McpVersion::V2025_11_25,
    McpVersion::V2025_06_18,
    McpVersion::V2025_03_26,
    McpVersion::V2024_11_05,
];

pub const LATEST_PROTOCOL_VERSION: McpVersion = McpVersion::V2025_11_25;

/// Assumed by HTTP servers when a request carries no `Mcp-Protocol-Version`
pub const DEFAULT_NEGOTIATED_PROTOCOL_VERSION: McpVersion = McpVersion::V2025_03_26;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported protocol version: {0}")]
pub struct VersionError(pub String);

impl McpVersion {
    pub fn parse_version(s: &str) -> Option<Self> {
        match s {
            "2024-11-05" => Some(McpVersion::V2024_11_05),
            "2025-03-26" => Some(McpVersion::V2025_03_26),
            "2025-06-18" => Some(McpVersion::V2025_06_18),
            "2025-11-25" => Some(McpVersion::V2025_11_25),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            McpVersion::V2024_11_05 => "2024-11-05",
            McpVersion::V2025_03_26 => "2025-03-26",
            McpVersion::V2025_06_18 => "2025-06-18",
            McpVersion::V2025_11_25 => "2025-11-25",
        }
    }

    pub fn is_supported(version: &str) -> bool {
        Self::parse_version(version).is_some()
    }

    /// Comma separated list used in rejection messages
    pub fn supported_list() -> String {
        SUPPORTED_PROTOCOL_VERSIONS
            .iter()
            .map(McpVersion::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Pick the version a server answers with: the requested one when it is
/// supported, the latest otherwise.
pub fn negotiate_version(requested: &str) -> McpVersion {
    McpVersion::parse_version(requested).unwrap_or(LATEST_PROTOCOL_VERSION)
}

impl fmt::Display for McpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for McpVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_version(s).ok_or_else(|| VersionError(s.to_string()))
    }
}

impl Serialize for McpVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for McpVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiation_echoes_supported_version() {
        assert_eq!(negotiate_version("2025-06-18"), McpVersion::V2025_06_18);
        assert_eq!(negotiate_version("2024-11-05"), McpVersion::V2024_11_05);
    }

    #[test]
    fn test_negotiation_falls_back_to_latest() {
        assert_eq!(negotiate_version("1999-01-01"), LATEST_PROTOCOL_VERSION);
        assert_eq!(negotiate_version(""), LATEST_PROTOCOL_VERSION);
    }

    #[test]
    fn test_supported_list_is_newest_first() {
        assert_eq!(
            McpVersion::supported_list(),
            "2025-11-25, 2025-06-18, 2025-03-26, 2024-11-05"
        );
    }
}
