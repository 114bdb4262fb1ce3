//! Core type definitions shared by the parser, index and matcher.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// Rule Kind
// =============================================================================

/// What a network rule does when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Exception rule (@@...) - allows the request
    Allow,
    /// Block rule - cancels the request
    Block,
}

// =============================================================================
// Resource Types (bit mask for type filtering)
// =============================================================================

bitflags::bitflags! {
    /// Resource type bit mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceType: u16 {
        const DOCUMENT = 1 << 0;
        const SCRIPT = 1 << 1;
        const STYLESHEET = 1 << 2;
        const IMAGE = 1 << 3;
        const OBJECT = 1 << 4;
        const XMLHTTPREQUEST = 1 << 5;
        const SUBDOCUMENT = 1 << 6;  // iframe/frame
        const PING = 1 << 7;
        const OTHER = 1 << 8;

        /// All resource types
        const ALL = 0x01FF;
    }
}

/// Error returned when a resource type name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource type: {0}")]
pub struct UnknownResourceType(pub String);

impl ResourceType {
    /// Map a filter option name (`script`, `xhr`, ...) to its bit.
    pub fn from_option_name(name: &str) -> Option<Self> {
        match name {
            "document" | "main_frame" => Some(Self::DOCUMENT),
            "script" => Some(Self::SCRIPT),
            "stylesheet" => Some(Self::STYLESHEET),
            "image" => Some(Self::IMAGE),
            "object" | "object-subrequest" => Some(Self::OBJECT),
            "xmlhttprequest" | "xhr" => Some(Self::XMLHTTPREQUEST),
            "subdocument" | "sub_frame" => Some(Self::SUBDOCUMENT),
            "ping" | "beacon" => Some(Self::PING),
            "other" => Some(Self::OTHER),
            _ => None,
        }
    }

    /// Canonical name of a single-bit resource type.
    pub fn name(self) -> &'static str {
        const NAMES: [(ResourceType, &str); 8] = [
            (ResourceType::DOCUMENT, "document"),
            (ResourceType::SCRIPT, "script"),
            (ResourceType::STYLESHEET, "stylesheet"),
            (ResourceType::IMAGE, "image"),
            (ResourceType::OBJECT, "object"),
            (ResourceType::XMLHTTPREQUEST, "xmlhttprequest"),
            (ResourceType::SUBDOCUMENT, "subdocument"),
            (ResourceType::PING, "ping"),
        ];
        NAMES
            .iter()
            .find(|(ty, _)| *ty == self)
            .map(|(_, name)| *name)
            .unwrap_or("other")
    }
}

impl FromStr for ResourceType {
    type Err = UnknownResourceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_option_name(&s.to_ascii_lowercase()).ok_or_else(|| UnknownResourceType(s.to_string()))
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Anchor Flags
// =============================================================================

bitflags::bitflags! {
    /// Where a pattern is pinned inside the URL.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AnchorFlags: u8 {
        /// `|` prefix - pattern starts at the first byte of the URL
        const START_OF_URL = 1 << 0;
        /// `||` prefix - pattern starts at a host label boundary
        const DOMAIN_START = 1 << 1;
        /// `|` suffix - pattern ends at the last byte of the URL
        const END_OF_URL = 1 << 2;
    }
}

// =============================================================================
// Party Constraint
// =============================================================================

/// First-party / third-party restriction of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartyConstraint {
    #[default]
    Any,
    FirstPartyOnly,
    ThirdPartyOnly,
}

impl PartyConstraint {
    #[inline]
    pub fn allows(self, third_party: bool) -> bool {
        match self {
            Self::Any => true,
            Self::FirstPartyOnly => !third_party,
            Self::ThirdPartyOnly => third_party,
        }
    }
}

// =============================================================================
// Subscription Id
// =============================================================================

/// Identifier of the subscription a rule was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u32);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_type_names() {
        assert_eq!(ResourceType::from_option_name("xhr"), Some(ResourceType::XMLHTTPREQUEST));
        assert_eq!(ResourceType::from_option_name("websocket"), None);
        assert_eq!("Script".parse::<ResourceType>(), Ok(ResourceType::SCRIPT));
        assert!("font".parse::<ResourceType>().is_err());
        assert_eq!(ResourceType::IMAGE.to_string(), "image");
    }

    #[test]
    fn party_constraint() {
        assert!(PartyConstraint::Any.allows(true));
        assert!(PartyConstraint::FirstPartyOnly.allows(false));
        assert!(!PartyConstraint::FirstPartyOnly.allows(true));
        assert!(PartyConstraint::ThirdPartyOnly.allows(true));
        assert!(!PartyConstraint::ThirdPartyOnly.allows(false));
    }
}
