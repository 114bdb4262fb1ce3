//! Per-request descriptor and the decision returned for it.

use std::sync::Arc;

use crate::psl::is_third_party;
use crate::rule::NetworkRule;
use crate::types::ResourceType;
use crate::url::{extract_host, host_label_starts};

// =============================================================================
// Request Descriptor
// =============================================================================

/// Everything the matcher needs to know about one outgoing request.
///
/// Derived fields (lower-cased URL, hosts, third-party flag, host label
/// positions) are computed once at construction.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    url: String,
    url_lower: String,
    document_url: String,
    document_host: String,
    resource_type: ResourceType,
    third_party: bool,
    label_starts: Vec<usize>,
}

impl RequestDescriptor {
    /// Describe a request for `url` issued by the top-level document at
    /// `document_url` (empty when the request is itself a navigation).
    pub fn new(url: impl Into<String>, document_url: impl Into<String>, resource_type: ResourceType) -> Self {
        let url = url.into();
        let document_url = document_url.into();
        let url_lower = url.to_ascii_lowercase();

        let request_host = extract_host(&url_lower).unwrap_or("").trim_end_matches('.');
        let document_host = extract_host(&document_url)
            .map(|h| h.trim_end_matches('.').to_ascii_lowercase())
            .unwrap_or_default();

        let third_party = !document_host.is_empty()
            && !request_host.is_empty()
            && is_third_party(&document_host, request_host);
        let label_starts = host_label_starts(&url_lower);

        Self {
            url,
            url_lower,
            document_url,
            document_host,
            resource_type,
            third_party,
            label_starts,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn url_lower(&self) -> &str {
        &self.url_lower
    }

    pub fn document_url(&self) -> &str {
        &self.document_url
    }

    /// Lower-cased host of the top-level document, empty if unknown.
    pub fn document_host(&self) -> &str {
        &self.document_host
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn is_third_party(&self) -> bool {
        self.third_party
    }

    /// Byte offsets inside the URL where a `||` pattern may start.
    pub fn label_starts(&self) -> &[usize] {
        &self.label_starts
    }
}

// =============================================================================
// Decision
// =============================================================================

/// Final decision for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No block rule matched, or an exception rule matched first
    Allow,
    /// Blocked by the carried rule
    Block(Arc<NetworkRule>),
}

impl Decision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Block(_))
    }

    /// The rule responsible for a block.
    pub fn rule(&self) -> Option<&Arc<NetworkRule>> {
        match self {
            Self::Allow => None,
            Self::Block(rule) => Some(rule),
        }
    }
}
