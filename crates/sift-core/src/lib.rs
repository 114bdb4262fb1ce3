//! Sift Core Library
//!
//! This crate provides the rule model, the rule index and the request
//! matcher for the sift content filter.
//!
//! # Architecture
//!
//! Filter lists are parsed (by `sift-compiler`) into immutable rules, which
//! are bucketed into a [`RuleIndex`] snapshot. Every request is matched
//! against one snapshot; candidates come from the signature-token buckets
//! for the URL, so the hot path never scans the full rule set.
//!
//! # Modules
//!
//! - `types`: Rule kinds, resource types, anchors, party constraints
//! - `rule`: Network and cosmetic rule model
//! - `url`: Fast URL helpers and tokenization without allocations
//! - `psl`: Registrable-domain extraction
//! - `index`: Token-bucketed rule index snapshot
//! - `request`: Request descriptor and decision
//! - `matcher`: Core request matching engine

pub mod index;
pub mod matcher;
pub mod psl;
pub mod request;
pub mod rule;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use index::RuleIndex;
pub use matcher::{decide, Matcher};
pub use psl::{is_third_party, registrable_domain};
pub use request::{Decision, RequestDescriptor};
pub use rule::{CosmeticRule, DomainRestriction, NetworkRule, Pattern, Rule};
pub use types::{AnchorFlags, PartyConstraint, ResourceType, RuleKind, SubscriptionId};
