//! Sift Filter List Compiler
//!
//! This crate parses ABP-style filter lists into rules and builds the
//! token-bucketed `RuleIndex` snapshot from any number of parsed lists.

pub mod builder;
pub mod optimizer;
pub mod parser;

pub use builder::{build_index, BuildStats};
pub use optimizer::{dedupe_cosmetics, optimize_rules, OptimizeStats};
pub use parser::{classify_line, parse_filter_list, parse_line, LineKind, ParseSkip, ParseStats, ParsedList};
