//! Core analysis functionality
//!
//! This module contains the rule model and the evaluation engine.
//! It provides:
//!
//! - [`connection`]: Connection sets (protocol × port/ICMP intervals) and their algebra
//! - [`firewall`]: Endpoints, rules, categories and the category-ordered policy
//! - [`document`]: JSON policy documents and their validation
//! - [`category_eval`]: First-match evaluation of one category for one side
//! - [`aggregate`]: Cross-category evaluation with jump-to-application handling
//! - [`explanation`]: Per-rule attribution of a pair's verdict
//! - [`connectivity`]: The connectivity map and queries over it
//! - [`lint`]: Shadowed and ineffective rule detection
//! - [`analyzer`]: Entry points tying the above together
//! - [`diagnostics`]: Non-fatal findings reported during analysis
//! - [`error`]: Error types for loading and analysis

pub mod accumulator;
pub mod aggregate;
pub mod analyzer;
pub mod category_eval;
pub mod connection;
pub mod connectivity;
pub mod diagnostics;
pub mod document;
pub mod error;
pub mod explanation;
pub mod firewall;
pub mod lint;
pub mod traffic_set;

#[cfg(test)]
pub mod test_helpers;
