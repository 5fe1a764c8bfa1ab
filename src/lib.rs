//! DFW Analyzer - static analysis of distributed-firewall policies
//!
//! Computes, for every ordered pair of endpoints, which connections a
//! category-ordered, first-match-wins rule set permits and which rules are
//! responsible, and flags rules that can be deleted without changing anything.
//!
//! # Architecture
//!
//! - [`core`] - Rule model, evaluation engine, connectivity map and lint
//! - [`report`] - Text and JSON rendering of analysis results
//! - [`validators`] - Input validation and sanitization
//! - [`config`] - Configuration persistence
//! - [`utils`] - Utility functions (XDG directories, etc.)
//!
//! # Guarantees
//!
//! - Deterministic output: maps and reports iterate in endpoint-name order
//! - Side verdicts are disjoint and cover every connection
//! - Inputs are never mutated by analysis
//! - Non-fatal findings go through a pluggable diagnostics sink

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::needless_lifetimes)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod core;
pub mod report;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use crate::core::analyzer::Analyzer;
pub use crate::core::connection::ConnectionSet;
pub use crate::core::error::{Error, Result};
pub use crate::core::firewall::{Endpoint, FirewallPolicy, Rule};
