//! # cfgcheck-rules
//!
//! Built-in reference checker for cfgcheck.
//!
//! The control plane in `cfgcheck-core` drives any [`Checker`]; this crate
//! provides one that works on preprocessor directives alone, so a pipeline
//! can run end-to-end without a full symbolic analyzer.
//!
//! ## Findings
//!
//! | Identifier | Severity | Description |
//! |------------|----------|-------------|
//! | `preprocessorErrorDirective` | error | `#error` reachable under the configuration |
//! | `syntaxError` | error | Unbalanced conditionals or an unevaluable `#if` |
//! | `normalCheckLevelMaxBranches` | information | Conditional groups skipped past the if-count threshold |
//! | `unusedMacro` | style | Macro defined but never referenced in any analyzed unit |
//!
//! ## Usage
//!
//! ```ignore
//! use cfgcheck_core::Pipeline;
//! use cfgcheck_rules::DirectiveChecker;
//!
//! let pipeline = Pipeline::builder()
//!     .config(&config)
//!     .checker(DirectiveChecker::new())
//!     .build()?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod directives;
pub mod expr;

pub use directives::{
    DirectiveChecker, ERROR_DIRECTIVE_ID, MAX_BRANCHES_ID, SYNTAX_ERROR_ID, UNUSED_MACRO_ID,
};

/// Re-export core types for convenience.
pub use cfgcheck_core::{Checker, Finding, Severity};
