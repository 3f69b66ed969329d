//! # cfgcheck-core
//!
//! Control plane for configuration-aware static analysis of C and C++
//! sources.
//!
//! This crate decides *what* gets analyzed and *which* diagnostics survive.
//! It includes:
//!
//! - [`ConfigurationEnumerator`] for choosing the macro states of a unit
//! - [`Checker`] trait for the analyzer driven once per (unit, configuration)
//! - [`AnalysisCache`] for reusing results of unchanged units
//! - [`SuppressionRegistry`] for the four suppression grammars
//! - [`Pipeline`] for orchestrating a run into a [`Report`]
//!
//! ## Example
//!
//! ```ignore
//! use cfgcheck_core::{Config, Pipeline};
//!
//! let config = Config::from_file("cfgcheck.toml".as_ref())?;
//! let pipeline = Pipeline::builder()
//!     .config(&config)
//!     .checker(MyChecker::new())
//!     .build()?;
//!
//! let report = pipeline.run(&files)?;
//! println!("{}", report.summary());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod checker;
mod config;
mod configuration;
mod pipeline;
mod template_guard;
mod types;
mod unit;
mod whole_program;

pub mod pattern;
pub mod preprocessor;
pub mod suppression;

/// Utility modules.
pub mod utils;

pub use cache::{AnalysisCache, CacheEntry, CacheError, CACHE_FORMAT_VERSION};
pub use checker::{
    version_tag, CheckLevel, Checker, CheckerBox, CheckerFailure, CheckerSettings, PassContext,
    UnitAnalysis, DEFAULT_MAX_IF_COUNT, INTERNAL_ERROR_ID,
};
pub use config::{AnalyzerConfig, Config, ConfigError, SuppressionsConfig};
pub use configuration::{
    Configuration, ConfigurationEnumerator, ConfigurationError, ConfigurationSignature,
    ForcedMacros, CONFIGURATION_ERROR_ID, DEFAULT_MAX_CONFIGS, FORCE_CONFIG_CEILING,
};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineError};
pub use suppression::{
    InlineIndex, SuppressionError, SuppressionRegistry, SuppressionRule, INVALID_SUPPRESSION_ID,
    UNMATCHED_SUPPRESSION_ID,
};
pub use template_guard::{
    Expansion, InstantiationId, TemplateExpansionGuard, DEFAULT_TEMPLATE_RECURSION,
    TEMPLATE_RECURSION_ID,
};
pub use types::{Finding, Location, Note, Report, Severity};
pub use unit::{discover, Dependency, DiscoverOptions, Fingerprint, SourceUnit, UnitError, UnitLoader};
pub use whole_program::{BarrierError, WholeProgramAccumulator, WholeProgramPartial};
