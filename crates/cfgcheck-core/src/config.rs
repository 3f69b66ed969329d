//! Configuration types for cfgcheck.

use crate::checker::{CheckLevel, CheckerSettings, DEFAULT_MAX_IF_COUNT};
use crate::configuration::{ConfigurationEnumerator, ConfigurationError, ForcedMacros};
use crate::suppression::SuppressionRegistry;
use crate::template_guard::DEFAULT_TEMPLATE_RECURSION;
use crate::types::Severity;
use crate::unit::DiscoverOptions;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for cfgcheck.
///
/// Relative paths are resolved against the working directory of the run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Lowest severity that fails the run (default: error).
    #[serde(default)]
    pub fail_on: Option<Severity>,

    /// Analyzer configuration.
    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    /// Suppression sources.
    #[serde(default)]
    pub suppressions: SuppressionsConfig,
}

impl Config {
    /// Creates a new default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Severity threshold for a failing exit status.
    #[must_use]
    pub fn fail_on(&self) -> Severity {
        self.fail_on.unwrap_or(Severity::Error)
    }

    /// Builds the configuration enumerator, returning malformed `-D`/`-U`
    /// values alongside it.
    #[must_use]
    pub fn enumerator(&self) -> (ConfigurationEnumerator, Vec<ConfigurationError>) {
        let (forced, errors) = ForcedMacros::parse(&self.analyzer.defines, &self.analyzer.undefines);
        (
            ConfigurationEnumerator::new(forced, self.analyzer.force, self.analyzer.max_configs),
            errors,
        )
    }

    /// Settings forwarded to the checker.
    #[must_use]
    pub fn checker_settings(&self) -> CheckerSettings {
        CheckerSettings {
            check_level: self.analyzer.check_level,
            max_if_count: self.analyzer.max_if_count,
            template_recursion: self.analyzer.template_recursion,
        }
    }

    /// Options for input discovery.
    #[must_use]
    pub fn discover_options(&self) -> DiscoverOptions {
        DiscoverOptions {
            extensions: self.analyzer.extensions.clone(),
            exclude: self.analyzer.exclude.clone(),
            respect_gitignore: self.analyzer.respect_gitignore,
        }
    }

    /// Parses every configured suppression source.
    ///
    /// Unreadable or malformed sources do not fail; they surface as
    /// diagnostics of the returned registry.
    #[must_use]
    pub fn suppression_registry(&self) -> SuppressionRegistry {
        let s = &self.suppressions;
        let builder = s
            .rules
            .iter()
            .fold(SuppressionRegistry::builder(), |b, rule| b.command_line(rule));
        let builder = s.files.iter().fold(builder, |b, path| b.plain_text_file(path));
        let builder = s.xml.iter().fold(builder, |b, path| b.xml_file(path));
        builder.inline(s.inline).report_unused(s.report_unused).build()
    }
}

/// Analyzer-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Patterns of unit paths to skip.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Extensions analyzed when walking directories.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Whether to respect .gitignore files.
    #[serde(default = "default_true")]
    pub respect_gitignore: bool,

    /// Directories searched for `#include` targets.
    #[serde(default)]
    pub include_paths: Vec<PathBuf>,

    /// Forced defines (`NAME` or `NAME=VALUE`, `;`-separated).
    #[serde(default)]
    pub defines: Vec<String>,

    /// Forced undefines.
    #[serde(default)]
    pub undefines: Vec<String>,

    /// Enumerate every configuration consistent with the forced macros.
    #[serde(default)]
    pub force: bool,

    /// Maximum configurations per unit.
    #[serde(default)]
    pub max_configs: Option<usize>,

    /// Worker pool size (default: available parallelism).
    #[serde(default)]
    pub jobs: Option<usize>,

    /// Directory holding the analysis cache. No cache when unset.
    #[serde(default)]
    pub build_dir: Option<PathBuf>,

    /// Dataflow depth forwarded to the checker.
    #[serde(default)]
    pub check_level: CheckLevel,

    /// If-count threshold forwarded to the checker.
    #[serde(default = "default_max_if_count")]
    pub max_if_count: usize,

    /// Template instantiation depth bound.
    #[serde(default = "default_template_recursion")]
    pub template_recursion: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            extensions: default_extensions(),
            respect_gitignore: true,
            include_paths: Vec::new(),
            defines: Vec::new(),
            undefines: Vec::new(),
            force: false,
            max_configs: None,
            jobs: None,
            build_dir: None,
            check_level: CheckLevel::default(),
            max_if_count: DEFAULT_MAX_IF_COUNT,
            template_recursion: DEFAULT_TEMPLATE_RECURSION,
        }
    }
}

fn default_extensions() -> Vec<String> {
    DiscoverOptions::default().extensions
}

fn default_true() -> bool {
    true
}

fn default_max_if_count() -> usize {
    DEFAULT_MAX_IF_COUNT
}

fn default_template_recursion() -> usize {
    DEFAULT_TEMPLATE_RECURSION
}

/// Suppression sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuppressionsConfig {
    /// Rules in the `id[:file[:line]]` grammar.
    #[serde(default)]
    pub rules: Vec<String>,

    /// Plain-text suppression lists.
    #[serde(default)]
    pub files: Vec<PathBuf>,

    /// Structured suppression files.
    #[serde(default)]
    pub xml: Vec<PathBuf>,

    /// Honor inline markers.
    #[serde(default)]
    pub inline: bool,

    /// Report rules that suppressed nothing.
    #[serde(default)]
    pub report_unused: bool,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// Parse error in config file.
    #[error("Failed to parse config: {message}")]
    Parse {
        /// Parse error message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.analyzer.respect_gitignore);
        assert_eq!(config.fail_on(), Severity::Error);
        assert_eq!(config.analyzer.template_recursion, 100);
        assert!(config.analyzer.extensions.contains(&"cpp".to_string()));
        assert!(!config.suppressions.inline);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
fail_on = "warning"

[analyzer]
exclude = ["**/generated/**"]
defines = ["DEBUG=1;TRACE"]
undefines = ["NDEBUG"]
max_configs = 4
check_level = "exhaustive"

[suppressions]
rules = ["unusedMacro:src/legacy/*"]
inline = true
"#;

        let config = Config::parse(toml).expect("Failed to parse");
        assert_eq!(config.fail_on(), Severity::Warning);
        assert_eq!(config.analyzer.max_configs, Some(4));
        assert_eq!(config.checker_settings().check_level, CheckLevel::Exhaustive);
        assert!(config.analyzer.respect_gitignore);

        let (enumerator, errors) = config.enumerator();
        assert!(errors.is_empty());
        assert_eq!(enumerator.bound(), 4);

        let registry = config.suppression_registry();
        assert_eq!(registry.rules().len(), 1);
        assert!(registry.inline_enabled());
    }

    #[test]
    fn test_invalid_values_are_parse_errors() {
        assert!(Config::parse("fail_on = \"fatal\"").is_err());
        assert!(Config::parse("[analyzer]\ncheck_level = \"deep\"").is_err());
    }

    #[test]
    fn test_malformed_define_is_reported() {
        let mut config = Config::default();
        config.analyzer.defines.push("1BAD".to_string());
        let (_, errors) = config.enumerator();
        assert_eq!(errors.len(), 1);
    }
}
