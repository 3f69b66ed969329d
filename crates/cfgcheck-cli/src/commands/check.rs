//! Check command implementation.

use anyhow::{Context, Result};
use cfgcheck_core::{discover, CheckLevel, Config, Pipeline, Severity};
use cfgcheck_rules::DirectiveChecker;
use clap::Args;
use std::path::{Path, PathBuf};

use crate::config_resolver;
use crate::OutputFormat;

/// Arguments of `cfgcheck check`. Flags override the configuration file.
#[derive(Debug, Default, Args)]
pub struct CheckArgs {
    /// Files or directories to analyze
    #[arg(default_value = ".")]
    pub paths: Vec<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,

    /// Force a macro definition (`NAME`, `NAME=VALUE`, `;`-separated)
    #[arg(short = 'D', long = "define", value_name = "NAME[=VALUE]")]
    pub defines: Vec<String>,

    /// Force a macro to stay undefined
    #[arg(short = 'U', long = "undefine", value_name = "NAME")]
    pub undefines: Vec<String>,

    /// Add an include search directory
    #[arg(short = 'I', long = "include", value_name = "DIR")]
    pub include_paths: Vec<PathBuf>,

    /// Analyze every configuration, not only the forced one
    #[arg(long)]
    pub force: bool,

    /// Maximum configurations per unit
    #[arg(long, value_name = "N")]
    pub max_configs: Option<usize>,

    /// Number of worker threads
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Directory for the analysis cache
    #[arg(long, value_name = "DIR")]
    pub build_dir: Option<PathBuf>,

    /// Suppression rule `id[:file[:line]]` (can be repeated)
    #[arg(long, value_name = "RULE")]
    pub suppress: Vec<String>,

    /// Plain-text suppression list
    #[arg(long, value_name = "FILE")]
    pub suppressions_list: Vec<PathBuf>,

    /// Structured (XML) suppression file
    #[arg(long, value_name = "FILE")]
    pub suppress_xml: Vec<PathBuf>,

    /// Honor inline suppression comments
    #[arg(long)]
    pub inline_suppr: bool,

    /// Report suppressions that matched nothing
    #[arg(long)]
    pub report_unused_suppressions: bool,

    /// Dataflow depth of the checker
    #[arg(long, value_name = "LEVEL")]
    pub check_level: Option<CheckLevel>,

    /// Conditional-branch threshold forwarded to the checker
    #[arg(long, value_name = "N")]
    pub max_if_count: Option<usize>,

    /// Template instantiation depth bound
    #[arg(long, value_name = "N")]
    pub template_recursion: Option<usize>,

    /// Exclude patterns (can be specified multiple times)
    #[arg(short, long)]
    pub exclude: Vec<String>,

    /// Lowest severity that fails the run
    #[arg(long, value_name = "SEVERITY")]
    pub fail_on: Option<Severity>,
}

impl CheckArgs {
    /// Folds command-line values into `config`. Lists extend, scalars replace.
    pub fn apply(&self, config: &mut Config) {
        if let Some(severity) = self.fail_on {
            config.fail_on = Some(severity);
        }

        let analyzer = &mut config.analyzer;
        analyzer.defines.extend(self.defines.iter().cloned());
        analyzer.undefines.extend(self.undefines.iter().cloned());
        analyzer.include_paths.extend(self.include_paths.iter().cloned());
        analyzer.exclude.extend(self.exclude.iter().cloned());
        analyzer.force |= self.force;
        if self.max_configs.is_some() {
            analyzer.max_configs = self.max_configs;
        }
        if self.jobs.is_some() {
            analyzer.jobs = self.jobs;
        }
        if self.build_dir.is_some() {
            analyzer.build_dir.clone_from(&self.build_dir);
        }
        if let Some(level) = self.check_level {
            analyzer.check_level = level;
        }
        if let Some(n) = self.max_if_count {
            analyzer.max_if_count = n;
        }
        if let Some(n) = self.template_recursion {
            analyzer.template_recursion = n;
        }

        let suppressions = &mut config.suppressions;
        suppressions.rules.extend(self.suppress.iter().cloned());
        suppressions.files.extend(self.suppressions_list.iter().cloned());
        suppressions.xml.extend(self.suppress_xml.iter().cloned());
        suppressions.inline |= self.inline_suppr;
        suppressions.report_unused |= self.report_unused_suppressions;
    }

    /// Directory searched for a project config file.
    fn project_dir(&self) -> &Path {
        self.paths
            .first()
            .map(PathBuf::as_path)
            .filter(|p| p.is_dir())
            .unwrap_or(Path::new("."))
    }
}

/// Runs the check command. Returns whether the run failed the
/// `fail_on` threshold.
pub fn run(args: &CheckArgs, explicit_config: Option<&Path>) -> Result<bool> {
    let source = config_resolver::resolve(args.project_dir(), explicit_config);
    let mut config = source.load()?;
    args.apply(&mut config);

    let files = discover(&args.paths, &config.discover_options())
        .context("Failed to collect input files")?;
    tracing::info!("Analyzing {} file(s)", files.len());

    let pipeline = Pipeline::builder()
        .config(&config)
        .checker(DirectiveChecker::new())
        .build()
        .context("Failed to build pipeline")?;

    let report = pipeline.run(&files).context("Analysis failed")?;

    super::output::print(&report, args.format)?;

    Ok(report.has_findings_at(config.fail_on()))
}
