//! Run orchestration: configurations, cache, checker, whole-program merge,
//! suppression, and ordering.

use crate::cache::AnalysisCache;
use crate::checker::{version_tag, Checker, CheckerBox, CheckerSettings, PassContext};
use crate::config::Config;
use crate::configuration::{ConfigurationEnumerator, ConfigurationError};
use crate::suppression::{inline, InlineIndex, InlineSuppressions, SuppressionRegistry};
use crate::template_guard::TemplateExpansionGuard;
use crate::types::{Finding, Location, Report};
use crate::unit::{SourceUnit, UnitLoader};
use crate::whole_program::{BarrierError, WholeProgramAccumulator, WholeProgramPartial};

use rayon::prelude::*;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that end a run without a report.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// None of the inputs could be read.
    #[error("no readable source units among {0} input(s)")]
    NoUnits(usize),

    /// The pipeline was built without a checker.
    #[error("no checker configured")]
    NoChecker,

    /// The worker pool could not be started.
    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Whole-program facts were read before every unit finished.
    #[error(transparent)]
    Barrier(#[from] BarrierError),
}

/// Builder for configuring a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    checker: Option<CheckerBox>,
    enumerator: ConfigurationEnumerator,
    configuration_errors: Vec<ConfigurationError>,
    settings: CheckerSettings,
    suppressions: SuppressionRegistry,
    loader: UnitLoader,
    build_dir: Option<PathBuf>,
    jobs: Option<usize>,
}

impl PipelineBuilder {
    /// Creates a new builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies everything a [`Config`] specifies.
    #[must_use]
    pub fn config(mut self, config: &Config) -> Self {
        let (enumerator, errors) = config.enumerator();
        self.enumerator = enumerator;
        self.configuration_errors = errors;
        self.settings = config.checker_settings();
        self.suppressions = config.suppression_registry();
        self.loader = UnitLoader::new(config.analyzer.include_paths.clone());
        self.build_dir.clone_from(&config.analyzer.build_dir);
        self.jobs = config.analyzer.jobs;
        self
    }

    /// Sets the checker.
    #[must_use]
    pub fn checker<C: Checker + 'static>(mut self, checker: C) -> Self {
        self.checker = Some(Box::new(checker));
        self
    }

    /// Sets a boxed checker.
    #[must_use]
    pub fn checker_box(mut self, checker: CheckerBox) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Sets the configuration enumerator and the `-D`/`-U` errors found
    /// while building it.
    #[must_use]
    pub fn enumerator(
        mut self,
        enumerator: ConfigurationEnumerator,
        errors: Vec<ConfigurationError>,
    ) -> Self {
        self.enumerator = enumerator;
        self.configuration_errors = errors;
        self
    }

    /// Sets the checker settings.
    #[must_use]
    pub fn settings(mut self, settings: CheckerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the suppression rules.
    #[must_use]
    pub fn suppressions(mut self, registry: SuppressionRegistry) -> Self {
        self.suppressions = registry;
        self
    }

    /// Sets the include search path.
    #[must_use]
    pub fn include_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.loader = UnitLoader::new(paths);
        self
    }

    /// Enables the analysis cache in `dir`.
    #[must_use]
    pub fn build_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.build_dir = Some(dir.into());
        self
    }

    /// Sets the worker pool size (default: available parallelism).
    #[must_use]
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if no checker was set.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let checker = self.checker.ok_or(PipelineError::NoChecker)?;
        let cache = self
            .build_dir
            .map(|dir| AnalysisCache::new(dir, version_tag(checker.as_ref(), &self.settings)));

        Ok(Pipeline {
            checker,
            enumerator: self.enumerator,
            configuration_errors: self.configuration_errors,
            settings: self.settings,
            suppressions: self.suppressions,
            loader: self.loader,
            cache,
            jobs: self.jobs,
        })
    }
}

/// What one worker produced for one unit.
#[derive(Debug, Default)]
struct UnitOutcome {
    findings: Vec<Finding>,
    configurations: usize,
    cache_hits: usize,
    cache_misses: usize,
}

/// Drives the checker over every unit and produces the final report.
///
/// Use [`Pipeline::builder()`] to construct an instance.
pub struct Pipeline {
    checker: CheckerBox,
    enumerator: ConfigurationEnumerator,
    configuration_errors: Vec<ConfigurationError>,
    settings: CheckerSettings,
    suppressions: SuppressionRegistry,
    loader: UnitLoader,
    cache: Option<AnalysisCache>,
    jobs: Option<usize>,
}

impl Pipeline {
    /// Creates a new builder for configuring a pipeline.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Returns the analysis cache, if enabled.
    #[must_use]
    pub fn cache(&self) -> Option<&AnalysisCache> {
        self.cache.as_ref()
    }

    /// Analyzes the given source files.
    ///
    /// Per-unit problems (unreadable includes, failed passes, malformed
    /// suppressions, cache I/O) end up as findings or log lines; only a run
    /// with no readable unit at all fails.
    ///
    /// # Errors
    ///
    /// Returns an error if no unit could be loaded or the worker pool could
    /// not start.
    pub fn run(&self, files: &[PathBuf]) -> Result<Report, PipelineError> {
        info!(
            "Starting analysis of {} file(s) with checker {}",
            files.len(),
            self.checker.name()
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs.unwrap_or(0))
            .build()?;

        let units = pool.install(|| self.loader.load_all(files));
        if units.is_empty() {
            return Err(PipelineError::NoUnits(files.len()));
        }

        let accumulator = WholeProgramAccumulator::new(units.len());
        let outcomes: Vec<UnitOutcome> = pool.install(|| {
            units
                .par_iter()
                .map(|unit| self.analyze_unit(unit, &accumulator))
                .collect()
        });
        let fact = accumulator.seal()?;

        let mut report = Report::new();
        report.units_checked = units.len();
        let mut findings = Vec::new();
        for outcome in outcomes {
            report.configurations_checked += outcome.configurations;
            report.cache_hits += outcome.cache_hits;
            report.cache_misses += outcome.cache_misses;
            findings.extend(outcome.findings);
        }

        findings.extend(self.checker.conclude(&fact));
        findings.extend(self.configuration_errors.iter().map(ConfigurationError::to_finding));

        let index = pool.install(|| scan_inline(&units));
        findings.extend(self.suppressions.diagnostics(&index));

        let filtered = self.suppressions.filter(dedup(findings), &index);
        report.suppressed = filtered.suppressed;
        report.findings = filtered.kept;
        index.attach_remarks(&mut report.findings);
        sort(&mut report.findings);

        info!(
            "Analysis complete: {} finding(s) in {} unit(s), {} configuration(s), {} cache hit(s)",
            report.findings.len(),
            report.units_checked,
            report.configurations_checked,
            report.cache_hits
        );

        Ok(report)
    }

    /// Runs every configuration of one unit and submits its partial.
    fn analyze_unit(&self, unit: &SourceUnit, accumulator: &WholeProgramAccumulator) -> UnitOutcome {
        let configurations = self.enumerator.enumerate(&unit.conditionals);
        debug!(
            "Analyzing {} under {} configuration(s)",
            unit.path.display(),
            configurations.len()
        );

        let mut outcome = UnitOutcome {
            configurations: configurations.len(),
            ..UnitOutcome::default()
        };
        let mut partial = WholeProgramPartial::new();

        for configuration in &configurations {
            let signature = configuration.signature();

            if let Some(entry) = self.cache.as_ref().and_then(|c| c.lookup(unit, &signature)) {
                debug!("Cache hit: {} [{}]", unit.path.display(), signature);
                outcome.cache_hits += 1;
                outcome.findings.extend(entry.findings);
                partial.merge(entry.partial);
                continue;
            }
            outcome.cache_misses += 1;

            let ctx = PassContext {
                unit,
                configuration,
                settings: &self.settings,
            };
            let mut guard = TemplateExpansionGuard::new(self.settings.template_recursion);

            match self.checker.analyze(&ctx, &mut guard) {
                Ok(mut analysis) => {
                    analysis.findings.extend(guard.take_findings());
                    if let Some(cache) = &self.cache {
                        if let Err(e) = cache.store(unit, &signature, &analysis.findings, &analysis.partial) {
                            warn!("{e}");
                        }
                    }
                    outcome.findings.extend(analysis.findings);
                    partial.merge(analysis.partial);
                }
                Err(failure) => {
                    warn!(
                        "Checker failed on {} [{}]: {}",
                        unit.path.display(),
                        signature,
                        failure
                    );
                    outcome.findings.push(failure.to_finding(&unit.path, &signature));
                }
            }
        }

        accumulator.submit(partial);
        outcome.findings = dedup(std::mem::take(&mut outcome.findings));
        outcome
    }
}

/// Scans every file of every unit for inline markers, once per file.
fn scan_inline(units: &[SourceUnit]) -> InlineIndex {
    let files: BTreeSet<&Path> = units.iter().flat_map(SourceUnit::files).collect();
    let scans: Vec<(PathBuf, InlineSuppressions)> = files
        .into_par_iter()
        .filter_map(|path| match std::fs::read(path) {
            Ok(bytes) => Some((
                path.to_path_buf(),
                inline::scan(path, &String::from_utf8_lossy(&bytes)),
            )),
            Err(e) => {
                debug!("Skipping inline scan of {}: {}", path.display(), e);
                None
            }
        })
        .collect();

    let mut index = InlineIndex::new();
    for (path, scan) in scans {
        index.insert(path, scan);
    }
    index
}

/// Drops repeated (id, location, message) findings, keeping the first.
fn dedup(findings: Vec<Finding>) -> Vec<Finding> {
    let mut seen: HashSet<(String, Location, String)> = HashSet::new();
    findings
        .into_iter()
        .filter(|f| {
            let (id, location, message) = f.dedup_key();
            seen.insert((id.to_string(), location.clone(), message.to_string()))
        })
        .collect()
}

/// Sorts by file, line, column, then id.
fn sort(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        a.location
            .file
            .cmp(&b.location.file)
            .then(a.location.line.cmp(&b.location.line))
            .then(a.location.column.cmp(&b.location.column))
            .then_with(|| a.id.cmp(&b.id))
            .then_with(|| a.message.cmp(&b.message))
    });
}
