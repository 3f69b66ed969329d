//! Source units: input discovery, include resolution, and fingerprints.

use crate::pattern;
use crate::preprocessor;
use crate::utils::path::{normalize, parent_dir};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Content-derived value used to detect whether a file changed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprints raw bytes (BLAKE3, hex encoded).
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    /// Returns the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A transitively included file and its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dependency {
    /// Normalized path of the included file.
    pub path: PathBuf,
    /// Fingerprint of its content at run start.
    pub fingerprint: Fingerprint,
}

/// One input file plus what it transitively includes.
///
/// Built once at run start and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    /// Normalized path of the unit.
    pub path: PathBuf,
    /// Fingerprint of the unit's own content.
    pub fingerprint: Fingerprint,
    /// Resolved includes, sorted by path.
    pub dependencies: Vec<Dependency>,
    /// Conditional variables referenced by the unit and its includes,
    /// excluding names the files define themselves.
    pub conditionals: BTreeSet<String>,
}

impl SourceUnit {
    /// Paths of the unit and every dependency.
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.path.as_path()).chain(self.dependencies.iter().map(|d| d.path.as_path()))
    }
}

/// Errors loading a unit.
#[derive(Debug, Error)]
pub enum UnitError {
    /// The unit itself could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// Directory traversal failed.
    #[error("failed to walk input: {0}")]
    Walk(#[from] ignore::Error),
}

/// Resolves includes and fingerprints units.
#[derive(Debug, Clone, Default)]
pub struct UnitLoader {
    include_paths: Vec<PathBuf>,
}

impl UnitLoader {
    /// Creates a loader searching the given include directories.
    #[must_use]
    pub fn new(include_paths: Vec<PathBuf>) -> Self {
        Self { include_paths }
    }

    /// Loads one unit, following includes transitively.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit itself cannot be read. Unreadable or
    /// unresolvable includes are skipped.
    pub fn load(&self, path: &Path) -> Result<SourceUnit, UnitError> {
        let unit_path = normalize(path);
        let content = std::fs::read(path).map_err(|source| UnitError::Io {
            path: unit_path.clone(),
            source,
        })?;

        let fingerprint = Fingerprint::of(&content);
        let first = preprocessor::scan(&String::from_utf8_lossy(&content));

        let mut conditionals = first.conditionals.clone();
        let mut defines = first.defines.clone();
        let mut dependencies: BTreeMap<PathBuf, Fingerprint> = BTreeMap::new();
        let mut queue = VecDeque::from([(unit_path.clone(), first.includes)]);

        while let Some((from, includes)) = queue.pop_front() {
            for include in includes {
                let Some(resolved) = self.resolve(&from, &include) else {
                    debug!("Unresolved include {:?} in {}", include.target, from.display());
                    continue;
                };
                if resolved == unit_path || dependencies.contains_key(&resolved) {
                    continue;
                }
                let bytes = match std::fs::read(&resolved) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        debug!("Skipping unreadable include {}: {}", resolved.display(), e);
                        continue;
                    }
                };
                let scan = preprocessor::scan(&String::from_utf8_lossy(&bytes));
                conditionals.extend(scan.conditionals);
                defines.extend(scan.defines);
                dependencies.insert(resolved.clone(), Fingerprint::of(&bytes));
                queue.push_back((resolved, scan.includes));
            }
        }

        conditionals.retain(|name| !defines.contains(name));

        Ok(SourceUnit {
            path: unit_path,
            fingerprint,
            dependencies: dependencies
                .into_iter()
                .map(|(path, fingerprint)| Dependency { path, fingerprint })
                .collect(),
            conditionals,
        })
    }

    /// Loads every path in parallel, dropping unreadable units with a warning.
    #[must_use]
    pub fn load_all(&self, paths: &[PathBuf]) -> Vec<SourceUnit> {
        let mut units: Vec<SourceUnit> = paths
            .par_iter()
            .filter_map(|p| match self.load(p) {
                Ok(unit) => Some(unit),
                Err(e) => {
                    warn!("{e}");
                    None
                }
            })
            .collect();
        units.sort_by(|a, b| a.path.cmp(&b.path));
        units.dedup_by(|a, b| a.path == b.path);
        units
    }

    fn resolve(&self, from: &Path, include: &preprocessor::Include) -> Option<PathBuf> {
        let local = (!include.system).then(|| parent_dir(from));
        local
            .into_iter()
            .chain(self.include_paths.iter().cloned())
            .map(|dir| dir.join(&include.target))
            .find(|candidate| candidate.is_file())
            .map(|candidate| normalize(&candidate))
    }
}

/// Options for discovering input files.
#[derive(Debug, Clone)]
pub struct DiscoverOptions {
    /// File extensions (without dot) analyzed when walking directories.
    pub extensions: Vec<String>,
    /// Patterns of paths to skip.
    pub exclude: Vec<String>,
    /// Whether to respect `.gitignore` files.
    pub respect_gitignore: bool,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        Self {
            extensions: ["c", "cc", "cpp", "cxx", "c++", "h", "hh", "hpp", "hxx"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            exclude: Vec::new(),
            respect_gitignore: true,
        }
    }
}

impl DiscoverOptions {
    fn is_excluded(&self, path: &Path) -> bool {
        let path_str = normalize(path).to_string_lossy().into_owned();
        self.exclude
            .iter()
            .any(|pattern| pattern::matches(pattern, &path_str))
    }

    fn has_source_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }
}

/// Expands input paths into the sorted list of files to analyze.
///
/// Explicit file arguments are kept regardless of extension; directories are
/// walked and filtered by extension. Exclude patterns apply to both.
///
/// # Errors
///
/// Returns an error if directory traversal fails.
pub fn discover(inputs: &[PathBuf], options: &DiscoverOptions) -> Result<Vec<PathBuf>, UnitError> {
    let mut files = BTreeSet::new();

    for input in inputs {
        if input.is_file() {
            if !options.is_excluded(input) {
                files.insert(input.clone());
            }
            continue;
        }

        let mut builder = ignore::WalkBuilder::new(input);
        builder.hidden(false).git_ignore(options.respect_gitignore);

        for entry in builder.build() {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || !options.has_source_extension(path) {
                continue;
            }
            if options.is_excluded(path) {
                debug!("Excluding: {}", path.display());
                continue;
            }
            files.insert(path.to_path_buf());
        }
    }

    Ok(files.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_changes_with_content() {
        assert_eq!(Fingerprint::of(b"int x;"), Fingerprint::of(b"int x;"));
        assert_ne!(Fingerprint::of(b"int x;"), Fingerprint::of(b"int y;"));
    }

    #[test]
    fn test_load_follows_includes_transitively() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir(root.join("inc")).unwrap();
        fs::write(root.join("main.c"), "#include \"a.h\"\n#ifdef MAIN_OPT\n#endif\n").unwrap();
        fs::write(root.join("a.h"), "#include <b.h>\n#if A_LEVEL > 1\n#endif\n").unwrap();
        fs::write(
            root.join("inc/b.h"),
            "#ifndef B_H\n#define B_H\n#include \"a.h\"\n#endif\n",
        )
        .unwrap();

        let loader = UnitLoader::new(vec![root.join("inc")]);
        let unit = loader.load(&root.join("main.c")).unwrap();

        let deps: Vec<String> = unit
            .dependencies
            .iter()
            .map(|d| d.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(deps.len(), 2);
        assert!(deps.contains(&"a.h".to_string()));
        assert!(deps.contains(&"b.h".to_string()));
        assert_eq!(
            unit.conditionals.iter().cloned().collect::<Vec<_>>(),
            vec!["A_LEVEL", "MAIN_OPT"]
        );
    }

    #[test]
    fn test_load_missing_unit_fails() {
        let loader = UnitLoader::default();
        assert!(loader.load(Path::new("/nonexistent/x.c")).is_err());
    }

    #[test]
    fn test_load_all_skips_unreadable() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.c"), "int a;").unwrap();
        let units = UnitLoader::default()
            .load_all(&[tmp.path().join("a.c"), tmp.path().join("missing.c")]);
        assert_eq!(units.len(), 1);
    }

    #[test]
    fn test_discover_filters_extensions_and_excludes() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("build")).unwrap();
        fs::write(root.join("src/a.c"), "").unwrap();
        fs::write(root.join("src/b.txt"), "").unwrap();
        fs::write(root.join("build/gen.c"), "").unwrap();

        let options = DiscoverOptions {
            exclude: vec!["**/build/**".to_string()],
            ..DiscoverOptions::default()
        };
        let files = discover(&[root.to_path_buf()], &options).unwrap();
        assert_eq!(files, vec![root.join("src/a.c")]);
    }
}
