//! Init command implementation.

use anyhow::{bail, Context, Result};
use std::path::Path;

const DEFAULT_CONFIG: &str = r#"# cfgcheck configuration

# Lowest severity that makes `cfgcheck check` exit with status 1:
# error, warning, style, performance, portability, information
fail_on = "error"

[analyzer]
# Glob patterns of unit paths to skip
exclude = [
    "**/build/**",
    "**/third_party/**",
]

# Extensions analyzed when walking directories
# extensions = ["c", "cc", "cpp", "cxx", "c++", "h", "hh", "hpp", "hxx"]

# Respect .gitignore files
respect_gitignore = true

# Include search directories (-I)
# include_paths = ["include"]

# Forced macro state (-D / -U). With defines and no max_configs only the
# forced configuration is analyzed unless `force` is set.
# defines = ["DEBUG=1"]
# undefines = ["NDEBUG"]
# force = false
# max_configs = 12

# Worker threads (default: available parallelism)
# jobs = 4

# Directory for the incremental analysis cache
# build_dir = ".cfgcheck-cache"

# Checker knobs
# check_level = "normal"    # reduced | normal | exhaustive
# max_if_count = 100
# template_recursion = 100

[suppressions]
# Rules in the `id[:file[:line]]` grammar
# rules = ["unusedMacro:src/legacy/*"]

# Plain-text and XML suppression files
# files = ["suppressions.txt"]
# xml = ["suppressions.xml"]

# Honor `// cppcheck-suppress id` comments
inline = false

# Report suppressions that matched nothing
report_unused = false
"#;

/// Runs the init command.
pub fn run(force: bool) -> Result<()> {
    write_config(Path::new("cfgcheck.toml"), force)?;

    println!("Created cfgcheck.toml");
    println!("\nNext steps:");
    println!("  1. Edit cfgcheck.toml to configure the analysis");
    println!("  2. Run: cfgcheck check");

    Ok(())
}

fn write_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "Configuration file already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }
    std::fs::write(path, DEFAULT_CONFIG)
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfgcheck_core::{Config, Severity};

    #[test]
    fn default_config_parses() {
        let config = Config::parse(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.fail_on(), Severity::Error);
        assert_eq!(config.analyzer.exclude.len(), 2);
        assert!(!config.suppressions.inline);
    }

    #[test]
    fn refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfgcheck.toml");
        std::fs::write(&path, "# mine\n").unwrap();

        assert!(write_config(&path, false).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# mine\n");

        write_config(&path, true).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), DEFAULT_CONFIG);
    }
}
