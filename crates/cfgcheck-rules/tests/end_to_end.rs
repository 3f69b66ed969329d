//! Runs the directive checker through the full pipeline.

use cfgcheck_core::{
    ConfigurationEnumerator, ForcedMacros, Pipeline, Report, SuppressionRegistry,
};
use cfgcheck_rules::{DirectiveChecker, ERROR_DIRECTIVE_ID, UNUSED_MACRO_ID};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn project() -> (TempDir, Vec<PathBuf>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let files = [
        (
            "common.h",
            "#ifndef COMMON_H\n#define COMMON_H\n#define USED_MACRO 42\n#define DEAD_MACRO 7\n// cppcheck-suppress unusedMacro\n#define QUIET_MACRO 1\n#endif\n",
        ),
        ("a.c", "#include \"common.h\"\nint value = USED_MACRO;\n"),
        (
            "b.c",
            "#include \"common.h\"\n#ifdef LEGACY\n#error legacy mode removed\n#endif\n",
        ),
    ];
    for (name, content) in files {
        fs::write(dir.path().join(name), content).expect("write");
    }
    let units = vec![dir.path().join("a.c"), dir.path().join("b.c")];
    (dir, units)
}

fn summary(report: &Report) -> Vec<(String, String, usize)> {
    report
        .findings
        .iter()
        .map(|f| {
            let file = f
                .location
                .file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            (f.id.clone(), file, f.location.line)
        })
        .collect()
}

#[test]
fn test_reachable_error_and_unused_macro() {
    let (_dir, units) = project();
    let report = Pipeline::builder()
        .checker(DirectiveChecker::new())
        .suppressions(SuppressionRegistry::builder().inline(true).build())
        .jobs(2)
        .build()
        .expect("pipeline builds")
        .run(&units)
        .expect("run succeeds");

    assert_eq!(
        summary(&report),
        vec![
            (ERROR_DIRECTIVE_ID.to_string(), "b.c".to_string(), 3),
            (UNUSED_MACRO_ID.to_string(), "common.h".to_string(), 4),
        ]
    );
    assert_eq!(report.units_checked, 2);
    assert_eq!(report.configurations_checked, 3);
    assert_eq!(report.suppressed, 1);
    assert_eq!(report.findings[1].symbol.as_deref(), Some("DEAD_MACRO"));
}

#[test]
fn test_forced_undefine_removes_error_configuration() {
    let (_dir, units) = project();
    let (forced, errors) = ForcedMacros::parse(Vec::<String>::new(), ["LEGACY"]);
    assert!(errors.is_empty());

    let report = Pipeline::builder()
        .checker(DirectiveChecker::new())
        .enumerator(ConfigurationEnumerator::new(forced, false, None), errors)
        .build()
        .expect("pipeline builds")
        .run(&units)
        .expect("run succeeds");

    let ids: Vec<&str> = report.findings.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec![UNUSED_MACRO_ID, UNUSED_MACRO_ID]);
    assert_eq!(report.configurations_checked, 2);
}
