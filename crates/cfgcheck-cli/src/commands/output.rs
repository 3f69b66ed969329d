//! Shared output formatting for reports.

use anyhow::Result;
use cfgcheck_core::Report;
use std::fmt::Write;

use crate::OutputFormat;

/// Print a report in the specified format.
pub fn print(report: &Report, format: OutputFormat) -> Result<()> {
    print!("{}", render(report, format)?);
    Ok(())
}

/// Render a report in the specified format.
pub fn render(report: &Report, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Text => render_text(report),
        OutputFormat::Json => serde_json::to_string_pretty(report)? + "\n",
        OutputFormat::Compact => render_compact(report),
    })
}

fn render_text(report: &Report) -> String {
    let mut out = String::new();

    for finding in &report.findings {
        out.push_str(&finding.format());
        out.push('\n');
    }

    let summary_color = if report.has_errors() {
        "\x1b[31m"
    } else if report.findings.is_empty() {
        "\x1b[32m"
    } else {
        "\x1b[33m"
    };
    let _ = writeln!(out, "{summary_color}{}\x1b[0m", report.summary());
    out
}

fn render_compact(report: &Report) -> String {
    report
        .findings
        .iter()
        .map(|finding| format!("{finding}\n"))
        .collect()
}
