//! CLI output formatting for all pipeline stages.
//!
//! Each stage has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.
//!
//! ```text
//! ==> Rendering templates
//!     welcome.mjml
//! ==> Compiling MJML
//!     welcome.html
//! ==> Minifying HTML
//!     welcome.min.html
//! ==> Verifying output
//! welcome.html: 14.27 Ko
//! welcome.min.html: 9.80 Ko
//! ```

use crate::minify::MinifyReport;
use crate::naming;
use crate::pipeline::Stage;
use crate::verify::SizeReport;
use std::fmt::Display;
use std::path::PathBuf;

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Indent each line by one level, one line per entry.
pub fn indent_lines<S: AsRef<str>>(lines: &[S]) -> String {
    lines
        .iter()
        .map(|l| format!("{}{}", indent(1), l.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// One indented block per error; multi-line errors keep their own lines indented.
pub fn join_errors<E: Display>(errors: &[E]) -> String {
    errors
        .iter()
        .map(|e| {
            let text = e.to_string();
            let lines: Vec<&str> = text.lines().collect();
            indent_lines(&lines)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `==> <stage>` header printed before each stage of a build.
pub fn format_stage_header(stage: Stage) -> String {
    format!("==> {}", stage.description())
}

/// `<file>: <kb> Ko`, kilobytes rounded to two decimals.
pub fn format_size_line(report: &SizeReport) -> String {
    format!("{}: {:.2} Ko", report.name, report.kilobytes())
}

/// File names of written documents, one per line.
pub fn format_written(written: &[PathBuf]) -> Vec<String> {
    written
        .iter()
        .map(|p| format!("{}{}", indent(1), naming::display_name(p)))
        .collect()
}

pub fn format_minify_output(report: &MinifyReport) -> Vec<String> {
    let mut lines = format_written(&report.written);
    for skipped in &report.skipped {
        lines.push(format!("{}skipped: {}", indent(1), skipped));
    }
    lines
}

pub fn format_verify_output(reports: &[SizeReport]) -> Vec<String> {
    reports.iter().map(format_size_line).collect()
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{}", line);
    }
}

pub fn print_stage_header(stage: Stage) {
    println!("{}", format_stage_header(stage));
}

pub fn print_written(written: &[PathBuf]) {
    print_lines(&format_written(written));
}

pub fn print_minify_output(report: &MinifyReport) {
    print_lines(&format_minify_output(report));
}

pub fn print_verify_output(reports: &[SizeReport]) {
    print_lines(&format_verify_output(reports));
}
