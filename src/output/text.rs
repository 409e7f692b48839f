//! Human-readable text output formatter

use super::OutputFormatter;
use crate::diagnostic::{Confidence, Diagnostic, Level};
use crate::fixer::{FileState, FixSummary};
use crate::scanner::ScanReport;
use colored::*;
use std::collections::BTreeMap;

/// Text formatter with optional color support
pub struct TextFormatter {
    /// Enable colored output
    pub colored: bool,

    /// Show fix suggestions
    pub show_fixes: bool,

    /// Show statistics
    pub show_stats: bool,
}

impl Default for TextFormatter {
    fn default() -> Self {
        Self {
            colored: true,
            show_fixes: true,
            show_stats: true,
        }
    }
}

fn plural<'a>(n: usize, one: &'a str, many: &'a str) -> &'a str {
    if n == 1 {
        one
    } else {
        many
    }
}

impl TextFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable colors
    pub fn without_color(mut self) -> Self {
        self.colored = false;
        self
    }

    fn paint(&self, text: &str, style: fn(&str) -> ColoredString) -> String {
        if self.colored {
            style(text).to_string()
        } else {
            text.to_string()
        }
    }

    fn level_str(&self, level: Level) -> String {
        let s = level.to_string();
        match level {
            Level::Error => self.paint(&s, |t| t.red().bold()),
            Level::Warning => self.paint(&s, |t| t.yellow().bold()),
            Level::Help => self.paint(&s, |t| t.cyan()),
            Level::Note => self.paint(&s, |t| t.blue()),
        }
    }

    fn confidence_str(&self, confidence: Confidence) -> String {
        let s = confidence.to_string();
        match confidence {
            Confidence::High => self.paint(&s, |t| t.green()),
            Confidence::Medium => self.paint(&s, |t| t.yellow()),
            Confidence::Low => self.paint(&s, |t| t.red()),
        }
    }

    /// Summary of a fix run: failures, then totals
    pub fn format_fixes(&self, summary: &FixSummary) -> String {
        let mut output = String::new();

        for record in summary.records().filter(|r| !r.success) {
            output.push_str(&format!(
                "{}:{}: {} [{}]: {}\n",
                record.file.display(),
                record.line,
                self.paint("fix failed", |t| t.red()),
                record.rule_id,
                record.error.as_deref().unwrap_or("unknown error")
            ));
        }
        for file in summary.files.iter().filter(|f| f.state == FileState::Failed) {
            if let Some(error) = &file.error {
                output.push_str(&format!("{}: {}\n", file.path.display(), error));
            }
        }

        output.push_str(&format!(
            "{} {} applied, {} failed, {} {} in {} {}",
            summary.fixes_applied,
            plural(summary.fixes_applied, "fix", "fixes"),
            summary.fixes_failed,
            summary.conflicts,
            plural(summary.conflicts, "conflict", "conflicts"),
            summary.files_modified,
            plural(summary.files_modified, "file", "files"),
        ));
        if summary.files_verified > 0 {
            output.push_str(&format!(" ({} verified)", summary.files_verified));
        }
        output.push('\n');
        output
    }

    /// Edits a dry run would make, plus any diffs
    pub fn format_planned(&self, summary: &FixSummary) -> String {
        let mut output = String::new();
        for edit in summary.planned() {
            output.push_str(&format!(
                "{}:{}:{}: [{}] ({})\n",
                edit.file.display(),
                edit.line,
                edit.column,
                self.paint(&edit.rule_id, |t| t.cyan()),
                self.confidence_str(edit.confidence)
            ));
            output.push_str(&format!("   {} {}\n", self.paint("-", |t| t.red()), edit.before));
            output.push_str(&format!("   {} {}\n", self.paint("+", |t| t.green()), edit.after));
        }
        for (_, diff) in summary.diffs() {
            output.push_str(diff);
        }
        output.push_str(&format!(
            "{} {} would be applied (dry run)\n",
            summary.fixes_planned,
            plural(summary.fixes_planned, "fix", "fixes")
        ));
        output
    }
}

impl OutputFormatter for TextFormatter {
    fn format(&self, report: &ScanReport) -> String {
        let mut output = String::new();

        for file in report.files.iter().filter(|f| !f.is_clean()) {
            output.push_str(&format!(
                "{}\n",
                self.paint(&file.path.display().to_string(), |t| t.underline())
            ));
            for diag in &file.diagnostics {
                output.push_str(&self.format_diagnostic(diag));
            }
            output.push('\n');
        }

        if self.show_stats {
            let mut counts: BTreeMap<Level, usize> = BTreeMap::new();
            for d in report.diagnostics() {
                *counts.entry(d.level()).or_default() += 1;
            }

            output.push_str(&format!(
                "{} {} scanned, {} with violations",
                report.files_scanned(),
                plural(report.files_scanned(), "file", "files"),
                report.files_with_violations()
            ));
            let parts: Vec<String> = counts
                .iter()
                .rev()
                .map(|(level, n)| format!("{} {}", n, self.level_str(*level)))
                .collect();
            if !parts.is_empty() {
                output.push_str(&format!(": {}", parts.join(", ")));
            }
            output.push('\n');

            if !report.warnings.is_empty() {
                output.push_str(&format!(
                    "{} {} skipped\n",
                    report.warnings.len(),
                    plural(report.warnings.len(), "file", "files")
                ));
            }
            output.push_str(&format!(
                "Finished in {:.2}s\n",
                report.duration.as_secs_f64()
            ));
        }

        output
    }

    fn format_diagnostic(&self, diag: &Diagnostic) -> String {
        let location = diag
            .primary_span()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        let mut output = format!(
            "{}: {}[{}]: {}\n",
            location,
            self.level_str(diag.level()),
            self.paint(&diag.rule_id, |t| t.cyan()),
            diag.message
        );

        if self.show_fixes {
            for s in &diag.suggestions {
                output.push_str(&format!(
                    "   {} fix ({}): {}\n",
                    self.paint("=", |t| t.green()),
                    self.confidence_str(s.confidence),
                    if s.is_applicable() {
                        self.paint(&s.text, |t| t.green())
                    } else {
                        s.rationale.clone()
                    }
                ));
            }
        }

        if let Some(meta) = &diag.metadata {
            if !meta.inferred_types.is_empty() {
                output.push_str(&format!(
                    "   {} note: inferred type {}\n",
                    self.paint("=", |t| t.blue()),
                    meta.inferred_types.join(", ")
                ));
            }
        }

        output
    }
}
