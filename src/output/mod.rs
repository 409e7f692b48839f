//! Output formatters for scan results

mod csv;
mod json;
mod lsp;
mod markdown;
mod text;

pub use csv::CsvFormatter;
pub use json::{
    export_json, export_rules, export_suggestions, parse_json, JsonDiagnostic, JsonFix,
    JsonFormatter, JsonLocation, JsonReport, JsonStatistics, JsonSuggestion, SCHEMA_VERSION,
};
pub use lsp::{
    file_uri, to_code_actions, to_lsp_diagnostics, to_publish_diagnostics, CodeAction,
    LspDiagnostic, LspFormatter, LspSeverity, Position, PublishDiagnosticsParams, Range, TextEdit,
    WorkspaceEdit,
};
pub use markdown::{metrics_report, MarkdownFormatter};
pub use text::TextFormatter;

use crate::config::{ColorMode, Config, OutputFormat};
use crate::diagnostic::Diagnostic;
use crate::rule::RuleCatalog;
use crate::scanner::ScanReport;
use std::sync::Arc;

/// Output formatter trait
pub trait OutputFormatter: Send + Sync {
    /// Format the entire scan report
    fn format(&self, report: &ScanReport) -> String;

    /// Format a single diagnostic
    fn format_diagnostic(&self, diagnostic: &Diagnostic) -> String;
}

/// Formatter for a format, configured from the `output` and `metrics` sections
pub fn formatter_for(
    format: OutputFormat,
    config: &Config,
    catalog: Arc<RuleCatalog>,
) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Text => {
            let formatter = TextFormatter::new();
            Box::new(if config.output.color == ColorMode::Never {
                formatter.without_color()
            } else {
                formatter
            })
        }
        OutputFormat::Json => Box::new(JsonFormatter::new(catalog).pretty()),
        OutputFormat::Lsp => Box::new(LspFormatter::new()),
        OutputFormat::Markdown => Box::new(
            MarkdownFormatter::new(catalog).with_max_detailed(config.metrics.max_detailed),
        ),
        OutputFormat::Csv => Box::new(CsvFormatter::new()),
    }
}
