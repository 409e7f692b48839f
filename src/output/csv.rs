//! CSV export, one row per diagnostic

use super::OutputFormatter;
use crate::diagnostic::Diagnostic;
use crate::scanner::ScanReport;

const HEADER: &str = "file,line,column,rule_id,category,severity,message,suggestion,confidence";

#[derive(Default)]
pub struct CsvFormatter;

impl CsvFormatter {
    pub fn new() -> Self {
        Self
    }
}

fn field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

impl OutputFormatter for CsvFormatter {
    fn format(&self, report: &ScanReport) -> String {
        let mut output = String::from(HEADER);
        output.push('\n');
        for d in report.diagnostics() {
            output.push_str(&self.format_diagnostic(d));
            output.push('\n');
        }
        output
    }

    fn format_diagnostic(&self, d: &Diagnostic) -> String {
        let (file, line, column) = d
            .primary_span()
            .map(|s| (s.file.display().to_string(), s.start_line, s.start_column))
            .unwrap_or_default();
        let best = d.best_suggestion();
        [
            field(&file),
            line.to_string(),
            column.to_string(),
            field(&d.rule_id),
            field(&d.category),
            d.severity.to_string(),
            field(&d.message),
            field(best.map(|s| s.text.as_str()).unwrap_or("")),
            best.map(|s| s.confidence.to_string()).unwrap_or_default(),
        ]
        .join(",")
    }
}
