//! JSON export
//!
//! The report schema is stable: parsing an exported report and exporting it
//! again yields the same document.

use super::OutputFormatter;
use crate::diagnostic::{Diagnostic, DiagnosticError, Span, Suggestion};
use crate::fixer::FixSummary;
use crate::rule::{RuleCatalog, RuleDefinition};
use crate::scanner::ScanReport;
use crate::stats::{
    confidence_of, estimated_success_rate, impact_of, is_auto_fixable, DiagnosticStatistics,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

pub const SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonReport {
    pub schema_version: String,
    pub timestamp: String,
    pub total_issues: usize,
    #[serde(default)]
    pub files_scanned: usize,
    pub diagnostics: Vec<JsonDiagnostic>,
    pub statistics: JsonStatistics,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fixes: Vec<JsonFix>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonDiagnostic {
    pub rule_id: String,
    pub category: String,
    pub severity: String,
    pub title: String,
    pub description: String,
    pub ai_guidance: String,
    pub message: String,
    pub location: JsonLocation,
    pub confidence: f64,
    pub impact_score: f64,
    pub auto_fixable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<JsonSuggestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonLocation {
    pub file: String,
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonSuggestion {
    pub kind: String,
    pub text: String,
    pub confidence: String,
    pub rationale: String,
    pub applicable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonStatistics {
    pub total_issues: usize,
    pub auto_fixable_count: usize,
    pub high_impact_count: usize,
    pub average_confidence: f64,
    pub average_impact: f64,
    pub by_category: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonFix {
    pub file: String,
    pub rule_id: String,
    pub line: usize,
    pub original_line: String,
    pub patched_line: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JsonLocation {
    fn from_span(span: &Span) -> Self {
        Self {
            file: span.file.display().to_string(),
            start_line: span.start_line,
            start_column: span.start_column,
            end_line: span.end_line,
            end_column: span.end_column,
            snippet: span.snippet.clone(),
        }
    }

    fn to_span(&self) -> Span {
        let span = Span::new(
            PathBuf::from(&self.file),
            self.start_line,
            self.start_column,
            self.end_line,
            self.end_column,
        );
        match &self.snippet {
            Some(snippet) => span.with_snippet(snippet),
            None => span,
        }
    }
}

impl JsonDiagnostic {
    pub fn from_diagnostic(d: &Diagnostic, catalog: &RuleCatalog) -> Option<Self> {
        let span = d.primary_span()?;
        let def = catalog.get(&d.rule_id).map(|r| &r.def);
        Some(Self {
            rule_id: d.rule_id.clone(),
            category: d.category.clone(),
            severity: d.severity.to_string(),
            title: def.map(|r| r.display_title().to_string()).unwrap_or_else(|| d.rule_id.clone()),
            description: def.map(|r| r.description.clone()).unwrap_or_default(),
            ai_guidance: def.map(|r| r.ai_guidance.clone()).unwrap_or_default(),
            message: d.message.clone(),
            location: JsonLocation::from_span(span),
            confidence: confidence_of(d),
            impact_score: impact_of(d, catalog),
            auto_fixable: is_auto_fixable(d, catalog),
            suggestions: d
                .suggestions
                .iter()
                .map(|s| JsonSuggestion {
                    kind: s.kind.to_string(),
                    text: s.text.clone(),
                    confidence: s.confidence.to_string(),
                    rationale: s.rationale.clone(),
                    applicable: s.is_applicable(),
                })
                .collect(),
        })
    }

    /// Rebuild the diagnostic; applicable suggestions target the location span
    pub fn to_diagnostic(&self) -> Result<Diagnostic, DiagnosticError> {
        let span = self.location.to_span();
        let mut suggestions = Vec::with_capacity(self.suggestions.len());
        for s in &self.suggestions {
            let confidence = s.confidence.parse()?;
            let suggestion = if s.applicable {
                Suggestion::replace(span.clone(), &s.text, confidence, &s.rationale)
            } else {
                Suggestion::advisory(&s.text, confidence, &s.rationale)
            };
            suggestions.push(suggestion.with_kind(s.kind.parse()?));
        }
        Diagnostic::parse(&self.rule_id, &self.severity, &self.message, vec![span], suggestions)
            .map(|d| d.with_category(&self.category))
    }
}

impl JsonStatistics {
    fn from_stats(stats: &DiagnosticStatistics) -> Self {
        Self {
            total_issues: stats.total_diagnostics,
            auto_fixable_count: stats.auto_fixable_count,
            high_impact_count: stats.high_impact_count,
            average_confidence: stats.average_confidence,
            average_impact: stats.average_impact,
            by_category: stats.by_category.clone(),
            by_severity: stats.by_severity.clone(),
        }
    }
}

impl JsonReport {
    /// Build a report; diagnostics without a location are left out
    pub fn build(diagnostics: &[Diagnostic], catalog: &RuleCatalog) -> Self {
        let located: Vec<Diagnostic> = diagnostics
            .iter()
            .filter(|d| d.primary_span().is_some())
            .cloned()
            .collect();
        let stats = DiagnosticStatistics::compute(&located, catalog);
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            total_issues: located.len(),
            files_scanned: 0,
            diagnostics: located
                .iter()
                .filter_map(|d| JsonDiagnostic::from_diagnostic(d, catalog))
                .collect(),
            statistics: JsonStatistics::from_stats(&stats),
            fixes: Vec::new(),
        }
    }

    pub fn from_scan(report: &ScanReport, catalog: &RuleCatalog) -> Self {
        let mut json = Self::build(&report.all_diagnostics(), catalog);
        json.files_scanned = report.files_scanned();
        json
    }

    pub fn with_fixes(mut self, summary: &FixSummary) -> Self {
        self.fixes = summary
            .records()
            .map(|r| JsonFix {
                file: r.file.display().to_string(),
                rule_id: r.rule_id.clone(),
                line: r.line,
                original_line: r.original_line.clone(),
                patched_line: r.patched_line.clone(),
                success: r.success,
                error: r.error.clone(),
            })
            .collect();
        self
    }

    pub fn to_diagnostics(&self) -> Result<Vec<Diagnostic>, DiagnosticError> {
        self.diagnostics.iter().map(JsonDiagnostic::to_diagnostic).collect()
    }
}

pub fn export_json(report: &JsonReport) -> String {
    serde_json::to_string_pretty(report).unwrap_or_default()
}

pub fn parse_json(input: &str) -> Result<JsonReport, serde_json::Error> {
    serde_json::from_str(input)
}

#[derive(Serialize)]
struct RulesExport<'a> {
    schema_version: &'a str,
    total_rules: usize,
    categories: Vec<&'a str>,
    rules: Vec<&'a RuleDefinition>,
}

/// The rule catalog, for tools that consume the rule set
pub fn export_rules(catalog: &RuleCatalog) -> String {
    let export = RulesExport {
        schema_version: SCHEMA_VERSION,
        total_rules: catalog.len(),
        categories: catalog.categories().into_iter().collect(),
        rules: catalog.definitions().collect(),
    };
    serde_json::to_string_pretty(&export).unwrap_or_default()
}

#[derive(Serialize)]
struct SuggestionsExport<'a> {
    schema_version: &'a str,
    timestamp: String,
    total_suggestions: usize,
    estimated_success_rate: f64,
    suggestions: Vec<SuggestionEntry<'a>>,
}

#[derive(Serialize)]
struct SuggestionEntry<'a> {
    rule_id: &'a str,
    category: &'a str,
    file: String,
    line: usize,
    column: usize,
    kind: String,
    original: Option<&'a str>,
    text: &'a str,
    confidence: String,
    rationale: &'a str,
    auto_applicable: bool,
}

/// Every suggestion attached to the findings, with its location
pub fn export_suggestions(diagnostics: &[Diagnostic]) -> String {
    let mut entries = Vec::new();
    for d in diagnostics {
        let Some(primary) = d.primary_span() else {
            continue;
        };
        for s in &d.suggestions {
            let span = s.span.as_ref().unwrap_or(primary);
            entries.push(SuggestionEntry {
                rule_id: &d.rule_id,
                category: &d.category,
                file: span.file.display().to_string(),
                line: span.start_line,
                column: span.start_column,
                kind: s.kind.to_string(),
                original: span.snippet.as_deref(),
                text: &s.text,
                confidence: s.confidence.to_string(),
                rationale: &s.rationale,
                auto_applicable: s.is_applicable(),
            });
        }
    }

    let export = SuggestionsExport {
        schema_version: SCHEMA_VERSION,
        timestamp: Utc::now().to_rfc3339(),
        total_suggestions: entries.len(),
        estimated_success_rate: estimated_success_rate(
            diagnostics.iter().flat_map(|d| d.suggestions.iter()),
        ),
        suggestions: entries,
    };
    serde_json::to_string_pretty(&export).unwrap_or_default()
}

/// JSON formatter for machine-readable output
pub struct JsonFormatter {
    catalog: Arc<RuleCatalog>,
    pretty: bool,
}

impl JsonFormatter {
    pub fn new(catalog: Arc<RuleCatalog>) -> Self {
        Self {
            catalog,
            pretty: false,
        }
    }

    /// Enable pretty printing
    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }

    fn render<T: Serialize>(&self, value: &T) -> String {
        if self.pretty {
            serde_json::to_string_pretty(value).unwrap_or_default()
        } else {
            serde_json::to_string(value).unwrap_or_default()
        }
    }
}

impl OutputFormatter for JsonFormatter {
    fn format(&self, report: &ScanReport) -> String {
        self.render(&JsonReport::from_scan(report, &self.catalog))
    }

    fn format_diagnostic(&self, diagnostic: &Diagnostic) -> String {
        JsonDiagnostic::from_diagnostic(diagnostic, &self.catalog)
            .map(|d| self.render(&d))
            .unwrap_or_default()
    }
}
