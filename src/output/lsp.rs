//! Language Server Protocol export
//!
//! One LSP diagnostic per span, with 0-based positions. Suggestions of high
//! or medium confidence become quick-fix code actions.

use super::OutputFormatter;
use crate::diagnostic::{Confidence, Diagnostic, Level, Span};
use crate::scanner::ScanReport;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const SOURCE: &str = "conform";

/// LSP diagnostic severity (matches LSP spec)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LspSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

/// Help maps to Information and Note to Hint
impl From<Level> for LspSeverity {
    fn from(level: Level) -> Self {
        match level {
            Level::Error => LspSeverity::Error,
            Level::Warning => LspSeverity::Warning,
            Level::Help => LspSeverity::Information,
            Level::Note => LspSeverity::Hint,
        }
    }
}

/// LSP position (0-indexed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl From<&Span> for Range {
    fn from(span: &Span) -> Self {
        let ((start_line, start_char), (end_line, end_char)) = span.to_zero_based();
        Range {
            start: Position {
                line: start_line,
                character: start_char,
            },
            end: Position {
                line: end_line,
                character: end_char,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LspDiagnostic {
    pub range: Range,
    pub severity: Option<u32>,
    pub code: Option<String>,
    pub source: Option<String>,
    pub message: String,
    #[serde(rename = "codeActions", default, skip_serializing_if = "Vec::is_empty")]
    pub code_actions: Vec<CodeAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeAction {
    pub title: String,
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit: Option<WorkspaceEdit>,
    #[serde(rename = "isPreferred", skip_serializing_if = "Option::is_none")]
    pub is_preferred: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceEdit {
    pub changes: Option<HashMap<String, Vec<TextEdit>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextEdit {
    pub range: Range,
    #[serde(rename = "newText")]
    pub new_text: String,
}

/// `file://` URI for a path, absolute when the path can be resolved
pub fn file_uri(path: &Path) -> String {
    let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", absolute.display())
}

/// Quick fixes for one span of a diagnostic
///
/// Only applicable suggestions of medium or high confidence in the span's
/// file become actions; advisory suggestions have nothing to edit.
pub fn to_code_actions(diagnostic: &Diagnostic, span: &Span) -> Vec<CodeAction> {
    diagnostic
        .suggestions
        .iter()
        .filter(|s| s.is_applicable() && s.confidence >= Confidence::Medium)
        .filter_map(|s| {
            let target = s.span.as_ref().filter(|t| t.file == span.file)?;
            let mut changes = HashMap::new();
            changes.insert(
                file_uri(&target.file),
                vec![TextEdit {
                    range: Range::from(target),
                    new_text: s.text.clone(),
                }],
            );
            Some(CodeAction {
                title: format!("Apply: {}", s.text),
                kind: Some("quickfix".to_string()),
                edit: Some(WorkspaceEdit {
                    changes: Some(changes),
                }),
                is_preferred: Some(s.confidence == Confidence::High),
            })
        })
        .collect()
}

pub fn to_lsp_diagnostics(diagnostics: &[Diagnostic]) -> Vec<LspDiagnostic> {
    diagnostics
        .iter()
        .flat_map(|d| {
            d.spans.iter().map(move |span| LspDiagnostic {
                range: Range::from(span),
                severity: Some(LspSeverity::from(d.level()) as u32),
                code: Some(d.rule_id.clone()),
                source: Some(SOURCE.to_string()),
                message: d.message.clone(),
                code_actions: to_code_actions(d, span),
            })
        })
        .collect()
}

/// Publish diagnostics notification parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<LspDiagnostic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
}

/// Notification parameters for one file of a scan
pub fn to_publish_diagnostics(file: &Path, report: &ScanReport) -> PublishDiagnosticsParams {
    let diagnostics: Vec<Diagnostic> = report
        .files
        .iter()
        .filter(|f| f.path == file)
        .flat_map(|f| f.diagnostics.iter().cloned())
        .collect();

    PublishDiagnosticsParams {
        uri: file_uri(file),
        diagnostics: to_lsp_diagnostics(&diagnostics),
        version: None,
    }
}

/// Emits one publish-diagnostics entry per scanned file
#[derive(Default)]
pub struct LspFormatter;

impl LspFormatter {
    pub fn new() -> Self {
        Self
    }
}

impl OutputFormatter for LspFormatter {
    fn format(&self, report: &ScanReport) -> String {
        let params: Vec<PublishDiagnosticsParams> = report
            .files
            .iter()
            .map(|f| PublishDiagnosticsParams {
                uri: file_uri(&f.path),
                diagnostics: to_lsp_diagnostics(&f.diagnostics),
                version: None,
            })
            .collect();
        serde_json::to_string_pretty(&params).unwrap_or_default()
    }

    fn format_diagnostic(&self, diagnostic: &Diagnostic) -> String {
        serde_json::to_string(&to_lsp_diagnostics(std::slice::from_ref(diagnostic)))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::{Priority, Suggestion};

    fn diagnostic() -> Diagnostic {
        let span = Span::new("src/app.asthra", 15, 9, 15, 13).with_snippet("void");
        Diagnostic::new("void-params", Priority::High, "void parameter list")
            .with_span(span.clone())
            .with_suggestion(Suggestion::replace(span, "none", Confidence::High, "r"))
            .unwrap()
            .with_suggestion(Suggestion::advisory("remove it", Confidence::Low, "r"))
            .unwrap()
    }

    #[test]
    fn test_ranges_are_zero_based() {
        let lsp = to_lsp_diagnostics(&[diagnostic()]);
        assert_eq!(lsp.len(), 1);
        assert_eq!(lsp[0].range.start, Position { line: 14, character: 8 });
        assert_eq!(lsp[0].range.end, Position { line: 14, character: 12 });
        assert_eq!(lsp[0].severity, Some(1));
        assert_eq!(lsp[0].source.as_deref(), Some("conform"));
    }

    #[test]
    fn test_code_actions_skip_low_confidence() {
        let lsp = to_lsp_diagnostics(&[diagnostic()]);
        let actions = &lsp[0].code_actions;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].title, "Apply: none");
        assert_eq!(actions[0].kind.as_deref(), Some("quickfix"));
        assert_eq!(actions[0].is_preferred, Some(true));

        let changes = actions[0].edit.as_ref().unwrap().changes.as_ref().unwrap();
        let (uri, edits) = changes.iter().next().unwrap();
        assert!(uri.starts_with("file://"));
        assert_eq!(edits[0].new_text, "none");
    }

    #[test]
    fn test_one_entry_per_span() {
        let d = Diagnostic::new("multi", Level::Note, "two places")
            .with_span(Span::on_line("a.asthra", 1, 1, 2))
            .with_span(Span::on_line("a.asthra", 3, 1, 2));
        let lsp = to_lsp_diagnostics(&[d]);
        assert_eq!(lsp.len(), 2);
        assert_eq!(lsp[1].range.start.line, 2);
        assert_eq!(lsp[0].severity, Some(4));
    }

    #[test]
    fn test_serialized_field_names() {
        let json = serde_json::to_string(&to_lsp_diagnostics(&[diagnostic()])).unwrap();
        assert!(json.contains("\"newText\":\"none\""));
        assert!(json.contains("\"codeActions\""));
        assert!(json.contains("\"isPreferred\":true"));
    }

    #[test]
    fn test_lsp_severity_conversion() {
        assert_eq!(LspSeverity::from(Level::Error) as u32, 1);
        assert_eq!(LspSeverity::from(Level::Warning) as u32, 2);
        assert_eq!(LspSeverity::from(Level::Help) as u32, 3);
        assert_eq!(LspSeverity::from(Level::Note) as u32, 4);
    }

    #[test]
    fn test_low_priority_is_information() {
        let span = Span::on_line("a.asthra", 2, 5, 12).with_snippet("return void;");
        let d = Diagnostic::new("return-void", Priority::Low, "return void").with_span(span);
        assert_eq!(to_lsp_diagnostics(&[d])[0].severity, Some(3));
    }

    #[test]
    fn test_advisory_suggestion_has_no_code_action() {
        let span = Span::on_line("a.asthra", 4, 5, 13).with_snippet("let n: auto =");
        let d = Diagnostic::new("auto-type", Priority::Medium, "auto type")
            .with_span(span)
            .with_suggestion(Suggestion::advisory(
                "auto",
                Confidence::Medium,
                "manual review: cannot infer the type",
            ))
            .unwrap();

        let lsp = to_lsp_diagnostics(&[d]);
        assert_eq!(lsp.len(), 1);
        assert!(lsp[0].code_actions.is_empty());
    }
}
