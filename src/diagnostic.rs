//! Diagnostic types: spans, suggestions and findings
//!
//! Everything in this module is plain data. The only behavior is validation,
//! which rejects a diagnostic whose suggestions point at spans it does not own.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while building or parsing diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiagnosticError {
    #[error("Invalid diagnostic: {0}")]
    InvalidDiagnostic(String),
}

impl DiagnosticError {
    fn invalid(message: impl Into<String>) -> Self {
        DiagnosticError::InvalidDiagnostic(message.into())
    }
}

/// Compiler-style diagnostic level
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Note,
    Help,
    #[default]
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Note => write!(f, "note"),
            Level::Help => write!(f, "help"),
            Level::Warning => write!(f, "warning"),
            Level::Error => write!(f, "error"),
        }
    }
}

impl FromStr for Level {
    type Err = DiagnosticError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "note" | "info" => Ok(Level::Note),
            "help" | "hint" => Ok(Level::Help),
            "warning" | "warn" => Ok(Level::Warning),
            "error" | "err" => Ok(Level::Error),
            _ => Err(DiagnosticError::invalid(format!("unknown level '{}'", s))),
        }
    }
}

/// Rule-violation priority, used by pattern scanners
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    /// All priorities, most severe first
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Priority {
    type Err = DiagnosticError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" | "med" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" | "crit" => Ok(Priority::Critical),
            _ => Err(DiagnosticError::invalid(format!(
                "unknown priority '{}'",
                s
            ))),
        }
    }
}

/// Severity of a diagnostic: a level or a priority, depending on the producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Severity {
    Level(Level),
    Priority(Priority),
}

impl Severity {
    /// Project onto a compiler level (critical/high are errors, medium a
    /// warning, low a help)
    pub fn level(&self) -> Level {
        match self {
            Severity::Level(level) => *level,
            Severity::Priority(Priority::Critical | Priority::High) => Level::Error,
            Severity::Priority(Priority::Medium) => Level::Warning,
            Severity::Priority(Priority::Low) => Level::Help,
        }
    }

    /// The priority, if this severity came from a pattern scanner
    pub fn priority(&self) -> Option<Priority> {
        match self {
            Severity::Priority(p) => Some(*p),
            Severity::Level(_) => None,
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Level(Level::Warning)
    }
}

impl From<Level> for Severity {
    fn from(level: Level) -> Self {
        Severity::Level(level)
    }
}

impl From<Priority> for Severity {
    fn from(priority: Priority) -> Self {
        Severity::Priority(priority)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Level(level) => fmt::Display::fmt(level, f),
            Severity::Priority(priority) => fmt::Display::fmt(priority, f),
        }
    }
}

impl FromStr for Severity {
    type Err = DiagnosticError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(level) = s.parse::<Level>() {
            return Ok(Severity::Level(level));
        }
        s.parse::<Priority>()
            .map(Severity::Priority)
            .map_err(|_| DiagnosticError::invalid(format!("unknown severity '{}'", s)))
    }
}

/// How safe it is to apply a suggestion without review
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    #[default]
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Estimated probability that a suggestion of this confidence is correct
    pub fn weight(&self) -> f64 {
        match self {
            Confidence::High => 0.9,
            Confidence::Medium => 0.7,
            Confidence::Low => 0.4,
        }
    }

    /// One step up, capped at high
    pub fn raise(self) -> Self {
        match self {
            Confidence::Low => Confidence::Medium,
            _ => Confidence::High,
        }
    }

    /// One step down, floored at low
    pub fn lower(self) -> Self {
        match self {
            Confidence::High => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::Low => write!(f, "low"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::High => write!(f, "high"),
        }
    }
}

impl FromStr for Confidence {
    type Err = DiagnosticError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Confidence::Low),
            "medium" | "med" => Ok(Confidence::Medium),
            "high" => Ok(Confidence::High),
            _ => Err(DiagnosticError::invalid(format!(
                "unknown confidence '{}'",
                s
            ))),
        }
    }
}

/// Kind of textual edit a suggestion performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Insert,
    Delete,
    #[default]
    Replace,
}

impl fmt::Display for SuggestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuggestionKind::Insert => write!(f, "insert"),
            SuggestionKind::Delete => write!(f, "delete"),
            SuggestionKind::Replace => write!(f, "replace"),
        }
    }
}

impl FromStr for SuggestionKind {
    type Err = DiagnosticError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "insert" => Ok(SuggestionKind::Insert),
            "delete" => Ok(SuggestionKind::Delete),
            "replace" => Ok(SuggestionKind::Replace),
            _ => Err(DiagnosticError::invalid(format!(
                "unknown suggestion kind '{}'",
                s
            ))),
        }
    }
}

/// Source range. Lines and columns are 1-based; the end column is exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub file: PathBuf,
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Exact source text covered by the span when it was produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl Span {
    pub fn new(
        file: impl Into<PathBuf>,
        start_line: usize,
        start_column: usize,
        end_line: usize,
        end_column: usize,
    ) -> Self {
        Self {
            file: file.into(),
            start_line,
            start_column,
            end_line,
            end_column,
            label: None,
            snippet: None,
        }
    }

    /// Span covering `length` characters of one line
    pub fn on_line(file: impl Into<PathBuf>, line: usize, column: usize, length: usize) -> Self {
        Self::new(file, line, column, line, column + length)
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_snippet(mut self, snippet: &str) -> Self {
        self.snippet = Some(snippet.to_string());
        self
    }

    pub fn start(&self) -> (usize, usize) {
        (self.start_line, self.start_column)
    }

    pub fn end(&self) -> (usize, usize) {
        (self.end_line, self.end_column)
    }

    /// Check positions are 1-based and start does not come after end
    pub fn validate(&self) -> Result<(), DiagnosticError> {
        if self.start_line == 0 || self.start_column == 0 || self.end_line == 0 || self.end_column == 0
        {
            return Err(DiagnosticError::invalid(format!(
                "span in {} uses 0 as a line or column",
                self.file.display()
            )));
        }
        if self.start() > self.end() {
            return Err(DiagnosticError::invalid(format!(
                "span in {} ends ({}:{}) before it starts ({}:{})",
                self.file.display(),
                self.end_line,
                self.end_column,
                self.start_line,
                self.start_column
            )));
        }
        Ok(())
    }

    /// Same file and same range, ignoring label and snippet
    pub fn same_range(&self, other: &Span) -> bool {
        self.file == other.file && self.start() == other.start() && self.end() == other.end()
    }

    /// Half-open overlap within the same file
    pub fn overlaps(&self, other: &Span) -> bool {
        self.file == other.file && self.start() < other.end() && other.start() < self.end()
    }

    /// 0-based `(line, character)` pairs for start and end
    pub fn to_zero_based(&self) -> ((u32, u32), (u32, u32)) {
        let zero = |n: usize| n.saturating_sub(1) as u32;
        (
            (zero(self.start_line), zero(self.start_column)),
            (zero(self.end_line), zero(self.end_column)),
        )
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.file.display(),
            self.start_line,
            self.start_column
        )
    }
}

/// A proposed edit with a confidence level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub kind: SuggestionKind,
    /// Replacement or inserted text
    pub text: String,
    pub confidence: Confidence,
    pub rationale: String,
    /// Target range; suggestions without one are advisory only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl Suggestion {
    /// Replace the text covered by `span`
    pub fn replace(span: Span, text: &str, confidence: Confidence, rationale: &str) -> Self {
        Self {
            kind: SuggestionKind::Replace,
            text: text.to_string(),
            confidence,
            rationale: rationale.to_string(),
            span: Some(span),
        }
    }

    /// Suggestion with no target span, shown but never applied
    pub fn advisory(text: &str, confidence: Confidence, rationale: &str) -> Self {
        Self {
            kind: SuggestionKind::Replace,
            text: text.to_string(),
            confidence,
            rationale: rationale.to_string(),
            span: None,
        }
    }

    pub fn with_kind(mut self, kind: SuggestionKind) -> Self {
        self.kind = kind;
        self
    }

    /// Can the patch engine apply this at all
    pub fn is_applicable(&self) -> bool {
        self.span.is_some()
    }
}

/// Extra context for messages and ranking
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inferred_types: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub similar_symbols: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        self.inferred_types.is_empty() && self.similar_symbols.is_empty() && self.category.is_none()
    }
}

/// One finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Rule ID that produced this diagnostic
    pub rule_id: String,
    /// Fix family of the rule (e.g. `empty_params`)
    #[serde(default)]
    pub category: String,
    pub severity: Severity,
    pub message: String,
    /// Source ranges, primary first
    #[serde(default)]
    pub spans: Vec<Span>,
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl Diagnostic {
    /// Create a diagnostic with no spans or suggestions
    pub fn new(rule_id: &str, severity: impl Into<Severity>, message: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            category: String::new(),
            severity: severity.into(),
            message: message.to_string(),
            spans: Vec::new(),
            suggestions: Vec::new(),
            metadata: None,
        }
    }

    /// Build a complete diagnostic, rejecting inconsistent input
    pub fn try_new(
        rule_id: &str,
        severity: impl Into<Severity>,
        message: &str,
        spans: Vec<Span>,
        suggestions: Vec<Suggestion>,
    ) -> Result<Self, DiagnosticError> {
        let diagnostic = Self {
            spans,
            suggestions,
            ..Self::new(rule_id, severity, message)
        };
        diagnostic.validate()?;
        Ok(diagnostic)
    }

    /// Like [`Diagnostic::try_new`] but with the severity given as text
    pub fn parse(
        rule_id: &str,
        severity: &str,
        message: &str,
        spans: Vec<Span>,
        suggestions: Vec<Suggestion>,
    ) -> Result<Self, DiagnosticError> {
        let severity: Severity = severity.parse()?;
        Self::try_new(rule_id, severity, message, spans, suggestions)
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.spans.push(span);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Attach a suggestion after checking its span belongs to this diagnostic
    pub fn add_suggestion(&mut self, suggestion: Suggestion) -> Result<(), DiagnosticError> {
        self.check_suggestion(&suggestion)?;
        self.suggestions.push(suggestion);
        Ok(())
    }

    pub fn with_suggestion(mut self, suggestion: Suggestion) -> Result<Self, DiagnosticError> {
        self.add_suggestion(suggestion)?;
        Ok(self)
    }

    /// Check every invariant of the model
    pub fn validate(&self) -> Result<(), DiagnosticError> {
        if self.rule_id.trim().is_empty() {
            return Err(DiagnosticError::invalid("empty rule id"));
        }
        for span in &self.spans {
            span.validate()?;
        }
        for suggestion in &self.suggestions {
            self.check_suggestion(suggestion)?;
        }
        Ok(())
    }

    fn check_suggestion(&self, suggestion: &Suggestion) -> Result<(), DiagnosticError> {
        let Some(span) = &suggestion.span else {
            return Ok(());
        };
        span.validate()?;
        if !self.spans.iter().any(|own| own.same_range(span)) {
            return Err(DiagnosticError::invalid(format!(
                "suggestion for rule '{}' targets {} which is not a span of the diagnostic",
                self.rule_id, span
            )));
        }
        Ok(())
    }

    pub fn primary_span(&self) -> Option<&Span> {
        self.spans.first()
    }

    pub fn file(&self) -> Option<&Path> {
        self.primary_span().map(|s| s.file.as_path())
    }

    pub fn line(&self) -> usize {
        self.primary_span().map(|s| s.start_line).unwrap_or(0)
    }

    pub fn level(&self) -> Level {
        self.severity.level()
    }

    /// Highest-confidence suggestion, preferring applicable ones on ties
    pub fn best_suggestion(&self) -> Option<&Suggestion> {
        self.suggestions
            .iter()
            .max_by_key(|s| (s.confidence, s.is_applicable()))
    }

    /// Suggestions with a span and at least the given confidence
    pub fn applicable_suggestions(&self, threshold: Confidence) -> impl Iterator<Item = &Suggestion> {
        self.suggestions
            .iter()
            .filter(move |s| s.is_applicable() && s.confidence >= threshold)
    }
}
