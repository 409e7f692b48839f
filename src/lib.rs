//! Conform - rule-based source scanner with confidence-scored automatic fixes
//!
//! Scans `.asthra` sources against a catalog of regex rules, attaches fix
//! suggestions with a confidence level, applies the confident ones safely,
//! and tracks compliance over time.
//!
//! # Architecture
//!
//! ```text
//! CLI -> Config -> Scanner (+ FixGenerator) -> PatchEngine -> Stats -> MetricsStore
//!                                    \-> Output (text, json, lsp, markdown, csv)
//! ```
//!
//! Scanning is a pure function per file and runs in parallel. The patch
//! engine serializes writers per file and never leaves a file half-written.
//!
//! # Custom rules
//!
//! Extra rules are listed in YAML or JSON files referenced from the config:
//!
//! ```yaml
//! rules:
//!   - id: no-todo-return
//!     category: return_void
//!     severity: low
//!     pattern: 'return\s+todo\s*;'
//!     fix_template: "return;"
//!     auto_fixable: true
//! ```

pub mod config;
pub mod diagnostic;
pub mod fixer;
pub mod fixgen;
pub mod history;
pub mod output;
pub mod rule;
pub mod scanner;
pub mod stats;
pub mod validate;

// Re-export main types
pub use config::{CliOverrides, Config, ConfigError};
pub use diagnostic::{
    Confidence, Diagnostic, DiagnosticError, Level, Metadata, Priority, Severity, Span,
    Suggestion, SuggestionKind,
};
pub use fixer::{FileOutcome, FileState, FixRecord, FixSummary, PatchEngine, PatchError, PlannedEdit};
pub use fixgen::FixGenerator;
pub use history::{HistoryError, LatestMetrics, MetricsStore};
pub use output::{formatter_for, OutputFormatter};
pub use rule::{FixStrategy, RuleCatalog, RuleDefinition, RuleError};
pub use scanner::{collect_files, scan_file, scan_source, FileScan, ScanError, ScanReport, Scanner};
pub use stats::{
    ComplianceMetrics, DiagnosticStatistics, PerformanceMetrics, Recommendation, TrendMetrics,
};
pub use validate::{CommandValidator, MockValidator, ValidationOutcome, Validator};
