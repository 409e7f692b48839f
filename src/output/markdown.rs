//! Markdown reports: scan findings and the metrics summary

use super::OutputFormatter;
use crate::diagnostic::{Diagnostic, Priority};
use crate::rule::RuleCatalog;
use crate::scanner::ScanReport;
use crate::stats::{
    is_auto_fixable, recommendations, ComplianceMetrics, DiagnosticStatistics,
    PerformanceMetrics, Standing, TrendMetrics,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;
use std::sync::Arc;

/// Findings report grouped by file
pub struct MarkdownFormatter {
    catalog: Arc<RuleCatalog>,
    max_detailed: usize,
}

impl MarkdownFormatter {
    pub fn new(catalog: Arc<RuleCatalog>) -> Self {
        Self {
            catalog,
            max_detailed: 50,
        }
    }

    /// Cap on the number of findings listed individually
    pub fn with_max_detailed(mut self, max: usize) -> Self {
        self.max_detailed = max;
        self
    }
}

impl OutputFormatter for MarkdownFormatter {
    fn format(&self, report: &ScanReport) -> String {
        let diagnostics = report.all_diagnostics();
        let stats = DiagnosticStatistics::compute(&diagnostics, &self.catalog);
        let mut out = String::new();

        let _ = writeln!(out, "# Conformance Report\n");
        let _ = writeln!(out, "- **Files Scanned**: {}", report.files_scanned());
        let _ = writeln!(out, "- **Files with Violations**: {}", report.files_with_violations());
        let _ = writeln!(out, "- **Total Violations**: {}", stats.total_diagnostics);
        let _ = writeln!(out, "- **Auto-fixable**: {}", stats.auto_fixable_count);
        let _ = writeln!(out, "- **Average Confidence**: {:.2}", stats.average_confidence);
        out.push('\n');

        if diagnostics.is_empty() {
            out.push_str("No violations found.\n");
            return out;
        }

        let mut fixable: BTreeMap<&str, usize> = BTreeMap::new();
        for d in diagnostics.iter().filter(|d| is_auto_fixable(d, &self.catalog)) {
            *fixable.entry(d.category.as_str()).or_default() += 1;
        }
        out.push_str("## By Category\n\n| Category | Violations | Auto-fixable |\n|---|---:|---:|\n");
        for (category, count) in &stats.by_category {
            let _ = writeln!(
                out,
                "| {} | {} | {} |",
                category,
                count,
                fixable.get(category.as_str()).copied().unwrap_or(0)
            );
        }
        out.push('\n');

        out.push_str("## Findings\n");
        let mut shown = 0;
        for file in report.files.iter().filter(|f| !f.is_clean()) {
            if shown >= self.max_detailed {
                break;
            }
            let _ = writeln!(out, "\n### `{}`\n", file.path.display());
            for d in &file.diagnostics {
                if shown >= self.max_detailed {
                    break;
                }
                out.push_str(&self.format_diagnostic(d));
                shown += 1;
            }
        }
        if stats.total_diagnostics > shown {
            let _ = writeln!(out, "\n_{} more findings not shown._", stats.total_diagnostics - shown);
        }
        out
    }

    fn format_diagnostic(&self, d: &Diagnostic) -> String {
        let mut out = format!(
            "- **{}:{}** `{}` ({}): {}\n",
            d.line(),
            d.primary_span().map(|s| s.start_column).unwrap_or(0),
            d.rule_id,
            d.severity,
            d.message
        );
        if let Some(s) = d.best_suggestion() {
            let _ = writeln!(out, "  - suggestion ({}): `{}`. {}", s.confidence, s.text, s.rationale);
        }
        out
    }
}

fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

fn icon(standing: Standing) -> &'static str {
    match standing {
        Standing::Excellent => "✅",
        Standing::Good => "⚠️",
        Standing::NeedsAttention => "❌",
    }
}

/// Metrics report with compliance, performance, trend and recommendations
pub fn metrics_report(
    compliance: &ComplianceMetrics,
    performance: Option<&PerformanceMetrics>,
    trend: Option<&TrendMetrics>,
    generated_at: DateTime<Utc>,
    metrics_dir: Option<&Path>,
) -> String {
    let mut out = String::new();
    let total = compliance.total_violations;

    let _ = writeln!(out, "# Conformance Metrics Report");
    let _ = writeln!(out, "**Generated**: {}\n", generated_at.to_rfc3339());

    let _ = writeln!(out, "## Compliance Summary");
    let _ = writeln!(out, "- **Total Files Scanned**: {}", compliance.total_files);
    let _ = writeln!(out, "- **Total Violations**: {}", total);
    let _ = writeln!(out, "- **Compliance Percentage**: {:.2}%", compliance.compliance_percentage);
    let _ = writeln!(out, "- **Clean Files**: {}", compliance.clean_files);
    let _ = writeln!(out, "- **Files with Violations**: {}", compliance.files_with_violations);
    out.push('\n');

    if !compliance.by_category.is_empty() {
        let _ = writeln!(out, "## Violations by Type");
        let mut by_count: Vec<_> = compliance.by_category.iter().collect();
        by_count.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (category, count) in by_count {
            let _ = writeln!(out, "- **{}**: {} ({:.1}%)", category, count, percent(*count, total));
        }
        out.push('\n');
    }

    if !compliance.by_priority.is_empty() {
        let _ = writeln!(out, "## Violations by Priority");
        for priority in Priority::ALL {
            let key = priority.to_string().to_uppercase();
            if let Some(count) = compliance.by_priority.get(&key) {
                let _ = writeln!(out, "- **{}**: {} ({:.1}%)", key, count, percent(*count, total));
            }
        }
        out.push('\n');
    }

    if !compliance.by_directory.is_empty() {
        let _ = writeln!(out, "## Violations by Directory");
        for (dir, count) in &compliance.by_directory {
            let _ = writeln!(out, "- `{}`: {}", dir, count);
        }
        out.push('\n');
    }

    if let Some(perf) = performance {
        let _ = writeln!(out, "## Performance Metrics");
        let _ = writeln!(out, "- **Files Processed**: {}", perf.files_processed);
        let _ = writeln!(out, "- **Total Validation Time**: {:.2}s", perf.validation_time_seconds);
        let _ = writeln!(out, "- **Total Fix Time**: {:.2}s", perf.fix_time_seconds);
        let _ = writeln!(out, "- **Fixes Applied**: {}", perf.fixes_applied);
        let _ = writeln!(out, "- **Fix Success Rate**: {:.1}%", perf.fix_success_rate);
        let _ = writeln!(out, "- **Average Time per File**: {:.3}s", perf.average_time_per_file);
        out.push('\n');
    }

    if let Some(t) = trend {
        let _ = writeln!(out, "## Trend Analysis");
        let _ = writeln!(
            out,
            "- **Period**: {} to {}",
            t.period_start.to_rfc3339(),
            t.period_end.to_rfc3339()
        );
        let _ = writeln!(out, "- **Violation Reduction**: {}", t.violation_reduction);
        let _ = writeln!(out, "- **Compliance Improvement**: {:+.2}%", t.compliance_improvement);
        let _ = writeln!(out, "- **Fix Effectiveness**: {:.1}%", t.fix_effectiveness);
        let _ = writeln!(out, "- **New Violations Introduced**: {}", t.new_violations_introduced);
        let _ = writeln!(out, "- **Files Improved**: {}", t.files_improved);
        let _ = writeln!(out, "- **Files Regressed**: {}", t.files_regressed);
        out.push('\n');
    }

    let _ = writeln!(out, "## Recommendations");
    for rec in recommendations(compliance, performance, trend) {
        let _ = writeln!(out, "- {} {}", icon(rec.standing), rec.message);
    }

    if let Some(dir) = metrics_dir {
        let _ = writeln!(out, "\n_Metrics stored in `{}`._", dir.display());
    }
    out
}
