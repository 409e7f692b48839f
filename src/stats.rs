//! Statistics, compliance snapshots and trends

use crate::diagnostic::{Confidence, Diagnostic, Level, Priority, Severity, Suggestion};
use crate::rule::RuleCatalog;
use crate::scanner::ScanReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Impact score at or above which a finding counts as high impact
pub const HIGH_IMPACT: f64 = 0.7;

const DEFAULT_IMPACT: f64 = 0.5;

/// Confidence weight of a finding: its best suggestion, or low when it has none
pub fn confidence_of(diagnostic: &Diagnostic) -> f64 {
    diagnostic
        .best_suggestion()
        .map(|s| s.confidence)
        .unwrap_or(Confidence::Low)
        .weight()
}

pub fn impact_of(diagnostic: &Diagnostic, catalog: &RuleCatalog) -> f64 {
    catalog
        .get(&diagnostic.rule_id)
        .map(|r| r.def.impact_score)
        .unwrap_or(DEFAULT_IMPACT)
}

/// The rule allows automatic fixes and the finding carries an applicable edit
pub fn is_auto_fixable(diagnostic: &Diagnostic, catalog: &RuleCatalog) -> bool {
    let allowed = catalog
        .get(&diagnostic.rule_id)
        .map(|r| r.def.auto_fixable)
        .unwrap_or(true);
    allowed && diagnostic.suggestions.iter().any(Suggestion::is_applicable)
}

/// Priority used for tallies; plain levels map onto the nearest priority
pub fn priority_of(severity: &Severity) -> Priority {
    severity.priority().unwrap_or(match severity.level() {
        Level::Error => Priority::High,
        Level::Warning => Priority::Medium,
        Level::Help | Level::Note => Priority::Low,
    })
}

/// Mean confidence weight of a set of suggestions (0 when empty)
pub fn estimated_success_rate<'a, I>(suggestions: I) -> f64
where
    I: IntoIterator<Item = &'a Suggestion>,
{
    let (sum, count) = suggestions
        .into_iter()
        .fold((0.0, 0usize), |(sum, n), s| (sum + s.confidence.weight(), n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticStatistics {
    pub total_diagnostics: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub help_count: usize,
    pub note_count: usize,
    pub total_suggestions: usize,
    pub high_confidence_suggestions: usize,
    pub auto_fixable_count: usize,
    pub high_impact_count: usize,
    pub average_confidence: f64,
    pub average_impact: f64,
    pub by_category: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub has_errors: bool,
}

impl DiagnosticStatistics {
    pub fn compute(diagnostics: &[Diagnostic], catalog: &RuleCatalog) -> Self {
        let mut stats = Self {
            total_diagnostics: diagnostics.len(),
            ..Default::default()
        };
        let mut confidence_sum = 0.0;
        let mut impact_sum = 0.0;

        for d in diagnostics {
            match d.level() {
                Level::Error => stats.error_count += 1,
                Level::Warning => stats.warning_count += 1,
                Level::Help => stats.help_count += 1,
                Level::Note => stats.note_count += 1,
            }

            stats.total_suggestions += d.suggestions.len();
            stats.high_confidence_suggestions += d
                .suggestions
                .iter()
                .filter(|s| s.confidence == Confidence::High)
                .count();

            if is_auto_fixable(d, catalog) {
                stats.auto_fixable_count += 1;
            }
            let impact = impact_of(d, catalog);
            if impact >= HIGH_IMPACT {
                stats.high_impact_count += 1;
            }
            impact_sum += impact;
            confidence_sum += confidence_of(d);

            *stats.by_category.entry(d.category.clone()).or_default() += 1;
            *stats.by_severity.entry(d.severity.to_string()).or_default() += 1;
        }

        if !diagnostics.is_empty() {
            stats.average_confidence = confidence_sum / diagnostics.len() as f64;
            stats.average_impact = impact_sum / diagnostics.len() as f64;
        }
        stats.has_errors = stats.error_count > 0;
        stats
    }
}

/// One scan run's compliance snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceMetrics {
    pub timestamp: DateTime<Utc>,
    pub total_files: usize,
    pub total_violations: usize,
    pub files_with_violations: usize,
    pub clean_files: usize,
    pub compliance_percentage: f64,
    pub by_category: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<String, usize>,
    #[serde(default)]
    pub by_directory: BTreeMap<String, usize>,
    pub error_count: usize,
    pub warning_count: usize,
    pub help_count: usize,
    pub note_count: usize,
}

impl ComplianceMetrics {
    /// Snapshot from file counts and the findings of the run
    pub fn new(total_files: usize, files_with_violations: usize, diagnostics: &[Diagnostic]) -> Self {
        let compliance_percentage = if total_files == 0 {
            100.0
        } else {
            total_files.saturating_sub(files_with_violations) as f64 / total_files as f64 * 100.0
        };

        let mut metrics = Self {
            timestamp: Utc::now(),
            total_files,
            total_violations: diagnostics.len(),
            files_with_violations,
            clean_files: total_files.saturating_sub(files_with_violations),
            compliance_percentage,
            by_category: BTreeMap::new(),
            by_priority: BTreeMap::new(),
            by_directory: BTreeMap::new(),
            error_count: 0,
            warning_count: 0,
            help_count: 0,
            note_count: 0,
        };

        for d in diagnostics {
            match d.level() {
                Level::Error => metrics.error_count += 1,
                Level::Warning => metrics.warning_count += 1,
                Level::Help => metrics.help_count += 1,
                Level::Note => metrics.note_count += 1,
            }
            *metrics.by_category.entry(d.category.clone()).or_default() += 1;
            let priority = priority_of(&d.severity).to_string().to_uppercase();
            *metrics.by_priority.entry(priority).or_default() += 1;
        }
        metrics
    }

    /// Snapshot of a scan; violations are tallied under the scan root containing each file
    pub fn from_report(report: &ScanReport, roots: &[PathBuf]) -> Self {
        let diagnostics = report.all_diagnostics();
        let mut metrics = Self::new(
            report.files_scanned(),
            report.files_with_violations(),
            &diagnostics,
        );
        for file in report.files.iter().filter(|f| !f.is_clean()) {
            let key = directory_key(&file.path, roots);
            *metrics.by_directory.entry(key).or_default() += file.diagnostics.len();
        }
        metrics
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Category with the most violations, ties broken by name
    pub fn top_category(&self) -> Option<(&str, usize)> {
        self.by_category
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(k, v)| (k.as_str(), *v))
    }
}

fn directory_key(path: &Path, roots: &[PathBuf]) -> String {
    roots
        .iter()
        .find(|root| path.starts_with(root))
        .map(|root| root.display().to_string())
        .or_else(|| path.parent().map(|p| p.display().to_string()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| ".".to_string())
}

/// Timing and fix throughput of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub timestamp: DateTime<Utc>,
    pub validation_time_seconds: f64,
    pub fix_time_seconds: f64,
    pub files_processed: usize,
    pub fixes_applied: usize,
    pub fix_success_rate: f64,
    pub average_time_per_file: f64,
}

impl PerformanceMetrics {
    pub fn new(
        validation_time_seconds: f64,
        fix_time_seconds: f64,
        files_processed: usize,
        fixes_applied: usize,
        fix_success_rate: f64,
    ) -> Self {
        let average_time_per_file = if files_processed == 0 {
            0.0
        } else {
            (validation_time_seconds + fix_time_seconds) / files_processed as f64
        };
        Self {
            timestamp: Utc::now(),
            validation_time_seconds,
            fix_time_seconds,
            files_processed,
            fixes_applied,
            fix_success_rate,
            average_time_per_file,
        }
    }
}

/// Change between the oldest and newest snapshot of a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendMetrics {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub violation_reduction: i64,
    pub compliance_improvement: f64,
    pub fix_effectiveness: f64,
    pub new_violations_introduced: i64,
    pub files_improved: i64,
    pub files_regressed: i64,
}

impl TrendMetrics {
    /// Trend over the snapshots, or `None` with fewer than two
    ///
    /// Fix effectiveness is an estimate from the endpoints and the sum of
    /// intermediate totals; it may exceed 100 or drop below 0.
    pub fn compute(snapshots: &[ComplianceMetrics]) -> Option<Self> {
        if snapshots.len() < 2 {
            return None;
        }
        let mut ordered: Vec<&ComplianceMetrics> = snapshots.iter().collect();
        ordered.sort_by_key(|m| m.timestamp);

        let oldest = ordered[0];
        let newest = ordered[ordered.len() - 1];
        let oldest_total = oldest.total_violations as i64;
        let newest_total = newest.total_violations as i64;

        let earlier_sum: i64 = ordered[..ordered.len() - 1]
            .iter()
            .map(|m| m.total_violations as i64)
            .sum();
        let estimated_fixes = earlier_sum - newest_total;
        let fix_effectiveness = if oldest_total > 0 {
            estimated_fixes as f64 / oldest_total as f64 * 100.0
        } else {
            100.0
        };

        let oldest_clean = oldest.clean_files as i64;
        let newest_clean = newest.clean_files as i64;

        Some(Self {
            period_start: oldest.timestamp,
            period_end: newest.timestamp,
            violation_reduction: oldest_total - newest_total,
            compliance_improvement: newest.compliance_percentage - oldest.compliance_percentage,
            fix_effectiveness,
            new_violations_introduced: (newest_total - (oldest_total - estimated_fixes)).max(0),
            files_improved: (newest_clean - oldest_clean).max(0),
            files_regressed: (oldest_clean - newest_clean).max(0),
        })
    }
}

/// How a recommendation reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Standing {
    Excellent,
    Good,
    NeedsAttention,
}

impl Standing {
    /// Fixed thresholds: 95 and above is excellent, 80 and above is good
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage >= 95.0 {
            Standing::Excellent
        } else if percentage >= 80.0 {
            Standing::Good
        } else {
            Standing::NeedsAttention
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub standing: Standing,
    pub message: String,
}

impl Recommendation {
    fn new(standing: Standing, message: impl Into<String>) -> Self {
        Self {
            standing,
            message: message.into(),
        }
    }
}

pub fn recommendations(
    compliance: &ComplianceMetrics,
    performance: Option<&PerformanceMetrics>,
    trend: Option<&TrendMetrics>,
) -> Vec<Recommendation> {
    let mut out = Vec::new();

    let standing = Standing::from_percentage(compliance.compliance_percentage);
    out.push(Recommendation::new(
        standing,
        match standing {
            Standing::Excellent => "Excellent compliance: maintain current standards",
            Standing::Good => "Good compliance: focus on the remaining violations",
            Standing::NeedsAttention => "Compliance needs attention: immediate action required",
        },
    ));

    if let Some(perf) = performance {
        let standing = Standing::from_percentage(perf.fix_success_rate);
        out.push(Recommendation::new(
            standing,
            match standing {
                Standing::Excellent => "Excellent fix reliability: automation is working well",
                Standing::Good => "Good fix reliability: monitor failed fixes",
                Standing::NeedsAttention => "Fix reliability needs attention: review failed fixes",
            },
        ));
    }

    if let Some(trend) = trend {
        if trend.violation_reduction > 0 {
            out.push(Recommendation::new(
                Standing::Excellent,
                format!("Improving: {} fewer violations over the period", trend.violation_reduction),
            ));
        } else if trend.violation_reduction < 0 {
            out.push(Recommendation::new(
                Standing::NeedsAttention,
                format!(
                    "Regressing: {} more violations over the period",
                    -trend.violation_reduction
                ),
            ));
        }
    }

    if let Some((category, count)) = compliance.top_category() {
        out.push(Recommendation::new(
            Standing::Good,
            format!("Next target: {} ({} violations)", category, count),
        ));
    }

    out
}
