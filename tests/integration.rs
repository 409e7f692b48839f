//! Integration tests for conform

use conform::diagnostic::{Confidence, Priority};
use conform::fixer::{FileState, PatchEngine};
use conform::fixgen::FixGenerator;
use conform::history::MetricsStore;
use conform::output::{export_json, parse_json, to_publish_diagnostics, JsonReport};
use conform::rule::{RuleCatalog, RuleDefinition};
use conform::scanner::{ScanReport, Scanner};
use conform::stats::{ComplianceMetrics, TrendMetrics};
use conform::validate::{MockValidator, ValidationOutcome};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn fixtures_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn catalog() -> Arc<RuleCatalog> {
    Arc::new(RuleCatalog::builtin())
}

fn scanner(catalog: &Arc<RuleCatalog>) -> Scanner {
    Scanner::new(Arc::clone(catalog)).with_generator(FixGenerator::new(Arc::clone(catalog)))
}

/// Copy a fixture into a scratch directory so it can be rewritten
fn scratch_copy(name: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(name);
    fs::copy(fixtures_path().join(name), &path).unwrap();
    (dir, path)
}

fn rule_ids(report: &ScanReport) -> Vec<String> {
    report.diagnostics().map(|d| d.rule_id.clone()).collect()
}

const FIXED_AT_HIGH: &str = "package demo;

fn helper(none) -> i32 {
    return 1;
}

fn run(none) -> void {
    let total: auto = 42;
    let msg: string = \"total {total}\";
    log(none);
    return;
}
";

#[test]
fn test_scan_violations_fixture() {
    let catalog = catalog();
    let report = scanner(&catalog).scan(&[fixtures_path().join("violations.asthra")]);

    assert_eq!(
        rule_ids(&report),
        vec![
            "empty-params",
            "void-params",
            "auto-type",
            "string-interpolation",
            "void-call-args",
            "return-void",
        ]
    );
    assert_eq!(report.files_with_violations(), 1);
    assert_eq!(report.exit_code(true), 1);
    assert_eq!(report.exit_code(false), 0);

    let diags = report.all_diagnostics();
    let first = diags[0].best_suggestion().unwrap();
    assert_eq!(first.text, "fn helper(none) ->");
    assert_eq!(first.confidence, Confidence::High);

    let auto = diags[2].best_suggestion().unwrap();
    assert_eq!(auto.text, "let total: i32 =");
    assert_eq!(auto.confidence, Confidence::Medium);

    let interpolation = diags[3].best_suggestion().unwrap();
    assert_eq!(interpolation.text, "\"total \" + total");
    assert_eq!(interpolation.confidence, Confidence::Medium);
    assert_eq!(diags[3].severity.priority(), Some(Priority::Critical));
}

#[test]
fn test_scan_clean_fixture() {
    let report = scanner(&catalog()).scan(&[fixtures_path().join("clean.asthra")]);

    assert_eq!(report.files_scanned(), 1);
    assert!(report.is_clean());
    assert_eq!(report.exit_code(true), 0);
}

#[test]
fn test_scan_directory_skips_unreadable() {
    let dir = TempDir::new().unwrap();
    fs::copy(fixtures_path().join("shapes.asthra"), dir.path().join("shapes.asthra")).unwrap();
    fs::write(dir.path().join("binary.asthra"), [0xff, 0xfe, 0x00]).unwrap();

    let files = conform::collect_files(
        &[dir.path().display().to_string()],
        &["**/*.asthra".to_string()],
        &[],
    )
    .unwrap();
    let report = scanner(&catalog()).scan(&files);

    assert_eq!(report.files_scanned(), 1);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(rule_ids(&report), vec!["empty-struct-void", "field-shorthand"]);
}

#[test]
fn test_fix_high_confidence_then_idempotent() {
    let (_dir, path) = scratch_copy("violations.asthra");
    let catalog = catalog();
    let scanner = scanner(&catalog);
    let engine = PatchEngine::new(Arc::clone(&catalog));

    let summary = engine.apply(&scanner.scan(&[path.clone()]).files);
    assert_eq!(summary.fixes_applied, 4);
    assert_eq!(summary.fixes_failed, 0);
    assert_eq!(summary.files_modified, 1);
    assert_eq!(summary.files[0].state, FileState::Verified);
    assert_eq!(fs::read_to_string(&path).unwrap(), FIXED_AT_HIGH);

    let rescan = scanner.scan(&[path.clone()]);
    assert_eq!(rule_ids(&rescan), vec!["auto-type", "string-interpolation"]);

    let second = engine.apply(&rescan.files);
    assert_eq!(second.records().count(), 0);
    assert_eq!(second.files_modified, 0);
    assert_eq!(fs::read_to_string(&path).unwrap(), FIXED_AT_HIGH);
}

#[test]
fn test_fix_medium_threshold_applies_inferred_edits() {
    let (_dir, path) = scratch_copy("violations.asthra");
    let catalog = catalog();
    let scanner = scanner(&catalog);
    let engine = PatchEngine::new(Arc::clone(&catalog)).with_threshold(Confidence::Medium);

    let summary = engine.apply(&scanner.scan(&[path.clone()]).files);
    assert_eq!(summary.fixes_applied, 6);

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("    let total: i32 = 42;\n"));
    assert!(content.contains("    let msg: string = \"total \" + total;\n"));
    assert!(scanner.scan(&[path]).is_clean());
}

#[test]
fn test_fix_category_filter() {
    let (_dir, path) = scratch_copy("violations.asthra");
    let catalog = catalog();
    let engine =
        PatchEngine::new(Arc::clone(&catalog)).with_categories(vec!["return_void".to_string()]);

    let summary = engine.apply(&scanner(&catalog).scan(&[path.clone()]).files);
    assert_eq!(summary.fixes_applied, 1);

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("    return;\n"));
    assert!(content.contains("fn run(void) -> void {"));
}

#[test]
fn test_stale_span_is_reported() {
    let (_dir, path) = scratch_copy("violations.asthra");
    let catalog = catalog();
    let report = scanner(&catalog).scan(&[path.clone()]);

    let edited = fs::read_to_string(&path)
        .unwrap()
        .replace("    return void;", "    return 0;");
    fs::write(&path, edited).unwrap();

    let summary = PatchEngine::new(Arc::clone(&catalog)).apply(&report.files);
    assert_eq!(summary.fixes_applied, 3);
    assert_eq!(summary.fixes_failed, 1);

    let failed: Vec<_> = summary.records().filter(|r| !r.success).collect();
    assert_eq!(failed[0].rule_id, "return-void");
    assert_eq!(failed[0].line, 11);
    assert_eq!(failed[0].error.as_deref(), Some("stale span"));

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("    return 0;\n"));
    assert!(content.contains("fn helper(none) -> i32 {"));
}

#[test]
fn test_dry_run_leaves_file_untouched() {
    let (_dir, path) = scratch_copy("violations.asthra");
    let original = fs::read_to_string(&path).unwrap();
    let catalog = catalog();

    let engine = PatchEngine::new(Arc::clone(&catalog))
        .with_dry_run(true)
        .with_diff(true);
    let summary = engine.apply(&scanner(&catalog).scan(&[path.clone()]).files);

    assert_eq!(fs::read_to_string(&path).unwrap(), original);
    assert_eq!(summary.fixes_planned, 4);
    assert_eq!(summary.fixes_applied, 0);
    assert_eq!(summary.files_modified, 0);

    let planned: Vec<_> = summary.planned().collect();
    assert_eq!(planned[0].line, 3);
    assert_eq!(planned[0].before, "fn helper() -> i32 {");
    assert_eq!(planned[0].after, "fn helper(none) -> i32 {");

    let (_, diff) = summary.diffs().next().unwrap();
    assert!(diff.contains("-fn helper() -> i32 {\n"));
    assert!(diff.contains("+fn helper(none) -> i32 {\n"));
    assert!(diff.contains("+    return;\n"));
}

#[test]
fn test_backup_written_before_rewrite() {
    let (dir, path) = scratch_copy("violations.asthra");
    let original = fs::read_to_string(&path).unwrap();
    let backups = dir.path().join("backups");
    let catalog = catalog();

    let engine = PatchEngine::new(Arc::clone(&catalog)).with_backup_dir(Some(backups.clone()));
    let summary = engine.apply(&scanner(&catalog).scan(&[path.clone()]).files);

    let backup = summary.files[0].backup.clone().unwrap();
    assert!(backup.starts_with(&backups));
    assert_eq!(fs::read_to_string(&backup).unwrap(), original);
    assert_eq!(fs::read_to_string(&path).unwrap(), FIXED_AT_HIGH);
}

fn catalog_with(rule: RuleDefinition) -> Arc<RuleCatalog> {
    let mut catalog = RuleCatalog::builtin();
    catalog.add(rule).unwrap();
    Arc::new(catalog)
}

#[test]
fn test_overlapping_rules_conflict() {
    let (_dir, path) = scratch_copy("violations.asthra");
    let catalog = catalog_with(
        RuleDefinition::new("log-void", "logging", Priority::High, r"log\(void\)")
            .with_template("log(none)"),
    );

    let summary = PatchEngine::new(Arc::clone(&catalog))
        .apply(&scanner(&catalog).scan(&[path.clone()]).files);

    assert_eq!(summary.conflicts, 1);
    let conflict = summary.records().find(|r| !r.success).unwrap();
    assert_eq!(conflict.rule_id, "void-call-args");
    assert_eq!(conflict.error.as_deref(), Some("conflict: overlaps log-void"));
    assert!(fs::read_to_string(&path).unwrap().contains("    log(none);\n"));
}

#[test]
fn test_overlap_resolved_by_priority() {
    let (_dir, path) = scratch_copy("violations.asthra");
    let catalog = catalog_with(
        RuleDefinition::new("log-void", "logging", Priority::Low, r"log\(void\)")
            .with_template("log(none)"),
    );

    let summary = PatchEngine::new(Arc::clone(&catalog))
        .with_prefer_priority(true)
        .apply(&scanner(&catalog).scan(&[path]).files);

    assert_eq!(summary.conflicts, 1);
    let loser = summary.records().find(|r| !r.success).unwrap();
    assert_eq!(loser.rule_id, "log-void");
    assert_eq!(loser.error.as_deref(), Some("conflict: overlaps void-call-args"));
    assert!(summary
        .records()
        .any(|r| r.success && r.rule_id == "void-call-args"));
}

#[test]
fn test_validator_outcome_adjusts_confidence() {
    let (_dir, path) = scratch_copy("shapes.asthra");
    let catalog = catalog();
    let validator = Arc::new(MockValidator::failing("unexpected token"));

    let engine = PatchEngine::new(Arc::clone(&catalog)).with_validator(validator.clone());
    let summary = engine.apply(&scanner(&catalog).scan(&[path.clone()]).files);

    assert_eq!(validator.calls(), 1);
    assert_eq!(
        summary.files[0].validation,
        Some(ValidationOutcome::Failed("unexpected token".to_string()))
    );
    assert!(summary
        .records()
        .filter(|r| r.success)
        .all(|r| r.confidence == Confidence::Medium));

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("struct Empty { none }"));
    assert!(content.contains("return Point { x: x, y: y };"));
}

#[test]
fn test_json_export_round_trip() {
    let catalog = catalog();
    let report = scanner(&catalog).scan(&[fixtures_path().join("violations.asthra")]);

    let json = export_json(&JsonReport::from_scan(&report, &catalog));
    let parsed = parse_json(&json).unwrap();
    assert_eq!(parsed.schema_version, "1.0");
    assert_eq!(parsed.total_issues, 6);
    assert_eq!(parsed.files_scanned, 1);

    let restored = parsed.to_diagnostics().unwrap();
    let original = report.all_diagnostics();
    assert_eq!(restored.len(), original.len());
    for (a, b) in restored.iter().zip(&original) {
        assert_eq!(a.rule_id, b.rule_id);
        assert_eq!(a.severity, b.severity);
        assert_eq!(a.spans, b.spans);
        assert_eq!(
            a.best_suggestion().map(|s| (&s.text, s.confidence)),
            b.best_suggestion().map(|s| (&s.text, s.confidence))
        );
    }
}

#[test]
fn test_lsp_positions_are_zero_based() {
    let path = fixtures_path().join("violations.asthra");
    let report = scanner(&catalog()).scan(&[path.clone()]);

    let params = to_publish_diagnostics(&path, &report);
    assert!(params.uri.starts_with("file://"));
    assert_eq!(params.diagnostics.len(), 6);

    let first = &params.diagnostics[0];
    assert_eq!((first.range.start.line, first.range.start.character), (2, 0));
    assert_eq!((first.range.end.line, first.range.end.character), (2, 14));
    assert_eq!(first.severity, Some(1));
    assert_eq!(first.code.as_deref(), Some("empty-params"));
    assert_eq!(first.code_actions[0].title, "Apply: fn helper(none) ->");
    assert_eq!(first.code_actions[0].kind.as_deref(), Some("quickfix"));
}

fn write_project(dir: &Path, clean: usize, dirty: usize) {
    for i in 0..clean {
        fs::write(dir.join(format!("clean_{}.asthra", i)), "fn f(none) -> void {\n}\n").unwrap();
    }
    for i in 0..dirty {
        fs::write(
            dir.join(format!("dirty_{}.asthra", i)),
            "fn f(none) -> void {\n    return void;\n}\n",
        )
        .unwrap();
    }
}

#[test]
fn test_compliance_percentage() {
    let dir = TempDir::new().unwrap();
    write_project(dir.path(), 7, 3);

    let files = conform::collect_files(&[dir.path().display().to_string()], &[], &[]).unwrap();
    let report = scanner(&catalog()).scan(&files);
    let metrics = ComplianceMetrics::from_report(&report, &[dir.path().to_path_buf()]);

    assert_eq!(metrics.total_files, 10);
    assert_eq!(metrics.files_with_violations, 3);
    assert_eq!(metrics.clean_files, 7);
    assert!((metrics.compliance_percentage - 70.0).abs() < 1e-9);
    assert_eq!(metrics.by_category.get("return_void"), Some(&3));
    assert_eq!(metrics.by_priority.get("LOW"), Some(&3));
    assert_eq!(metrics.by_directory.values().sum::<usize>(), 3);
}

#[test]
fn test_trend_across_recorded_runs() {
    let project = TempDir::new().unwrap();
    let history = TempDir::new().unwrap();
    let store = MetricsStore::new(history.path());
    let catalog = catalog();
    let scanner = scanner(&catalog);

    write_project(project.path(), 6, 4);
    let files = conform::collect_files(&[project.path().display().to_string()], &[], &[]).unwrap();
    let before = ComplianceMetrics::from_report(&scanner.scan(&files), &[]);
    let first = store.record(before, None, 30).unwrap();
    assert!(first.trends.is_none());

    let summary = PatchEngine::new(Arc::clone(&catalog)).apply(&scanner.scan(&files).files);
    assert_eq!(summary.fixes_applied, 4);

    let after = ComplianceMetrics::from_report(&scanner.scan(&files), &[]);
    let second = store.record(after, None, 30).unwrap();
    let trend: TrendMetrics = second.trends.unwrap();

    assert_eq!(trend.violation_reduction, 4);
    assert!((trend.compliance_improvement - 40.0).abs() < 1e-9);
    assert_eq!(trend.files_improved, 4);
    assert_eq!(store.trend(30).unwrap().map(|t| t.violation_reduction), Some(4));
    assert_eq!(
        store.load_latest().unwrap().map(|l| l.generated_at),
        Some(second.generated_at)
    );
}
