//! Patch engine
//!
//! Applies span-based suggestions to files. Each file is one transaction:
//!
//! ```text
//! Pending -> BackedUp -> Applied -> Verified | Failed
//! ```
//!
//! Edits run bottom-up so an edit never shifts the position of one that is
//! still waiting. Before each edit the engine checks that the text under the
//! span is still the text the scanner saw; if not, only that edit fails with
//! `stale span`. The rewritten file is written once, through a sibling temp
//! file and a rename.

use crate::config::FixConfig;
use crate::diagnostic::{Confidence, Diagnostic, Level, Priority, Span, Suggestion, SuggestionKind};
use crate::rule::RuleCatalog;
use crate::scanner::{scan_source, FileScan};
use crate::validate::{adjust_confidence, ValidationOutcome, Validator};
use dashmap::DashMap;
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors that abort one file's transaction
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("stale span")]
    StaleSpan { file: PathBuf, line: usize },

    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot back up {}: {source}", path.display())]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where a file's transaction ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    #[default]
    Pending,
    BackedUp,
    Applied,
    Verified,
    Failed,
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileState::Pending => "pending",
            FileState::BackedUp => "backed up",
            FileState::Applied => "applied",
            FileState::Verified => "verified",
            FileState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of one edit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FixRecord {
    pub file: PathBuf,
    pub rule_id: String,
    pub line: usize,
    pub original_line: String,
    pub patched_line: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub confidence: Confidence,
}

/// An edit a dry run would make
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedEdit {
    pub file: PathBuf,
    pub rule_id: String,
    pub line: usize,
    pub column: usize,
    pub before: String,
    pub after: String,
    pub confidence: Confidence,
}

/// Everything that happened to one file
#[derive(Debug, Clone, Default)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub state: FileState,
    pub records: Vec<FixRecord>,
    pub planned: Vec<PlannedEdit>,
    pub conflicts: usize,
    /// New content reached the disk
    pub written: bool,
    pub backup: Option<PathBuf>,
    pub diff: Option<String>,
    pub validation: Option<ValidationOutcome>,
    pub error: Option<String>,
}

impl FileOutcome {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            ..Default::default()
        }
    }

    pub fn applied(&self) -> usize {
        self.records.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.records.iter().filter(|r| !r.success).count()
    }

    pub fn modified(&self) -> bool {
        self.written
    }
}

/// Totals over a fix run
#[derive(Debug, Clone, Default)]
pub struct FixSummary {
    pub files: Vec<FileOutcome>,
    pub fixes_planned: usize,
    pub fixes_applied: usize,
    pub fixes_failed: usize,
    pub conflicts: usize,
    pub files_modified: usize,
    pub files_verified: usize,
}

impl FixSummary {
    pub fn add(&mut self, outcome: FileOutcome) {
        self.fixes_planned += outcome.planned.len();
        self.fixes_applied += outcome.applied();
        self.fixes_failed += outcome.failed();
        self.conflicts += outcome.conflicts;
        if outcome.modified() {
            self.files_modified += 1;
        }
        if outcome.state == FileState::Verified {
            self.files_verified += 1;
        }
        self.files.push(outcome);
    }

    pub fn records(&self) -> impl Iterator<Item = &FixRecord> {
        self.files.iter().flat_map(|f| f.records.iter())
    }

    pub fn planned(&self) -> impl Iterator<Item = &PlannedEdit> {
        self.files.iter().flat_map(|f| f.planned.iter())
    }

    /// Per-file errors, such as a failed write
    pub fn errors(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.files
            .iter()
            .filter_map(|f| f.error.as_deref().map(|e| (f.path.as_path(), e)))
    }

    pub fn diffs(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.files
            .iter()
            .filter_map(|f| f.diff.as_deref().map(|d| (f.path.as_path(), d)))
    }

    /// Applied edits as a share of attempted ones (100 when nothing was attempted)
    pub fn success_rate(&self) -> f64 {
        let attempted = self.fixes_applied + self.fixes_failed;
        if attempted == 0 {
            100.0
        } else {
            self.fixes_applied as f64 / attempted as f64 * 100.0
        }
    }
}

#[derive(Clone, Copy)]
struct Edit<'a> {
    diagnostic: &'a Diagnostic,
    suggestion: &'a Suggestion,
    span: &'a Span,
}

impl Edit<'_> {
    fn rule_id(&self) -> &str {
        &self.diagnostic.rule_id
    }

    fn rank(&self) -> (Level, Option<Priority>) {
        (self.diagnostic.level(), self.diagnostic.severity.priority())
    }
}

struct Rewritten {
    rule_id: String,
    line: usize,
    column: usize,
    confidence: Confidence,
    result: Result<(String, String), PatchError>,
}

/// Applies suggestions to files
pub struct PatchEngine {
    catalog: Arc<RuleCatalog>,
    options: FixConfig,
    diff: bool,
    validator: Option<Arc<dyn Validator>>,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl PatchEngine {
    pub fn new(catalog: Arc<RuleCatalog>) -> Self {
        Self::from_config(catalog, &FixConfig::default())
    }

    pub fn from_config(catalog: Arc<RuleCatalog>, config: &FixConfig) -> Self {
        Self {
            catalog,
            options: config.clone(),
            diff: false,
            validator: None,
            locks: DashMap::new(),
        }
    }

    pub fn with_threshold(mut self, threshold: Confidence) -> Self {
        self.options.threshold = threshold;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.options.dry_run = dry_run;
        self
    }

    pub fn with_backup_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.options.backup_dir = dir;
        self
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.options.categories = categories;
        self
    }

    pub fn with_prefer_priority(mut self, prefer: bool) -> Self {
        self.options.prefer_priority = prefer;
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.options.verify = verify;
        self
    }

    /// Produce a unified-style diff per changed file
    pub fn with_diff(mut self, diff: bool) -> Self {
        self.diff = diff;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.options.dry_run
    }

    /// Fix every scanned file; files are independent and run in parallel
    pub fn apply(&self, files: &[FileScan]) -> FixSummary {
        let outcomes: Vec<FileOutcome> = files
            .par_iter()
            .filter(|f| !f.diagnostics.is_empty())
            .map(|f| self.apply_file(&f.path, &f.diagnostics))
            .collect();

        let mut summary = FixSummary::default();
        for outcome in outcomes {
            summary.add(outcome);
        }
        log::info!(
            "fixes: {} applied, {} failed, {} conflicts, {} files modified",
            summary.fixes_applied,
            summary.fixes_failed,
            summary.conflicts,
            summary.files_modified
        );
        summary
    }

    /// Run the transaction for one file
    pub fn apply_file(&self, path: &Path, diagnostics: &[Diagnostic]) -> FileOutcome {
        let mut outcome = FileOutcome::new(path);
        let (edits, conflicts) = self.plan(path, diagnostics);
        outcome.conflicts = conflicts.len();

        if edits.is_empty() && conflicts.is_empty() {
            return outcome;
        }
        if self.options.dry_run {
            self.dry_run(path, &edits, &mut outcome);
            return outcome;
        }

        let lock = self.lock_for(path);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(source) => {
                let err = PatchError::Read {
                    path: path.to_path_buf(),
                    source,
                };
                return self.abort(outcome, &edits, &conflicts, &err.to_string(), "");
            }
        };

        if let Some(dir) = &self.options.backup_dir {
            match backup(dir, path, &content) {
                Ok(copy) => {
                    log::debug!("backed up {} to {}", path.display(), copy.display());
                    outcome.backup = Some(copy);
                    outcome.state = FileState::BackedUp;
                }
                Err(e) => return self.abort(outcome, &edits, &conflicts, &e.to_string(), &content),
            }
        }

        let (new_content, rewritten) = rewrite(&content, &edits);
        for r in rewritten {
            outcome.records.push(record(path, r));
        }
        for (loser, winner) in &conflicts {
            outcome.records.push(conflict_record(path, loser, winner, &content));
        }

        if outcome.applied() == 0 {
            if outcome.failed() > 0 {
                outcome.state = FileState::Failed;
            }
            return outcome;
        }

        if let Err(e) = write_atomic(path, &new_content) {
            log::warn!("{}", e);
            let message = e.to_string();
            for r in outcome.records.iter_mut().filter(|r| r.success) {
                r.success = false;
                r.error = Some(message.clone());
            }
            outcome.error = Some(message);
            outcome.state = FileState::Failed;
            return outcome;
        }
        outcome.written = true;
        outcome.state = FileState::Applied;

        if self.diff {
            outcome.diff = Some(unified_diff(path, &content, &new_content));
        }

        if self.options.verify {
            self.verify(path, &new_content, &mut outcome);
        }

        if let Some(validator) = &self.validator {
            let result = validator.check(path);
            if let ValidationOutcome::Failed(message) = &result {
                log::warn!("{} failed validation after fixing: {}", path.display(), message);
            }
            for r in outcome.records.iter_mut().filter(|r| r.success) {
                r.confidence = adjust_confidence(&result, r.confidence);
            }
            outcome.validation = Some(result);
        }

        outcome
    }

    /// Select, order and de-conflict the edits for one file
    fn plan<'a>(
        &self,
        path: &Path,
        diagnostics: &'a [Diagnostic],
    ) -> (Vec<Edit<'a>>, Vec<(Edit<'a>, String)>) {
        let mut candidates: Vec<Edit<'a>> = diagnostics
            .iter()
            .filter(|d| self.options.selects_category(&d.category))
            .filter(|d| {
                self.catalog
                    .get(&d.rule_id)
                    .map(|r| r.def.auto_fixable)
                    .unwrap_or(true)
            })
            .flat_map(|d| {
                d.applicable_suggestions(self.options.threshold)
                    .filter_map(move |s| {
                        s.span.as_ref().map(|span| Edit {
                            diagnostic: d,
                            suggestion: s,
                            span,
                        })
                    })
            })
            .filter(|e| e.span.file == path)
            .collect();

        candidates.sort_by(|a, b| {
            b.span
                .start()
                .cmp(&a.span.start())
                .then_with(|| a.rule_id().cmp(b.rule_id()))
        });

        let mut accepted: Vec<Edit<'a>> = Vec::new();
        let mut conflicts: Vec<(Edit<'a>, String)> = Vec::new();
        for edit in candidates {
            let clashes: Vec<usize> = accepted
                .iter()
                .enumerate()
                .filter(|(_, a)| a.span.overlaps(edit.span))
                .map(|(i, _)| i)
                .collect();
            let Some(&first) = clashes.first() else {
                accepted.push(edit);
                continue;
            };

            let wins = self.options.prefer_priority
                && clashes.iter().all(|&i| edit.rank() > accepted[i].rank());
            if wins {
                for i in clashes.into_iter().rev() {
                    let loser = accepted.remove(i);
                    log::info!("{} overrides {} at {}", edit.rule_id(), loser.rule_id(), loser.span);
                    conflicts.push((loser, edit.rule_id().to_string()));
                }
                accepted.push(edit);
            } else {
                let winner = accepted[first].rule_id().to_string();
                log::info!("{} overlaps {} at {}, needs manual review", edit.rule_id(), winner, edit.span);
                conflicts.push((edit, winner));
            }
        }

        (accepted, conflicts)
    }

    fn dry_run(&self, path: &Path, edits: &[Edit<'_>], outcome: &mut FileOutcome) {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                outcome.error = Some(
                    PatchError::Read {
                        path: path.to_path_buf(),
                        source: e,
                    }
                    .to_string(),
                );
                return;
            }
        };

        let (new_content, rewritten) = rewrite(&content, edits);
        for r in rewritten {
            match r.result {
                Ok((before, after)) => outcome.planned.push(PlannedEdit {
                    file: path.to_path_buf(),
                    rule_id: r.rule_id,
                    line: r.line,
                    column: r.column,
                    before,
                    after,
                    confidence: r.confidence,
                }),
                Err(e) => log::warn!("{}:{}: {} ({})", path.display(), r.line, e, r.rule_id),
            }
        }
        outcome.planned.reverse();
        if self.diff && new_content != content {
            outcome.diff = Some(unified_diff(path, &content, &new_content));
        }
    }

    /// Re-scan the new content; a rule with applied fixes must no longer match anywhere
    fn verify(&self, path: &Path, content: &str, outcome: &mut FileOutcome) {
        let mut fixed: Vec<&str> = outcome
            .records
            .iter()
            .filter(|r| r.success)
            .map(|r| r.rule_id.as_str())
            .collect();
        fixed.sort_unstable();
        fixed.dedup();

        let after = scan_source(path, content, &self.catalog);

        let mut problems = Vec::new();
        for rule in fixed {
            let remaining = after.iter().filter(|d| d.rule_id == rule).count();
            if remaining > 0 {
                problems.push(format!("{} still matches {} time(s)", rule, remaining));
            }
        }

        if problems.is_empty() {
            outcome.state = FileState::Verified;
        } else {
            let message = format!("verification failed: {}", problems.join(", "));
            log::warn!("{}: {}", path.display(), message);
            outcome.state = FileState::Failed;
            outcome.error = Some(message);
        }
    }

    fn abort(
        &self,
        mut outcome: FileOutcome,
        edits: &[Edit<'_>],
        conflicts: &[(Edit<'_>, String)],
        message: &str,
        content: &str,
    ) -> FileOutcome {
        log::warn!("{}", message);
        for edit in edits {
            outcome.records.push(FixRecord {
                file: outcome.path.clone(),
                rule_id: edit.rule_id().to_string(),
                line: edit.span.start_line,
                original_line: line_text(content, edit.span.start_line),
                patched_line: String::new(),
                success: false,
                error: Some(message.to_string()),
                confidence: edit.suggestion.confidence,
            });
        }
        for (loser, winner) in conflicts {
            let record = conflict_record(&outcome.path, loser, winner, content);
            outcome.records.push(record);
        }
        outcome.error = Some(message.to_string());
        outcome.state = FileState::Failed;
        outcome
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let key = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn record(path: &Path, r: Rewritten) -> FixRecord {
    let (original_line, patched_line, success, error) = match r.result {
        Ok((before, after)) => (before, after, true, None),
        Err(e) => (String::new(), String::new(), false, Some(e.to_string())),
    };
    FixRecord {
        file: path.to_path_buf(),
        rule_id: r.rule_id,
        line: r.line,
        original_line,
        patched_line,
        success,
        error,
        confidence: r.confidence,
    }
}

fn conflict_record(path: &Path, edit: &Edit<'_>, winner: &str, content: &str) -> FixRecord {
    FixRecord {
        file: path.to_path_buf(),
        rule_id: edit.rule_id().to_string(),
        line: edit.span.start_line,
        original_line: line_text(content, edit.span.start_line),
        patched_line: String::new(),
        success: false,
        error: Some(format!("conflict: overlaps {}", winner)),
        confidence: edit.suggestion.confidence,
    }
}

/// Apply edits in the given (bottom-up) order, guarding each against stale text
fn rewrite(content: &str, edits: &[Edit<'_>]) -> (String, Vec<Rewritten>) {
    let mut text = content.to_string();
    let mut results = Vec::with_capacity(edits.len());

    for edit in edits {
        let span = edit.span;
        let result = locate(&text, span).map(|(start, end)| {
            let before = line_text(&text, span.start_line);
            match edit.suggestion.kind {
                SuggestionKind::Replace => text.replace_range(start..end, &edit.suggestion.text),
                SuggestionKind::Insert => text.insert_str(start, &edit.suggestion.text),
                SuggestionKind::Delete => text.replace_range(start..end, ""),
            }
            (before, line_text(&text, span.start_line))
        });
        results.push(Rewritten {
            rule_id: edit.rule_id().to_string(),
            line: span.start_line,
            column: span.start_column,
            confidence: edit.suggestion.confidence,
            result,
        });
    }

    (text, results)
}

/// Byte range of a span, if the text there still matches its snippet
fn locate(content: &str, span: &Span) -> Result<(usize, usize), PatchError> {
    let stale = || PatchError::StaleSpan {
        file: span.file.clone(),
        line: span.start_line,
    };
    let start = byte_offset(content, span.start_line, span.start_column).ok_or_else(stale)?;
    let end = byte_offset(content, span.end_line, span.end_column).ok_or_else(stale)?;
    if end < start {
        return Err(stale());
    }
    let expected = span.snippet.as_deref().unwrap_or("");
    if &content[start..end] != expected {
        return Err(stale());
    }
    Ok((start, end))
}

/// Byte offset of a 1-based line and character column
fn byte_offset(content: &str, line: usize, column: usize) -> Option<usize> {
    if line == 0 || column == 0 {
        return None;
    }
    let mut start = 0;
    for _ in 1..line {
        start += content[start..].find('\n')? + 1;
    }
    let rest = &content[start..];
    let text = &rest[..rest.find('\n').unwrap_or(rest.len())];
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .nth(column - 1)
        .map(|i| start + i)
}

fn line_text(content: &str, line: usize) -> String {
    line.checked_sub(1)
        .and_then(|i| content.lines().nth(i))
        .unwrap_or("")
        .to_string()
}

/// Where a file's backup copy lives: its relative path under `dir`
pub fn backup_path(dir: &Path, file: &Path) -> PathBuf {
    let relative = if file.is_absolute() {
        std::env::current_dir()
            .ok()
            .and_then(|cwd| file.strip_prefix(cwd).ok().map(Path::to_path_buf))
            .unwrap_or_else(|| file.to_path_buf())
    } else {
        file.to_path_buf()
    };
    let normal: PathBuf = relative
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    dir.join(normal)
}

fn backup(dir: &Path, file: &Path, content: &str) -> Result<PathBuf, PatchError> {
    let target = backup_path(dir, file);
    let err = |source| PatchError::Backup {
        path: file.to_path_buf(),
        source,
    };
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(err)?;
    }
    fs::write(&target, content).map_err(err)?;
    Ok(target)
}

/// Write through a sibling temp file so readers never see a partial file
fn write_atomic(path: &Path, content: &str) -> Result<(), PatchError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.conform-tmp", name));
    let err = |source| PatchError::Write {
        path: path.to_path_buf(),
        source,
    };

    fs::write(&tmp, content).map_err(err)?;
    if let Ok(meta) = fs::metadata(path) {
        let _ = fs::set_permissions(&tmp, meta.permissions());
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err(e));
    }
    Ok(())
}

/// Single-hunk unified diff around the changed region
pub fn unified_diff(path: &Path, original: &str, modified: &str) -> String {
    let old: Vec<&str> = original.lines().collect();
    let new: Vec<&str> = modified.lines().collect();

    let mut out = format!("--- a/{0}\n+++ b/{0}\n", path.display());

    let prefix = old.iter().zip(&new).take_while(|(a, b)| a == b).count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let old_changed = &old[prefix..old.len() - suffix];
    let new_changed = &new[prefix..new.len() - suffix];
    if old_changed.is_empty() && new_changed.is_empty() {
        return out;
    }

    let context_start = prefix.saturating_sub(1);
    let context_end = (old.len() - suffix + 1).min(old.len());
    let leading = &old[context_start..prefix];
    let trailing = &old[old.len() - suffix..context_end];

    out.push_str(&format!(
        "@@ -{},{} +{},{} @@\n",
        context_start + 1,
        leading.len() + old_changed.len() + trailing.len(),
        context_start + 1,
        leading.len() + new_changed.len() + trailing.len()
    ));
    for line in leading {
        out.push_str(&format!(" {}\n", line));
    }
    for line in old_changed {
        out.push_str(&format!("-{}\n", line));
    }
    for line in new_changed {
        out.push_str(&format!("+{}\n", line));
    }
    for line in trailing {
        out.push_str(&format!(" {}\n", line));
    }
    out
}
