//! Violation scanner
//!
//! [`scan_source`] is a pure function of the text and the catalog, so files are
//! scanned in parallel on a bounded rayon pool. Unreadable files become
//! warnings in the report; they never stop the run.

use crate::config::ScanConfig;
use crate::diagnostic::{Diagnostic, Metadata, Span};
use crate::fixgen::FixGenerator;
use crate::rule::RuleCatalog;
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Scan-level failure for one file or pattern
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not valid UTF-8", path.display())]
    Decode { path: PathBuf },

    #[error("invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },
}

impl ScanError {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ScanError::Io { path, .. } | ScanError::Decode { path } => Some(path),
            ScanError::Pattern { .. } => None,
        }
    }
}

/// Line is blank or a comment
fn is_skipped_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.is_empty()
        || trimmed.starts_with("//")
        || trimmed.starts_with("/*")
        || trimmed.starts_with('*')
}

/// Byte offset `at` falls inside a double-quoted string literal
fn in_string_literal(line: &str, at: usize) -> bool {
    let mut inside = false;
    let mut escaped = false;
    for c in line[..at].chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if inside => escaped = true,
            '"' => inside = !inside,
            _ => {}
        }
    }
    inside
}

/// Scan one file's content against every enabled rule
pub fn scan_source(path: &Path, content: &str, catalog: &RuleCatalog) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    for (index, line) in content.lines().enumerate() {
        if is_skipped_line(line) {
            continue;
        }
        let line_number = index + 1;

        for rule in catalog.enabled() {
            if !rule.applies_to(line) {
                continue;
            }
            for m in rule.regex().find_iter(line) {
                if m.as_str().is_empty() || in_string_literal(line, m.start()) {
                    continue;
                }
                let column = line[..m.start()].chars().count() + 1;
                let length = m.as_str().chars().count();
                let span = Span::on_line(path, line_number, column, length).with_snippet(m.as_str());

                let message = format!("{}: `{}`", rule.def.display_title(), m.as_str().trim());
                diagnostics.push(
                    Diagnostic::new(&rule.def.id, rule.def.severity, &message)
                        .with_category(&rule.def.category)
                        .with_span(span)
                        .with_metadata(Metadata {
                            category: Some(rule.def.category.clone()),
                            ..Metadata::default()
                        }),
                );
            }
        }
    }

    diagnostics
}

/// Read a file as UTF-8
pub fn read_source(path: &Path) -> Result<String, ScanError> {
    let bytes = std::fs::read(path).map_err(|source| ScanError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|_| ScanError::Decode {
        path: path.to_path_buf(),
    })
}

/// Read and scan one file
pub fn scan_file(path: &Path, catalog: &RuleCatalog) -> Result<Vec<Diagnostic>, ScanError> {
    let content = read_source(path)?;
    Ok(scan_source(path, &content, catalog))
}

/// Findings for one file
#[derive(Debug, Clone, Default)]
pub struct FileScan {
    pub path: PathBuf,
    pub diagnostics: Vec<Diagnostic>,
}

impl FileScan {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Result of scanning a set of files
#[derive(Debug, Default)]
pub struct ScanReport {
    /// One entry per successfully scanned file, clean ones included
    pub files: Vec<FileScan>,

    /// Files that were skipped
    pub warnings: Vec<ScanError>,

    /// Processing duration
    pub duration: Duration,
}

impl ScanReport {
    pub fn files_scanned(&self) -> usize {
        self.files.len()
    }

    pub fn files_with_violations(&self) -> usize {
        self.files.iter().filter(|f| !f.is_clean()).count()
    }

    pub fn clean_files(&self) -> usize {
        self.files_scanned() - self.files_with_violations()
    }

    pub fn total_violations(&self) -> usize {
        self.files.iter().map(|f| f.diagnostics.len()).sum()
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.files.iter().flat_map(|f| f.diagnostics.iter())
    }

    /// All diagnostics, cloned in file order
    pub fn all_diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics().cloned().collect()
    }

    pub fn is_clean(&self) -> bool {
        self.total_violations() == 0
    }

    /// Exit code: 1 in strict mode when violations remain, 0 otherwise
    pub fn exit_code(&self, strict: bool) -> i32 {
        if strict && !self.is_clean() {
            1
        } else {
            0
        }
    }

    /// Merge another report into this one
    pub fn merge(&mut self, other: ScanReport) {
        self.files.extend(other.files);
        self.warnings.extend(other.warnings);
        self.duration += other.duration;
    }
}

/// Parallel scanner over a rule catalog
pub struct Scanner {
    catalog: Arc<RuleCatalog>,
    generator: Option<FixGenerator>,
    parallel: bool,
    jobs: usize,
}

impl Scanner {
    pub fn new(catalog: Arc<RuleCatalog>) -> Self {
        Self {
            catalog,
            generator: None,
            parallel: true,
            jobs: 0,
        }
    }

    /// Configure from the `scan` config section
    pub fn from_config(catalog: Arc<RuleCatalog>, config: &ScanConfig) -> Self {
        Self::new(catalog)
            .with_parallel(config.parallel)
            .with_jobs(config.jobs)
    }

    /// Attach suggestions to findings as files are scanned
    pub fn with_generator(mut self, generator: FixGenerator) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Number of worker threads (0 = one per CPU)
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    /// Scan files, in parallel when enabled
    pub fn scan(&self, files: &[PathBuf]) -> ScanReport {
        let start = Instant::now();

        let results: Vec<Result<FileScan, ScanError>> = if self.parallel && files.len() > 1 {
            let threads = if self.jobs > 0 {
                self.jobs
            } else {
                num_cpus::get()
            };
            match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
                Ok(pool) => pool.install(|| files.par_iter().map(|f| self.scan_one(f)).collect()),
                Err(e) => {
                    log::warn!("thread pool unavailable ({}), scanning sequentially", e);
                    files.iter().map(|f| self.scan_one(f)).collect()
                }
            }
        } else {
            files.iter().map(|f| self.scan_one(f)).collect()
        };

        let mut report = ScanReport::default();
        for result in results {
            match result {
                Ok(file) => report.files.push(file),
                Err(e) => {
                    log::warn!("skipping file: {}", e);
                    report.warnings.push(e);
                }
            }
        }

        report.duration = start.elapsed();
        log::debug!(
            "scanned {} files ({} skipped) in {:?}",
            report.files_scanned(),
            report.warnings.len(),
            report.duration
        );
        report
    }

    /// Scan one file and attach suggestions
    pub fn scan_one(&self, path: &Path) -> Result<FileScan, ScanError> {
        let content = read_source(path)?;
        let mut diagnostics = scan_source(path, &content, &self.catalog);
        if let Some(generator) = &self.generator {
            generator.attach(&mut diagnostics, &content);
        }
        Ok(FileScan {
            path: path.to_path_buf(),
            diagnostics,
        })
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, ScanError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| ScanError::Pattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| ScanError::Pattern {
        pattern: patterns.join(","),
        message: e.to_string(),
    })
}

fn expand_glob(pattern: &str, out: &mut Vec<PathBuf>) -> Result<(), ScanError> {
    let paths = glob::glob(pattern).map_err(|e| ScanError::Pattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;
    out.extend(paths.flatten().filter(|p| p.is_file()));
    Ok(())
}

/// Expand paths, directories and glob patterns into a sorted file list
///
/// Files found under a directory or through a glob must match `include`
/// (when non-empty). Files named explicitly skip that check. Everything is
/// filtered through `exclude`.
pub fn collect_files(
    inputs: &[String],
    include: &[String],
    exclude: &[String],
) -> Result<Vec<PathBuf>, ScanError> {
    let include_set = build_globset(include)?;
    let exclude_set = build_globset(exclude)?;
    let mut files = BTreeSet::new();

    for input in inputs {
        let path = Path::new(input);
        let mut found = Vec::new();

        if path.is_file() {
            if !exclude_set.is_match(path) {
                files.insert(path.to_path_buf());
            }
            continue;
        } else if path.is_dir() {
            let pattern = path.join("**").join("*");
            expand_glob(&pattern.to_string_lossy(), &mut found)?;
        } else {
            expand_glob(input, &mut found)?;
        }

        for file in found {
            let included = include.is_empty() || include_set.is_match(&file);
            if included && !exclude_set.is_match(&file) {
                files.insert(file);
            }
        }
    }

    Ok(files.into_iter().collect())
}
