//! Configuration
//!
//! Reads configuration from:
//! - `.conformrc.yaml` / `.conformrc.json` (project-level)
//! - `~/.conformrc.yaml` (user-level)
//!
//! The loaded value is passed explicitly to the scanner, the patch engine and
//! the metrics store; nothing reads configuration from global state.

use crate::diagnostic::Confidence;
use crate::fixgen::rank_similar;
use crate::rule::{RuleCatalog, RuleError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Scanner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Enable parallel processing
    pub parallel: bool,

    /// Number of parallel jobs (0 = auto-detect)
    pub jobs: usize,

    /// Include patterns for directory and glob expansion
    pub include: Vec<String>,

    /// Exclude patterns
    pub exclude: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            jobs: 0,
            include: vec!["**/*.asthra".to_string()],
            exclude: vec![
                "**/target/**".to_string(),
                "**/build/**".to_string(),
                "**/.git/**".to_string(),
            ],
        }
    }
}

/// Patch engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixConfig {
    /// Minimum confidence for an edit to be applied
    pub threshold: Confidence,

    /// Directory receiving copies of files before they are rewritten
    pub backup_dir: Option<PathBuf>,

    /// Report planned edits without touching files
    pub dry_run: bool,

    /// Resolve overlapping edits from different rules by rule priority
    /// instead of reporting a conflict
    pub prefer_priority: bool,

    /// Categories to fix (empty = all)
    pub categories: Vec<String>,

    /// Re-scan files after writing them
    pub verify: bool,
}

impl Default for FixConfig {
    fn default() -> Self {
        Self {
            threshold: Confidence::High,
            backup_dir: None,
            dry_run: false,
            prefer_priority: false,
            categories: Vec::new(),
            verify: true,
        }
    }
}

impl FixConfig {
    /// Empty or `all` selects every category
    pub fn selects_category(&self, category: &str) -> bool {
        self.categories.is_empty()
            || self.categories.iter().any(|c| c == "all" || c == category)
    }
}

/// External syntax checker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Program to run; `None` disables validation
    pub command: Option<String>,

    /// Arguments; `{file}` is replaced with the checked path
    pub args: Vec<String>,

    /// Upper bound on one check
    pub timeout_secs: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: vec!["{file}".to_string()],
            timeout_secs: 10,
        }
    }
}

/// Metrics history settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Record compliance snapshots after each scan
    pub enabled: bool,

    /// History directory
    pub dir: PathBuf,

    /// Trend window in days
    pub trend_days: u32,

    /// Maximum detailed findings in Markdown reports
    pub max_detailed: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".conform/metrics"),
            trend_days: 30,
            max_detailed: 50,
        }
    }
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Lsp,
    Markdown,
    Csv,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "lsp" => Ok(OutputFormat::Lsp),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

/// Color mode options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    #[default]
    Auto,
    Always,
    Never,
}

/// Output settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub color: ColorMode,
    pub quiet: bool,
    pub verbose: bool,
    /// Exit with status 1 while violations remain
    pub strict: bool,
}

/// Rule selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Disabled rule ids
    pub disabled: Vec<String>,

    /// Extra rule catalogs (YAML or JSON)
    pub files: Vec<PathBuf>,
}

/// Values from the command line that override the file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub format: Option<OutputFormat>,
    pub jobs: Option<usize>,
    pub threshold: Option<Confidence>,
    pub backup_dir: Option<PathBuf>,
    pub dry_run: bool,
    pub categories: Option<Vec<String>>,
    pub metrics_dir: Option<PathBuf>,
    pub no_metrics: bool,
    pub validate_cmd: Option<String>,
    pub quiet: bool,
    pub verbose: bool,
    pub strict: bool,
    pub no_color: bool,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub fix: FixConfig,
    pub validator: ValidatorConfig,
    pub metrics: MetricsConfig,
    pub output: OutputConfig,
    pub rules: RulesConfig,
}

const CONFIG_NAMES: [&str; 6] = [
    ".conformrc.yaml",
    ".conformrc.yml",
    ".conformrc.json",
    "conform.yaml",
    "conform.yml",
    "conform.json",
];

impl Config {
    /// Create default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let mut config: Self = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "Unknown config file format: {}",
                    ext
                )))
            }
        };

        // Relative rule files resolve against the config file
        let base_dir = path.parent().unwrap_or(Path::new("."));
        for file in &mut config.rules.files {
            if file.is_relative() {
                *file = base_dir.join(&*file);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the working directory, then the home directory
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load_from_dirs(Some(Path::new(".")), dirs::home_dir().as_deref())
    }

    fn load_from_dirs(cwd: Option<&Path>, home: Option<&Path>) -> Result<Self, ConfigError> {
        for dir in [cwd, home].into_iter().flatten() {
            for name in &CONFIG_NAMES {
                let path = dir.join(name);
                if path.exists() {
                    log::debug!("using config {}", path.display());
                    return Self::load(&path);
                }
            }
        }
        Ok(Self::default())
    }

    /// Reject values that cannot work
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.validator.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "validator.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.metrics.trend_days == 0 {
            return Err(ConfigError::Invalid(
                "metrics.trend_days must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Merge CLI arguments into configuration
    pub fn merge_cli(&mut self, cli: CliOverrides) {
        if let Some(f) = cli.format {
            self.output.format = f;
        }
        if let Some(j) = cli.jobs {
            self.scan.jobs = j;
        }
        if let Some(t) = cli.threshold {
            self.fix.threshold = t;
        }
        if cli.backup_dir.is_some() {
            self.fix.backup_dir = cli.backup_dir;
        }
        if let Some(categories) = cli.categories {
            self.fix.categories = categories;
        }
        if let Some(dir) = cli.metrics_dir {
            self.metrics.dir = dir;
        }
        if let Some(cmd) = cli.validate_cmd {
            self.validator.command = Some(cmd);
        }
        if cli.no_color {
            self.output.color = ColorMode::Never;
        }
        self.fix.dry_run |= cli.dry_run;
        self.metrics.enabled &= !cli.no_metrics;
        self.output.quiet |= cli.quiet;
        self.output.verbose |= cli.verbose;
        self.output.strict |= cli.strict;
    }

    /// Built-in rules plus configured rule files, minus disabled rules
    pub fn build_catalog(&self) -> Result<RuleCatalog, RuleError> {
        let mut catalog = RuleCatalog::builtin();
        for file in &self.rules.files {
            catalog.extend_from_file(file)?;
        }
        for warning in self.unknown_rule_warnings(&catalog) {
            log::warn!("{}", warning);
        }
        catalog.disable(&self.rules.disabled);
        Ok(catalog)
    }

    /// Messages for disabled rule ids the catalog does not know
    pub fn unknown_rule_warnings(&self, catalog: &RuleCatalog) -> Vec<String> {
        self.rules
            .disabled
            .iter()
            .filter(|id| catalog.get(id).is_none())
            .map(|id| {
                let ids = catalog.definitions().map(|d| d.id.as_str());
                match rank_similar(id, ids, 1).into_iter().next() {
                    Some((best, _)) => {
                        format!("unknown rule '{}' in rules.disabled, did you mean '{}'?", id, best)
                    }
                    None => format!("unknown rule '{}' in rules.disabled", id),
                }
            })
            .collect()
    }

    /// Whether a rule category is selected for fixing
    pub fn fixes_category(&self, category: &str) -> bool {
        self.fix.selects_category(category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::new();
        assert!(config.scan.parallel);
        assert_eq!(config.scan.jobs, 0);
        assert_eq!(config.fix.threshold, Confidence::High);
        assert_eq!(config.output.format, OutputFormat::Text);
        assert_eq!(config.metrics.trend_days, 30);
        assert!(config.validator.command.is_none());
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("lsp".parse::<OutputFormat>().unwrap(), OutputFormat::Lsp);
        assert_eq!("md".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert!("sarif".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_yaml_deserialize() {
        let yaml = r#"
scan:
  parallel: false
  jobs: 4
fix:
  threshold: medium
  backup_dir: backups
output:
  format: json
rules:
  disabled:
    - return-void
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(!config.scan.parallel);
        assert_eq!(config.scan.jobs, 4);
        assert_eq!(config.fix.threshold, Confidence::Medium);
        assert_eq!(config.fix.backup_dir, Some(PathBuf::from("backups")));
        assert_eq!(config.output.format, OutputFormat::Json);
        assert!(config.fix.verify);
        assert!(!config.scan.include.is_empty());
    }

    #[test]
    fn test_config_merge_cli() {
        let mut config = Config::new();
        config.merge_cli(CliOverrides {
            format: Some(OutputFormat::Markdown),
            jobs: Some(2),
            threshold: Some(Confidence::Low),
            categories: Some(vec!["auto_type".to_string()]),
            no_metrics: true,
            strict: true,
            no_color: true,
            ..CliOverrides::default()
        });

        assert_eq!(config.output.format, OutputFormat::Markdown);
        assert_eq!(config.scan.jobs, 2);
        assert_eq!(config.fix.threshold, Confidence::Low);
        assert!(!config.metrics.enabled);
        assert!(config.output.strict);
        assert_eq!(config.output.color, ColorMode::Never);
        assert!(config.fixes_category("auto_type"));
        assert!(!config.fixes_category("return_void"));
    }

    #[test]
    fn test_fixes_all_categories() {
        let mut config = Config::new();
        assert!(config.fixes_category("anything"));
        config.fix.categories = vec!["all".to_string()];
        assert!(config.fixes_category("anything"));
    }

    #[test]
    fn test_load_json_resolves_rule_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".conformrc.json");
        fs::write(&path, r#"{"rules": {"files": ["extra.yaml"]}}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.rules.files, vec![dir.path().join("extra.yaml")]);
    }

    #[test]
    fn test_load_rejects_unknown_extension_and_zero_timeout() {
        let dir = TempDir::new().unwrap();
        let toml = dir.path().join("conform.toml");
        fs::write(&toml, "").unwrap();
        assert!(matches!(Config::load(&toml), Err(ConfigError::Invalid(_))));

        let yaml = dir.path().join("conform.yaml");
        fs::write(&yaml, "validator:\n  timeout_secs: 0\n").unwrap();
        assert!(matches!(Config::load(&yaml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_dirs_prefers_cwd() {
        let cwd = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        fs::write(cwd.path().join(".conformrc.yaml"), "scan:\n  jobs: 3\n").unwrap();
        fs::write(home.path().join(".conformrc.yaml"), "scan:\n  jobs: 9\n").unwrap();

        let config = Config::load_from_dirs(Some(cwd.path()), Some(home.path())).unwrap();
        assert_eq!(config.scan.jobs, 3);

        let empty = TempDir::new().unwrap();
        let config = Config::load_from_dirs(Some(empty.path()), Some(home.path())).unwrap();
        assert_eq!(config.scan.jobs, 9);
    }

    #[test]
    fn test_build_catalog_disables_and_warns() {
        let mut config = Config::new();
        config.rules.disabled = vec!["return-void".to_string(), "retrun-void".to_string()];

        let catalog = config.build_catalog().unwrap();
        assert!(!catalog.get("return-void").unwrap().def.enabled);

        let warnings = config.unknown_rule_warnings(&catalog);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("did you mean 'return-void'"));
    }
}
