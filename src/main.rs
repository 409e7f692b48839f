//! Conform CLI - scan sources, apply confident fixes, track compliance

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use conform::config::{CliOverrides, ColorMode, Config, OutputFormat};
use conform::diagnostic::{Confidence, Level};
use conform::fixer::{FixSummary, PatchEngine};
use conform::fixgen::FixGenerator;
use conform::history::MetricsStore;
use conform::output::{
    export_json, export_rules, export_suggestions, formatter_for, metrics_report, JsonReport,
    OutputFormatter, TextFormatter,
};
use conform::rule::RuleCatalog;
use conform::scanner::{collect_files, ScanReport, Scanner};
use conform::stats::{ComplianceMetrics, PerformanceMetrics};
use conform::validate::CommandValidator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(
    name = "conform",
    version,
    about = "Source conformance scanner with confidence-scored fixes",
    long_about = "Scans .asthra sources for grammar violations, applies fixes whose confidence \
                  meets a threshold, and records compliance metrics over time."
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan files and optionally fix violations
    Scan(ScanArgs),

    /// List the rule catalog
    Rules {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: RulesFormat,
    },

    /// Render the metrics report from recorded history
    Metrics {
        /// History directory
        #[arg(long)]
        metrics_dir: Option<PathBuf>,

        /// Trend window in days
        #[arg(long)]
        days: Option<u32>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "markdown")]
        format: MetricsFormat,
    },

    /// Export fix suggestions as JSON
    Suggestions {
        /// Files, directories or glob patterns
        #[arg(required = true)]
        paths: Vec<String>,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct ScanArgs {
    /// Files, directories or glob patterns to scan
    #[arg(required = true)]
    paths: Vec<String>,

    /// Fix violations in these categories (comma-separated, or `all`)
    #[arg(long, value_delimiter = ',')]
    fix: Option<Vec<String>>,

    /// Copy files here before rewriting them
    #[arg(long)]
    backup_dir: Option<PathBuf>,

    /// Report planned fixes without writing
    #[arg(long)]
    dry_run: bool,

    /// Show a diff of the planned changes
    #[arg(long)]
    diff: bool,

    /// Minimum confidence for a fix to be applied
    #[arg(long, value_enum)]
    threshold: Option<Threshold>,

    /// Also write the report to a file (format chosen by extension)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum)]
    format: Option<Format>,

    /// Exit with status 1 while violations remain
    #[arg(long)]
    strict: bool,

    /// Suppress report output on stdout
    #[arg(short, long)]
    quiet: bool,

    /// Metrics history directory
    #[arg(long)]
    metrics_dir: Option<PathBuf>,

    /// Do not record metrics for this run
    #[arg(long)]
    no_metrics: bool,

    /// Syntax checker run on each rewritten file
    #[arg(long)]
    validate_cmd: Option<String>,

    /// Number of parallel jobs (0 = auto)
    #[arg(short, long)]
    jobs: Option<usize>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
    Lsp,
    Markdown,
    Csv,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Text => OutputFormat::Text,
            Format::Json => OutputFormat::Json,
            Format::Lsp => OutputFormat::Lsp,
            Format::Markdown => OutputFormat::Markdown,
            Format::Csv => OutputFormat::Csv,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Threshold {
    High,
    Medium,
    Low,
}

impl From<Threshold> for Confidence {
    fn from(threshold: Threshold) -> Self {
        match threshold {
            Threshold::High => Confidence::High,
            Threshold::Medium => Confidence::Medium,
            Threshold::Low => Confidence::Low,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum RulesFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum MetricsFormat {
    Markdown,
    Json,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Config::load_default().context("failed to load config"),
    }
}

fn build_catalog(config: &Config) -> anyhow::Result<Arc<RuleCatalog>> {
    Ok(Arc::new(
        config.build_catalog().context("failed to build rule catalog")?,
    ))
}

/// Report format for `--report`, from the file extension
fn report_format(path: &Path) -> OutputFormat {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "json" => OutputFormat::Json,
        "md" | "markdown" => OutputFormat::Markdown,
        "csv" => OutputFormat::Csv,
        "lsp" => OutputFormat::Lsp,
        _ => OutputFormat::Text,
    }
}

fn render(
    format: OutputFormat,
    config: &Config,
    catalog: &Arc<RuleCatalog>,
    report: &ScanReport,
    fixes: Option<&FixSummary>,
) -> String {
    match (format, fixes) {
        (OutputFormat::Json, Some(summary)) => {
            export_json(&JsonReport::from_scan(report, catalog).with_fixes(summary))
        }
        (OutputFormat::Text, Some(summary)) => {
            let text = if config.output.color == ColorMode::Never {
                TextFormatter::new().without_color()
            } else {
                TextFormatter::new()
            };
            let mut out = text.format(report);
            out.push_str(&if config.fix.dry_run {
                text.format_planned(summary)
            } else {
                text.format_fixes(summary)
            });
            out
        }
        _ => formatter_for(format, config, Arc::clone(catalog)).format(report),
    }
}

fn run_scan(cli: &Cli, args: &ScanArgs) -> anyhow::Result<i32> {
    let mut config = load_config(cli.config.as_deref())?;
    config.merge_cli(CliOverrides {
        format: args.format.map(Into::into),
        jobs: args.jobs,
        threshold: args.threshold.map(Into::into),
        backup_dir: args.backup_dir.clone(),
        dry_run: args.dry_run,
        categories: args.fix.clone(),
        metrics_dir: args.metrics_dir.clone(),
        no_metrics: args.no_metrics,
        validate_cmd: args.validate_cmd.clone(),
        quiet: args.quiet,
        verbose: cli.verbose,
        strict: args.strict,
        no_color: cli.no_color,
    });

    let catalog = build_catalog(&config)?;
    let files = collect_files(&args.paths, &config.scan.include, &config.scan.exclude)?;
    if files.is_empty() {
        bail!("no files matched {}", args.paths.join(", "));
    }
    log::info!("scanning {} files with {} rules", files.len(), catalog.len());

    let scanner = Scanner::from_config(Arc::clone(&catalog), &config.scan)
        .with_generator(FixGenerator::new(Arc::clone(&catalog)));
    let mut report = scanner.scan(&files);
    let scan_secs = report.duration.as_secs_f64();

    let mut fixes = None;
    let mut fix_secs = 0.0;
    if args.fix.is_some() {
        let start = Instant::now();
        let mut engine =
            PatchEngine::from_config(Arc::clone(&catalog), &config.fix).with_diff(args.diff);
        if let Some(validator) = CommandValidator::from_config(&config.validator) {
            engine = engine.with_validator(Arc::new(validator));
        }
        let summary = engine.apply(&report.files);
        fix_secs = start.elapsed().as_secs_f64();

        if !engine.is_dry_run() && summary.files_modified > 0 {
            report = scanner.scan(&files);
        }
        fixes = Some(summary);
    }

    if !config.output.quiet {
        print!(
            "{}",
            render(config.output.format, &config, &catalog, &report, fixes.as_ref())
        );
    }

    if let Some(path) = &args.report {
        let mut file_config = config.clone();
        file_config.output.color = ColorMode::Never;
        let content = render(report_format(path), &file_config, &catalog, &report, fixes.as_ref());
        std::fs::write(path, content)
            .with_context(|| format!("failed to write report {}", path.display()))?;
        log::info!("report written to {}", path.display());
    }

    if config.metrics.enabled && !config.fix.dry_run {
        let roots: Vec<PathBuf> = args.paths.iter().map(PathBuf::from).collect();
        let compliance = ComplianceMetrics::from_report(&report, &roots);
        let performance = fixes.as_ref().map(|summary| {
            PerformanceMetrics::new(
                scan_secs,
                fix_secs,
                report.files_scanned(),
                summary.fixes_applied,
                summary.success_rate(),
            )
        });
        let store = MetricsStore::new(&config.metrics.dir);
        if let Err(e) = store.record(compliance, performance, config.metrics.trend_days) {
            log::warn!("failed to record metrics: {}", e);
        }
    }

    Ok(report.exit_code(config.output.strict))
}

fn run_rules(cli: &Cli, format: RulesFormat) -> anyhow::Result<i32> {
    let config = load_config(cli.config.as_deref())?;
    let catalog = build_catalog(&config)?;

    match format {
        RulesFormat::Json => println!("{}", export_rules(&catalog)),
        RulesFormat::Text => {
            println!("{} rules\n", catalog.len().to_string().bold());
            for rule in catalog.definitions() {
                let severity = match rule.severity.level() {
                    Level::Error => rule.severity.to_string().red(),
                    Level::Warning => rule.severity.to_string().yellow(),
                    Level::Help => rule.severity.to_string().cyan(),
                    Level::Note => rule.severity.to_string().blue(),
                };
                let fixable = if rule.auto_fixable {
                    " [fixable]".green()
                } else {
                    "".normal()
                };
                println!(
                    "  {} [{}] ({}){}",
                    rule.id.cyan(),
                    severity,
                    rule.category,
                    fixable
                );
                println!("      {}", rule.display_title());
            }
        }
    }
    Ok(0)
}

fn run_metrics(
    cli: &Cli,
    metrics_dir: Option<&Path>,
    days: Option<u32>,
    format: MetricsFormat,
) -> anyhow::Result<i32> {
    let config = load_config(cli.config.as_deref())?;
    let dir = metrics_dir.unwrap_or(config.metrics.dir.as_path());
    let days = days.unwrap_or(config.metrics.trend_days);

    let store = MetricsStore::new(dir);
    let Some(mut latest) = store.load_latest()? else {
        bail!("no metrics recorded in {}", dir.display());
    };
    latest.trends = store.trend(days)?;

    match format {
        MetricsFormat::Json => println!("{}", serde_json::to_string_pretty(&latest)?),
        MetricsFormat::Markdown => print!(
            "{}",
            metrics_report(
                &latest.compliance,
                latest.performance.as_ref(),
                latest.trends.as_ref(),
                latest.generated_at,
                Some(dir),
            )
        ),
    }
    Ok(0)
}

fn run_suggestions(cli: &Cli, paths: &[String], output: Option<&Path>) -> anyhow::Result<i32> {
    let config = load_config(cli.config.as_deref())?;
    let catalog = build_catalog(&config)?;
    let files = collect_files(paths, &config.scan.include, &config.scan.exclude)?;

    let report = Scanner::from_config(Arc::clone(&catalog), &config.scan)
        .with_generator(FixGenerator::new(Arc::clone(&catalog)))
        .scan(&files);
    let json = export_suggestions(&report.all_diagnostics());

    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            log::info!("suggestions written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(0)
}

fn run(cli: &Cli) -> anyhow::Result<i32> {
    match &cli.command {
        Commands::Scan(args) => run_scan(cli, args),
        Commands::Rules { format } => run_rules(cli, *format),
        Commands::Metrics {
            metrics_dir,
            days,
            format,
        } => run_metrics(cli, metrics_dir.as_deref(), *days, *format),
        Commands::Suggestions { paths, output } => run_suggestions(cli, paths, output.as_deref()),
    }
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if cli.no_color {
        colored::control::set_override(false);
    }

    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}: {:#}", "error".red().bold(), e);
            std::process::exit(2);
        }
    }
}
