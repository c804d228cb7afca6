// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result, anyhow};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, debug, info, warn};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use chapterflow::app_config::{self, Config, Tier};
use chapterflow::language_utils::{ContentClass, classify_language, count_raw_chars};
use chapterflow::translation::{BatchAssembler, ProfileMode, ProfileTable};
use chapterflow::validation::IntegrityValidator;

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

/// CLI Wrapper for Tier to implement ValueEnum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliTier {
    Flash,
    Normal,
    Pro,
}

impl From<CliTier> for Tier {
    fn from(cli_tier: CliTier) -> Self {
        match cli_tier {
            CliTier::Flash => Tier::Flash,
            CliTier::Normal => Tier::Normal,
            CliTier::Pro => Tier::Pro,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check a translation against its source with the integrity validator
    Validate {
        /// Source chapter file
        #[arg(value_name = "SOURCE")]
        source: PathBuf,

        /// Translated chapter file
        #[arg(value_name = "TRANSLATION")]
        translation: PathBuf,

        /// Source language hint (overrides the config)
        #[arg(short, long)]
        source_language: Option<String>,
    },

    /// Print the batch plan for a directory of chapter .txt files
    Plan {
        /// Directory holding the chapters
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// Only plan this tier
        #[arg(short, long, value_enum)]
        tier: Option<CliTier>,

        /// Source language hint (overrides the config)
        #[arg(short, long)]
        source_language: Option<String>,
    },

    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Generate shell completions for chapterflow
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// chapterflow - quota-aware chapter translation scheduler
///
/// Offline tooling around the scheduler: validate a translated chapter,
/// preview how a directory of chapters would be batched, and manage the
/// configuration file.
#[derive(Parser, Debug)]
#[command(name = "chapterflow")]
#[command(version)]
#[command(about = "Quota-aware chapter translation scheduler")]
#[command(long_about = "chapterflow plans and checks batch translation of long chapter collections.

EXAMPLES:
    chapterflow init-config                          # Write chapterflow.json with defaults
    chapterflow plan ./chapters                      # Batch plan for every tier
    chapterflow plan -t pro ./chapters               # Batch plan for the pro tier only
    chapterflow validate ch001.txt ch001.vi.txt      # Integrity check of one translation
    chapterflow completions bash > chapterflow.bash  # Generate bash completions")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "chapterflow.json", global = true)]
    config_path: PathBuf,

    /// Set logging level
    #[arg(short, long, value_enum, global = true)]
    log_level: Option<CliLogLevel>,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @creates: New logger with specified level
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = Box::new(CustomLogger::new(level));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: ANSI colour for log level
    fn color_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "\x1B[1;31m",
            Level::Warn => "\x1B[1;33m",
            Level::Info => "\x1B[1;32m",
            Level::Debug => "\x1B[1;36m",
            Level::Trace => "\x1B[1;35m",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let color = Self::color_for_level(record.level());
            let mut stderr = std::io::stderr();
            let _ = writeln!(
                stderr,
                "{}{} {:<5} {}\x1B[0m",
                color,
                now,
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn level_filter(level: &app_config::LogLevel) -> LevelFilter {
    match level {
        app_config::LogLevel::Error => LevelFilter::Error,
        app_config::LogLevel::Warn => LevelFilter::Warn,
        app_config::LogLevel::Info => LevelFilter::Info,
        app_config::LogLevel::Debug => LevelFilter::Debug,
        app_config::LogLevel::Trace => LevelFilter::Trace,
    }
}

fn main() -> Result<()> {
    // Trace is the ceiling; the effective level is set once the config is known
    CustomLogger::init(LevelFilter::Trace)?;
    log::set_max_level(LevelFilter::Info);

    let cli = CommandLineOptions::parse();
    let cli_level: Option<app_config::LogLevel> = cli.log_level.clone().map(Into::into);
    if let Some(level) = &cli_level {
        log::set_max_level(level_filter(level));
    }

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = CommandLineOptions::command();
            generate(shell, &mut cmd, "chapterflow", &mut std::io::stdout());
            Ok(())
        }
        Commands::InitConfig { force } => run_init_config(&cli.config_path, force),
        Commands::Validate {
            source,
            translation,
            source_language,
        } => {
            let config = load_config(&cli.config_path, cli_level)?;
            run_validate(&config, &source, &translation, source_language.as_deref())
        }
        Commands::Plan {
            dir,
            tier,
            source_language,
        } => {
            let config = load_config(&cli.config_path, cli_level)?;
            run_plan(&config, &dir, tier.map(Into::into), source_language.as_deref())
        }
    }
}

/// Load the config, creating a default one when missing
fn load_config(path: &Path, cli_level: Option<app_config::LogLevel>) -> Result<Config> {
    let (mut config, created) = Config::load_or_create(path)?;
    if created {
        warn!("Config file not found at '{}', created a default one.", path.display());
    }
    config.validate().context("Configuration validation failed")?;

    match cli_level {
        Some(level) => config.log_level = level,
        None => log::set_max_level(level_filter(&config.log_level)),
    }
    Ok(config)
}

fn run_init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(anyhow!(
            "Config file already exists at '{}' (use --force to overwrite)",
            path.display()
        ));
    }
    Config::default().save(path)?;
    info!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn run_validate(config: &Config, source: &Path, translation: &Path, hint: Option<&str>) -> Result<()> {
    let source_text = std::fs::read_to_string(source)
        .with_context(|| format!("Failed to read source file: {}", source.display()))?;
    let translated_text = std::fs::read_to_string(translation)
        .with_context(|| format!("Failed to read translation file: {}", translation.display()))?;
    let hint = hint.unwrap_or(&config.source_language);

    let validator = IntegrityValidator::with_config(config.validation.clone());
    let report = validator.validate(&source_text, &translated_text, hint);
    let raw = count_raw_chars(&translated_text);

    println!("Ratio:      {:.2}", report.ratio);
    println!("Language:   {}", classify_language(hint));
    println!("Raw chars:  {}", raw);
    match report.reason() {
        None => {
            println!("Result:     accepted");
            Ok(())
        }
        Some(reason) => {
            println!("Result:     rejected ({})", reason);
            Err(anyhow!("Translation failed the integrity check"))
        }
    }
}

/// Chapter files in `dir`, in path order
fn collect_chapters(dir: &Path) -> Result<Vec<(String, usize)>> {
    if !dir.is_dir() {
        return Err(anyhow!("Input path is not a directory: {}", dir.display()));
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("txt")))
        .collect();
    paths.sort();

    let mut chapters = Vec::with_capacity(paths.len());
    for path in paths {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read chapter: {}", path.display()))?;
        let id = path
            .strip_prefix(dir)
            .unwrap_or(&path)
            .to_string_lossy()
            .into_owned();
        debug!("Loaded {} ({} chars)", id, text.chars().count());
        chapters.push((id, text.chars().count()));
    }
    Ok(chapters)
}

fn run_plan(config: &Config, dir: &Path, only: Option<Tier>, hint: Option<&str>) -> Result<()> {
    let chapters = collect_chapters(dir)?;
    if chapters.is_empty() {
        warn!("No chapter files found in {}", dir.display());
        return Ok(());
    }

    let hint = hint.unwrap_or(&config.source_language);
    let class: ContentClass = classify_language(hint).content_class();
    let sizes: HashMap<String, usize> = chapters.iter().cloned().collect();
    let profiles = ProfileTable::from_tiers(&config.tiers);
    let tiers: Vec<Tier> = match only {
        Some(tier) => vec![tier],
        None => vec![Tier::Flash, Tier::Normal, Tier::Pro],
    };

    info!("{} chapter(s), {} content", chapters.len(), format!("{:?}", class).to_lowercase());
    for tier in tiers {
        let profile = profiles.lookup(ProfileMode::Tier(tier), class);
        let assembler = BatchAssembler::for_profile(profile);
        let batches = assembler.plan(chapters.iter().map(|(id, _)| id.clone()), |id| sizes.get(id).copied());

        println!(
            "Tier {} (models: {}, concurrency {}, {} items / {} chars per batch): {} batch(es)",
            tier,
            profile.model_pool.join(", "),
            profile.concurrency_ceiling,
            profile.item_target,
            profile.char_budget,
            batches.len()
        );
        for (index, batch) in batches.iter().enumerate() {
            println!(
                "  #{:<3} {:>7} chars  {}",
                index + 1,
                batch.total_chars,
                batch.item_ids.join(" ")
            );
        }
    }
    Ok(())
}
