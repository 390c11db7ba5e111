//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tracing::info;

use modeldoc_core::pipeline::{PipelineInput, PipelineOutput, ProgressReporter, run_pipeline};
use modeldoc_core::write_output;
use modeldoc_heuristics::{describe, infer_format_string, lint};
use modeldoc_ingest::{InputKind, check, load_model};
use modeldoc_llm::{OpenRouterClient, TextGenerator, UnavailableGenerator};
use modeldoc_shared::{
    AppConfig, PipelineSettings, StageSummary, init_config, load_config, validate_api_key,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// modeldoc: stakeholder documentation for BI models.
#[derive(Parser)]
#[command(
    name = "modeldoc",
    version,
    about = "Turn BI model exports into stakeholder-readable documentation.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Document a model from its CSV exports.
    Run {
        /// Directory holding the measure/table/column/relationship CSVs.
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory (defaults to `defaults.output_dir`).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Skip the text-generation service; build the heuristic report.
        #[arg(long)]
        offline: bool,

        /// Business context passed to every stage.
        #[arg(long)]
        context: Option<String>,

        /// Model identifier override.
        #[arg(long)]
        model: Option<String>,

        /// Maximum concurrent calls during fan-out.
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Normalize the exports and print entities, row stats and integrity.
    Inspect {
        /// Directory holding the CSV exports.
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Describe and lint a single formula.
    Lint {
        /// Formula text.
        formula: String,

        /// Measure name (improves kind and format inference).
        #[arg(short, long, default_value = "")]
        name: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "modeldoc=info",
        1 => "modeldoc=debug",
        _ => "modeldoc=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            input,
            out,
            offline,
            context,
            model,
            concurrency,
        } => {
            let overrides = RunOverrides {
                context,
                model,
                concurrency,
            };
            cmd_run(&input, out.as_deref(), offline, overrides).await
        }
        Command::Inspect { input } => cmd_inspect(&input).await,
        Command::Lint { formula, name } => cmd_lint(&formula, &name).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

/// Flags that override the loaded configuration for one run.
struct RunOverrides {
    context: Option<String>,
    model: Option<String>,
    concurrency: Option<usize>,
}

impl RunOverrides {
    fn apply(self, settings: &mut PipelineSettings) -> Result<()> {
        if let Some(context) = self.context {
            settings.business_context = Some(context);
        }
        if let Some(model) = self.model {
            settings.model = model;
        }
        if let Some(concurrency) = self.concurrency {
            if concurrency == 0 {
                return Err(eyre!("--concurrency must be at least 1"));
            }
            settings.max_concurrency = concurrency;
        }
        Ok(())
    }
}

fn build_generator(config: &AppConfig, settings: &PipelineSettings, offline: bool) -> Result<Arc<dyn TextGenerator>> {
    if offline {
        info!("offline mode: using heuristic fallbacks for every stage");
        return Ok(Arc::new(UnavailableGenerator::default()));
    }
    validate_api_key(config)?;
    let client = OpenRouterClient::from_config(config)?.with_model(settings.model.clone());
    Ok(Arc::new(client))
}

async fn cmd_run(input: &Path, out: Option<&Path>, offline: bool, overrides: RunOverrides) -> Result<()> {
    let config = load_config()?;
    let mut settings = PipelineSettings::from(&config);
    overrides.apply(&mut settings)?;

    // Fail on a missing key before reading anything
    let generator = build_generator(&config, &settings, offline)?;

    let loaded = load_model(input, settings.fact_row_threshold)?;
    let skipped = loaded.stats.total_skipped();
    info!(
        input = %input.display(),
        measures = loaded.model.measures.len(),
        tables = loaded.model.tables.len(),
        skipped,
        "model loaded"
    );

    let out_dir = out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&config.defaults.output_dir));

    let reporter = CliProgress::new();
    let output = run_pipeline(PipelineInput::from(loaded), generator, &settings, &reporter).await?;
    let written = write_output(&out_dir, &output.report, &output.metadata)?;

    let overview = &output.report.overview;
    let fallbacks = output.stages.iter().filter(|s| s.used_fallback).count();

    println!();
    println!("  Documentation generated!");
    println!("  Domain:        {}", overview.domain);
    println!(
        "  Entities:      {} measures, {} tables, {} columns, {} relationships",
        overview.measures, overview.tables, overview.columns, overview.relationships
    );
    println!("  Lint findings: {}", output.report.lint_findings.len());
    println!(
        "  Integrity:     {} issues, {} warnings",
        output.report.integrity.issues.len(),
        output.report.integrity.warnings.len()
    );
    println!("  Confidence:    {:.2} ({fallbacks} stages on fallback)", output.metadata.confidence);
    if skipped > 0 {
        println!("  Skipped rows:  {skipped}");
    }
    println!("  Report:        {}", written.report_path.display());
    println!("  Metadata:      {}", written.metadata_path.display());
    println!("  Time:          {:.1}s", output.elapsed.as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_inspect(input: &Path) -> Result<()> {
    let config = load_config()?;
    let loaded = load_model(input, config.pipeline.fact_row_threshold)?;
    let integrity = check(&loaded.model);

    let files: serde_json::Map<String, serde_json::Value> = InputKind::ALL
        .iter()
        .map(|kind| {
            let path = loaded.files.get(*kind).map(|p| p.display().to_string());
            (kind.as_str().to_string(), json!(path))
        })
        .collect();

    let summary = json!({
        "inputs": files,
        "fingerprint": loaded.fingerprint,
        "counts": loaded.model.counts(),
        "ingest": loaded.stats,
        "integrity": integrity,
        "model": loaded.model,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn cmd_lint(formula: &str, name: &str) -> Result<()> {
    let result = json!({
        "name": name,
        "formatString": infer_format_string(name, formula),
        "description": describe(name, formula),
        "findings": lint(formula),
    });
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn stage_finished(&self, summary: &StageSummary) {
        let marker = if summary.used_fallback { " (fallback)" } else { "" };
        self.spinner.println(format!(
            "  {:<17} confidence {:.2}{marker}",
            summary.stage.as_str(),
            summary.confidence
        ));
    }

    fn done(&self, _output: &PipelineOutput) {
        self.spinner.finish_and_clear();
    }
}
