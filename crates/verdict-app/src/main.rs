//! verdict - score a transcript with resilient model calls
//!
//! Each scored turn gets an independent judgment; the results are averaged,
//! summarised, and checked against an optional whole-sequence synthesis.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use verdict_adapters::{telemetry, Config, EnvOverlay, HttpProvider};
use verdict_core::util::truncate_str;
use verdict_core::{AggregateReport, Transcript};
use verdict_engine::llm::CredentialSet;
use verdict_engine::{
    Dispatcher, EvaluationOutcome, EvaluationSettings, Evaluator, ModelSources, ScoringError,
};

const PREVIEW_CHARS: usize = 60;

#[derive(Parser, Debug)]
#[command(
    name = "verdict",
    about = "Score transcripts with model judges that survive flaky providers",
    version
)]
struct Cli {
    /// Config file (defaults to ~/.config/verdict/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Score every turn of a transcript and print the report
    Evaluate(EvaluateArgs),
    /// Show the resolved configuration (keys redacted)
    Config,
}

#[derive(Args, Debug)]
struct EvaluateArgs {
    /// Transcript JSON: `{"turns": [{"role", "content"}]}` or a bare array
    transcript: PathBuf,

    /// Skip the whole-sequence synthesis call
    #[arg(long)]
    no_synthesis: bool,

    /// Model to try before every configured candidate
    #[arg(long)]
    model: Option<String>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.log_json, telemetry::level_for(cli.verbose));

    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Evaluate(args) => evaluate(config, args).await,
        Command::Config => show_config(&config, cli.config.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    tracing::debug!(path = ?path, "configuration loaded");
    config.apply_env(&EnvOverlay::from_env());
    config.validate()?;
    Ok(config)
}

fn show_config(config: &Config, path: Option<&Path>) -> Result<()> {
    let location = path
        .map(|p| p.display().to_string())
        .unwrap_or_else(Config::config_location);
    println!("# config: {}", location);
    if !config.has_api_key() {
        println!("# no API key set (VERDICT_API_KEYS or VERDICT_API_KEY)");
    }
    print!("{}", config.to_display_toml()?);
    Ok(())
}

async fn evaluate(config: Config, args: EvaluateArgs) -> Result<()> {
    let text = std::fs::read_to_string(&args.transcript)
        .with_context(|| format!("Failed to read {}", args.transcript.display()))?;
    let transcript = Transcript::from_json(&text)
        .with_context(|| format!("{} is not a valid transcript", args.transcript.display()))?;
    let items = transcript.scoring_items(&config.scored_role, config.context_window);
    if items.is_empty() {
        bail!(
            "No '{}' turns to evaluate in {}",
            config.scored_role,
            args.transcript.display()
        );
    }

    let credentials = CredentialSet::new(&config.api_keys).ok_or_else(|| {
        anyhow::anyhow!("No API key configured. Set VERDICT_API_KEYS or VERDICT_API_KEY.")
    })?;
    let provider = HttpProvider::new(&config.base_url)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling evaluation");
            eprintln!("  Cancelling...");
            on_signal.cancel();
        }
    });

    let mut call = config.call.clone();
    if let Some(model) = args.model {
        call = call.with_preferred_model(model);
    }
    let dispatcher = Dispatcher::new(
        provider,
        credentials,
        ModelSources {
            runtime_override: config.model_override.clone(),
            env_default: config.default_model.clone(),
            builtins: config.fallback_models.clone(),
        },
        call,
        cancel,
    );
    let settings = EvaluationSettings {
        categories: config.categories.clone(),
        prompts: config.prompts.clone(),
        synthesis: config.synthesis && !args.no_synthesis,
    };

    let outcome = match Evaluator::new(dispatcher, settings).evaluate(&items).await {
        Ok(outcome) => outcome,
        Err(ScoringError::Cancelled) => bail!("Evaluation cancelled"),
        Err(err) => return Err(err.into()),
    };
    tracing::info!(
        items = outcome.report.items.len(),
        degraded = outcome.degraded_items,
        corrected = outcome.report.corrected_holistic,
        "evaluation finished"
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome.report)?);
    } else {
        print_summary(&outcome);
    }
    Ok(())
}

fn print_summary(outcome: &EvaluationOutcome) {
    let report: &AggregateReport = &outcome.report;
    println!();
    println!(
        "  Holistic average  {:>3}/100   corrected {:>3}/100",
        report.holistic_average, report.corrected_holistic
    );
    if let Some(reported) = report.reported_holistic {
        println!("  Synthesis score   {:>3}/100   (advisory)", reported);
    }
    println!("  Pattern           {}", report.pattern_summary);
    println!();
    println!("  Categories");
    for (category, average) in &report.category_averages {
        println!("    {:<14} {:>2}/20", category, average);
    }
    println!();
    println!("  Items");
    for item in &report.items {
        let marker = if item.degraded { "  degraded" } else { "" };
        println!(
            "    #{:<3} {:>3}{}  {}",
            item.index,
            item.holistic_score,
            marker,
            truncate_str(item.content.trim(), PREVIEW_CHARS)
        );
    }
    if outcome.degraded_items > 0 {
        println!();
        println!(
            "  {} of {} items could not be evaluated and carry placeholder scores.",
            outcome.degraded_items,
            report.items.len()
        );
    }
    if !report.narrative.is_empty() {
        println!();
        println!("  {}", report.narrative);
    }
    if !report.critique.is_empty() {
        println!();
        println!("  {}", report.critique);
    }
    if let Some(reason) = &outcome.synthesis_failure {
        println!();
        println!("  Synthesis unavailable: {}", reason);
    }
    println!();
}
