//! datagenius CLI - unattended synthetic dataset generation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use datagenius::client::EntryModifier;
use datagenius::store::{format_for_path, parse_id_list, read_dataset, write_export};
use datagenius::{
    Config, EntryStore, ExportFormat, LoopController, ProviderRouter, RunSnapshot, RunState,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "datagenius")]
#[command(version)]
#[command(about = "Unattended synthetic dataset generation with API key rotation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults apply when it does not exist)
    #[arg(short, long, global = true, default_value = "datagenius.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate entries until stopped, exhausted, or the limit is reached
    Generate {
        /// Product Requirements Document text
        #[arg(long, conflicts_with = "prd_file", required_unless_present = "prd_file")]
        prd: Option<String>,

        /// Read the PRD from a file
        #[arg(long)]
        prd_file: Option<PathBuf>,

        /// Creativity temperature (0.0 - 1.0)
        #[arg(short, long)]
        temperature: Option<f64>,

        /// Output file (defaults to output.path from config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format: csv or json
        #[arg(short, long)]
        format: Option<ExportFormat>,

        /// Stop after this many entries
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Rewrite selected entries of an exported dataset
    Modify {
        /// Dataset file (.json or .csv)
        #[arg(short, long)]
        dataset: PathBuf,

        /// Comma-separated entry ids, e.g. "1,2,5"
        #[arg(short, long)]
        ids: String,

        /// What to change
        #[arg(short = 'm', long)]
        instruction: String,

        /// Where to write the result (defaults to overwriting the dataset)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Ask the model for a temperature suited to a PRD
    SuggestTemperature {
        #[arg(long, conflicts_with = "prd_file", required_unless_present = "prd_file")]
        prd: Option<String>,

        #[arg(long)]
        prd_file: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

fn print_example_config() {
    let example = r#"# datagenius configuration file
#
# Without any [[credentials]] entries, keys are read from DATAGENIUS_KEY_1
# through DATAGENIUS_KEY_5: slots 1-3 are Google AI (Gemini) keys, slot 4
# and 5 are OpenRouter keys.

[[credentials]]
secret_env = "GEMINI_API_KEY"
provider = "gemini"

[[credentials]]
secret = "${GEMINI_API_KEY_2}"

[[credentials]]
secret_env = "OPENROUTER_API_KEY"
provider = "openrouter"
model = "deepseek/deepseek-r1-distill-llama-70b:free"

[providers.gemini]
base_url = "https://generativelanguage.googleapis.com/v1beta"
timeout_secs = 120
max_retries = 3

[providers.openrouter]
base_url = "https://openrouter.ai/api/v1"
timeout_secs = 120
max_retries = 3
referer = "http://localhost:9002"
title = "DataGenius"

[generation]
temperature = 0.7
rotation_delay_ms = 1000  # pause after switching keys
backoff_secs = 10         # countdown after other failures
preview_limit = 100

[modification]
concurrency = 4

[output]
path = "datagenius_dataset.csv"
format = "csv"            # or "json"
"#;
    println!("{example}");
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))
    } else {
        info!(path = %path.display(), "No config file, using defaults");
        Ok(Config::default())
    }
}

fn read_prd(prd: Option<String>, prd_file: Option<PathBuf>) -> Result<String> {
    match (prd, prd_file) {
        (Some(prd), _) => Ok(prd),
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read PRD from {path:?}")),
        (None, None) => bail!("Provide --prd or --prd-file"),
    }
}

fn describe(snapshot: &RunSnapshot) -> String {
    let mut message = format!(
        "{} entries | key {} | {}",
        snapshot.entry_count,
        snapshot.active_slot + 1,
        snapshot.state
    );
    if snapshot.state == RunState::BackoffWaiting {
        message.push_str(&format!(" (resuming in {}s)", snapshot.countdown));
    }
    if let Some(error) = &snapshot.last_error {
        message.push_str(&format!(" | {error}"));
    }
    message
}

/// Drive the loop from the terminal until it ends, Ctrl-C, or `limit`.
async fn run_until_done(controller: &LoopController, limit: Option<usize>) -> RunSnapshot {
    let mut rx = controller.subscribe();

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("[{elapsed_precise}] {spinner:.cyan} {msg}")
            .unwrap(),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));

    loop {
        let snapshot = rx.borrow_and_update().clone();
        spinner.set_message(describe(&snapshot));

        if limit.is_some_and(|limit| snapshot.entry_count >= limit) {
            controller.stop().await;
            break;
        }
        if !snapshot.state.is_active() && snapshot.state != RunState::Idle {
            break;
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping generation");
                controller.stop().await;
                break;
            }
        }
    }

    let snapshot = controller.snapshot();
    spinner.finish_with_message(describe(&snapshot));
    snapshot
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            print_example_config();
            return Ok(());
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            let pool = config.credential_pool();

            info!("Configuration is valid");
            for credential in pool.iter() {
                info!(
                    "  Key {}: {} [{}]",
                    credential.index + 1,
                    credential.provider.label(),
                    if credential.is_valid() { "set" } else { "empty" }
                );
            }
            info!(
                "  Temperature: {:.2}, backoff: {}s, rotation delay: {}ms",
                config.generation.temperature,
                config.generation.backoff_secs,
                config.generation.rotation_delay_ms
            );

            if pool.valid_count() == 0 {
                bail!("No valid API keys configured");
            }
            return Ok(());
        }

        Commands::Generate {
            prd,
            prd_file,
            temperature,
            output,
            format,
            limit,
        } => {
            let config = load_config(&cli.config)?;
            let prd = read_prd(prd, prd_file)?;
            let temperature = temperature.unwrap_or(config.generation.temperature);

            let format = format.unwrap_or_else(|| match &output {
                Some(path) => format_for_path(path),
                None => config.output.format,
            });
            let output = output.unwrap_or_else(|| config.output.path.clone());

            let router = Arc::new(ProviderRouter::from_config(&config)?);
            let controller = LoopController::new(
                &config,
                config.credential_pool(),
                router.clone(),
                router.clone() as Arc<dyn EntryModifier>,
                EntryStore::new(),
            );

            controller.start(&prd, temperature).await?;
            let snapshot = run_until_done(&controller, limit).await;

            let mut entries = controller.store().snapshot().await;
            if let Some(limit) = limit {
                entries.truncate(limit);
            }

            if entries.is_empty() {
                warn!("No entries generated, nothing to export");
            } else {
                write_export(&output, &entries, format)
                    .with_context(|| format!("Failed to write {output:?}"))?;
            }

            let (tokens_in, tokens_out) = router.total_tokens();
            println!("\n=== Generation Complete ===");
            println!("State:       {}", snapshot.state);
            if let (Some(id), Some(started)) = (snapshot.episode_id, snapshot.episode_started_at) {
                println!(
                    "Episode:     {id} (started {})",
                    started.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            println!("Entries:     {}", entries.len());
            println!("Tokens:      {tokens_in} in / {tokens_out} out");
            if let Some(error) = &snapshot.last_error {
                println!("Last error:  {error}");
            }
            if !entries.is_empty() {
                println!("Output:      {output:?}");
            }

            if snapshot.state == RunState::StoppedExhausted {
                bail!("All provided API keys seem to be failing");
            }
        }

        Commands::Modify {
            dataset,
            ids,
            instruction,
            output,
        } => {
            let config = load_config(&cli.config)?;
            let ids = parse_id_list(&ids);
            if ids.is_empty() {
                bail!("Please enter valid, comma-separated Entry IDs.");
            }

            let entries = read_dataset(&dataset)
                .with_context(|| format!("Failed to load dataset {dataset:?}"))?;
            let store = EntryStore::from_entries(entries)?;
            info!(entries = store.len().await, "Loaded dataset");

            let router = Arc::new(ProviderRouter::from_config(&config)?);
            let controller = LoopController::new(
                &config,
                config.credential_pool(),
                router.clone(),
                router.clone() as Arc<dyn EntryModifier>,
                store,
            );

            let report = controller.modify(&ids, &instruction).await?;

            let output = output.unwrap_or_else(|| dataset.clone());
            if !report.succeeded.is_empty() {
                let entries = controller.store().snapshot().await;
                write_export(&output, &entries, format_for_path(&output))
                    .with_context(|| format!("Failed to write {output:?}"))?;
            }

            println!("\n=== Modification Complete ===");
            println!("Modified:    {}", report.succeeded.len());
            if !report.failed_ids.is_empty() {
                println!("Failed:      {:?}", report.failed_ids);
            }
            if !report.not_found_ids.is_empty() {
                println!("Not found:   {:?}", report.not_found_ids);
            }
            if let Some(preview) = report.preview() {
                println!("\nLast modified entry (id {}):", preview.modified.id);
                println!("  Context:   {}", preview.modified.context);
                println!("  Input:     {}", preview.modified.input);
                println!("  Output:    {}", preview.modified.output);
                println!("\nOutput:      {output:?}");
            }
        }

        Commands::SuggestTemperature { prd, prd_file } => {
            let config = load_config(&cli.config)?;
            let prd = read_prd(prd, prd_file)?;
            let pool = config.credential_pool();
            let credential = pool
                .first_valid()
                .and_then(|index| pool.get(index))
                .context("No valid API keys configured")?;

            let router = ProviderRouter::from_config(&config)?;
            let suggestion = router.suggest_temperature(&prd, credential).await?;

            println!("Temperature: {:.2}", suggestion.temperature);
            if !suggestion.reasoning.is_empty() {
                println!("Reasoning:   {}", suggestion.reasoning);
            }
        }
    }

    Ok(())
}
