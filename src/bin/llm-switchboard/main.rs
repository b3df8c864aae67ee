//! llm-switchboard CLI.
//!
//! # Commands
//!
//! - `llm-switchboard run [PROMPT]`: one prompt against one provider
//! - `llm-switchboard chat`: interactive REPL with provider switching
//! - `llm-switchboard compare PROMPT`: the same prompt against several providers
//! - `llm-switchboard benchmark`: prompts × providers, saved as a JSON report

mod bench;
mod helpers;
mod repl;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use llm_switchboard::http::reqwest::default_dyn_transport;
use llm_switchboard::{ConfigStore, Dispatcher, LLMError, Settings};

/// Send prompts to hosted LLM vendors through one interface.
#[derive(Parser)]
#[command(name = "llm-switchboard", version, about, long_about = None)]
struct Cli {
    /// JSON settings file; defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single prompt and print the answer
    Run {
        /// Prompt text; the configured default prompt is used when omitted.
        prompt: Option<String>,

        /// Provider to use instead of the configured one
        #[arg(short, long)]
        provider: Option<String>,

        /// System prompt override
        #[arg(short, long)]
        system: Option<String>,

        /// Print the answer as it is generated
        #[arg(long, default_value_t = false)]
        stream: bool,
    },

    /// Interactive chat
    Chat {
        /// Provider to start with
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Send one prompt to several providers and show the answers side by side
    Compare {
        prompt: String,

        /// Comma-separated provider ids; all providers with credentials by default
        #[arg(long, value_delimiter = ',')]
        providers: Vec<String>,

        #[arg(short, long)]
        system: Option<String>,
    },

    /// Benchmark providers over a set of prompts
    Benchmark {
        /// Comma-separated provider ids; all providers with credentials by default
        #[arg(long, value_delimiter = ',')]
        providers: Vec<String>,

        /// Prompt to include; repeat for several
        #[arg(long = "prompt")]
        prompts: Vec<String>,

        /// Report path; defaults to benchmark_results_<timestamp>.json
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Ok(path) = dotenvy::dotenv() {
        debug!(path = %path.display(), "loaded environment file");
    }
    let settings = load_settings(cli.config.as_deref())?;
    let mut dispatcher = build_dispatcher(settings)?;

    match cli.command {
        Commands::Run {
            prompt,
            provider,
            system,
            stream,
        } => {
            if let Err(line) = apply_provider(&mut dispatcher, provider.as_deref()) {
                eprintln!("{line}");
                return Ok(ExitCode::FAILURE);
            }
            run_once(&dispatcher, prompt, system, stream).await
        }
        Commands::Chat { provider } => {
            if let Err(line) = apply_provider(&mut dispatcher, provider.as_deref()) {
                eprintln!("{line}");
                return Ok(ExitCode::FAILURE);
            }
            repl::run(dispatcher).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Compare {
            prompt,
            providers,
            system,
        } => {
            bench::compare(&dispatcher, &providers, &prompt, system.as_deref()).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Benchmark {
            providers,
            prompts,
            output,
        } => {
            bench::run(&dispatcher, &providers, prompts, output).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_settings(path: Option<&std::path::Path>) -> Result<Settings> {
    let settings = match path {
        Some(path) => Settings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    settings
        .apply_env_overrides()
        .context("invalid LLM_SWITCHBOARD_* environment override")
}

fn build_dispatcher(settings: Settings) -> Result<Dispatcher> {
    let store = ConfigStore::from_env(settings).context("invalid settings")?;
    let transport = default_dyn_transport().context("failed to create HTTP client")?;
    Ok(Dispatcher::new(Arc::new(store), transport))
}

/// Applies `--provider`, returning the error line to print when it is unknown.
fn apply_provider(dispatcher: &mut Dispatcher, provider: Option<&str>) -> Result<(), String> {
    let Some(provider) = provider else {
        return Ok(());
    };
    dispatcher
        .switch_provider(provider)
        .map_err(|err| helpers::describe_error(dispatcher, &LLMError::from(err)))
}

async fn run_once(
    dispatcher: &Dispatcher,
    prompt: Option<String>,
    system: Option<String>,
    stream: bool,
) -> Result<ExitCode> {
    let prompt = prompt.unwrap_or_else(|| dispatcher.settings().default_user_prompt.clone());
    helpers::print_provider(dispatcher);

    let outcome = if stream {
        helpers::print_stream(dispatcher, &prompt, system.as_deref())
            .await
            .map(|_| ())
    } else {
        dispatcher
            .generate(&prompt, system.as_deref(), None)
            .await
            .map(|result| helpers::print_result(&result))
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            eprintln!("{}", helpers::describe_error(dispatcher, &err));
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("llm_switchboard=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
