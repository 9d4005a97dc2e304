//! matspec: draft CSI material specifications from architectural visualizations.

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use matspec_ai::{AnthropicClient, RetryPolicy, SectionOptions};
use matspec_core::{ConfigError, FailureKind, Settings};
use matspec_store::StoreError;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod display;
mod pipeline;
mod serve;

use pipeline::{EMPTY_BRIEF, PipelineError, PipelineOptions};

/// Exit code after Ctrl-C.
const INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "matspec", version)]
#[command(about = "Draft material specifications from architectural visualizations")]
struct Cli {
    /// TOML config file
    #[arg(long, global = true, env = "MATSPEC_CONFIG")]
    config: Option<PathBuf>,

    /// Anthropic API key (overrides `api.api_key` in the config file)
    #[arg(long, global = true, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyse a directory of images and write one specification document
    Generate(GenerateArgs),
    /// Run the browser UI
    Serve {
        #[arg(long, default_value = "127.0.0.1:8501", env = "MATSPEC_ADDR")]
        addr: SocketAddr,
    },
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Directory of .png/.jpg/.jpeg design images
    #[arg(long)]
    images: PathBuf,

    /// Project brief text file
    #[arg(long)]
    brief: PathBuf,

    /// Output directory (default: `output.dir` from the config file)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Add a sustainability subsection to every specification
    #[arg(long)]
    sustainability: bool,

    /// Add an alternative-materials subsection to every specification
    #[arg(long)]
    alternatives: bool,

    /// Generate one specification covering all images
    #[arg(long)]
    consolidated: bool,

    /// Images processed at once (default: `pipeline.concurrency`)
    #[arg(long)]
    concurrency: Option<NonZeroUsize>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let Cli {
        config,
        api_key,
        command,
    } = Cli::parse();

    let default_filter = match command {
        Command::Generate(_) => "warn",
        Command::Serve { .. } => "info",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match command {
        Command::Generate(args) => run_generate(config.as_deref(), api_key.as_deref(), args).await,
        Command::Serve { addr } => run_serve(config.as_deref(), api_key.as_deref(), addr)
            .await
            .map(|()| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run_generate(
    config: Option<&Path>,
    api_key: Option<&str>,
    args: GenerateArgs,
) -> anyhow::Result<ExitCode> {
    let settings = Settings::load(config)?;
    // Checked before touching inputs or the network.
    let key = settings.resolve_api_key(api_key)?;
    let output_dir = args
        .output
        .clone()
        .unwrap_or_else(|| settings.output.dir.clone());

    display::print_header(&args.images, &args.brief, &output_dir);

    let mut brief = matspec_store::read_brief(&args.brief)?;
    if brief.is_empty() {
        display::warning("The brief file is empty; specifications will lack project context.");
        brief = EMPTY_BRIEF.to_string();
    } else {
        display::ok(&format!("Brief loaded ({} characters)", brief.chars().count()));
    }

    let loaded = matspec_store::load_images(&args.images, settings.pipeline.max_image_edge)?;
    display::print_skipped(&loaded.skipped);
    display::ok(&format!("Found {} valid image(s)", loaded.images.len()));

    let client = AnthropicClient::new(key, &settings.api).context("building the API client")?;
    let sections = SectionOptions {
        sustainability: args.sustainability,
        alternatives: args.alternatives,
    };
    let mut options = PipelineOptions::from_settings(&settings, sections, args.consolidated);
    if let Some(n) = args.concurrency {
        options.concurrency = n.get();
    }
    let policy = RetryPolicy::from(&settings.retry);

    display::info(&format!(
        "Analyzing {} image(s) with {} ({} at a time)",
        loaded.images.len(),
        client.model(),
        options.concurrency
    ));

    let run = pipeline::run_pipeline(
        &client,
        &loaded.images,
        &brief,
        &options,
        &policy,
        &display::ConsoleProgress,
    );
    let report = tokio::select! {
        result = run => result?,
        _ = tokio::signal::ctrl_c() => {
            display::warning("Interrupted; no specification file was written.");
            return Ok(ExitCode::from(INTERRUPTED));
        }
    };

    display::print_material_tables(&report.analyses);
    display::info(&format!(
        "{} distinct material(s) across {} analysed image(s)",
        report.context.merged.len(),
        report.context.groups.len()
    ));
    display::print_failures(&report.failures());

    let path = matspec_store::write_document(&output_dir, &report.document)?;
    info!(path = %path.display(), "specification written");
    display::print_summary(&report.document, &path);
    Ok(ExitCode::SUCCESS)
}

async fn run_serve(config: Option<&Path>, api_key: Option<&str>, addr: SocketAddr) -> anyhow::Result<()> {
    let settings = Settings::load(config)?;
    let key = settings.resolve_api_key(api_key)?;
    let client = AnthropicClient::new(key, &settings.api).context("building the API client")?;
    info!(model = client.model(), "starting web UI");
    let state = serve::AppState::new(Arc::new(client), settings);
    serve::run_server(addr, state).await
}

/// Print the error and a concrete next step.
fn report_error(err: &anyhow::Error) {
    display::error(&format!("{err:#}"));

    let hint = if let Some(e) = err.downcast_ref::<StoreError>() {
        Some(e.hint())
    } else if let Some(e) = err.downcast_ref::<ConfigError>() {
        match e {
            ConfigError::MissingApiKey | ConfigError::NotFound(_) => None,
            ConfigError::Read { .. } | ConfigError::Parse { .. } | ConfigError::Invalid { .. } => {
                Some("Fix the config file and run again; unknown keys are rejected.")
            }
        }
    } else if let Some(e) = err.downcast_ref::<PipelineError>() {
        display::print_failures(e.failures());
        match e {
            PipelineError::Auth(_) => Some(FailureKind::Auth.hint()),
            PipelineError::NoImages => Some("Add .png, .jpg or .jpeg files to the directory and run again."),
            PipelineError::NothingAnalyzed { .. } | PipelineError::NothingGenerated { .. } => {
                Some("No specification file was written.")
            }
        }
    } else {
        None
    };

    if let Some(hint) = hint {
        eprintln!("        Next step: {hint}");
    }
}
