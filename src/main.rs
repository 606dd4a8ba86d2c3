use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use testloop::cli;
use testloop::error::PipelineError;
use testloop::exit_codes;

#[derive(Parser)]
#[command(name = "testloop", version)]
#[command(about = "Generate passing pytest suites for a Python file with an LLM feedback loop", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate, run and refine tests until they pass or the cap is hit
    Run {
        /// README describing the code under test
        #[arg(long)]
        readme: PathBuf,

        /// Python file to generate tests for
        #[arg(long)]
        code: PathBuf,

        /// Maximum generate/execute passes (default: from config, 3)
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Path to config file (defaults to ./testloop.toml or ~/.config/testloop/config.toml)
        #[arg(long)]
        config: Option<String>,

        /// Override LLM provider (groq, openai, anthropic, gemini, openai-compatible)
        #[arg(long)]
        provider: Option<String>,

        /// Override LLM model (e.g., "openai/gpt-oss-20b")
        #[arg(long)]
        model: Option<String>,

        /// Test runner timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Directory for the final test file
        #[arg(short = 'o', long)]
        output_dir: Option<String>,

        /// Write the final workflow state as JSON
        #[arg(long)]
        summary_json: Option<PathBuf>,

        /// Skip the closing LLM summary
        #[arg(long)]
        no_report: bool,

        /// Use mock LLM client for testing
        #[arg(long)]
        dry_run: bool,
    },

    /// Show detected functions and framework without calling a model
    Detect {
        #[arg(long)]
        readme: PathBuf,

        #[arg(long)]
        code: PathBuf,

        /// Print the detection as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

/// Map a failed run to its exit code.
fn error_exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<PipelineError>() {
        Some(e) if e.is_startup() => exit_codes::INVALID,
        _ => exit_codes::ABORTED,
    }
}

fn report_error(err: &anyhow::Error) -> i32 {
    let code = error_exit_code(err);
    if code == exit_codes::INVALID {
        eprintln!("Could not start: {:#}", err);
    } else {
        eprintln!("Run aborted: {:#}", err);
    }
    code
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let args = Cli::parse();

    let code = match args.command {
        Commands::Run {
            readme,
            code,
            max_iterations,
            config,
            provider,
            model,
            timeout,
            output_dir,
            summary_json,
            no_report,
            dry_run,
        } => {
            let overrides = cli::run::RunOverrides {
                max_iterations,
                provider,
                model,
                timeout,
                output_dir,
                no_report,
            };
            match cli::run::run(readme, code, config, overrides, summary_json, dry_run).await {
                Ok(outcome) if outcome.is_success() => exit_codes::OK,
                Ok(_) => exit_codes::GAVE_UP,
                Err(e) => report_error(&e),
            }
        }
        Commands::Detect { readme, code, json } => match cli::detect::run(&readme, &code, json) {
            Ok(()) => exit_codes::OK,
            Err(e) => report_error(&e),
        },
    };

    ExitCode::from(code as u8)
}
