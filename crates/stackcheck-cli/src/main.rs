//! stackcheck: deployment verification for a containerized stack.
//!
//! ```text
//! stackcheck init --name orders
//! stackcheck reconcile --dry-run
//! stackcheck verify --format json --strict
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "stackcheck",
    about = "Reconcile a deployment tree and verify the health of a running stack",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Log output format (logs go to stderr)
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a scaffold stackcheck.toml
    Init {
        /// Directory to write into
        #[arg(short, long, default_value = ".")]
        path: PathBuf,
        /// Stack name (default: the directory name)
        #[arg(short, long)]
        name: Option<String>,
        /// Overwrite an existing stackcheck.toml
        #[arg(long)]
        force: bool,
    },
    /// Repair the deployment tree so it matches the configured template
    Reconcile {
        #[arg(short, long, default_value = "stackcheck.toml")]
        config: PathBuf,
        /// Deployment root (default: [stack].root, relative to the config file)
        #[arg(short, long)]
        root: Option<PathBuf>,
        /// Print the plan without touching the filesystem
        #[arg(long)]
        dry_run: bool,
    },
    /// Probe every configured service and print the deployment report.
    ///
    /// Exits 1 when the primary service is unreachable. With --strict,
    /// a partially degraded stack exits 2.
    Verify {
        #[arg(short, long, default_value = "stackcheck.toml")]
        config: PathBuf,
        /// Report format: text or json
        #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,
        /// Skip the settle delay
        #[arg(long)]
        no_settle: bool,
        /// Treat partial degradation as a failure
        #[arg(long)]
        strict: bool,
    },
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("stackcheck=info"),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    match cli.command {
        Commands::Init { path, name, force } => {
            commands::init::init(&path, name.as_deref(), force)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Reconcile { config, root, dry_run } => {
            commands::reconcile::reconcile(&config, root.as_deref(), dry_run)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Verify {
            config,
            format,
            no_settle,
            strict,
        } => {
            let status = commands::verify::verify(&config, format, no_settle, strict).await?;
            Ok(ExitCode::from(status))
        }
    }
}
