use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgGroup, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use spindle::cli;
use spindle::config::AppConfig;
use spindle::container::DockerRuntime;
use spindle::error::AppError;
use spindle::workflow::WorkflowRequest;

#[derive(Parser)]
#[command(name = "spindle", version, about = "Dispatch GitHub issues to a coding agent in a disposable container")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect project settings and write the configuration
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },
    /// Run the agent on an issue or prompt
    #[command(group(ArgGroup::new("task").required(true).args(["issue", "prompt"])))]
    Dispatch {
        /// Existing issue number
        #[arg(short, long)]
        issue: Option<u64>,
        /// Free-text task
        #[arg(short, long)]
        prompt: Option<String>,
        /// Create an issue from the prompt first
        #[arg(long, requires = "prompt", conflicts_with = "issue")]
        create_issue: bool,
        /// GitHub user to request review from
        #[arg(long)]
        reviewer: Option<String>,
        /// Branch to start from and target (defaults to project.working_branch)
        #[arg(long)]
        base: Option<String>,
        /// Run even if the configuration does not validate
        #[arg(long)]
        force: bool,
        /// Print the prompt and bootstrap script without running anything
        #[arg(long)]
        dry_run: bool,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Check that everything a dispatch needs is in place
    Doctor {
        /// Create missing configuration and volumes
        #[arg(long)]
        fix: bool,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Read or change configuration values
    Configure {
        /// Dotted key, e.g. github.board.project_id
        key: Option<String>,
        value: Option<String>,
        #[arg(long, conflicts_with_all = ["key", "reset", "validate"])]
        list: bool,
        /// Restore defaults, keeping the project identity
        #[arg(long, conflicts_with_all = ["key", "validate"])]
        reset: bool,
        #[arg(long, conflicts_with = "key")]
        validate: bool,
    },
    /// List or remove spindle environments
    Containers {
        /// Include stopped environments
        #[arg(long)]
        all: bool,
        /// Remove stopped environments
        #[arg(long)]
        clean: bool,
        /// With --clean, remove running ones too
        #[arg(long, requires = "clean")]
        force: bool,
    },
}

impl Commands {
    fn verbose(&self) -> bool {
        matches!(
            self,
            Commands::Dispatch { verbose: true, .. } | Commands::Doctor { verbose: true, .. }
        )
    }
}

fn init_tracing(json: bool, verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn runtime_for(config_path: &std::path::Path) -> DockerRuntime {
    let bin = AppConfig::load(Some(config_path))
        .map(|c| c.container.runtime_bin)
        .unwrap_or_else(|_| "docker".to_string());
    DockerRuntime::new(&bin)
}

async fn execute(cli: Cli) -> anyhow::Result<bool> {
    let explicit = cli.config.as_deref();

    match cli.command {
        Commands::Init { force } => {
            let root = cli::repo_root()?;
            cli::init::run(&root, &cli::config_path(&root, explicit), force).await?;
            Ok(true)
        }
        Commands::Dispatch {
            issue,
            prompt,
            create_issue,
            reviewer,
            base,
            force,
            dry_run,
            verbose: _,
        } => {
            let root = cli::repo_root()?;
            let request = WorkflowRequest {
                issue,
                prompt,
                create_issue,
                reviewer,
                base,
                dry_run,
                force,
            };
            cli::dispatch::run(&root, &cli::config_path(&root, explicit), request).await
        }
        Commands::Doctor { fix, verbose } => {
            let config_path = match cli::repo_root() {
                Ok(root) => cli::config_path(&root, explicit),
                Err(_) => explicit.map(PathBuf::from).unwrap_or_else(|| PathBuf::from(spindle::config::DEFAULT_CONFIG_PATH)),
            };
            let runtime = runtime_for(&config_path);
            Ok(cli::doctor::run(&runtime, &config_path, fix, verbose).await)
        }
        Commands::Configure {
            key,
            value,
            list,
            reset,
            validate,
        } => {
            let root = cli::repo_root()?;
            let mode = match (list, reset, validate, &key, &value) {
                (true, ..) => cli::configure::Mode::List,
                (_, true, ..) => cli::configure::Mode::Reset,
                (_, _, true, ..) => cli::configure::Mode::Validate,
                (_, _, _, Some(_), Some(_)) => cli::configure::Mode::Set,
                (_, _, _, Some(_), None) => cli::configure::Mode::Get,
                _ => cli::configure::Mode::List,
            };
            cli::configure::run(
                &cli::config_path(&root, explicit),
                mode,
                key.as_deref(),
                value.as_deref(),
            )?;
            Ok(true)
        }
        Commands::Containers { all, clean, force } => {
            let config_path = match cli::repo_root() {
                Ok(root) => cli::config_path(&root, explicit),
                Err(_) => explicit.map(PathBuf::from).unwrap_or_else(|| PathBuf::from(spindle::config::DEFAULT_CONFIG_PATH)),
            };
            let runtime = runtime_for(&config_path);
            cli::containers::run(&runtime, all, clean, force).await?;
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json, cli.command.verbose());

    match execute(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            if let Some(app) = e.chain().find_map(|c| c.downcast_ref::<AppError>()) {
                let hints = app.troubleshooting();
                if !hints.is_empty() {
                    eprintln!("\nTroubleshooting:");
                    for hint in hints {
                        eprintln!("  - {hint}");
                    }
                }
            }
            ExitCode::FAILURE
        }
    }
}
