//! spa: scaffold, configure and run serverless-style APIs locally.
//!
//! Four subcommands:
//! - `spa init`: write a local project skeleton
//! - `spa configure`: print the project configuration
//! - `spa install`: run the project's dependency install command
//! - `spa run <local|command>`: serve the project in-process, or supervise
//!   the project's own server command

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use spa_local::{
    build_api_document, load_descriptors, run_local, supervise, InitOptions, MalformedPolicy,
    Project, RunOptions, ServerConfig, SupervisorOutcome,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "spa",
    version,
    about = "Scaffold, configure and run serverless-style APIs locally"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new project skeleton
    Init {
        /// Project name; also the directory created
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Version of the project pattern
        #[arg(long, default_value = "latest")]
        pattern_version: String,
        #[arg(long, value_enum)]
        db_dialect: Option<DbDialect>,
        /// Directory the project is created in
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Print the project configuration as `key = value` lines
    Configure,
    /// Install project dependencies with the configured install command
    Install,
    /// Run the API locally
    Run(RunArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum DbDialect {
    Mysql,
    Postgresql,
}

impl DbDialect {
    fn as_str(self) -> &'static str {
        match self {
            DbDialect::Mysql => "mysql",
            DbDialect::Postgresql => "postgresql",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RunMethod {
    /// Serve every endpoint in-process
    Local,
    /// Build the API document and supervise `[server] command`
    Command,
}

#[derive(Args)]
struct RunArgs {
    #[arg(value_enum, default_value = "local")]
    method: RunMethod,
    /// Bind address [env: SERVER_HOST]
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on [env: SERVER_PORT]
    #[arg(long)]
    port: Option<u16>,
    /// Restart on file changes [env: SERVER_RELOAD]
    #[arg(long, conflicts_with = "no_reload")]
    reload: bool,
    #[arg(long)]
    no_reload: bool,
    /// Log level [env: SERVER_LOG_LEVEL]
    #[arg(long)]
    log_level: Option<String>,
    /// Path prefix the server is mounted under behind a proxy [env: SERVER_ROOT_PATH]
    #[arg(long)]
    root_path: Option<String>,
    /// Trust X-Forwarded-For for client addresses [env: SERVER_PROXY_HEADERS]
    #[arg(long, conflicts_with = "no_proxy_headers")]
    proxy_headers: bool,
    #[arg(long)]
    no_proxy_headers: bool,
    /// Abort when an endpoint descriptor cannot be parsed
    #[arg(long)]
    strict: bool,
}

impl RunArgs {
    /// Apply flag overrides on top of the environment-derived config.
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.reload {
            config.reload = true;
        }
        if self.no_reload {
            config.reload = false;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(root_path) = &self.root_path {
            config.root_path = root_path.clone();
        }
        if self.proxy_headers {
            config.proxy_headers = true;
        }
        if self.no_proxy_headers {
            config.proxy_headers = false;
        }
    }

    fn malformed_policy(&self) -> MalformedPolicy {
        if self.strict {
            MalformedPolicy::Abort
        } else {
            MalformedPolicy::Skip
        }
    }
}

/// Translate a server log level into a tracing filter directive.
fn filter_directive(level: &str) -> String {
    match level.to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        other => other.to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let level = match &cli.command {
        Commands::Run(args) => args.log_level.clone(),
        _ => None,
    }
    .or_else(|| std::env::var("SERVER_LOG_LEVEL").ok())
    .unwrap_or_else(|| "info".to_string());

    // RUST_LOG wins over the server log level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(filter_directive(&level))),
        )
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancellationToken::new();

    // Ctrl-C handler: cancels the root token for graceful shutdown
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutting down...");
        cancel_for_signal.cancel();
    });

    match cli.command {
        Commands::Init {
            name,
            description,
            pattern_version,
            db_dialect,
            dir,
        } => {
            let root = spa_local::init(&InitOptions {
                name,
                description,
                pattern_version,
                db_dialect: db_dialect.map(|d| d.as_str().to_string()),
                parent: dir,
            })
            .map_err(|e| anyhow::anyhow!("Failed to create project: {}", e))?;
            println!("Project created at {}", root.display());
        }
        Commands::Configure => {
            let project = locate_project()?;
            let entries = project
                .config
                .entries()
                .map_err(|e| anyhow::anyhow!("Failed to read project configuration: {}", e))?;
            for (key, value) in entries {
                println!("{} = {}", key, value);
            }
        }
        Commands::Install => {
            let project = locate_project()?;
            run_install(&project).await?;
        }
        Commands::Run(args) => {
            let project = locate_project()?;
            run(project, args, cancel).await?;
        }
    }

    Ok(())
}

/// Find the project containing the working directory.
fn locate_project() -> Result<Project> {
    let cwd = std::env::current_dir()
        .map_err(|e| anyhow::anyhow!("Failed to read working directory: {}", e))?;
    Project::locate(&cwd)
        .map_err(|e| anyhow::anyhow!("Could not read the project configuration: {}", e))
}

/// Run `[runtime] install_command` in the project root.
async fn run_install(project: &Project) -> Result<()> {
    let Some((program, args)) = project.config.runtime.install_command.split_first() else {
        tracing::info!("no install command configured, nothing to do");
        return Ok(());
    };

    tracing::info!(command = %project.config.runtime.install_command.join(" "), "installing dependencies");
    let status = tokio::process::Command::new(program)
        .args(args)
        .current_dir(&project.root)
        .status()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start '{}': {}", program, e))?;

    if !status.success() {
        bail!("Install command failed with {}", status);
    }
    Ok(())
}

/// Serve the project with the chosen method until Ctrl-C.
async fn run(project: Project, args: RunArgs, cancel: CancellationToken) -> Result<()> {
    let mut config = ServerConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Invalid server configuration: {}", e))?;
    args.apply(&mut config);
    config.lambdas_path = project.lambdas_path();
    config.document_path = project.document_path();

    tracing::info!(
        project = %project.config.project_name,
        addr = %config.addr(),
        prefix = %config.prefix(),
        reload = config.reload,
        "starting local API"
    );

    match args.method {
        RunMethod::Local => {
            let options = RunOptions {
                malformed: args.malformed_policy(),
            };
            run_local(&project, config, options, cancel)
                .await
                .map_err(|e| anyhow::anyhow!("Local server failed: {}", e))?;
        }
        RunMethod::Command => {
            let discovery = load_descriptors(&config.lambdas_path, args.malformed_policy())
                .map_err(|e| anyhow::anyhow!("Endpoint discovery failed: {}", e))?;
            build_api_document(
                &project.base_document_path(),
                &discovery.descriptors,
                &config.document_path,
            )
            .map_err(|e| anyhow::anyhow!("Failed to build API document: {}", e))?;

            let grace = Duration::from_secs(project.config.server.shutdown_grace_secs);
            let outcome = supervise(
                &project.config.server.command,
                &project.root,
                &config.to_env_vars(),
                grace,
                cancel,
            )
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run server command: {}", e))?;

            match outcome {
                SupervisorOutcome::Completed => tracing::info!("server finished"),
                SupervisorOutcome::Cancelled => tracing::info!("server stopped by user"),
                SupervisorOutcome::Failed(code) => bail!("Server exited with code {}", code),
            }
        }
    }

    Ok(())
}
