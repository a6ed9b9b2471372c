//! cluster-compose - declarative local Kubernetes clusters
//!
//! This is the main CLI entry point for cluster-compose.

use clap::{Parser, Subcommand};
use cluster_compose::cluster::{Command, CommandReport, Interrupt, LifecycleController};
use cluster_compose::config::{self, Settings};
use cluster_compose::error::{ExitStatus, Result};
use cluster_compose::manifest::{write_template, ManifestLoader};
use cluster_compose::network::ServiceRouter;
use cluster_compose::node::DockerCli;
use cluster_compose::runtime::ProcessExecDriver;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// cluster-compose - declarative local Kubernetes clusters
#[derive(Parser)]
#[command(name = "cluster-compose")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Run one local Kubernetes node per application of a manifest", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Print the command report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Base directory for relative application work directories
    #[arg(short, long, global = true, default_value = config::DEFAULT_WORKDIR)]
    workdir: PathBuf,

    /// Base directory inside the node for relative node directories
    #[arg(short, long, global = true, default_value = config::DEFAULT_NODEDIR)]
    nodedir: PathBuf,

    /// Manifest file or directory of manifests
    #[arg(short, long, global = true, default_value = ".")]
    manifests: PathBuf,

    /// Service to highlight after up (service or service.namespace)
    #[arg(short, long, global = true, default_value = config::DEFAULT_SERVICE)]
    service: String,

    /// Node image for applications that do not name one
    #[arg(long, global = true, default_value = config::DEFAULT_IMAGE)]
    image: String,

    /// Container runtime binary
    #[arg(long, global = true, default_value = config::DEFAULT_RUNTIME)]
    runtime: String,

    /// Number of nodes provisioned concurrently (defaults to the CPU count)
    #[arg(short = 'j', long, global = true)]
    parallelism: Option<usize>,

    /// Timeout in seconds for a single runtime call
    #[arg(long, global = true, default_value_t = config::DEFAULT_TIMEOUT.as_secs())]
    timeout: u64,

    /// Timeout in seconds for pulling a node image
    #[arg(long, global = true, default_value_t = config::DEFAULT_PULL_TIMEOUT.as_secs())]
    pull_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter manifest
    Init {
        /// Overwrite an existing manifest
        #[arg(short, long)]
        force: bool,
    },

    /// Create and start every node
    Up,

    /// Stop every node
    Down,

    /// Stop and remove every node
    Clean,

    /// Show node states and endpoints
    Status,

    /// List images through the runtime
    Images {
        /// Arguments passed to the runtime
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            workdir: self.workdir.clone(),
            nodedir: self.nodedir.clone(),
            manifests: self.manifests.clone(),
            service: self.service.clone(),
            image: self.image.clone(),
            runtime: self.runtime.clone(),
            timeout: Duration::from_secs(self.timeout),
            pull_timeout: Duration::from_secs(self.pull_timeout),
            ..Settings::default()
        }
        .parallelism(self.parallelism.unwrap_or(0))
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let code = match run(cli).await {
        Ok(status) => status.code(),
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_status().code()
        }
    };

    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<ExitStatus> {
    let settings = cli.settings();

    let command = match cli.command {
        Commands::Init { force } => {
            let path = write_template(&settings.manifests, force)?;
            println!("Wrote {}", path.display());
            return Ok(ExitStatus::Success);
        }
        Commands::Images { args } => {
            let mut argv = vec!["images".to_string()];
            argv.extend(args);
            return Err(ProcessExecDriver::new().replace(&settings.runtime, &argv).into());
        }
        Commands::Up => Command::Up,
        Commands::Down => Command::Down,
        Commands::Clean => Command::Clean,
        Commands::Status => Command::Status,
    };

    let manifest = ManifestLoader::new(&settings).load(&settings.manifests)?;
    tracing::debug!(
        "Loaded {} applications from {:?}",
        manifest.len(),
        manifest.sources()
    );

    let interrupt = Interrupt::new();
    if command.is_interruptible() {
        interrupt.listen();
    }

    let runtime = Arc::new(DockerCli::new(&settings.runtime, settings.timeout).with_pull_timeout(settings.pull_timeout));
    let mut controller = LifecycleController::new(runtime, settings.parallelism).with_interrupt(interrupt);

    let report = match command {
        Command::Up => controller.up(&manifest).await?,
        Command::Down => controller.down(&manifest).await?,
        Command::Clean => controller.clean(&manifest).await?,
        Command::Status => controller.status(&manifest).await?,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, &settings);
    }

    Ok(report.exit_status())
}

fn print_report(report: &CommandReport, settings: &Settings) {
    println!("{:<24} {:<10} ERROR", "APPLICATION", "STATUS");
    for outcome in &report.outcomes {
        let error = outcome.error.as_ref().map(|e| e.to_string()).unwrap_or_default();
        println!("{:<24} {:<10} {}", outcome.application, outcome.status, error);
    }

    println!();
    println!("Cluster {}", report.phase);
    if report.interrupted {
        println!("Interrupted; nodes started by this command were stopped");
    }

    if let Some(conflict) = &report.conflict {
        println!("{}", conflict);
    }

    let failed = report.failed();
    if !failed.is_empty() {
        println!("Failed: {}", failed.join(", "));
    }

    if !report.endpoints.is_empty() {
        println!();
        println!("{:<24} ENDPOINT", "SERVICE");
        for endpoint in &report.endpoints {
            println!("{:<24} {}", format!("{}.{}", endpoint.service, endpoint.namespace), endpoint.url());
        }
    }

    if let Some(endpoint) = ServiceRouter::highlight(&report.endpoints, &settings.service) {
        println!();
        println!("{} is available at {}", settings.service, endpoint.url());
    }
}
