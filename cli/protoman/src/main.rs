//! protoman CLI: fetch, publish and scaffold versioned schema packages.

mod commands;

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::{Parser, Subcommand};
use protoman_sync::Project;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "protoman", version, about = "Schema package manager")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Maximum number of packages processed at once (overrides protoman.toml)
    #[arg(long, global = true)]
    workers: Option<usize>,
    /// Project directory holding the .protoman manifest
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a local package directory in the manifest
    Add {
        /// Package name (e.g., acme.billing.v1)
        name: String,
        /// Path to the package directory
        #[arg(short, long)]
        path: PathBuf,
    },
    /// Forget a package; its files are left in place
    Remove {
        /// Package name
        name: String,
    },
    /// Fetch packages and the packages they import
    Get {
        /// Package names
        #[arg(required = true)]
        names: Vec<String>,
        /// Registry address (http(s)://, file:// or a directory)
        #[arg(short, long)]
        server: String,
        /// Root directory where fetched packages are written
        #[arg(short, long)]
        proto_dir: PathBuf,
    },
    /// Bring every fetched package up to the registry's latest version
    Update {
        /// Registry address
        #[arg(short, long)]
        server: String,
    },
    /// Publish schema files, or every unpublished local package
    Publish {
        /// .proto files to publish
        files: Vec<PathBuf>,
        /// Registry address
        #[arg(short, long)]
        server: String,
    },
    /// Scaffold a new package with an empty service
    Generate {
        /// Package name (e.g., acme.billing.v1)
        package: String,
        /// Service name (e.g., billing)
        service: String,
        /// Root directory under which the package directories are created
        root: PathBuf,
    },
    /// Check schema files for syntax errors
    Validate {
        /// File or directory (searched recursively)
        path: PathBuf,
    },
    /// List packages known to the registry
    List {
        /// Only list packages within this prefix (e.g., acme.billing)
        #[arg(default_value = "")]
        prefix: String,
        /// Registry address
        #[arg(short, long)]
        server: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = run(cli).await;
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let project = open_project(&cli)?;

    match cli.command {
        Commands::Add { name, path } => commands::local::add(&project, &name, &path).await,
        Commands::Remove { name } => commands::local::remove(&project, &name).await,
        Commands::Get {
            names,
            server,
            proto_dir,
        } => commands::registry::get(&project, &names, &server, &proto_dir).await,
        Commands::Update { server } => commands::registry::update(&project, &server).await,
        Commands::Publish { files, server } => {
            commands::registry::publish(&project, &files, &server).await
        }
        Commands::Generate {
            package,
            service,
            root,
        } => commands::local::generate(&project, &package, &service, &root).await,
        Commands::Validate { path } => commands::local::validate(&project, &path),
        Commands::List { prefix, server } => {
            commands::registry::list(&project, &prefix, &server).await
        }
    }
}

fn open_project(cli: &Cli) -> anyhow::Result<Project> {
    let mut project = Project::open(&cli.project)
        .with_context(|| format!("opening project {}", cli.project.display()))?;
    if let Some(workers) = cli.workers {
        let config = project.config().clone().with_workers(workers);
        *project.config_mut() = config;
    }
    Ok(project)
}
