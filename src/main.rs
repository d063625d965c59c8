use anyhow::Result;
use clap::{Parser, Subcommand};
use hyper::Method;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use edgepool::{cli, config, Core};

#[derive(Parser)]
#[command(name = "edgepool")]
#[command(version, about = "Signed, pooled and circuit-broken client for edge platform APIs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(long, global = true)]
    config: Option<String>,

    /// Credential section to use from the edgerc file
    #[arg(long, global = true)]
    section: Option<String>,

    /// Edgerc file path (overrides the config file)
    #[arg(long, global = true)]
    edgerc: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Signed GET request
    Get {
        /// API path, including query string
        path: String,

        /// Extra header ("Name: value"), repeatable
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },

    /// Signed POST request
    Post {
        path: String,

        /// Request body (JSON)
        #[arg(short, long)]
        data: Option<String>,

        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },

    /// Signed PUT request
    Put {
        path: String,

        #[arg(short, long)]
        data: Option<String>,

        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },

    /// Signed DELETE request
    Delete {
        path: String,

        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },

    /// Print the health report as JSON
    Health {
        /// Issue one GET to this path before reporting
        #[arg(long)]
        probe: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    // Load configuration
    let mut config = config::load_config(cli.config.as_deref(), cli.section.as_deref())?;
    if let Some(edgerc) = cli.edgerc {
        config.edgerc_path = edgerc;
    }

    // Initialize core
    let core = Core::new(config)?;

    let result = match cli.command {
        Commands::Get { path, headers } => {
            cli::cmd_request(&core, Method::GET, &path, None, &headers).await
        }
        Commands::Post {
            path,
            data,
            headers,
        } => cli::cmd_request(&core, Method::POST, &path, data, &headers).await,
        Commands::Put {
            path,
            data,
            headers,
        } => cli::cmd_request(&core, Method::PUT, &path, data, &headers).await,
        Commands::Delete { path, headers } => {
            cli::cmd_request(&core, Method::DELETE, &path, None, &headers).await
        }
        Commands::Health { probe } => cli::cmd_health(&core, probe.as_deref()).await,
    };

    core.shutdown();
    result
}
