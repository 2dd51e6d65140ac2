use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "poolctl",
    about = "Inspect and load-test a WarpGrid connection pool",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a pool file and print the effective configuration
    Check {
        /// Path to the pool TOML file
        #[arg(short, long, default_value = "pool.toml")]
        config: String,
    },
    /// Run concurrent workers against the configured TCP endpoint.
    ///
    /// Each worker acquires a connection, runs the ping query, and
    /// releases it. The pool status report is printed at the end.
    Probe {
        /// Path to the pool TOML file
        #[arg(short, long, default_value = "pool.toml")]
        config: String,
        /// Number of concurrent workers
        #[arg(short, long, default_value_t = 4)]
        workers: usize,
        /// Acquire/release cycles per worker
        #[arg(short, long, default_value_t = 10)]
        iterations: usize,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("poolctl=info".parse()?)
                .add_directive("warpgrid_pool=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => commands::check::check(&config),
        Commands::Probe {
            config,
            workers,
            iterations,
        } => commands::probe::probe(&config, workers, iterations),
    }
}
