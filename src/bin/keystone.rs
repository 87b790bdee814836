use clap::{Parser, Subcommand};
use keystone::KeystoneConfig;
use tracing::Level;

mod commands;

use commands::config::ConfigArgs;
use commands::engines::EnginesArgs;
use commands::query::QueryArgs;
use commands::session::SessionArgs;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.keystone/keystone.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the active configuration
    Config(ConfigArgs),

    /// List supported database engines
    Engines(EnginesArgs),

    /// Run one SQL statement against the configured database
    Query(QueryArgs),

    /// Session utilities
    Session(SessionArgs),
}

fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.debug { Level::DEBUG } else { Level::WARN })
        .with_writer(std::io::stderr)
        .init();

    let config = match KeystoneConfig::new(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Config(args) => {
            commands::config::run(&config, &cli.config, args);
            Ok(())
        }
        Commands::Engines(args) => {
            commands::engines::run(args);
            Ok(())
        }
        Commands::Query(args) => commands::query::run(&config, args),
        Commands::Session(args) => commands::session::run(&config, args),
    };

    if let Err(e) = result {
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    }
}
