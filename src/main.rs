use clap::{Parser, Subcommand};

mod broker;
mod buffer;
mod complain;
mod config;
mod daemon;
mod endpoint;
mod format;
mod json;
mod registry;
mod sample;

#[cfg(test)]
mod endpoint_test;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read PUTVAL lines on stdin and publish them to the configured brokers
    Daemon {
        /// Configuration file
        #[arg(long)]
        config: String,
    },
    /// Parse and validate a configuration file, then exit
    CheckConfig {
        /// Configuration file
        #[arg(long)]
        config: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let status = match &cli.command {
        Commands::Daemon { config } => daemon::daemon_mode(config),
        Commands::CheckConfig { config } => daemon::check_config(config),
    };
    if let Err(e) = status {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
