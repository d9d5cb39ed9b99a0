mod cmd_config;
mod cmd_series;

use clap::{Parser, Subcommand};

use cmd_config::ConfigCmd;
use cmd_series::SeriesArgs;

#[derive(Parser)]
#[command(name = "tally", version, about = "Monthly client activity series from usage-count snapshots")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble a gap-filled monthly series and print it
    Series(SeriesArgs),
    /// Read or write series defaults (.tally/config.json)
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
}

/// Log filter comes from `TALLY_LOG` (e.g. `TALLY_LOG=tally_derive=debug`).
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("TALLY_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let repo_root = std::env::current_dir()?;

    match cli.cmd {
        Command::Series(args) => cmd_series::execute(&repo_root, args),
        Command::Config { cmd } => cmd_config::run(cmd, &repo_root),
    }
}
