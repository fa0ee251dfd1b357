//! Stress log CLI - decode, inspect and record stress log stores.

mod commands;
mod observability;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::dump::DumpArgs;
use commands::record::RecordArgs;
use std::path::PathBuf;

/// Stress log analyzer.
#[derive(Parser, Debug)]
#[command(name = "stresslog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase diagnostic verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode, filter and print the messages of a store
    Dump(DumpArgs),

    /// Show a store's header, modules and thread logs
    Info {
        /// Path to the store file
        file: PathBuf,
    },

    /// Write a synthetic GC-like workload to a new store file
    Record(RecordArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    observability::init_tracing(cli.verbose)?;

    match cli.command {
        Commands::Dump(args) => commands::dump::run(&args),
        Commands::Info { file } => commands::info::run(&file),
        Commands::Record(args) => commands::record::run(&args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn verbosity_is_global() {
        let cli = Cli::try_parse_from(["stresslog", "info", "store.log", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Info { .. }));
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(Cli::try_parse_from(["stresslog", "erase", "store.log"]).is_err());
    }
}
