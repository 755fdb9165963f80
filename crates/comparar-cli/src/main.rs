//! Comparador: run cross-browser snapshot comparison sessions
//!
//! ## Usage
//!
//! ```bash
//! comparador serve --port 8080                 # Start a session with HTTP intake
//! comparador serve --config settings.json      # Use a settings file
//! comparador diff before.png after.png -o d.png # Diff two images once
//! comparador config                            # Show effective configuration
//! ```

use clap::Parser;
use comparador::{handlers, init_logging, Cli, CliResult, Commands, Verbosity};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(Verbosity::from_flags(cli.quiet, cli.verbose), cli.log_json);

    match cli.command {
        Commands::Serve(args) => handlers::execute_serve(&args),
        Commands::Diff(args) => {
            let report = handlers::execute_diff(&args)?;
            println!("{report:#}");
            Ok(())
        }
        Commands::Config(args) => {
            println!("{}", handlers::execute_config(&args)?);
            Ok(())
        }
    }
}
