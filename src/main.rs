//! crmsync CLI entry point.

use clap::Parser;
use crmsync::cli::commands::{self, sync::SyncOptions};
use crmsync::cli::{Cli, Commands};
use crmsync::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    init_tracing(cli.verbose, cli.quiet);

    // JSON for --json or when stdout is piped
    let json = cli.json || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    match run(&cli, json) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if json {
                eprintln!("{}", e.to_structured_json());
            } else if !cli.quiet {
                if let Some(hint) = e.hint() {
                    eprintln!("Error: {e}\n  Hint: {hint}");
                } else {
                    eprintln!("Error: {e}");
                }
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,rusqlite=info,reqwest=info,hyper=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(cli: &Cli, json: bool) -> Result<(), Error> {
    let opts = SyncOptions {
        config: cli.config.as_ref(),
        db: cli.db.as_ref(),
        dry_run: cli.dry_run,
        json,
    };

    match &cli.command {
        Commands::Base { subjects } => commands::sync::execute_base(subjects, &opts),
        Commands::Full { direction, subjects } => commands::sync::execute_full(*direction, subjects, &opts),
        Commands::OnChange { subject, source, fields } => {
            commands::sync::execute_on_change(*subject, *source, fields, &opts)
        }
        Commands::Login { subject } => commands::sync::execute_login(*subject, &opts),
        Commands::Job { direction, manual } => commands::sync::execute_job(*direction, *manual, &opts),

        Commands::Mapping { command } => commands::mapping::execute(command, cli.config.as_ref(), json),
        Commands::Config { command } => {
            commands::config::execute(command, cli.config.as_ref(), cli.db.as_ref(), json)
        }
        Commands::Subject { command } => commands::subject::execute(command, cli.db.as_ref(), json),

        Commands::Completions { shell } => commands::completions::execute(shell),
        Commands::Version => commands::version::execute(json),
    }
}
