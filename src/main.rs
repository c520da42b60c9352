//! luadebug - A Debug Adapter Protocol server for Lua programs
//!
//! Launched by the IDE with stdin/stdout carrying the DAP byte stream.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use luadebug::common::{config::Config, logging, paths};
use luadebug::{adapter, LuaInterpreter, Session};

#[derive(Parser)]
#[command(name = "luadebug", about = "Debug adapter for Lua programs")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file to use instead of the default location
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write the adapter log here
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

fn run(config: &Config) -> luadebug::Result<()> {
    let mut interp = LuaInterpreter::new()?;
    let session = Session::new(
        io::stdin().lock(),
        io::stdout().lock(),
        config.protocol.max_message_size,
    );
    adapter::run(&mut interp, session)?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let log_file = cli
        .log_file
        .or_else(|| config.log.file.clone())
        .unwrap_or_else(paths::default_log_file);
    let logging_to = logging::init(&log_file, config.log.filter.as_deref());
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = ?logging_to,
        "luadebug starting"
    );

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Adapter failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
