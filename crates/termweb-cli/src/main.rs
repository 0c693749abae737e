use termweb_core::logging;

mod cli;

use crate::cli::CliCommand;

fn main() {
    // Log to the state dir if possible; otherwise fall back to stderr.
    if let Err(file_err) = logging::init_logging() {
        match logging::init_logging_stderr() {
            Ok(()) => tracing::warn!("file logging unavailable, using stderr: {file_err:#}"),
            Err(err) => eprintln!("termweb: logging disabled: {file_err:#}; {err:#}"),
        }
    }

    if let Err(err) = CliCommand::run_from_args() {
        eprintln!("termweb error: {:#}", err);
        std::process::exit(1);
    }
}
