//! Load harness: opens many sessions against a running server.

use clap::Parser;
use std::process::ExitCode;
use tracing::error;
use tubes_chat::config::LoadArgs;

fn main() -> ExitCode {
    let args = LoadArgs::parse();
    tubes_chat::init_logging(&args.log_level);

    match tubes_chat::loadtest::run(&args) {
        Ok(report) if report.cross_talk == 0 => ExitCode::SUCCESS,
        Ok(report) => {
            error!(cross_talk = report.cross_talk, "Sessions received foreign echoes");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "Load test aborted");
            ExitCode::FAILURE
        }
    }
}
