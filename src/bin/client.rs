//! Terminal chat client.

use clap::Parser;
use std::process::ExitCode;
use tracing::error;
use tubes_chat::client::{self, ClientExit};
use tubes_chat::config::ClientArgs;

#[tokio::main]
async fn main() -> ExitCode {
    let args = ClientArgs::parse();
    tubes_chat::init_logging(&args.log_level);

    match client::run(args).await {
        Ok(ClientExit::ServerClosed) | Ok(ClientExit::InputClosed) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Client stopped");
            ExitCode::FAILURE
        }
    }
}
