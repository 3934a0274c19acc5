//! simple-message-client: post a message to a bulletin board server.

use bulletin_board::config::Config;
use bulletin_board::runtime;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("simple-message-client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(
        server = %config.server,
        port = config.port,
        user = %config.user,
        image = config.image_url.as_deref().unwrap_or("<no image>"),
        output_dir = %config.output_dir.display(),
        "Posting message"
    );

    match runtime::run(&config) {
        Ok(outcome) if outcome.status == 0 => {
            for record in &outcome.records {
                info!(file = %record.name.to_string_lossy(), bytes = record.bytes_written, "Received file");
            }
            info!(files = outcome.records.len(), "Message posted");
            ExitCode::SUCCESS
        }
        Ok(outcome) => {
            warn!(status = outcome.status, "Server could not post the message");
            ExitCode::from(runtime::exit_code_for_status(outcome.status))
        }
        Err(e) => {
            error!(error = %e, "Request failed");
            ExitCode::FAILURE
        }
    }
}
