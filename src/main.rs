//! Main entry point for the c64car CLI app

fn main() -> std::process::ExitCode {
    if let Err(e) = c64car::cli_runner::run_cli_app() {
        tracing::debug!(error = ?e, "command failed");
        eprintln!("Error: {}", e);
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}
