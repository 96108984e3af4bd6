//! Main entry point for the phragdat CLI app

fn main() -> std::process::ExitCode {
    if let Err(e) = phragdat::cli_runner::run_cli_app() {
        if e.downcast_ref::<clap::Error>().is_none() {
            eprintln!("Error: {}", e);
        }
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}
