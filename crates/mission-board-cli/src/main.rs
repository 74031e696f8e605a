use std::process::ExitCode;

use clap::Parser;
use mission_board_cli::{run_cli, Cli, ErrorEnvelope};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let json = cli.json();

    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if json {
                let envelope = ErrorEnvelope::from_error(&err);
                match serde_json::to_string(&envelope) {
                    Ok(body) => eprintln!("{body}"),
                    Err(_) => eprintln!("error: {err:#}"),
                }
            } else {
                eprintln!("error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}
