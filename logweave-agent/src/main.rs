use std::process::ExitCode;

use clap::Parser;

use logweave_agent::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match logweave_agent::dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("logweave: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
