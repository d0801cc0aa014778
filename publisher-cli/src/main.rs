mod cli;

use clap::Parser;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine.
    dotenvy::dotenv().ok();

    let cli = cli::Cli::parse();
    if let Err(e) = cli.init_logging() {
        eprintln!("warning: {:#}", e);
    }

    let code = match cli::run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "docpub failed");
            eprintln!("Error: {:#}", e);
            cli::exit_code_for(&e)
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
