use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sparplan::api::{AccumulationArgs, WithdrawalArgs};

#[derive(Debug, Parser)]
#[command(
    name = "sparplan",
    about = "German ETF savings plan simulator (Vorabpauschale, Teilfreistellung, withdrawal planning)"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the JSON HTTP API.
    Serve {
        #[arg(default_value_t = 8080)]
        port: u16,
    },
    /// Simulate the accumulation phase and print the result as JSON.
    Accumulate(AccumulationArgs),
    /// Solve a depleting withdrawal plan and print it as JSON.
    Withdraw(WithdrawalArgs),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Serve { port } => {
            if let Err(e) = sparplan::api::run_http_server(port).await {
                eprintln!("Server error: {e}");
                std::process::exit(1);
            }
            return;
        }
        Command::Accumulate(args) => sparplan::api::run_accumulation_command(args),
        Command::Withdraw(args) => sparplan::api::run_withdrawal_command(args),
    };

    match outcome {
        Ok(json) => println!("{json}"),
        Err(msg) => {
            eprintln!("Error: {msg}");
            std::process::exit(2);
        }
    }
}
