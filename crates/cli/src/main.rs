// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use roost::config::Config;

#[derive(Parser)]
#[command(
    name = "roost",
    version,
    about = "Input multiplexer daemon for an interactive terminal AI agent."
)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    subcommand: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Forward an agent hook payload from stdin to the daemon control socket.
    Hook(roost::hook::HookArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.subcommand {
        Some(Commands::Hook(args)) => {
            std::process::exit(roost::hook::run(&args));
        }
        None => {
            let config = cli.config;
            roost::run::init_logging(&config.log_format, &config.log_level);

            let settings = match config.resolve() {
                Ok(settings) => settings,
                Err(e) => {
                    eprintln!("error: {e:#}");
                    std::process::exit(2);
                }
            };

            match roost::run::run(settings).await {
                Ok(code) => std::process::exit(code),
                Err(e) => {
                    error!("fatal: {e:#}");
                    std::process::exit(1);
                }
            }
        }
    }
}
