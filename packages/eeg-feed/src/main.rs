use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod commands;
mod exit_codes;
mod output;

use cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "eeg_feed=warn",
        1 => "eeg_feed=info",
        2 => "eeg_feed=debug",
        _ => "eeg_feed=trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match commands::load_config(cli.base_url.as_deref()) {
        Ok(config) => config,
        Err(code) => std::process::exit(code),
    };

    let exit_code = match cli.command {
        cli::Command::Latest(args) => commands::latest::execute(args, config).await,
        cli::Command::All(args) => commands::all::execute(args, config).await,
        cli::Command::Watch(args) => commands::watch::execute(args, config).await,
    };

    std::process::exit(exit_code);
}
