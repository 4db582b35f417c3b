use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "eeg-feed",
    version,
    about = "Fetch and follow a live EEG record feed",
    long_about = "Query an EEG backend's snapshot endpoints or follow its record stream.\n\
                  Settings come from EEG_FEED_* environment variables (or a .env file);\n\
                  --base-url overrides EEG_FEED_BASE_URL."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Backend origin, e.g. http://localhost:8000
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the most recent record
    Latest(LatestArgs),
    /// Print every stored record, oldest first
    All(AllArgs),
    /// Follow the feed, printing each new record as a JSON line
    Watch(WatchArgs),
}

#[derive(Args)]
pub struct LatestArgs {
    /// Single-line JSON output
    #[arg(long)]
    pub compact: bool,
}

#[derive(Args)]
pub struct AllArgs {
    /// Only records of this session
    #[arg(long)]
    pub session: Option<String>,

    /// Single-line JSON output
    #[arg(long)]
    pub compact: bool,
}

#[derive(Args)]
pub struct WatchArgs {
    /// Only records of this session
    #[arg(long)]
    pub session: Option<String>,

    /// Do not seed from stored history; start at the latest record
    #[arg(long)]
    pub no_history: bool,

    /// Stop after this many records
    #[arg(long)]
    pub limit: Option<usize>,
}
