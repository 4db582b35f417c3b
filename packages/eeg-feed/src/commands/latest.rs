use crate::cli::LatestArgs;
use crate::exit_codes;
use crate::output;
use eeg_feed::{FeedConfig, RecordFetcher};

pub async fn execute(args: LatestArgs, config: FeedConfig) -> i32 {
    let fetcher = match super::fetcher(&config) {
        Ok(fetcher) => fetcher,
        Err(code) => return code,
    };

    let record = match fetcher.fetch_latest().await {
        Ok(record) => record,
        Err(e) => return super::fail(&e),
    };

    if let Err(e) = output::print_json(&record, args.compact) {
        eprintln!("Error: {}", e);
        return exit_codes::TRANSPORT_ERROR;
    }

    exit_codes::SUCCESS
}
