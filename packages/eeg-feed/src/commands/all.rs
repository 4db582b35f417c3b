use crate::cli::AllArgs;
use crate::exit_codes;
use crate::output;
use eeg_feed::{EegRecord, FeedConfig, FetchQuery, RecordFetcher};

pub async fn execute(args: AllArgs, config: FeedConfig) -> i32 {
    let fetcher = match super::fetcher(&config) {
        Ok(fetcher) => fetcher,
        Err(code) => return code,
    };

    let query = FetchQuery {
        session: args.session.or(config.session),
        after: None,
    };

    let records: Vec<EegRecord> = match fetcher.fetch_all(&query).await {
        Ok(batch) => batch.collect(),
        Err(e) => return super::fail(&e),
    };

    if let Err(e) = output::print_json(&records, args.compact) {
        eprintln!("Error: {}", e);
        return exit_codes::TRANSPORT_ERROR;
    }

    exit_codes::SUCCESS
}
