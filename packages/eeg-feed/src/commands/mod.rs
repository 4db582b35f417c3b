pub mod all;
pub mod latest;
pub mod watch;

use crate::exit_codes;
use eeg_feed::{FeedConfig, FeedError, HttpRecordFetcher};

/// Environment configuration with command-line overrides applied
pub fn load_config(base_url: Option<&str>) -> Result<FeedConfig, i32> {
    let mut config = FeedConfig::from_env().map_err(|e| {
        eprintln!("Error: {}", e);
        exit_codes::INPUT_ERROR
    })?;

    if let Some(base_url) = base_url {
        config.base_url = base_url.to_string();
        if let Err(e) = config.validate() {
            eprintln!("Error: {}", e);
            return Err(exit_codes::INPUT_ERROR);
        }
    }

    Ok(config)
}

fn fetcher(config: &FeedConfig) -> Result<HttpRecordFetcher, i32> {
    HttpRecordFetcher::new(config).map_err(|e| fail(&e))
}

fn fail(error: &FeedError) -> i32 {
    eprintln!("Error: {}", error);
    exit_codes::for_error(error)
}
