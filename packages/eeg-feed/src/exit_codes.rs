use eeg_feed::FeedError;

pub const SUCCESS: i32 = 0;
pub const INPUT_ERROR: i32 = 2;
pub const TRANSPORT_ERROR: i32 = 3;
pub const EMPTY_RESULT: i32 = 4;

/// Exit code for a failed feed operation
pub fn for_error(error: &FeedError) -> i32 {
    match error {
        FeedError::Config(_) => INPUT_ERROR,
        FeedError::EmptyResult => EMPTY_RESULT,
        FeedError::Transport(_)
        | FeedError::Timeout(_)
        | FeedError::Protocol(_)
        | FeedError::AlreadyOpen
        | FeedError::Closed => TRANSPORT_ERROR,
    }
}
