// Common types for the feed client

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for feed operations
pub type FeedResult<T> = Result<T, FeedError>;

/// Errors that can occur while fetching or streaming records
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("No record available yet")]
    EmptyResult,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Stream connection already opened")]
    AlreadyOpen,

    #[error("Feed has been closed")]
    Closed,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl FeedError {
    /// Whether a retry of the same call can reasonably succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FeedError::Transport(_) | FeedError::Timeout(_) | FeedError::EmptyResult
        )
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FeedError::Protocol(format!("Invalid response body: {}", e))
        } else {
            FeedError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::Protocol(format!("Invalid JSON: {}", e))
    }
}

/// Lifecycle of the live stream subscription
///
/// `Idle -> Connecting -> Open <-> Reconnecting`, and any state `-> Closed`.
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closed
    }

    /// Whether the state machine permits moving from `self` to `next`
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Idle, Connecting) => true,
            (Connecting, Open) | (Connecting, Reconnecting) => true,
            (Open, Reconnecting) => true,
            (Reconnecting, Open) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
