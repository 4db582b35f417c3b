pub mod backoff;
pub mod config;
pub mod connection;
pub mod fetcher;
pub mod frame;
pub mod reconciler;
pub mod record;
pub mod timeline;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use backoff::Backoff;
pub use config::{BackoffConfig, ConfigError, FeedConfig, RetentionConfig};
pub use connection::StreamConnection;
pub use fetcher::{FetchQuery, HttpRecordFetcher, RecordBatch, RecordFetcher};
pub use frame::{decode_frame, Frame};
pub use reconciler::{
    ReconcilerHandle, ReconcilerStats, RecordReconciler, SubscriptionId, TimelineView,
};
pub use record::{EegRecord, RecordId, RecordKey};
pub use timeline::{Rejection, Timeline};
pub use transport::{FrameStream, StreamTransport, WebSocketTransport};
pub use types::{ConnectionState, FeedError, FeedResult};
