// Snapshot retrieval against the backend's request/response endpoints
//
// `GET {api}/latest-eeg-record/`            -> one record, `null`, or 404 when empty
// `GET {api}/all-eeg-records/[?session=..]` -> array of records (or `{"records": [...]}`)
//
// Calls are read-only and safe to repeat. Every call runs under its own deadline.

use crate::config::FeedConfig;
use crate::record::{self, EegRecord, RecordKey};
use crate::types::{FeedError, FeedResult};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Filter for `fetch_all`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchQuery {
    /// Only records of this session
    pub session: Option<String>,
    /// Only records strictly newer than this key
    pub after: Option<RecordKey>,
}

impl FetchQuery {
    pub fn session(session: impl Into<String>) -> Self {
        Self {
            session: Some(session.into()),
            after: None,
        }
    }

    pub fn after(mut self, key: RecordKey) -> Self {
        self.after = Some(key);
        self
    }

    pub fn admits(&self, record: &EegRecord) -> bool {
        if let Some(session) = &self.session {
            if &record.session_id != session {
                return false;
            }
        }
        match self.after {
            Some(after) => record.key() > after,
            None => true,
        }
    }
}

/// Result of `fetch_all`: a single-pass sequence ordered by `(timestamp, id)`
#[derive(Debug)]
pub struct RecordBatch {
    records: std::vec::IntoIter<EegRecord>,
}

impl RecordBatch {
    /// Apply `query` to `records` and put them in key order
    pub fn new(mut records: Vec<EegRecord>, query: &FetchQuery) -> Self {
        records.retain(|r| query.admits(r));
        record::sort_by_key(&mut records);
        Self {
            records: records.into_iter(),
        }
    }
}

impl Iterator for RecordBatch {
    type Item = EegRecord;

    fn next(&mut self) -> Option<EegRecord> {
        self.records.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

impl ExactSizeIterator for RecordBatch {}

/// Source of snapshot data
#[async_trait]
pub trait RecordFetcher: Send + Sync {
    /// Most recent record known to the service
    async fn fetch_latest(&self) -> FeedResult<EegRecord>;

    /// Historical records matching `query`, ascending by `(timestamp, id)`
    async fn fetch_all(&self, query: &FetchQuery) -> FeedResult<RecordBatch>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LatestPayload {
    Bare(Option<EegRecord>),
    Wrapped { record: EegRecord },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AllPayload {
    Bare(Vec<EegRecord>),
    Wrapped { records: Vec<EegRecord> },
}

/// `RecordFetcher` over HTTP
pub struct HttpRecordFetcher {
    client: reqwest::Client,
    latest_url: String,
    all_url: String,
    timeout: Duration,
}

impl HttpRecordFetcher {
    pub fn new(config: &FeedConfig) -> FeedResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .map_err(|e| FeedError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            latest_url: config.latest_url(),
            all_url: config.all_url(),
            timeout: config.fetch_timeout,
        })
    }

    /// Run `call` under the per-fetch deadline
    async fn with_deadline<T, F>(&self, call: F) -> FeedResult<T>
    where
        F: Future<Output = FeedResult<T>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| FeedError::Timeout(self.timeout))?
    }

    fn normalize(&self, e: reqwest::Error) -> FeedError {
        if e.is_timeout() {
            FeedError::Timeout(self.timeout)
        } else {
            FeedError::from(e)
        }
    }

    async fn get_body(&self, request: reqwest::RequestBuilder) -> FeedResult<Vec<u8>> {
        let response = request.send().await.map_err(|e| self.normalize(e))?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(FeedError::EmptyResult);
        }
        if !status.is_success() {
            return Err(FeedError::Transport(format!(
                "{} returned HTTP {}",
                response.url(),
                status
            )));
        }

        let body = response.bytes().await.map_err(|e| self.normalize(e))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl RecordFetcher for HttpRecordFetcher {
    async fn fetch_latest(&self) -> FeedResult<EegRecord> {
        debug!("Fetching latest record from {}", self.latest_url);

        let body = self
            .with_deadline(self.get_body(self.client.get(&self.latest_url)))
            .await?;

        let payload: LatestPayload = serde_json::from_slice(&body)?;
        let record = match payload {
            LatestPayload::Bare(record) => record,
            LatestPayload::Wrapped { record } => Some(record),
        };
        record.ok_or(FeedError::EmptyResult)
    }

    async fn fetch_all(&self, query: &FetchQuery) -> FeedResult<RecordBatch> {
        debug!("Fetching records from {} ({:?})", self.all_url, query);

        let mut request = self.client.get(&self.all_url);
        if let Some(session) = &query.session {
            request = request.query(&[("session", session)]);
        }

        let body = self.with_deadline(self.get_body(request)).await?;

        let records = match serde_json::from_slice::<AllPayload>(&body)? {
            AllPayload::Bare(records) => records,
            AllPayload::Wrapped { records } => records,
        };

        debug!("Fetched {} records", records.len());
        Ok(RecordBatch::new(records, query))
    }
}
