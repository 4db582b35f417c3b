// In-memory fetcher and scripted transport for unit tests

use crate::fetcher::{FetchQuery, RecordBatch, RecordFetcher};
use crate::record::EegRecord;
use crate::transport::{FrameStream, StreamTransport};
use crate::types::{FeedError, FeedResult};
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub type FrameSender = mpsc::UnboundedSender<FeedResult<String>>;

enum Attempt {
    Fail,
    Open(mpsc::UnboundedReceiver<FeedResult<String>>),
}

/// Transport whose connection attempts are scripted in advance
///
/// Attempts are consumed in order; once the script runs out, `connect()`
/// never resolves. Dropping a session's sender ends that connection.
pub struct ScriptedTransport {
    attempts: Mutex<VecDeque<Attempt>>,
    connects: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            attempts: Mutex::new(VecDeque::new()),
            connects: AtomicUsize::new(0),
        })
    }

    pub fn push_failure(&self) {
        self.attempts.lock().push_back(Attempt::Fail);
    }

    pub fn push_session(&self) -> FrameSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.attempts.lock().push_back(Attempt::Open(rx));
        tx
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

pub fn record_frame(record: &EegRecord) -> FeedResult<String> {
    Ok(serde_json::to_string(record).expect("record serializes"))
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    async fn connect(&self) -> FeedResult<FrameStream> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let attempt = self.attempts.lock().pop_front();
        match attempt {
            Some(Attempt::Fail) => Err(FeedError::Transport("scripted failure".into())),
            Some(Attempt::Open(mut rx)) => {
                Ok(futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
            }
            None => std::future::pending().await,
        }
    }

    fn endpoint(&self) -> String {
        "scripted://".to_string()
    }
}

/// Fetcher backed by a shared in-memory record list
#[derive(Default)]
pub struct MemoryFetcher {
    records: Mutex<Vec<EegRecord>>,
    failures: AtomicUsize,
    latest_calls: AtomicUsize,
    all_calls: AtomicUsize,
}

impl MemoryFetcher {
    pub fn new(records: Vec<EegRecord>) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(records),
            ..Self::default()
        })
    }

    pub fn push(&self, record: EegRecord) {
        self.records.lock().push(record);
    }

    /// Make the next `n` calls fail with a transport error
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }

    pub fn all_calls(&self) -> usize {
        self.all_calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> FeedResult<()> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            Err(FeedError::Transport("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RecordFetcher for MemoryFetcher {
    async fn fetch_latest(&self) -> FeedResult<EegRecord> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        self.records
            .lock()
            .iter()
            .max_by_key(|r| r.key())
            .cloned()
            .ok_or(FeedError::EmptyResult)
    }

    async fn fetch_all(&self, query: &FetchQuery) -> FeedResult<RecordBatch> {
        self.all_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        Ok(RecordBatch::new(self.records.lock().clone(), query))
    }
}
