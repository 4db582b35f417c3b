// Record reconciler - merges snapshot and stream data into one timeline
//
// The reconciler is an actor: a single task owns the `Timeline` and handles
// one queue of events (stream records, connection state changes, re-sync
// results, consumer requests). Network calls run in their own tasks and post
// their results back onto the queue, so a slow fetch never blocks admission of
// streamed records and the timeline needs no lock.
//
// Lifecycle:
// 1. `start()` fetches the latest record (the watermark) and, when enabled,
//    seeds the timeline with the history at or below it. Failures here are
//    returned to the caller; an empty backend is not a failure.
// 2. The stream connection is opened. Every record, from either source, goes
//    through the same admission path: session filter, dedupe by id, ordered
//    insert, delivery to subscribers, then eviction.
// 3. When the stream is lost, the timeline tail at that moment marks the start
//    of a gap. On every `Reconnecting -> Open` transition a re-sync runs: fetch
//    the latest record; unless it proves nothing was missed, fetch everything
//    newer than the gap start and merge it. Records streamed on the new
//    connection meanwhile do not move the gap start. The gap is cleared only
//    once a re-sync has merged its batch. Re-sync failures are retried with
//    backoff and never surfaced.

use crate::backoff::Backoff;
use crate::config::{BackoffConfig, FeedConfig};
use crate::connection::StreamConnection;
use crate::fetcher::{FetchQuery, HttpRecordFetcher, RecordFetcher};
use crate::record::{self, EegRecord, RecordId, RecordKey};
use crate::timeline::{Rejection, Timeline};
use crate::transport::{StreamTransport, WebSocketTransport};
use crate::types::{ConnectionState, FeedError, FeedResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type RecordCallback = Box<dyn FnMut(&EegRecord) + Send>;
pub type StateCallback = Box<dyn FnMut(ConnectionState) + Send>;

/// Identifies a record subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

/// Counters describing what the reconciler has done so far
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcilerStats {
    pub admitted: u64,
    pub duplicates: u64,
    /// Foreign-session records and records older than the retention window
    pub discarded: u64,
    pub evicted: u64,
    pub resyncs: u64,
    pub retained: usize,
}

/// Point-in-time copy of the timeline
///
/// Restartable: every call to `iter()` starts again at the oldest record.
/// Later admissions are not reflected; request a new view for those.
#[derive(Debug, Clone, Default)]
pub struct TimelineView {
    records: Arc<[EegRecord]>,
}

impl TimelineView {
    fn new(records: Vec<EegRecord>) -> Self {
        Self {
            records: records.into(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EegRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first(&self) -> Option<&EegRecord> {
        self.records.first()
    }

    pub fn last(&self) -> Option<&EegRecord> {
        self.records.last()
    }

    pub fn ids(&self) -> Vec<RecordId> {
        self.records.iter().map(|r| r.id).collect()
    }

    pub fn to_vec(&self) -> Vec<EegRecord> {
        self.records.to_vec()
    }
}

impl<'a> IntoIterator for &'a TimelineView {
    type Item = &'a EegRecord;
    type IntoIter = std::slice::Iter<'a, EegRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Stream outage that a re-sync still has to fill
#[derive(Debug, Clone, Copy)]
struct Gap {
    /// Timeline tail when the stream was lost; `None` if the timeline was empty
    after: Option<RecordKey>,
}

enum FeedEvent {
    Record(EegRecord),
    State(ConnectionState),
    ResyncLatest { generation: u64, record: EegRecord },
    ResyncBatch { generation: u64, records: Vec<EegRecord> },
    Subscribe { id: SubscriptionId, callback: RecordCallback },
    Unsubscribe(SubscriptionId),
    ObserveState(StateCallback),
    View(oneshot::Sender<TimelineView>),
    Stats(oneshot::Sender<ReconcilerStats>),
    Close,
}

/// Builder for a running reconciler
///
/// Subscribers registered here also receive the records seeded on start.
pub struct RecordReconciler {
    config: FeedConfig,
    fetcher: Arc<dyn RecordFetcher>,
    transport: Arc<dyn StreamTransport>,
    subscribers: Vec<(SubscriptionId, RecordCallback)>,
    state_observers: Vec<StateCallback>,
    next_subscription: Arc<AtomicU64>,
}

impl RecordReconciler {
    pub fn new(
        config: FeedConfig,
        fetcher: Arc<dyn RecordFetcher>,
        transport: Arc<dyn StreamTransport>,
    ) -> Self {
        Self {
            config,
            fetcher,
            transport,
            subscribers: Vec::new(),
            state_observers: Vec::new(),
            next_subscription: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Reconciler over the HTTP snapshot endpoints and the WebSocket stream
    pub fn from_config(config: FeedConfig) -> FeedResult<Self> {
        config.validate()?;
        let fetcher = Arc::new(HttpRecordFetcher::new(&config)?);
        let transport = Arc::new(WebSocketTransport::new(config.stream_url()));
        Ok(Self::new(config, fetcher, transport))
    }

    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&EegRecord) + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn on_state_change<F>(&mut self, callback: F)
    where
        F: FnMut(ConnectionState) + Send + 'static,
    {
        self.state_observers.push(Box::new(callback));
    }

    /// Seed the timeline and open the stream
    pub async fn start(self) -> FeedResult<ReconcilerHandle> {
        self.config.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let shutdown = CancellationToken::new();

        let mut actor = Actor {
            timeline: Timeline::new(self.config.retention.clone()),
            fetcher: Arc::clone(&self.fetcher),
            session: self.config.session.clone(),
            backoff: self.config.backoff.clone(),
            subscribers: self.subscribers,
            state_observers: self.state_observers,
            state: ConnectionState::Idle,
            state_tx,
            events: events_tx.clone(),
            gap: None,
            resync_generation: 0,
            resync_cancel: shutdown.child_token(),
            shutdown: shutdown.clone(),
            stats: ReconcilerStats::default(),
        };

        actor.seed(self.config.seed_history).await?;

        let connection = Arc::new(StreamConnection::new(
            Arc::clone(&self.transport),
            self.config.backoff.clone(),
        ));

        let record_tx = events_tx.clone();
        let state_events_tx = events_tx.clone();
        connection.open(
            move |record| {
                let _ = record_tx.send(FeedEvent::Record(record));
            },
            move |state| {
                let _ = state_events_tx.send(FeedEvent::State(state));
            },
        )?;

        tokio::spawn(actor.run(events_rx));

        info!("Record reconciler started ({})", self.transport.endpoint());

        Ok(ReconcilerHandle {
            events: events_tx,
            connection,
            state: state_rx,
            next_subscription: self.next_subscription,
            shutdown,
        })
    }
}

/// Consumer-facing surface of a running reconciler
#[derive(Clone)]
pub struct ReconcilerHandle {
    events: mpsc::UnboundedSender<FeedEvent>,
    connection: Arc<StreamConnection>,
    state: watch::Receiver<ConnectionState>,
    next_subscription: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl ReconcilerHandle {
    /// Receive every record admitted from now on, exactly once
    pub fn subscribe<F>(&self, callback: F) -> FeedResult<SubscriptionId>
    where
        F: FnMut(&EegRecord) + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.send(FeedEvent::Subscribe {
            id,
            callback: Box::new(callback),
        })?;
        Ok(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> FeedResult<()> {
        self.send(FeedEvent::Unsubscribe(id))
    }

    /// Observe connection state transitions
    pub fn on_state_change<F>(&self, callback: F) -> FeedResult<()>
    where
        F: FnMut(ConnectionState) + Send + 'static,
    {
        self.send(FeedEvent::ObserveState(Box::new(callback)))
    }

    /// Snapshot of the timeline as of now
    pub async fn view(&self) -> FeedResult<TimelineView> {
        let (tx, rx) = oneshot::channel();
        self.send(FeedEvent::View(tx))?;
        rx.await.map_err(|_| FeedError::Closed)
    }

    pub async fn stats(&self) -> FeedResult<ReconcilerStats> {
        let (tx, rx) = oneshot::channel();
        self.send(FeedEvent::Stats(tx))?;
        rx.await.map_err(|_| FeedError::Closed)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Close the stream, cancel pending re-syncs and stop the reconciler
    ///
    /// Idempotent.
    pub fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.connection.close();
        self.shutdown.cancel();
        let _ = self.events.send(FeedEvent::Close);
    }

    /// Wait until the reconciler has shut down
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| s.is_terminal()).await;
    }

    fn send(&self, event: FeedEvent) -> FeedResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(FeedError::Closed);
        }
        self.events.send(event).map_err(|_| FeedError::Closed)
    }
}

struct Actor {
    timeline: Timeline,
    fetcher: Arc<dyn RecordFetcher>,
    session: Option<String>,
    backoff: BackoffConfig,
    subscribers: Vec<(SubscriptionId, RecordCallback)>,
    state_observers: Vec<StateCallback>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<FeedEvent>,
    gap: Option<Gap>,
    resync_generation: u64,
    resync_cancel: CancellationToken,
    shutdown: CancellationToken,
    stats: ReconcilerStats,
}

impl Actor {
    async fn seed(&mut self, seed_history: bool) -> FeedResult<()> {
        let watermark = match self.fetcher.fetch_latest().await {
            Ok(record) if self.in_session(&record) => Some(record),
            Ok(record) => {
                debug!("Latest record {} belongs to session {}", record.id, record.session_id);
                None
            }
            Err(FeedError::EmptyResult) => {
                info!("Backend has no records yet");
                None
            }
            Err(e) => return Err(e),
        };

        if seed_history {
            let query = FetchQuery {
                session: self.session.clone(),
                after: None,
            };
            let history: Vec<EegRecord> = match self.fetcher.fetch_all(&query).await {
                Ok(batch) => batch.collect(),
                Err(FeedError::EmptyResult) => Vec::new(),
                Err(e) => return Err(e),
            };

            let limit = watermark.as_ref().map(EegRecord::key);
            let seeded = history
                .into_iter()
                .filter(|r| limit.map_or(true, |w| r.key() <= w))
                .collect();
            self.admit_batch(seeded);
        }

        if let Some(record) = watermark.filter(|r| !self.timeline.contains(r.id)) {
            self.admit(record);
        }

        info!("Timeline seeded with {} records", self.timeline.len());
        Ok(())
    }

    async fn run(mut self, mut events: mpsc::UnboundedReceiver<FeedEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                FeedEvent::Record(record) => self.admit(record),
                FeedEvent::State(state) => {
                    self.on_state(state);
                    if self.state.is_terminal() {
                        break;
                    }
                }
                FeedEvent::ResyncLatest { generation, record } => {
                    if generation == self.resync_generation {
                        self.on_resync_latest(record);
                    }
                }
                FeedEvent::ResyncBatch {
                    generation,
                    records,
                } => {
                    if generation == self.resync_generation {
                        let fetched = records.len();
                        let before = self.stats.admitted;
                        self.admit_batch(records);
                        info!(
                            "Re-sync merged {} of {} fetched records",
                            self.stats.admitted - before,
                            fetched
                        );
                        self.finish_resync();
                    }
                }
                FeedEvent::Subscribe { id, callback } => self.subscribers.push((id, callback)),
                FeedEvent::Unsubscribe(id) => self.subscribers.retain(|(sid, _)| *sid != id),
                FeedEvent::ObserveState(callback) => self.state_observers.push(callback),
                FeedEvent::View(reply) => {
                    let _ = reply.send(TimelineView::new(self.timeline.snapshot()));
                }
                FeedEvent::Stats(reply) => {
                    let _ = reply.send(self.current_stats());
                }
                FeedEvent::Close => break,
            }
        }

        self.resync_cancel.cancel();
        self.set_state(ConnectionState::Closed);
        info!("Record reconciler stopped");
    }

    fn in_session(&self, record: &EegRecord) -> bool {
        self.session
            .as_ref()
            .map_or(true, |session| &record.session_id == session)
    }

    fn admit(&mut self, record: EegRecord) {
        if !self.in_session(&record) {
            debug!("Discarding record {} from session {}", record.id, record.session_id);
            self.stats.discarded += 1;
            return;
        }

        let id = record.id;
        let admitted = match self.timeline.insert(record) {
            Ok(admitted) => admitted,
            Err(Rejection::Duplicate) => {
                debug!("Discarding duplicate record {}", id);
                self.stats.duplicates += 1;
                return;
            }
            Err(Rejection::Expired) => {
                debug!("Discarding record {} older than the retention window", id);
                self.stats.discarded += 1;
                return;
            }
        };

        // Delivery happens before eviction, so every subscriber sees the record
        for (_, callback) in self.subscribers.iter_mut() {
            callback(admitted);
        }
        self.stats.admitted += 1;

        let evicted = self.timeline.evict();
        if evicted > 0 {
            debug!("Evicted {} records", evicted);
            self.stats.evicted += evicted as u64;
        }
    }

    fn admit_batch(&mut self, mut records: Vec<EegRecord>) {
        record::sort_by_key(&mut records);
        for record in records {
            self.admit(record);
        }
    }

    fn on_state(&mut self, next: ConnectionState) {
        let previous = self.state;
        if !self.set_state(next) {
            return;
        }

        match (previous, next) {
            (_, ConnectionState::Reconnecting) => self.mark_gap(),
            (ConnectionState::Reconnecting, ConnectionState::Open) => self.begin_resync(),
            _ => {}
        }
    }

    /// Remember where the stream was lost, unless an earlier gap is still open
    fn mark_gap(&mut self) {
        if self.gap.is_none() {
            let after = self.timeline.tail();
            debug!("Stream lost after {:?}", after);
            self.gap = Some(Gap { after });
        }
    }

    fn finish_resync(&mut self) {
        self.gap = None;
        self.stats.resyncs += 1;
    }

    /// Record and broadcast a state change; false when nothing changed
    fn set_state(&mut self, next: ConnectionState) -> bool {
        if self.state == next || self.state.is_terminal() {
            return false;
        }

        info!("Stream connection {} -> {}", self.state, next);
        self.state = next;
        self.state_tx.send_replace(next);
        for callback in self.state_observers.iter_mut() {
            callback(next);
        }
        true
    }

    fn begin_resync(&mut self) {
        self.resync_generation += 1;
        self.resync_cancel.cancel();
        self.resync_cancel = self.shutdown.child_token();

        let generation = self.resync_generation;
        let fetcher = Arc::clone(&self.fetcher);
        let events = self.events.clone();
        let backoff = self.backoff.clone();
        let cancel = self.resync_cancel.clone();

        debug!("Starting re-sync {}", generation);

        tokio::spawn(async move {
            let latest = retry("fetch latest", backoff, cancel, || fetcher.fetch_latest()).await;
            if let Some(record) = latest {
                let _ = events.send(FeedEvent::ResyncLatest { generation, record });
            }
        });
    }

    fn on_resync_latest(&mut self, latest: EegRecord) {
        let Some(gap) = self.gap else {
            return;
        };

        // A foreign-session record says nothing about what this session missed
        let own = self.in_session(&latest);
        if own && matches!(gap.after, Some(after) if latest.key() <= after) {
            debug!(
                "Re-sync {}: latest record {} predates the outage",
                self.resync_generation, latest.id
            );
            self.finish_resync();
            return;
        }

        let generation = self.resync_generation;
        let query = FetchQuery {
            session: self.session.clone(),
            after: gap.after,
        };
        let fetcher = Arc::clone(&self.fetcher);
        let events = self.events.clone();
        let backoff = self.backoff.clone();
        let cancel = self.resync_cancel.clone();

        info!(
            "Re-sync {}: latest record {} is newer than the outage, fetching records after {:?}",
            generation, latest.id, query.after
        );

        tokio::spawn(async move {
            let batch = retry("fetch records", backoff, cancel, || fetcher.fetch_all(&query)).await;
            // Without a batch the gap stays open for the next reconnect
            let Some(batch) = batch else {
                return;
            };
            let mut records: Vec<EegRecord> = batch.collect();
            if own {
                records.push(latest);
            }
            let _ = events.send(FeedEvent::ResyncBatch {
                generation,
                records,
            });
        });
    }

    fn current_stats(&self) -> ReconcilerStats {
        ReconcilerStats {
            retained: self.timeline.len(),
            ..self.stats.clone()
        }
    }
}

/// Retry `call` with backoff until it succeeds, gives a non-transient error,
/// or `cancel` fires
///
/// An empty result means there is nothing to catch up on and ends the retry.
async fn retry<T, F, Fut>(
    what: &str,
    backoff: BackoffConfig,
    cancel: CancellationToken,
    mut call: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FeedResult<T>>,
{
    let mut backoff = Backoff::new(backoff);

    loop {
        let result = tokio::select! {
            biased;

            _ = cancel.cancelled() => return None,
            result = call() => result,
        };

        match result {
            Ok(value) => return Some(value),
            Err(FeedError::EmptyResult) => {
                debug!("Re-sync {}: nothing available", what);
                return None;
            }
            Err(e) if e.is_retryable() => {
                let delay = backoff.next_delay();
                warn!("Re-sync {} failed: {} (retrying in {:?})", what, e, delay);
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                warn!("Re-sync {} failed permanently: {}", what, e);
                return None;
            }
        }
    }
}
