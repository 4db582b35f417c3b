// Live subscription to the record push channel
//
// A `StreamConnection` owns at most one driver task. The driver connects,
// decodes frames, and reconnects with exponential backoff until `close()`.
// Transport failures never surface as errors: they show up as a
// `Reconnecting` state change. Both callbacks run on the driver task, one at a
// time, in arrival/transition order.
//
// Every connection attempt takes a fresh generation number from a shared
// counter; `close()` bumps the counter too. A record is only handed to
// `on_record` while the attempt that produced it is still the current
// generation, so late deliveries from an obsolete attempt are dropped.

use crate::backoff::Backoff;
use crate::config::BackoffConfig;
use crate::frame::{decode_frame, Frame};
use crate::record::EegRecord;
use crate::transport::{FrameStream, StreamTransport};
use crate::types::{ConnectionState, FeedError, FeedResult};
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct StreamConnection {
    transport: Arc<dyn StreamTransport>,
    backoff: BackoffConfig,
    state: Arc<RwLock<ConnectionState>>,
    generation: Arc<AtomicU64>,
    cancel_token: CancellationToken,
    opened: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamConnection {
    pub fn new(transport: Arc<dyn StreamTransport>, backoff: BackoffConfig) -> Self {
        Self {
            transport,
            backoff,
            state: Arc::new(RwLock::new(ConnectionState::Idle)),
            generation: Arc::new(AtomicU64::new(0)),
            cancel_token: CancellationToken::new(),
            opened: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Current connection-attempt generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Start connecting
    ///
    /// Must be called from within a Tokio runtime. A connection can be opened
    /// only once; create a new one to resume after `close()`.
    pub fn open<R, S>(&self, on_record: R, on_state_change: S) -> FeedResult<()>
    where
        R: FnMut(EegRecord) + Send + 'static,
        S: FnMut(ConnectionState) + Send + 'static,
    {
        if self.state().is_terminal() {
            return Err(FeedError::Closed);
        }
        if self.opened.swap(true, Ordering::SeqCst) {
            return Err(FeedError::AlreadyOpen);
        }

        let driver = Driver {
            transport: Arc::clone(&self.transport),
            backoff: Backoff::new(self.backoff.clone()),
            state: Arc::clone(&self.state),
            generation: Arc::clone(&self.generation),
            cancel_token: self.cancel_token.clone(),
            on_record,
            on_state_change,
        };

        *self.task.lock() = Some(tokio::spawn(driver.run()));
        Ok(())
    }

    /// Stop the subscription and release the transport
    ///
    /// Idempotent. Cancels any pending reconnect timer or connect attempt.
    pub fn close(&self) {
        {
            let mut state = self.state.write();
            if state.is_terminal() {
                return;
            }
            *state = ConnectionState::Closed;
        }

        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cancel_token.cancel();

        info!("Stream connection to {} closed", self.transport.endpoint());
    }

    /// Wait for the driver task to finish after `close()`
    pub async fn join(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Stream driver task failed: {}", e);
            }
        }
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.close();
    }
}

struct Driver<R, S> {
    transport: Arc<dyn StreamTransport>,
    backoff: Backoff,
    state: Arc<RwLock<ConnectionState>>,
    generation: Arc<AtomicU64>,
    cancel_token: CancellationToken,
    on_record: R,
    on_state_change: S,
}

impl<R, S> Driver<R, S>
where
    R: FnMut(EegRecord) + Send + 'static,
    S: FnMut(ConnectionState) + Send + 'static,
{
    async fn run(mut self) {
        self.transition(ConnectionState::Connecting);

        loop {
            let attempt = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

            let connected = tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => break,
                result = self.transport.connect() => result,
            };

            match connected {
                Ok(frames) => {
                    if !self.is_current(attempt) {
                        debug!("Discarding connection from stale attempt {}", attempt);
                        break;
                    }
                    self.backoff.reset();
                    self.transition(ConnectionState::Open);
                    self.pump(attempt, frames).await;

                    if self.cancel_token.is_cancelled() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Connection attempt {} failed: {}", attempt, e);
                }
            }

            self.transition(ConnectionState::Reconnecting);

            let delay = self.backoff.next_delay();
            info!(
                "Reconnecting to {} in {:?} (retry {})",
                self.transport.endpoint(),
                delay,
                self.backoff.attempt()
            );

            tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        // `close()` already moved the shared state; report the final transition
        (self.on_state_change)(ConnectionState::Closed);
        debug!("Stream driver for {} ended", self.transport.endpoint());
    }

    /// Deliver frames until the connection drops or is cancelled
    async fn pump(&mut self, attempt: u64, mut frames: FrameStream) {
        loop {
            let next = tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => return,
                next = frames.next() => next,
            };

            match next {
                Some(Ok(text)) => match decode_frame(&text) {
                    Ok(Frame::Record(record)) => {
                        if !self.is_current(attempt) {
                            debug!("Dropping record {} from stale attempt {}", record.id, attempt);
                            return;
                        }
                        (self.on_record)(record);
                    }
                    Ok(Frame::Control { kind, body }) => {
                        if kind.contains("error") {
                            warn!("Backend reported {}: {}", kind, body);
                        } else {
                            debug!("Ignoring control frame '{}'", kind);
                        }
                    }
                    Err(e) => {
                        warn!("Dropping malformed frame: {}", e);
                    }
                },
                Some(Err(FeedError::Protocol(msg))) => {
                    warn!("Dropping unreadable frame: {}", msg);
                }
                Some(Err(e)) => {
                    warn!("Stream connection lost: {}", e);
                    return;
                }
                None => {
                    info!("Stream closed by server");
                    return;
                }
            }
        }
    }

    fn is_current(&self, attempt: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == attempt && !self.cancel_token.is_cancelled()
    }

    fn transition(&mut self, next: ConnectionState) {
        {
            let mut state = self.state.write();
            if *state == next || !state.can_transition_to(next) {
                return;
            }
            *state = next;
        }

        debug!("Stream connection -> {}", next);
        (self.on_state_change)(next);
    }
}
