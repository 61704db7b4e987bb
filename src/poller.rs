//! Incremental event poller: asks the backend for events after the cursor,
//! raises one notification per new event and advances the cursor.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::api::EventSource;
use crate::auth::CredentialProvider;
use crate::config::StartFrom;
use crate::model::{Notification, NotificationEvent, PollCursor};
use crate::notify::Notifier;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollerError {
    #[error("poll interval must be > 0")]
    ZeroInterval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InFlight,
    NoCredential,
    Stopped,
}

/// What a single fetch-and-merge cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    Failed,
    Empty,
    /// First response absorbed as history under `StartFrom::Latest`.
    Primed { cursor: PollCursor },
    Merged { notified: usize },
    /// Stopped while the fetch was in flight; result dropped.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollSnapshot {
    pub cursor: Option<PollCursor>,
    /// Notifications not yet acknowledged.
    pub unread: u64,
    /// Notifications emitted since construction.
    pub delivered: u64,
}

#[derive(Debug, Default)]
struct State {
    cursor: Option<PollCursor>,
    unread: u64,
    delivered: u64,
    primed: bool,
    stopped: bool,
    generation: u64,
}

struct Inner {
    source: Arc<dyn EventSource>,
    credentials: Arc<dyn CredentialProvider>,
    notifier: Arc<dyn Notifier>,
    in_flight: AtomicBool,
    state: Mutex<State>,
}

/// Clears the single-flight flag when the cycle ends, including on abort.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Poller {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    pub fn new(
        source: Arc<dyn EventSource>,
        credentials: Arc<dyn CredentialProvider>,
        notifier: Arc<dyn Notifier>,
        start_from: StartFrom,
    ) -> Self {
        let state = State {
            primed: start_from == StartFrom::Beginning,
            ..State::default()
        };
        Self {
            inner: Arc::new(Inner {
                source,
                credentials,
                notifier,
                in_flight: AtomicBool::new(false),
                state: Mutex::new(state),
            }),
            task: Mutex::new(None),
        }
    }

    /// Spawn the polling loop. The first cycle runs immediately, then one per
    /// `interval`. No-op while a loop is already running.
    pub async fn start(&self, interval: Duration) -> Result<(), PollerError> {
        if interval.is_zero() {
            return Err(PollerError::ZeroInterval);
        }
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            warn!("poller already running");
            return Ok(());
        }
        self.inner.state.lock().await.stopped = false;

        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let outcome = inner.cycle().await;
                debug!(?outcome, "poll cycle finished");
            }
        }));
        info!(?interval, "poller started");
        Ok(())
    }

    /// Cancel the loop. No notification fires after this returns, even for a
    /// cycle whose fetch is still in flight.
    pub async fn stop(&self) {
        {
            let mut state = self.inner.state.lock().await;
            state.stopped = true;
            state.generation += 1;
        }
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
        info!("poller stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Run one cycle outside the timer, e.g. a manual refresh.
    pub async fn poll_once(&self) -> CycleOutcome {
        self.inner.cycle().await
    }

    pub async fn snapshot(&self) -> PollSnapshot {
        let state = self.inner.state.lock().await;
        PollSnapshot {
            cursor: state.cursor,
            unread: state.unread,
            delivered: state.delivered,
        }
    }

    /// Reset the unread counter and return its previous value.
    pub async fn acknowledge(&self) -> u64 {
        std::mem::take(&mut self.inner.state.lock().await.unread)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.try_lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

impl Inner {
    #[instrument(skip_all)]
    async fn cycle(&self) -> CycleOutcome {
        let Some(_flight) = FlightGuard::acquire(&self.in_flight) else {
            return CycleOutcome::Skipped(SkipReason::InFlight);
        };

        let (generation, cursor) = {
            let state = self.state.lock().await;
            if state.stopped {
                return CycleOutcome::Skipped(SkipReason::Stopped);
            }
            (state.generation, state.cursor)
        };

        let Some(token) = self.credentials.credential() else {
            debug!("no credential; skipping poll");
            return CycleOutcome::Skipped(SkipReason::NoCredential);
        };

        let result = self.source.events_since(&token, cursor.as_ref()).await;

        let mut state = self.state.lock().await;
        if state.stopped || state.generation != generation {
            debug!("poller stopped during fetch; dropping result");
            return CycleOutcome::Superseded;
        }

        let events = match result {
            Ok(events) => events,
            Err(err) => {
                warn!(%err, transient = err.is_transient(), "poll failed; retrying next tick");
                return CycleOutcome::Failed;
            }
        };

        let Some(newest) = events.iter().map(NotificationEvent::cursor).max() else {
            state.primed = true;
            return CycleOutcome::Empty;
        };
        // Never rewind, even if the backend replays older events.
        let next = state.cursor.map_or(newest, |current| current.max(newest));

        if !state.primed {
            state.primed = true;
            state.cursor = Some(next);
            info!(cursor = %next, skipped = events.len(), "cursor primed from history");
            return CycleOutcome::Primed { cursor: next };
        }

        for event in &events {
            state.unread += 1;
            state.delivered += 1;
            self.notifier.notify(&Notification::from(event));
        }
        state.cursor = Some(next);
        info!(cursor = %next, count = events.len(), "merged new events");
        CycleOutcome::Merged {
            notified: events.len(),
        }
    }
}
