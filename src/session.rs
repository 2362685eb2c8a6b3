use crate::error::QuoteError;
use crate::quotes::{PriceQuoteSource, QuoteBatch};
use crate::series::BufferSnapshot;
use crate::tracker::{Phase, PriceTracker, QuoteRequest, TickOutcome};
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum SessionEvent {
    Tick {
        generation: u64,
    },
    Completed {
        request: QuoteRequest,
        result: Result<QuoteBatch, QuoteError>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionUpdate {
    /// A timer tick started a fetch.
    Dispatched(QuoteRequest),
    /// A tick from a previous generation, or one that arrived while idle.
    Ignored,
    Outcome(TickOutcome),
}

/// The periodic timer task. Aborted when dropped.
struct TimerHandle {
    generation: u64,
    task: JoinHandle<()>,
}

impl TimerHandle {
    fn spawn(generation: u64, period: Duration, tx: UnboundedSender<SessionEvent>) -> Self {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if tx.send(SessionEvent::Tick { generation }).is_err() {
                    return;
                }
            }
        });
        Self { generation, task }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Owns the tracker, the poll timer, and the channel that fetch tasks report into.
///
/// Only the task that owns the session mutates it; spawned work talks back through
/// [`SessionEvent`]s consumed by [`TrackingSession::next_update`].
pub struct TrackingSession<S: PriceQuoteSource> {
    source: Arc<S>,
    period: Duration,
    tracker: PriceTracker,
    timer: Option<TimerHandle>,
    events_tx: UnboundedSender<SessionEvent>,
    events_rx: UnboundedReceiver<SessionEvent>,
}

impl<S: PriceQuoteSource> TrackingSession<S> {
    pub fn new(source: Arc<S>, period: Duration) -> Self {
        let (events_tx, events_rx) = unbounded_channel();
        Self {
            source,
            period,
            tracker: PriceTracker::new(),
            timer: None,
            events_tx,
            events_rx,
        }
    }

    pub fn set_selection(&mut self, tickers: &[String]) {
        self.disarm();
        match self.tracker.restart(tickers) {
            Some(request) => {
                info!(
                    "Tracking {} (generation {})",
                    request.symbols.join(","),
                    request.generation
                );
                self.dispatch(request);
                self.arm();
            }
            None => info!("Selection is empty, price polling idle"),
        }
    }

    pub fn teardown(&mut self) {
        self.disarm();
        self.tracker.stop();
        debug!("Tracking session torn down (generation {})", self.tracker.generation());
    }

    /// Waits for and applies the next event.
    ///
    /// The session keeps a sender of its own, so the channel stays open for as
    /// long as the session lives and this only pends when nothing is in flight.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        let event = self.events_rx.recv().await?;
        Some(self.handle(event))
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        self.tracker.snapshot()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.tracker.last_error()
    }

    pub fn phase(&self) -> Phase {
        self.tracker.phase()
    }

    pub fn generation(&self) -> u64 {
        self.tracker.generation()
    }

    pub fn tickers(&self) -> &[String] {
        self.tracker.tickers()
    }

    pub fn is_timer_armed(&self) -> bool {
        self.timer
            .as_ref()
            .is_some_and(|t| t.generation == self.tracker.generation())
    }

    fn handle(&mut self, event: SessionEvent) -> SessionUpdate {
        match event {
            SessionEvent::Tick { generation } => {
                if generation != self.tracker.generation() {
                    return SessionUpdate::Ignored;
                }
                match self.tracker.begin_tick() {
                    Some(request) => {
                        self.dispatch(request.clone());
                        SessionUpdate::Dispatched(request)
                    }
                    None => SessionUpdate::Ignored,
                }
            }
            SessionEvent::Completed { request, result } => {
                let now_ms = chrono::Utc::now().timestamp_millis();
                let outcome = self.tracker.complete(&request, result, now_ms);
                match &outcome {
                    TickOutcome::Applied { symbols } => {
                        debug!("Applied prices for {}", symbols.join(","))
                    }
                    TickOutcome::Failed(message) => {
                        warn!("Price polling failed (will retry): {}", message)
                    }
                    TickOutcome::Empty => debug!("Price response had no usable quotes"),
                    TickOutcome::Discarded(reason) => debug!(
                        "Discarded response gen={} seq={}: {:?}",
                        request.generation, request.seq, reason
                    ),
                }
                SessionUpdate::Outcome(outcome)
            }
        }
    }

    fn dispatch(&self, request: QuoteRequest) {
        let source = Arc::clone(&self.source);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = source.fetch_quotes(&request.symbols).await;
            let _ = tx.send(SessionEvent::Completed { request, result });
        });
    }

    fn arm(&mut self) {
        self.disarm();
        self.timer = Some(TimerHandle::spawn(
            self.tracker.generation(),
            self.period,
            self.events_tx.clone(),
        ));
    }

    fn disarm(&mut self) {
        drop(self.timer.take());
    }
}

impl<S: PriceQuoteSource> Drop for TrackingSession<S> {
    fn drop(&mut self) {
        self.disarm();
    }
}
