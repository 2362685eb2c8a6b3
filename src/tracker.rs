//! Generation-checked bookkeeping for the price poller.
//!
//! Every restart bumps the generation; every request issued inside a generation
//! carries an increasing sequence number. A completion is applied only if it
//! belongs to the current generation and no later request of that generation
//! was applied before it.

use crate::catalog::normalize_ticker;
use crate::error::QuoteError;
use crate::quotes::QuoteBatch;
use crate::series::{BufferSnapshot, PriceBuffer};
use std::collections::HashSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Polling,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuoteRequest {
    pub generation: u64,
    pub seq: u64,
    pub symbols: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscardReason {
    StaleGeneration,
    Superseded,
}

/// What happened to one completed quote request.
#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    Discarded(DiscardReason),
    Failed(String),
    /// Well-formed response with no usable quote for a tracked symbol.
    Empty,
    Applied { symbols: Vec<String> },
}

#[derive(Debug)]
pub struct PriceTracker {
    buffer: PriceBuffer,
    generation: u64,
    tickers: Vec<String>,
    next_seq: u64,
    last_applied_seq: Option<u64>,
    last_error: Option<String>,
    phase: Phase,
}

impl Default for PriceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceTracker {
    pub fn new() -> Self {
        Self {
            buffer: PriceBuffer::new(),
            generation: 0,
            tickers: Vec::new(),
            next_seq: 0,
            last_applied_seq: None,
            last_error: None,
            phase: Phase::Idle,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn buffer(&self) -> &PriceBuffer {
        &self.buffer
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        self.buffer.snapshot()
    }

    /// Starts a fresh generation for `tickers` and returns the immediate poll, if any.
    pub fn restart(&mut self, tickers: &[String]) -> Option<QuoteRequest> {
        self.reset();
        let mut seen = HashSet::new();
        self.tickers = tickers
            .iter()
            .map(|t| normalize_ticker(t))
            .filter(|t| !t.is_empty() && seen.insert(t.clone()))
            .collect();

        if self.tickers.is_empty() {
            return None;
        }
        self.phase = Phase::Polling;
        self.begin_tick()
    }

    pub fn stop(&mut self) {
        self.reset();
    }

    /// Issues the next request of the current generation. `None` while idle.
    pub fn begin_tick(&mut self) -> Option<QuoteRequest> {
        if self.phase == Phase::Idle {
            return None;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        Some(QuoteRequest {
            generation: self.generation,
            seq,
            symbols: self.tickers.clone(),
        })
    }

    /// Applies a finished request to the buffers. Stale and superseded
    /// completions change nothing; any well-formed response clears the error.
    pub fn complete(
        &mut self,
        request: &QuoteRequest,
        result: Result<QuoteBatch, QuoteError>,
        now_ms: i64,
    ) -> TickOutcome {
        if request.generation != self.generation || self.phase == Phase::Idle {
            return TickOutcome::Discarded(DiscardReason::StaleGeneration);
        }
        if self.last_applied_seq.is_some_and(|applied| applied > request.seq) {
            return TickOutcome::Discarded(DiscardReason::Superseded);
        }

        let batch = match result {
            Ok(batch) => batch,
            Err(e) => {
                let message = e.to_string();
                self.last_error = Some(message.clone());
                return TickOutcome::Failed(message);
            }
        };

        let tracked: HashSet<&str> = self.tickers.iter().map(String::as_str).collect();
        let mut prices: Vec<(String, f64)> = batch
            .by_symbol()
            .into_iter()
            .filter(|(symbol, _)| tracked.contains(symbol.as_str()))
            .collect();
        self.last_error = None;
        if prices.is_empty() {
            return TickOutcome::Empty;
        }
        prices.sort_by(|a, b| a.0.cmp(&b.0));

        let mut applied = Vec::with_capacity(prices.len());
        for (symbol, price) in prices {
            let ts = self
                .buffer
                .last_timestamp(&symbol)
                .map_or(now_ms, |tail| now_ms.max(tail));
            if self.buffer.append(&symbol, price, ts) {
                applied.push(symbol);
            }
        }

        self.last_applied_seq = Some(request.seq);
        TickOutcome::Applied { symbols: applied }
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.buffer.clear();
        self.tickers.clear();
        self.next_seq = 0;
        self.last_applied_seq = None;
        self.last_error = None;
        self.phase = Phase::Idle;
    }
}
