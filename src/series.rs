use crate::catalog::normalize_ticker;
use crate::config::MAX_SAMPLES;
use std::collections::{HashMap, VecDeque};

#[derive(Clone, Debug, PartialEq)]
pub struct PriceSample {
    pub symbol: String,
    pub price: f64,
    /// Epoch milliseconds.
    pub timestamp_ms: i64,
}

/// Rolling window of samples for one symbol, oldest first.
#[derive(Clone, Debug)]
pub struct TimeSeries {
    samples: VecDeque<PriceSample>,
    capacity: usize,
}

impl TimeSeries {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Option<&PriceSample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PriceSample> {
        self.samples.iter()
    }

    /// Returns `false` when `sample` is older than the current tail.
    fn push(&mut self, sample: PriceSample) -> bool {
        if let Some(last) = self.samples.back() {
            if sample.timestamp_ms < last.timestamp_ms {
                return false;
            }
        }
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        true
    }
}

/// Per-symbol series plus the latest-price index kept in step with their tails.
#[derive(Clone, Debug)]
pub struct PriceBuffer {
    series: HashMap<String, TimeSeries>,
    latest: HashMap<String, f64>,
    capacity: usize,
}

impl Default for PriceBuffer {
    fn default() -> Self {
        Self::with_capacity(MAX_SAMPLES)
    }
}

impl PriceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            series: HashMap::new(),
            latest: HashMap::new(),
            capacity,
        }
    }

    pub fn append(&mut self, symbol: &str, price: f64, timestamp_ms: i64) -> bool {
        let key = normalize_ticker(symbol);
        let capacity = self.capacity;
        let series = self
            .series
            .entry(key.clone())
            .or_insert_with(|| TimeSeries::with_capacity(capacity));

        let accepted = series.push(PriceSample {
            symbol: key.clone(),
            price,
            timestamp_ms,
        });
        if accepted {
            self.latest.insert(key, price);
        }
        accepted
    }

    pub fn series(&self, symbol: &str) -> Option<&TimeSeries> {
        self.series.get(&normalize_ticker(symbol))
    }

    pub fn latest(&self, symbol: &str) -> Option<f64> {
        self.latest.get(&normalize_ticker(symbol)).copied()
    }

    pub fn last_timestamp(&self, symbol: &str) -> Option<i64> {
        self.series(symbol)
            .and_then(TimeSeries::last)
            .map(|s| s.timestamp_ms)
    }

    pub fn latest_prices(&self) -> &HashMap<String, f64> {
        &self.latest
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.series.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn clear(&mut self) {
        self.series.clear();
        self.latest.clear();
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            series: self
                .series
                .iter()
                .map(|(k, s)| (k.clone(), s.iter().cloned().collect()))
                .collect(),
            latest: self.latest.clone(),
        }
    }
}

/// Owned copy of the buffers handed to readers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BufferSnapshot {
    pub series: HashMap<String, Vec<PriceSample>>,
    pub latest: HashMap<String, f64>,
}

impl BufferSnapshot {
    pub fn series(&self, symbol: &str) -> &[PriceSample] {
        self.series
            .get(&normalize_ticker(symbol))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn latest(&self, symbol: &str) -> Option<f64> {
        self.latest.get(&normalize_ticker(symbol)).copied()
    }

    /// Percent change between the first and last sample in the window.
    pub fn window_change_pct(&self, symbol: &str) -> Option<f64> {
        let series = self.series(symbol);
        let first = series.first()?.price;
        let last = series.last()?.price;
        if first.abs() < 1e-12 {
            return None;
        }
        Some((last / first - 1.0) * 100.0)
    }
}
