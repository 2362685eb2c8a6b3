use crate::catalog::Instrument;
use crate::series::BufferSnapshot;
use chrono::{Local, TimeZone};
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq)]
pub struct ChartColumn {
    pub label: String,
    pub key: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChartRow {
    pub timestamp_ms: i64,
    /// One cell per column; `None` where that symbol has no sample at this instant.
    pub cells: Vec<Option<f64>>,
}

impl ChartRow {
    pub fn time_label(&self) -> String {
        Local
            .timestamp_millis_opt(self.timestamp_ms)
            .single()
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| self.timestamp_ms.to_string())
    }
}

/// Tracked series aligned on a shared time axis.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChartTable {
    pub columns: Vec<ChartColumn>,
    pub rows: Vec<ChartRow>,
}

impl ChartTable {
    pub fn build(columns: &[Instrument], snapshot: &BufferSnapshot) -> Self {
        let columns: Vec<ChartColumn> = columns
            .iter()
            .map(|i| ChartColumn {
                label: i.name.clone(),
                key: i.ticker(),
            })
            .collect();

        let timestamps: BTreeSet<i64> = columns
            .iter()
            .flat_map(|c| snapshot.series(&c.key).iter().map(|s| s.timestamp_ms))
            .collect();

        let rows = timestamps
            .into_iter()
            .map(|ts| ChartRow {
                timestamp_ms: ts,
                cells: columns
                    .iter()
                    .map(|c| {
                        snapshot
                            .series(&c.key)
                            .iter()
                            .rev()
                            .find(|s| s.timestamp_ms == ts)
                            .map(|s| s.price)
                    })
                    .collect(),
            })
            .collect();

        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Min and max over every populated cell.
    pub fn price_bounds(&self) -> Option<(f64, f64)> {
        self.rows
            .iter()
            .flat_map(|r| r.cells.iter().flatten().copied())
            .fold(None, |acc, p| match acc {
                None => Some((p, p)),
                Some((lo, hi)) => Some((lo.min(p), hi.max(p))),
            })
    }

    /// Bounds over one column, for per-symbol scaling.
    pub fn column_bounds(&self, idx: usize) -> Option<(f64, f64)> {
        self.column_points(idx).into_iter().fold(None, |acc, (_, p)| match acc {
            None => Some((p, p)),
            Some((lo, hi)) => Some((lo.min(p), hi.max(p))),
        })
    }

    /// Populated cells of one column as (seconds since the first row, price).
    pub fn column_points(&self, idx: usize) -> Vec<(f64, f64)> {
        let Some(origin) = self.rows.first().map(|r| r.timestamp_ms) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .filter_map(|r| {
                let price = (*r.cells.get(idx)?)?;
                Some(((r.timestamp_ms - origin) as f64 / 1000.0, price))
            })
            .collect()
    }

    /// Seconds spanned by the time axis.
    pub fn span_secs(&self) -> f64 {
        match (self.rows.first(), self.rows.last()) {
            (Some(first), Some(last)) => (last.timestamp_ms - first.timestamp_ms) as f64 / 1000.0,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::PriceBuffer;

    fn coins() -> Vec<Instrument> {
        vec![
            Instrument::new("bitcoin", "btc", "Bitcoin"),
            Instrument::new("ethereum", "eth", "Ethereum"),
        ]
    }

    #[test]
    fn test_rows_are_union_of_timestamps_with_gaps() {
        let mut buffer = PriceBuffer::new();
        buffer.append("BTC", 100.0, 1000);
        buffer.append("BTC", 101.0, 2000);
        buffer.append("ETH", 10.0, 2000);
        buffer.append("ETH", 11.0, 3000);

        let table = ChartTable::build(&coins(), &buffer.snapshot());
        assert_eq!(table.columns[0].label, "Bitcoin");
        assert_eq!(table.columns[1].key, "ETH");

        let stamps: Vec<i64> = table.rows.iter().map(|r| r.timestamp_ms).collect();
        assert_eq!(stamps, vec![1000, 2000, 3000]);
        assert_eq!(table.rows[0].cells, vec![Some(100.0), None]);
        assert_eq!(table.rows[1].cells, vec![Some(101.0), Some(10.0)]);
        assert_eq!(table.rows[2].cells, vec![None, Some(11.0)]);
    }

    #[test]
    fn test_unselected_symbols_are_ignored() {
        let mut buffer = PriceBuffer::new();
        buffer.append("DOGE", 0.1, 500);
        buffer.append("BTC", 100.0, 1000);

        let table = ChartTable::build(&coins()[..1], &buffer.snapshot());
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].cells, vec![Some(100.0)]);
    }

    #[test]
    fn test_bounds_and_points() {
        let mut buffer = PriceBuffer::new();
        buffer.append("BTC", 100.0, 1000);
        buffer.append("BTC", 105.0, 3000);
        buffer.append("ETH", 9.0, 2000);

        let table = ChartTable::build(&coins(), &buffer.snapshot());
        assert_eq!(table.price_bounds(), Some((9.0, 105.0)));
        assert_eq!(table.column_bounds(0), Some((100.0, 105.0)));
        assert_eq!(table.column_points(0), vec![(0.0, 100.0), (2.0, 105.0)]);
        assert_eq!(table.column_points(1), vec![(1.0, 9.0)]);
        assert!(table.column_points(7).is_empty());
        assert_eq!(table.span_secs(), 2.0);
    }

    #[test]
    fn test_empty_snapshot() {
        let table = ChartTable::build(&coins(), &BufferSnapshot::default());
        assert!(table.is_empty());
        assert_eq!(table.price_bounds(), None);
        assert_eq!(table.columns.len(), 2);
    }
}
