//! Local store in front of a remote source.
//!
//! A request is served from the store when the stored range covers it (within
//! one timeframe at each end). Otherwise the remote window is downloaded,
//! upserted into the store, and the store is read again.

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::domain::error::PineError;
use crate::domain::ohlcv::{Bar, Timeframe};
use crate::ports::data_port::{BarCache, DataPort};

pub struct CachedDataSource<S: BarCache, R: DataPort> {
    store: S,
    remote: R,
}

/// Whether a stored range `[first, last]` covers `[start, end]`.
pub fn covers(
    range: Option<(NaiveDateTime, NaiveDateTime, usize)>,
    timeframe: Timeframe,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> bool {
    let step = timeframe.duration();
    match range {
        Some((first, last, count)) if count > 0 => first <= start + step && last + step >= end,
        _ => false,
    }
}

impl<S: BarCache, R: DataPort> CachedDataSource<S, R> {
    pub fn new(store: S, remote: R) -> Self {
        Self { store, remote }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Download `[start, end]` from the remote and upsert it into the store.
    pub fn refresh(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<usize, PineError> {
        let bars = self.remote.fetch_bars(symbol, timeframe, start, end)?;
        let written = self.store.store_bars(symbol, timeframe, &bars)?;
        info!(symbol, %timeframe, written, "cached remote bars");
        Ok(written)
    }
}

impl<S: BarCache, R: DataPort> DataPort for CachedDataSource<S, R> {
    fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Bar>, PineError> {
        let range = self.store.data_range(symbol, timeframe)?;
        if covers(range, timeframe, start, end) {
            debug!(symbol, %timeframe, "cache hit");
        } else {
            debug!(symbol, %timeframe, ?range, "cache miss");
            self.refresh(symbol, timeframe, start, end)?;
        }
        self.store.fetch_bars(symbol, timeframe, start, end)
    }

    fn data_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, PineError> {
        self.store.data_range(symbol, timeframe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::csv_adapter::CsvAdapter;
    use chrono::NaiveDate;
    use std::cell::Cell;
    use tempfile::TempDir;

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    struct CountingRemote {
        calls: Cell<usize>,
    }

    impl DataPort for CountingRemote {
        fn fetch_bars(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            start: NaiveDateTime,
            end: NaiveDateTime,
        ) -> Result<Vec<Bar>, PineError> {
            self.calls.set(self.calls.get() + 1);
            let mut bars = Vec::new();
            let mut t = start;
            while t <= end {
                bars.push(Bar {
                    timestamp: t,
                    open: 1.0,
                    high: 2.0,
                    low: 0.5,
                    close: 1.5,
                    volume: 3.0,
                });
                t += chrono::Duration::hours(1);
            }
            Ok(bars)
        }

        fn data_range(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
        ) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, PineError> {
            Ok(None)
        }
    }

    fn cached(dir: &TempDir) -> CachedDataSource<CsvAdapter, CountingRemote> {
        CachedDataSource::new(
            CsvAdapter::new(dir.path().to_path_buf()),
            CountingRemote { calls: Cell::new(0) },
        )
    }

    #[test]
    fn coverage_rule() {
        let tf = Timeframe::H1;
        assert!(!covers(None, tf, at(1), at(5)));
        assert!(covers(Some((at(1), at(5), 5)), tf, at(1), at(5)));
        // one timeframe of slack at each end
        assert!(covers(Some((at(2), at(4), 3)), tf, at(1), at(5)));
        assert!(!covers(Some((at(3), at(5), 3)), tf, at(1), at(5)));
        assert!(!covers(Some((at(1), at(3), 3)), tf, at(1), at(5)));
    }

    #[test]
    fn miss_fetches_then_hit_uses_store() {
        let dir = TempDir::new().unwrap();
        let source = cached(&dir);

        let first = source.fetch_bars("BTC/USDT", Timeframe::H1, at(0), at(5)).unwrap();
        assert_eq!(first.len(), 6);
        assert_eq!(source.remote.calls.get(), 1);

        let second = source.fetch_bars("BTC/USDT", Timeframe::H1, at(1), at(4)).unwrap();
        assert_eq!(second.len(), 4);
        assert_eq!(source.remote.calls.get(), 1);
        assert!(dir.path().join("BTC-USDT_1h.csv").exists());
    }

    #[test]
    fn wider_request_refetches() {
        let dir = TempDir::new().unwrap();
        let source = cached(&dir);
        source.fetch_bars("X", Timeframe::H1, at(2), at(4)).unwrap();
        let bars = source.fetch_bars("X", Timeframe::H1, at(0), at(8)).unwrap();
        assert_eq!(source.remote.calls.get(), 2);
        assert_eq!(bars.len(), 9);
        assert_eq!(source.data_range("X", Timeframe::H1).unwrap(), Some((at(0), at(8), 9)));
    }
}
