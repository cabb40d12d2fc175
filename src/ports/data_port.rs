//! Market data ports.

use chrono::NaiveDateTime;

use crate::domain::error::PineError;
use crate::domain::ohlcv::{Bar, Timeframe};

/// Read access to historical bars.
pub trait DataPort {
    /// Bars with `start <= timestamp <= end`, ascending and de-duplicated.
    fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Bar>, PineError>;

    /// First timestamp, last timestamp and bar count, if any bars exist.
    fn data_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, PineError>;
}

/// Write access for local stores.
pub trait BarStore {
    /// Upsert `bars`, keyed by timestamp. Returns the number written.
    fn store_bars(&self, symbol: &str, timeframe: Timeframe, bars: &[Bar]) -> Result<usize, PineError>;
}

/// A store that can serve as a local cache.
pub trait BarCache: DataPort + BarStore {}

impl<T: DataPort + BarStore> BarCache for T {}

impl<T: DataPort + ?Sized> DataPort for Box<T> {
    fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Bar>, PineError> {
        (**self).fetch_bars(symbol, timeframe, start, end)
    }

    fn data_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, PineError> {
        (**self).data_range(symbol, timeframe)
    }
}

impl<T: BarStore + ?Sized> BarStore for Box<T> {
    fn store_bars(&self, symbol: &str, timeframe: Timeframe, bars: &[Bar]) -> Result<usize, PineError> {
        (**self).store_bars(symbol, timeframe, bars)
    }
}
