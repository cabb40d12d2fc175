//! CSV file data adapter.
//!
//! One file per symbol and timeframe, `<SYMBOL>_<timeframe>.csv`, with `/` in
//! the symbol replaced by `-`. Columns: `datetime,open,high,low,close,volume`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::domain::error::PineError;
use crate::domain::ohlcv::{normalize_bars, Bar, Timeframe};
use crate::ports::data_port::{BarStore, DataPort};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const HEADER: [&str; 6] = ["datetime", "open", "high", "low", "close", "volume"];

pub struct CsvAdapter {
    base_path: PathBuf,
}

fn data_err(reason: impl Into<String>) -> PineError {
    PineError::DataSource {
        reason: reason.into(),
    }
}

/// Accepts `YYYY-MM-DD HH:MM:SS`, the ISO `T` form, or a bare date.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
}

fn field(record: &csv::StringRecord, index: usize, line: u64) -> Result<f64, PineError> {
    let name = HEADER[index];
    record
        .get(index)
        .ok_or_else(|| data_err(format!("line {line}: missing {name} column")))?
        .trim()
        .parse()
        .map_err(|e| data_err(format!("line {line}: invalid {name} value: {e}")))
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn file_name(symbol: &str, timeframe: Timeframe) -> String {
        format!("{}_{}.csv", symbol.replace('/', "-"), timeframe)
    }

    pub fn csv_path(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.base_path.join(Self::file_name(symbol, timeframe))
    }

    fn read_all(&self, path: &Path) -> Result<Vec<Bar>, PineError> {
        let mut rdr = csv::Reader::from_path(path)
            .map_err(|e| data_err(format!("failed to read {}: {}", path.display(), e)))?;

        let mut bars = Vec::new();
        for result in rdr.records() {
            let record = result.map_err(|e| data_err(format!("CSV parse error: {e}")))?;
            let line = record.position().map_or(0, |p| p.line());

            let stamp = record
                .get(0)
                .ok_or_else(|| data_err(format!("line {line}: missing datetime column")))?;
            let timestamp = parse_datetime(stamp)
                .ok_or_else(|| data_err(format!("line {line}: invalid datetime '{stamp}'")))?;

            bars.push(Bar {
                timestamp,
                open: field(&record, 1, line)?,
                high: field(&record, 2, line)?,
                low: field(&record, 3, line)?,
                close: field(&record, 4, line)?,
                volume: field(&record, 5, line)?,
            });
        }
        normalize_bars(&mut bars);
        Ok(bars)
    }

    fn write_all(&self, path: &Path, bars: &[Bar]) -> Result<(), PineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut wtr = csv::Writer::from_path(path)
            .map_err(|e| data_err(format!("failed to create {}: {}", path.display(), e)))?;
        wtr.write_record(HEADER)
            .map_err(|e| data_err(e.to_string()))?;
        for bar in bars {
            wtr.write_record([
                bar.timestamp.format(DATETIME_FORMAT).to_string(),
                bar.open.to_string(),
                bar.high.to_string(),
                bar.low.to_string(),
                bar.close.to_string(),
                bar.volume.to_string(),
            ])
            .map_err(|e| data_err(e.to_string()))?;
        }
        wtr.flush()?;
        Ok(())
    }
}

impl DataPort for CsvAdapter {
    fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Bar>, PineError> {
        let path = self.csv_path(symbol, timeframe);
        let mut bars = self.read_all(&path)?;
        bars.retain(|b| b.timestamp >= start && b.timestamp <= end);
        debug!(path = %path.display(), bars = bars.len(), "read csv bars");
        Ok(bars)
    }

    fn data_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, PineError> {
        let path = self.csv_path(symbol, timeframe);
        if !path.exists() {
            return Ok(None);
        }
        let bars = self.read_all(&path)?;
        Ok(match (bars.first(), bars.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp, bars.len())),
            _ => None,
        })
    }
}

impl BarStore for CsvAdapter {
    /// Merge into the existing file; incoming bars replace equal timestamps.
    fn store_bars(&self, symbol: &str, timeframe: Timeframe, bars: &[Bar]) -> Result<usize, PineError> {
        let path = self.csv_path(symbol, timeframe);
        let mut merged = bars.to_vec();
        if path.exists() {
            merged.extend(self.read_all(&path)?);
        }
        // stable sort keeps incoming bars ahead of stored ones for dedup
        merged.sort_by_key(|b| b.timestamp);
        merged.dedup_by_key(|b| b.timestamp);
        self.write_all(&path, &merged)?;
        debug!(path = %path.display(), written = bars.len(), total = merged.len(), "stored csv bars");
        Ok(bars.len())
    }
}
