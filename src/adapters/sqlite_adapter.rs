//! SQLite bar store.
//!
//! A single `bars` table keyed by (symbol, timeframe, datetime). Writes are
//! `INSERT OR REPLACE` upserts inside one transaction.

use chrono::NaiveDateTime;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use tracing::debug;

use crate::domain::config_validation::DEFAULT_POOL_SIZE;
use crate::domain::error::PineError;
use crate::domain::ohlcv::{Bar, Timeframe};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::{BarStore, DataPort};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn pool_err(e: r2d2::Error) -> PineError {
    PineError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> PineError {
    PineError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn parse_stamp(index: usize, s: String) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(&s, DATETIME_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
    })
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, PineError> {
        let db_path = config
            .get_string("data", "sqlite_path")
            .ok_or_else(|| PineError::ConfigMissing {
                section: "data".into(),
                key: "sqlite_path".into(),
            })?;
        let pool_size = config.get_int("data", "pool_size", DEFAULT_POOL_SIZE).max(1) as u32;
        Self::open(&db_path, pool_size)
    }

    pub fn open(db_path: &str, pool_size: u32) -> Result<Self, PineError> {
        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_err)?;
        let adapter = Self { pool };
        adapter.initialize_schema()?;
        Ok(adapter)
    }

    pub fn in_memory() -> Result<Self, PineError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(pool_err)?;
        let adapter = Self { pool };
        adapter.initialize_schema()?;
        Ok(adapter)
    }

    pub fn initialize_schema(&self) -> Result<(), PineError> {
        let conn = self.pool.get().map_err(pool_err)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS bars (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                datetime TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                PRIMARY KEY (symbol, timeframe, datetime)
            );",
        )
        .map_err(query_err)
    }

    /// Symbols with at least one stored bar for `timeframe`.
    pub fn list_symbols(&self, timeframe: Timeframe) -> Result<Vec<String>, PineError> {
        let conn = self.pool.get().map_err(pool_err)?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT symbol FROM bars WHERE timeframe = ?1 ORDER BY symbol")
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![timeframe.as_str()], |row| row.get(0))
            .map_err(query_err)?;
        rows.collect::<Result<Vec<String>, _>>().map_err(query_err)
    }
}

impl DataPort for SqliteAdapter {
    fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Bar>, PineError> {
        let conn = self.pool.get().map_err(pool_err)?;
        let mut stmt = conn
            .prepare(
                "SELECT datetime, open, high, low, close, volume
                 FROM bars
                 WHERE symbol = ?1 AND timeframe = ?2 AND datetime >= ?3 AND datetime <= ?4
                 ORDER BY datetime ASC",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(
                params![
                    symbol,
                    timeframe.as_str(),
                    start.format(DATETIME_FORMAT).to_string(),
                    end.format(DATETIME_FORMAT).to_string()
                ],
                |row| {
                    Ok(Bar {
                        timestamp: parse_stamp(0, row.get(0)?)?,
                        open: row.get(1)?,
                        high: row.get(2)?,
                        low: row.get(3)?,
                        close: row.get(4)?,
                        volume: row.get(5)?,
                    })
                },
            )
            .map_err(query_err)?;

        let bars = rows.collect::<Result<Vec<_>, _>>().map_err(query_err)?;
        debug!(symbol, %timeframe, bars = bars.len(), "read sqlite bars");
        Ok(bars)
    }

    fn data_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, PineError> {
        let conn = self.pool.get().map_err(pool_err)?;
        let (first, last, count): (Option<String>, Option<String>, i64) = conn
            .query_row(
                "SELECT MIN(datetime), MAX(datetime), COUNT(*)
                 FROM bars WHERE symbol = ?1 AND timeframe = ?2",
                params![symbol, timeframe.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(query_err)?;

        match (first, last) {
            (Some(first), Some(last)) => Ok(Some((
                parse_stamp(0, first).map_err(query_err)?,
                parse_stamp(1, last).map_err(query_err)?,
                count as usize,
            ))),
            _ => Ok(None),
        }
    }
}

impl BarStore for SqliteAdapter {
    fn store_bars(&self, symbol: &str, timeframe: Timeframe, bars: &[Bar]) -> Result<usize, PineError> {
        let mut conn = self.pool.get().map_err(pool_err)?;
        let tx = conn.transaction().map_err(query_err)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO bars
                     (symbol, timeframe, datetime, open, high, low, close, volume)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )
                .map_err(query_err)?;
            for bar in bars {
                stmt.execute(params![
                    symbol,
                    timeframe.as_str(),
                    bar.timestamp.format(DATETIME_FORMAT).to_string(),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume
                ])
                .map_err(query_err)?;
            }
        }
        tx.commit().map_err(query_err)?;
        debug!(symbol, %timeframe, written = bars.len(), "stored sqlite bars");
        Ok(bars.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    struct EmptyConfig;

    impl ConfigPort for EmptyConfig {
        fn get_string(&self, _section: &str, _key: &str) -> Option<String> {
            None
        }
        fn get_int(&self, _section: &str, _key: &str, default: i64) -> i64 {
            default
        }
        fn get_double(&self, _section: &str, _key: &str, default: f64) -> f64 {
            default
        }
        fn get_bool(&self, _section: &str, _key: &str, default: bool) -> bool {
            default
        }
    }

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn bar(h: u32, close: f64) -> Bar {
        Bar {
            timestamp: at(h),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
        }
    }

    #[test]
    fn from_config_missing_path() {
        let result = SqliteAdapter::from_config(&EmptyConfig);
        assert!(matches!(result, Err(PineError::ConfigMissing { key, .. }) if key == "sqlite_path"));
    }

    #[test]
    fn store_and_fetch_round_trip() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        let bars = vec![bar(1, 100.0), bar(2, 101.0), bar(3, 102.0)];
        assert_eq!(adapter.store_bars("BTC/USDT", Timeframe::H1, &bars).unwrap(), 3);

        let fetched = adapter
            .fetch_bars("BTC/USDT", Timeframe::H1, at(2), at(3))
            .unwrap();
        assert_eq!(fetched, bars[1..].to_vec());
        // other timeframes are separate series
        assert!(adapter
            .fetch_bars("BTC/USDT", Timeframe::M3, at(0), at(5))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn upsert_replaces_existing_rows() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter
            .store_bars("X", Timeframe::H1, &[bar(1, 100.0), bar(2, 101.0)])
            .unwrap();
        adapter.store_bars("X", Timeframe::H1, &[bar(2, 555.0)]).unwrap();
        let fetched = adapter.fetch_bars("X", Timeframe::H1, at(0), at(5)).unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[1].close, 555.0);
    }

    #[test]
    fn data_range_and_symbols() {
        let adapter = SqliteAdapter::in_memory().unwrap();
        assert_eq!(adapter.data_range("X", Timeframe::H1).unwrap(), None);
        adapter
            .store_bars("X", Timeframe::H1, &[bar(3, 1.0), bar(1, 1.0), bar(2, 1.0)])
            .unwrap();
        adapter.store_bars("A", Timeframe::H1, &[bar(1, 1.0)]).unwrap();
        assert_eq!(
            adapter.data_range("X", Timeframe::H1).unwrap(),
            Some((at(1), at(3), 3))
        );
        assert_eq!(
            adapter.list_symbols(Timeframe::H1).unwrap(),
            vec!["A".to_string(), "X".to_string()]
        );
    }

    #[test]
    fn file_database_persists() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bars.db");
        let path = path.to_str().unwrap();
        SqliteAdapter::open(path, 2)
            .unwrap()
            .store_bars("X", Timeframe::D1, &[bar(0, 5.0)])
            .unwrap();
        let reopened = SqliteAdapter::open(path, 2).unwrap();
        assert_eq!(reopened.data_range("X", Timeframe::D1).unwrap().map(|r| r.2), Some(1));
    }
}
