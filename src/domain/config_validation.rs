//! Configuration validation.
//!
//! Validates the `[data]` and `[backtest]` sections before any run and
//! resolves the values the pipeline needs from them.

use std::str::FromStr;

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::domain::backtest::ConfigOverrides;
use crate::domain::error::PineError;
use crate::domain::ohlcv::Timeframe;
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_DAYS_BACK: i64 = 30;
pub const DEFAULT_TIMEFRAME: Timeframe = Timeframe::M3;
pub const DEFAULT_POOL_SIZE: i64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSourceKind {
    Csv,
    Sqlite,
    Binance,
    /// SQLite cache in front of Binance.
    Cached,
}

impl FromStr for DataSourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(DataSourceKind::Csv),
            "sqlite" => Ok(DataSourceKind::Sqlite),
            "binance" => Ok(DataSourceKind::Binance),
            "cached" => Ok(DataSourceKind::Cached),
            other => Err(format!(
                "unknown data source '{other}', expected csv, sqlite, binance or cached"
            )),
        }
    }
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> PineError {
    PineError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn missing(section: &str, key: &str) -> PineError {
    PineError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

fn non_empty(config: &dyn ConfigPort, section: &str, key: &str) -> Option<String> {
    config
        .get_string(section, key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn require(config: &dyn ConfigPort, section: &str, key: &str) -> Result<String, PineError> {
    non_empty(config, section, key).ok_or_else(|| missing(section, key))
}

/// Validate `[data]` and return the selected source.
pub fn validate_data_config(config: &dyn ConfigPort) -> Result<DataSourceKind, PineError> {
    let kind = match non_empty(config, "data", "source") {
        Some(s) => s.parse().map_err(|e: String| invalid("data", "source", e))?,
        None => DataSourceKind::Csv,
    };
    match kind {
        DataSourceKind::Csv => {
            require(config, "data", "csv_dir")?;
        }
        DataSourceKind::Sqlite | DataSourceKind::Cached => {
            require(config, "data", "sqlite_path")?;
        }
        DataSourceKind::Binance => {}
    }
    let pool_size = config.get_int("data", "pool_size", DEFAULT_POOL_SIZE);
    if pool_size < 1 {
        return Err(invalid("data", "pool_size", "pool_size must be at least 1"));
    }
    Ok(kind)
}

/// Validate `[backtest]`. The strategy file may come from the command line
/// instead, so it is not required here.
pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), PineError> {
    require(config, "backtest", "symbol")?;
    timeframe(config)?;
    validate_capital(config)?;
    validate_commission(config)?;
    validate_dates(config)?;
    Ok(())
}

/// `[backtest] timeframe`, defaulting to 3m.
pub fn timeframe(config: &dyn ConfigPort) -> Result<Timeframe, PineError> {
    match non_empty(config, "backtest", "timeframe") {
        Some(s) => s.parse().map_err(|e: String| invalid("backtest", "timeframe", e)),
        None => Ok(DEFAULT_TIMEFRAME),
    }
}

fn number(config: &dyn ConfigPort, key: &str) -> Result<Option<f64>, PineError> {
    match non_empty(config, "backtest", key) {
        Some(s) => s
            .parse::<f64>()
            .map(Some)
            .map_err(|_| invalid("backtest", key, format!("'{s}' is not a number"))),
        None => Ok(None),
    }
}

fn validate_capital(config: &dyn ConfigPort) -> Result<(), PineError> {
    if number(config, "initial_capital")?.is_some_and(|v| v <= 0.0) {
        return Err(invalid(
            "backtest",
            "initial_capital",
            "initial_capital must be positive",
        ));
    }
    Ok(())
}

fn validate_commission(config: &dyn ConfigPort) -> Result<(), PineError> {
    if number(config, "commission_pct")?.is_some_and(|v| v < 0.0) {
        return Err(invalid(
            "backtest",
            "commission_pct",
            "commission_pct must be non-negative",
        ));
    }
    Ok(())
}

fn validate_dates(config: &dyn ConfigPort) -> Result<(), PineError> {
    let start = parse_date(config, "start_date")?;
    let end = parse_date(config, "end_date")?;
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(invalid(
                "backtest",
                "start_date",
                "start_date must not be after end_date",
            ));
        }
    }
    if config.get_int("backtest", "days_back", DEFAULT_DAYS_BACK) < 1 {
        return Err(invalid("backtest", "days_back", "days_back must be at least 1"));
    }
    Ok(())
}

fn parse_date(config: &dyn ConfigPort, key: &str) -> Result<Option<NaiveDate>, PineError> {
    match non_empty(config, "backtest", key) {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| invalid("backtest", key, format!("invalid {key} format, expected YYYY-MM-DD"))),
    }
}

/// Requested bar window.
///
/// `end_date` covers the whole day and defaults to `now`. Without a
/// `start_date` the window reaches `days_back` days before the end.
pub fn resolve_date_range(
    config: &dyn ConfigPort,
    now: NaiveDateTime,
) -> Result<(NaiveDateTime, NaiveDateTime), PineError> {
    let end = match parse_date(config, "end_date")? {
        Some(d) => d.and_hms_opt(23, 59, 59).unwrap_or(now),
        None => now,
    };
    let start = match parse_date(config, "start_date")? {
        Some(d) => d.and_time(chrono::NaiveTime::MIN),
        None => {
            let days = config.get_int("backtest", "days_back", DEFAULT_DAYS_BACK);
            end - Duration::days(days)
        }
    };
    if start > end {
        return Err(invalid(
            "backtest",
            "start_date",
            "start_date must not be after end_date",
        ));
    }
    Ok((start, end))
}

/// Capital and commission set explicitly in `[backtest]`.
pub fn config_overrides(config: &dyn ConfigPort) -> Result<ConfigOverrides, PineError> {
    Ok(ConfigOverrides {
        initial_capital: number(config, "initial_capital")?,
        commission_pct: number(config, "commission_pct")?,
    })
}

/// Default report path for a strategy file.
pub fn default_report_path(strategy_file: &str) -> String {
    format!("{strategy_file}-backtest_results.csv")
}
