//! Binance spot klines over HTTP.
//!
//! Pages through `/api/v3/klines` 1000 bars at a time, advancing the start
//! time one timeframe past the last bar received. Transient HTTP failures are
//! retried with exponential backoff.

use std::time::Duration as StdDuration;

use chrono::{DateTime, NaiveDateTime};
use serde_json::Value as Json;
use tracing::{debug, info, warn};

use crate::domain::error::PineError;
use crate::domain::ohlcv::{normalize_bars, Bar, Timeframe};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";
pub const PAGE_LIMIT: usize = 1000;

pub struct BinanceAdapter {
    client: reqwest::blocking::Client,
    base_url: String,
    max_retries: u32,
    base_delay: StdDuration,
}

fn data_err(reason: impl Into<String>) -> PineError {
    PineError::DataSource {
        reason: reason.into(),
    }
}

/// `BTC/USDT` -> `BTCUSDT`.
pub fn exchange_symbol(symbol: &str) -> String {
    symbol.replace(['/', '-'], "").to_uppercase()
}

fn millis(t: NaiveDateTime) -> i64 {
    t.and_utc().timestamp_millis()
}

fn number(row: &[Json], index: usize) -> Result<f64, PineError> {
    match row.get(index) {
        Some(Json::String(s)) => s
            .parse()
            .map_err(|_| data_err(format!("kline field {index}: invalid number '{s}'"))),
        Some(Json::Number(n)) => n
            .as_f64()
            .ok_or_else(|| data_err(format!("kline field {index}: invalid number"))),
        _ => Err(data_err(format!("kline field {index} missing"))),
    }
}

/// Parse a klines response body into bars.
pub fn parse_klines(body: &str) -> Result<Vec<Bar>, PineError> {
    let json: Json =
        serde_json::from_str(body).map_err(|e| data_err(format!("invalid klines JSON: {e}")))?;
    let rows = match json {
        Json::Array(rows) => rows,
        Json::Object(map) => {
            let msg = map
                .get("msg")
                .and_then(Json::as_str)
                .unwrap_or("unexpected response object");
            return Err(data_err(format!("binance error: {msg}")));
        }
        _ => return Err(data_err("klines response is not an array")),
    };

    rows.iter()
        .map(|row| {
            let row = row
                .as_array()
                .ok_or_else(|| data_err("kline row is not an array"))?;
            let open_time = row
                .first()
                .and_then(Json::as_i64)
                .ok_or_else(|| data_err("kline open time missing"))?;
            let timestamp = DateTime::from_timestamp_millis(open_time)
                .map(|dt| dt.naive_utc())
                .ok_or_else(|| data_err(format!("invalid kline open time {open_time}")))?;
            Ok(Bar {
                timestamp,
                open: number(row, 1)?,
                high: number(row, 2)?,
                low: number(row, 3)?,
                close: number(row, 4)?,
                volume: number(row, 5)?,
            })
        })
        .collect()
}

impl BinanceAdapter {
    pub fn new(base_url: &str) -> Result<Self, PineError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(StdDuration::from_secs(30))
            .user_agent(concat!("pinetrader/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| data_err(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries: 3,
            base_delay: StdDuration::from_millis(500),
        })
    }

    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, PineError> {
        let base_url = config
            .get_string("data", "base_url")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self::new(&base_url)
    }

    fn klines_url(&self, symbol: &str, timeframe: Timeframe, since: i64, end: i64) -> String {
        format!(
            "{}/api/v3/klines?symbol={}&interval={}&startTime={}&endTime={}&limit={}",
            self.base_url,
            exchange_symbol(symbol),
            timeframe,
            since,
            end,
            PAGE_LIMIT
        )
    }

    fn get_with_retry(&self, url: &str) -> Result<String, PineError> {
        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                warn!(attempt, ?delay, error = %last_error, "retrying klines request");
                std::thread::sleep(delay);
            }
            match self.client.get(url).send() {
                Ok(resp) if resp.status().is_server_error() || resp.status().as_u16() == 429 => {
                    last_error = format!("HTTP {}", resp.status());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp
                        .text()
                        .map_err(|e| data_err(format!("failed to read response: {e}")))?;
                    if !status.is_success() {
                        return Err(data_err(format!("HTTP {status}: {body}")));
                    }
                    return Ok(body);
                }
                Err(e) => last_error = e.to_string(),
            }
        }
        Err(data_err(format!(
            "klines request failed after {} attempts: {last_error}",
            self.max_retries + 1
        )))
    }
}

impl DataPort for BinanceAdapter {
    fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Bar>, PineError> {
        let step = timeframe.duration().num_milliseconds();
        let end_ms = millis(end);
        let mut since = millis(start);
        let mut bars = Vec::new();

        while since <= end_ms {
            let url = self.klines_url(symbol, timeframe, since, end_ms);
            let page = parse_klines(&self.get_with_retry(&url)?)?;
            debug!(symbol, %timeframe, since, received = page.len(), "fetched klines page");
            let Some(last) = page.last() else {
                break;
            };
            since = millis(last.timestamp) + step;
            let full = page.len() >= PAGE_LIMIT;
            bars.extend(page);
            if !full {
                break;
            }
        }

        bars.retain(|b| b.timestamp >= start && b.timestamp <= end);
        normalize_bars(&mut bars);
        info!(symbol, %timeframe, bars = bars.len(), "downloaded bars from binance");
        Ok(bars)
    }

    /// The exchange does not expose a range; reports none.
    fn data_range(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, PineError> {
        Ok(None)
    }
}
