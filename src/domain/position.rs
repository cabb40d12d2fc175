//! Open position and closed trade records.

use chrono::NaiveDateTime;
use std::fmt;

use crate::domain::ohlcv::Bar;
use crate::domain::price;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// `strategy.close` or `strategy.exit` without bracket prices.
    Signal,
    CloseAll,
    Stop,
    Limit,
    /// Closed by an entry in the opposite direction.
    Reversal,
    EndOfData,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::Signal => "signal",
            ExitReason::CloseAll => "close_all",
            ExitReason::Stop => "stop",
            ExitReason::Limit => "limit",
            ExitReason::Reversal => "reversal",
            ExitReason::EndOfData => "end_of_data",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stop / limit prices registered by `strategy.exit`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bracket {
    pub stop: Option<f64>,
    pub limit: Option<f64>,
}

impl Bracket {
    pub fn is_empty(&self) -> bool {
        self.stop.is_none() && self.limit.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub direction: Direction,
    pub entry_id: String,
    /// Size-weighted average fill price.
    pub entry_price: f64,
    pub entry_time: NaiveDateTime,
    pub size: f64,
    pub entries: u32,
    pub bracket: Bracket,
    /// Entry commission not yet charged to a closed trade.
    pub open_commission: f64,
    /// Index of the bar the position was opened on.
    pub opened_bar: usize,
}

impl Position {
    /// Positive for long, negative for short.
    pub fn signed_size(&self) -> f64 {
        self.direction.sign() * self.size
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.direction.sign() * (price - self.entry_price) * self.size
    }

    /// Stop fill for this bar, if the stop was touched. A bar that opens
    /// beyond the stop fills at the open.
    pub fn stop_fill(&self, bar: &Bar) -> Option<f64> {
        let stop = self.bracket.stop?;
        match self.direction {
            Direction::Long if price::le(bar.low, stop) => Some(bar.open.min(stop)),
            Direction::Short if price::ge(bar.high, stop) => Some(bar.open.max(stop)),
            _ => None,
        }
    }

    /// Limit fill for this bar, if the limit was touched. A bar that opens
    /// beyond the limit fills at the open.
    pub fn limit_fill(&self, bar: &Bar) -> Option<f64> {
        let limit = self.bracket.limit?;
        match self.direction {
            Direction::Long if price::ge(bar.high, limit) => Some(bar.open.max(limit)),
            Direction::Short if price::le(bar.low, limit) => Some(bar.open.min(limit)),
            _ => None,
        }
    }

    /// Bracket exit for this bar. The stop wins when both sides trigger.
    pub fn bracket_fill(&self, bar: &Bar) -> Option<(f64, ExitReason)> {
        self.stop_fill(bar)
            .map(|p| (p, ExitReason::Stop))
            .or_else(|| self.limit_fill(bar).map(|p| (p, ExitReason::Limit)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub entry_id: String,
    pub direction: Direction,
    pub entry_time: NaiveDateTime,
    pub exit_time: NaiveDateTime,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    pub commission: f64,
    pub profit_loss: f64,
    pub exit_reason: ExitReason,
}

impl Trade {
    pub fn is_win(&self) -> bool {
        self.profit_loss > 0.0
    }
}
