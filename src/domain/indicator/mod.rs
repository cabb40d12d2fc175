//! Streaming technical indicators.
//!
//! - `IndicatorSpec`: indicator identity + parameters, one per call site in the IR
//! - `IndicatorInstance`: the per-run state built from a spec
//!
//! Every instance is advanced exactly once per bar with [`IndicatorInstance::update`]
//! and reports `Value::Na` until its lookback window is filled.

pub mod atr;
pub mod cross;
pub mod ema;
pub mod extremum;
pub mod history;
pub mod roc;
pub mod rsi;
pub mod sma;
pub mod stddev;
pub mod window;
pub mod wma;

use std::fmt;

use crate::domain::error::RuntimeError;
use crate::domain::eval::Value;
use crate::domain::ir::ValueType;
use crate::domain::ohlcv::Bar;

use atr::Atr;
use cross::{Cross, CrossKind};
use ema::Ema;
use extremum::{Extremum, ExtremumKind};
use history::History;
use roc::{Change, Roc};
use rsi::Rsi;
use sma::Sma;
use stddev::Stdev;
use wma::Wma;

/// `Some(v)` when `v` is finite.
pub(crate) fn finite(v: f64) -> Option<f64> {
    Some(v).filter(|v| v.is_finite())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorSpec {
    Sma { length: i64 },
    Ema { length: i64 },
    Rma { length: i64 },
    Wma { length: i64 },
    Highest { length: i64 },
    Lowest { length: i64 },
    Stdev { length: i64 },
    Rsi { length: i64 },
    Atr { length: i64 },
    Change { length: i64 },
    Roc { length: i64 },
    Crossover,
    Crossunder,
    Cross,
    History { offset: i64 },
}

impl IndicatorSpec {
    pub fn name(&self) -> &'static str {
        match self {
            IndicatorSpec::Sma { .. } => "ta.sma",
            IndicatorSpec::Ema { .. } => "ta.ema",
            IndicatorSpec::Rma { .. } => "ta.rma",
            IndicatorSpec::Wma { .. } => "ta.wma",
            IndicatorSpec::Highest { .. } => "ta.highest",
            IndicatorSpec::Lowest { .. } => "ta.lowest",
            IndicatorSpec::Stdev { .. } => "ta.stdev",
            IndicatorSpec::Rsi { .. } => "ta.rsi",
            IndicatorSpec::Atr { .. } => "ta.atr",
            IndicatorSpec::Change { .. } => "ta.change",
            IndicatorSpec::Roc { .. } => "ta.roc",
            IndicatorSpec::Crossover => "ta.crossover",
            IndicatorSpec::Crossunder => "ta.crossunder",
            IndicatorSpec::Cross => "ta.cross",
            IndicatorSpec::History { .. } => "history",
        }
    }

    pub fn length(&self) -> Option<i64> {
        match *self {
            IndicatorSpec::Sma { length }
            | IndicatorSpec::Ema { length }
            | IndicatorSpec::Rma { length }
            | IndicatorSpec::Wma { length }
            | IndicatorSpec::Highest { length }
            | IndicatorSpec::Lowest { length }
            | IndicatorSpec::Stdev { length }
            | IndicatorSpec::Rsi { length }
            | IndicatorSpec::Atr { length }
            | IndicatorSpec::Change { length }
            | IndicatorSpec::Roc { length } => Some(length),
            IndicatorSpec::History { offset } => Some(offset),
            IndicatorSpec::Crossover | IndicatorSpec::Crossunder | IndicatorSpec::Cross => None,
        }
    }

    /// Number of per-bar input values `update` expects.
    pub fn input_count(&self) -> usize {
        match self {
            IndicatorSpec::Atr { .. } => 0,
            IndicatorSpec::Crossover | IndicatorSpec::Crossunder | IndicatorSpec::Cross => 2,
            _ => 1,
        }
    }

    /// Output type; `History` takes the type of its input.
    pub fn output_type(&self, input: ValueType) -> ValueType {
        match self {
            IndicatorSpec::Crossover | IndicatorSpec::Crossunder | IndicatorSpec::Cross => {
                ValueType::Bool
            }
            IndicatorSpec::History { .. } => input,
            _ => ValueType::Number,
        }
    }

    /// Build fresh per-run state. Window lengths must be at least 1
    /// (a history offset may be 0).
    pub fn instantiate(&self) -> Result<IndicatorInstance, RuntimeError> {
        let window = |length: i64| -> Result<usize, RuntimeError> {
            if length < 1 {
                return Err(RuntimeError::InvalidWindow {
                    indicator: self.name().to_string(),
                    length,
                });
            }
            usize::try_from(length).map_err(|_| RuntimeError::InvalidWindow {
                indicator: self.name().to_string(),
                length,
            })
        };

        let state = match *self {
            IndicatorSpec::Sma { length } => IndicatorState::Sma(Sma::new(window(length)?)),
            IndicatorSpec::Ema { length } => IndicatorState::Ema(Ema::new(window(length)?)),
            IndicatorSpec::Rma { length } => IndicatorState::Ema(Ema::rma(window(length)?)),
            IndicatorSpec::Wma { length } => IndicatorState::Wma(Wma::new(window(length)?)),
            IndicatorSpec::Highest { length } => IndicatorState::Extremum(Extremum::new(
                ExtremumKind::Highest,
                window(length)?,
            )),
            IndicatorSpec::Lowest { length } => IndicatorState::Extremum(Extremum::new(
                ExtremumKind::Lowest,
                window(length)?,
            )),
            IndicatorSpec::Stdev { length } => IndicatorState::Stdev(Stdev::new(window(length)?)),
            IndicatorSpec::Rsi { length } => IndicatorState::Rsi(Rsi::new(window(length)?)),
            IndicatorSpec::Atr { length } => IndicatorState::Atr(Atr::new(window(length)?)),
            IndicatorSpec::Change { length } => {
                IndicatorState::Change(Change::new(window(length)?))
            }
            IndicatorSpec::Roc { length } => IndicatorState::Roc(Roc::new(window(length)?)),
            IndicatorSpec::Crossover => IndicatorState::Cross(Cross::new(CrossKind::Over)),
            IndicatorSpec::Crossunder => IndicatorState::Cross(Cross::new(CrossKind::Under)),
            IndicatorSpec::Cross => IndicatorState::Cross(Cross::new(CrossKind::Either)),
            IndicatorSpec::History { offset } => {
                let offset = usize::try_from(offset).map_err(|_| RuntimeError::InvalidWindow {
                    indicator: self.name().to_string(),
                    length: offset,
                })?;
                IndicatorState::History(History::new(offset))
            }
        };

        Ok(IndicatorInstance {
            state,
            last: Value::Na,
        })
    }
}

impl fmt::Display for IndicatorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.length() {
            Some(length) => write!(f, "{}({})", self.name(), length),
            None => write!(f, "{}", self.name()),
        }
    }
}

#[derive(Debug, Clone)]
enum IndicatorState {
    Sma(Sma),
    Ema(Ema),
    Wma(Wma),
    Extremum(Extremum),
    Stdev(Stdev),
    Rsi(Rsi),
    Atr(Atr),
    Change(Change),
    Roc(Roc),
    Cross(Cross),
    History(History),
}

/// Per-run indicator state.
#[derive(Debug, Clone)]
pub struct IndicatorInstance {
    state: IndicatorState,
    last: Value,
}

impl IndicatorInstance {
    /// Advance by one bar and return the new output.
    pub fn update(&mut self, bar: &Bar, inputs: &[Value]) -> Value {
        let first = inputs.first().copied().unwrap_or(Value::Na);
        let source = first.as_number();
        let out = match &mut self.state {
            IndicatorState::Sma(s) => Value::from(s.update(source)),
            IndicatorState::Ema(s) => Value::from(s.update(source)),
            IndicatorState::Wma(s) => Value::from(s.update(source)),
            IndicatorState::Extremum(s) => Value::from(s.update(source)),
            IndicatorState::Stdev(s) => Value::from(s.update(source)),
            IndicatorState::Rsi(s) => Value::from(s.update(source)),
            IndicatorState::Atr(s) => Value::from(s.update(bar)),
            IndicatorState::Change(s) => Value::from(s.update(source)),
            IndicatorState::Roc(s) => Value::from(s.update(source)),
            IndicatorState::Cross(s) => {
                let second = inputs.get(1).and_then(|v| v.as_number());
                Value::Bool(s.update(source, second))
            }
            IndicatorState::History(s) => s.update(first),
        };
        self.last = out;
        out
    }

    /// Output of the most recent `update`.
    pub fn current(&self) -> Value {
        self.last
    }
}
