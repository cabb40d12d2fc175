//! Backtest interpreter.
//!
//! A [`Backtest`] owns everything one run mutates: the indicator instances,
//! the per-bar [`EvalContext`], the open position and the trade ledger. The
//! [`StrategyIr`] it executes is only borrowed, so any number of runs can
//! share one compiled strategy.
//!
//! Per bar, in order: validate the bar, rebuild the context, execute the
//! instructions (collecting order intents), check the position's bracket,
//! execute the intents, apply bracket registrations, record equity. Market
//! orders fill at the bar's close. At most one direction change (open, full
//! close or reversal) happens per bar; later ones are counted in
//! `skipped_orders`.

use chrono::NaiveDateTime;

use crate::domain::error::RuntimeError;
use crate::domain::eval::{EvalContext, Frame, Value};
use crate::domain::execution::{add_to_position, close_position, open_position, reduce_position};
use crate::domain::indicator::IndicatorInstance;
use crate::domain::ir::{Instruction, IrExpr, OrderInstruction, OrderKind, StrategyIr};
use crate::domain::ohlcv::Bar;
use crate::domain::position::{Direction, ExitReason, Position, Trade};
use crate::domain::price;
use crate::domain::strategy::StrategySettings;

/// Commission applied when neither the caller nor the script sets one.
pub const DEFAULT_COMMISSION_PCT: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub default_qty: f64,
    pub pyramiding: u32,
    /// Percent of notional charged on each fill.
    pub commission_pct: f64,
}

/// Caller-side values that take precedence over the script header.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConfigOverrides {
    pub initial_capital: Option<f64>,
    pub commission_pct: Option<f64>,
}

impl BacktestConfig {
    /// Override, then script header, then default.
    pub fn resolve(settings: &StrategySettings, overrides: &ConfigOverrides) -> Self {
        Self {
            initial_capital: overrides.initial_capital.unwrap_or(settings.initial_capital),
            default_qty: settings.default_qty,
            pyramiding: settings.pyramiding,
            commission_pct: overrides
                .commission_pct
                .or(settings.commission_pct)
                .unwrap_or(DEFAULT_COMMISSION_PCT),
        }
    }
}

impl From<&StrategySettings> for BacktestConfig {
    fn from(settings: &StrategySettings) -> Self {
        Self::resolve(settings, &ConfigOverrides::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    /// Realized P&L of all trades closed so far.
    pub cumulative_pl: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunResult {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub bars_processed: usize,
    /// Direction changes dropped because one already happened on the bar.
    pub skipped_orders: usize,
}

impl RunResult {
    pub fn total_pl(&self) -> f64 {
        self.trades.iter().map(|t| t.profit_loss).sum()
    }
}

/// A run aborted by a [`RuntimeError`], with what it had produced so far.
#[derive(Debug, Clone, thiserror::Error)]
#[error("backtest aborted at bar {bar_index}: {error}")]
pub struct RunFailure {
    #[source]
    pub error: RuntimeError,
    pub bar_index: usize,
    pub partial: RunResult,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct BracketRequest {
    stop: Option<f64>,
    limit: Option<f64>,
    profit: Option<f64>,
    loss: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
enum OrderIntent {
    Entry {
        id: String,
        direction: Direction,
        qty: f64,
    },
    /// Market exit of the position (or part of it).
    Exit {
        from_entry: Option<String>,
        qty: Option<f64>,
    },
    /// Stop / limit registration, applied after the bar's market orders.
    Bracket {
        from_entry: Option<String>,
        request: BracketRequest,
    },
    Close {
        id: String,
        qty: Option<f64>,
    },
    CloseAll,
}

/// One strategy run over a bar stream.
pub struct Backtest<'ir> {
    ir: &'ir StrategyIr,
    config: BacktestConfig,
    indicators: Vec<IndicatorInstance>,
    context: EvalContext,
    position: Option<Position>,
    trades: Vec<Trade>,
    equity_curve: Vec<EquityPoint>,
    realized: f64,
    last_bar: Option<Bar>,
    bars_processed: usize,
    skipped_orders: usize,
    /// Signed position size at the start of the current bar.
    start_size: f64,
    state: RunState,
}

impl<'ir> Backtest<'ir> {
    /// Instantiate a fresh run. Fails if an indicator window is invalid.
    pub fn new(ir: &'ir StrategyIr, config: BacktestConfig) -> Result<Self, RuntimeError> {
        let indicators = ir
            .indicators
            .iter()
            .map(|spec| spec.instantiate())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            ir,
            config,
            indicators,
            context: EvalContext::new(&ir.slots),
            position: None,
            trades: Vec::new(),
            equity_curve: Vec::new(),
            realized: 0.0,
            last_bar: None,
            bars_processed: 0,
            skipped_orders: 0,
            start_size: 0.0,
            state: RunState::Idle,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Process one bar.
    pub fn step(&mut self, bar: &Bar) -> Result<(), RuntimeError> {
        if self.state == RunState::Finished {
            return Err(RuntimeError::RunFinished);
        }
        self.state = RunState::Running;
        let bar_index = self.bars_processed;
        self.validate(bar, bar_index)?;

        self.context = self.context.next_bar();
        self.start_size = self.position.as_ref().map_or(0.0, Position::signed_size);

        let ir = self.ir;
        let mut intents = Vec::new();
        self.execute(bar, bar_index, &ir.instructions, &mut intents)?;

        let mut changed = self.check_bracket(bar, bar_index);
        let mut brackets = Vec::new();
        for intent in intents {
            match intent {
                OrderIntent::Bracket {
                    from_entry,
                    request,
                } => brackets.push((from_entry, request)),
                other => self.fill(other, bar, bar_index, &mut changed),
            }
        }
        for (from_entry, request) in brackets {
            self.register_bracket(from_entry.as_deref(), request);
        }

        self.equity_curve.push(EquityPoint {
            timestamp: bar.timestamp,
            cumulative_pl: self.realized,
        });
        self.last_bar = Some(bar.clone());
        self.bars_processed += 1;
        Ok(())
    }

    /// Force-close any open position at the last close and end the run.
    pub fn finish(&mut self) -> Result<RunResult, RuntimeError> {
        if self.state == RunState::Finished {
            return Err(RuntimeError::RunFinished);
        }
        if let (Some(position), Some(bar)) = (self.position.take(), self.last_bar.as_ref()) {
            let trade = close_position(
                position,
                bar.close,
                bar.timestamp,
                ExitReason::EndOfData,
                self.config.commission_pct,
            );
            self.record(trade);
            if let Some(last) = self.equity_curve.last_mut() {
                last.cumulative_pl = self.realized;
            }
        }
        self.state = RunState::Finished;
        Ok(RunResult {
            trades: std::mem::take(&mut self.trades),
            equity_curve: std::mem::take(&mut self.equity_curve),
            bars_processed: self.bars_processed,
            skipped_orders: self.skipped_orders,
        })
    }

    /// Ledger and equity so far, without closing anything.
    pub fn partial(&self) -> RunResult {
        RunResult {
            trades: self.trades.clone(),
            equity_curve: self.equity_curve.clone(),
            bars_processed: self.bars_processed,
            skipped_orders: self.skipped_orders,
        }
    }

    fn validate(&self, bar: &Bar, bar_index: usize) -> Result<(), RuntimeError> {
        if let Some(previous) = self.last_bar.as_ref().map(|b| b.timestamp) {
            if bar.timestamp <= previous {
                return Err(RuntimeError::OutOfOrderBar {
                    bar_index,
                    previous,
                    timestamp: bar.timestamp,
                });
            }
        }
        if !bar.is_finite() {
            return Err(RuntimeError::InvalidBar {
                bar_index,
                reason: "non-finite price or volume".to_string(),
            });
        }
        if price::lt(bar.high, bar.low) {
            return Err(RuntimeError::InvalidBar {
                bar_index,
                reason: format!("high {} below low {}", bar.high, bar.low),
            });
        }
        Ok(())
    }

    fn eval(&self, bar: &Bar, bar_index: usize, expr: &IrExpr) -> Result<Value, RuntimeError> {
        Frame {
            bar,
            bar_index,
            position_size: self.start_size,
            context: &self.context,
            indicators: &self.indicators,
        }
        .eval(expr)
    }

    fn eval_number(
        &self,
        bar: &Bar,
        bar_index: usize,
        expr: Option<&IrExpr>,
    ) -> Result<Option<f64>, RuntimeError> {
        match expr {
            Some(e) => Ok(self.eval(bar, bar_index, e)?.as_number()),
            None => Ok(None),
        }
    }

    fn execute(
        &mut self,
        bar: &Bar,
        bar_index: usize,
        instructions: &'ir [Instruction],
        intents: &mut Vec<OrderIntent>,
    ) -> Result<(), RuntimeError> {
        for instruction in instructions {
            match instruction {
                Instruction::Update { handle, inputs } => {
                    let values = inputs
                        .iter()
                        .map(|e| self.eval(bar, bar_index, e))
                        .collect::<Result<Vec<_>, _>>()?;
                    if let Some(indicator) = self.indicators.get_mut(handle.index()) {
                        indicator.update(bar, &values);
                    }
                }
                Instruction::Assign { slot, expr } => {
                    let value = self.eval(bar, bar_index, expr)?;
                    self.context.set(*slot, value);
                }
                Instruction::InitOnce { slot, expr } => {
                    if !self.context.is_initialized(*slot) {
                        let value = self.eval(bar, bar_index, expr)?;
                        self.context.set(*slot, value);
                        self.context.mark_initialized(*slot);
                    }
                }
                Instruction::If {
                    condition,
                    then_branch,
                    else_branch,
                } => {
                    let branch = if self.eval(bar, bar_index, condition)?.is_true() {
                        then_branch
                    } else {
                        else_branch
                    };
                    self.execute(bar, bar_index, branch, intents)?;
                }
                Instruction::Order(order) => {
                    if let Some(intent) = self.intent(bar, bar_index, order)? {
                        intents.push(intent);
                    }
                }
            }
        }
        Ok(())
    }

    fn intent(
        &self,
        bar: &Bar,
        bar_index: usize,
        order: &OrderInstruction,
    ) -> Result<Option<OrderIntent>, RuntimeError> {
        if let Some(when) = &order.when {
            if !self.eval(bar, bar_index, when)?.is_true() {
                return Ok(None);
            }
        }
        let qty = self.eval_number(bar, bar_index, order.qty.as_ref())?;
        if qty.is_some_and(|q| !price::gt(q, 0.0)) {
            return Ok(None);
        }
        let id = order.id.clone().unwrap_or_default();

        let intent = match order.kind {
            OrderKind::Entry => match order.direction {
                Some(direction) => OrderIntent::Entry {
                    id,
                    direction,
                    qty: qty.unwrap_or(self.config.default_qty),
                },
                None => return Ok(None),
            },
            OrderKind::Exit => {
                let from_entry = order.from_entry.clone();
                let has_bracket = order.stop.is_some()
                    || order.limit.is_some()
                    || order.profit.is_some()
                    || order.loss.is_some();
                if has_bracket {
                    OrderIntent::Bracket {
                        from_entry,
                        request: BracketRequest {
                            stop: self.eval_number(bar, bar_index, order.stop.as_ref())?,
                            limit: self.eval_number(bar, bar_index, order.limit.as_ref())?,
                            profit: self.eval_number(bar, bar_index, order.profit.as_ref())?,
                            loss: self.eval_number(bar, bar_index, order.loss.as_ref())?,
                        },
                    }
                } else {
                    OrderIntent::Exit { from_entry, qty }
                }
            }
            OrderKind::Close => OrderIntent::Close { id, qty },
            OrderKind::CloseAll => OrderIntent::CloseAll,
        };
        Ok(Some(intent))
    }

    fn record(&mut self, trade: Trade) {
        self.realized += trade.profit_loss;
        self.trades.push(trade);
    }

    /// Claim this bar's single direction change.
    fn claim_change(&mut self, changed: &mut bool) -> bool {
        if *changed {
            self.skipped_orders += 1;
            false
        } else {
            *changed = true;
            true
        }
    }

    /// Bracket exit for a position opened on an earlier bar.
    fn check_bracket(&mut self, bar: &Bar, bar_index: usize) -> bool {
        let fill = match &self.position {
            Some(position) if position.opened_bar < bar_index => position.bracket_fill(bar),
            _ => None,
        };
        let Some((price, reason)) = fill else {
            return false;
        };
        if let Some(position) = self.position.take() {
            let trade = close_position(
                position,
                price,
                bar.timestamp,
                reason,
                self.config.commission_pct,
            );
            self.record(trade);
        }
        true
    }

    fn fill(&mut self, intent: OrderIntent, bar: &Bar, bar_index: usize, changed: &mut bool) {
        let pct = self.config.commission_pct;
        match intent {
            OrderIntent::Entry { id, direction, qty } => match self.position.as_ref().map(|p| p.direction) {
                None => {
                    if self.claim_change(changed) {
                        self.position = Some(open_position(
                            direction,
                            &id,
                            bar.close,
                            bar.timestamp,
                            qty,
                            bar_index,
                            pct,
                        ));
                    }
                }
                Some(current) if current == direction => {
                    let pyramiding = self.config.pyramiding;
                    if let Some(position) = self.position.as_mut().filter(|p| p.entries <= pyramiding) {
                        add_to_position(position, bar.close, qty, pct);
                    }
                }
                Some(_) => {
                    if !self.claim_change(changed) {
                        return;
                    }
                    if let Some(position) = self.position.take() {
                        let trade =
                            close_position(position, bar.close, bar.timestamp, ExitReason::Reversal, pct);
                        self.record(trade);
                        self.position = Some(open_position(
                            direction,
                            &id,
                            bar.close,
                            bar.timestamp,
                            qty,
                            bar_index,
                            pct,
                        ));
                    }
                }
            },
            OrderIntent::Exit { from_entry, qty } => {
                let matches = self
                    .position
                    .as_ref()
                    .is_some_and(|p| from_entry.as_ref().is_none_or(|id| *id == p.entry_id));
                if matches {
                    self.exit(qty, ExitReason::Signal, bar, changed);
                }
            }
            OrderIntent::Close { id, qty } => {
                let matches = self.position.as_ref().is_some_and(|p| p.entry_id == id);
                if matches {
                    self.exit(qty, ExitReason::Signal, bar, changed);
                }
            }
            OrderIntent::CloseAll => {
                if self.position.is_some() {
                    self.exit(None, ExitReason::CloseAll, bar, changed);
                }
            }
            OrderIntent::Bracket { .. } => {}
        }
    }

    /// Close `qty` units (all of it when `None` or not smaller than the size).
    fn exit(&mut self, qty: Option<f64>, reason: ExitReason, bar: &Bar, changed: &mut bool) {
        let pct = self.config.commission_pct;
        let partial = match (&self.position, qty) {
            (Some(position), Some(q)) => price::lt(q, position.size),
            _ => false,
        };
        if partial {
            if let (Some(position), Some(q)) = (self.position.as_mut(), qty) {
                let trade = reduce_position(position, q, bar.close, bar.timestamp, reason, pct);
                self.record(trade);
            }
            return;
        }
        if !self.claim_change(changed) {
            return;
        }
        if let Some(position) = self.position.take() {
            let trade = close_position(position, bar.close, bar.timestamp, reason, pct);
            self.record(trade);
        }
    }

    fn register_bracket(&mut self, from_entry: Option<&str>, request: BracketRequest) {
        let Some(position) = self.position.as_mut() else {
            return;
        };
        if from_entry.is_some_and(|id| id != position.entry_id) {
            return;
        }
        let sign = position.direction.sign();
        let entry = position.entry_price;
        let stop = request.stop.or(request.loss.map(|d| entry - sign * d));
        let limit = request.limit.or(request.profit.map(|d| entry + sign * d));
        if stop.is_some() {
            position.bracket.stop = stop;
        }
        if limit.is_some() {
            position.bracket.limit = limit;
        }
    }
}

/// Run `ir` over `bars` and force-close at the end.
pub fn run(ir: &StrategyIr, bars: &[Bar], config: BacktestConfig) -> Result<RunResult, RunFailure> {
    let mut backtest = Backtest::new(ir, config).map_err(|error| RunFailure {
        error,
        bar_index: 0,
        partial: RunResult::default(),
    })?;
    for (bar_index, bar) in bars.iter().enumerate() {
        if let Err(error) = backtest.step(bar) {
            return Err(RunFailure {
                error,
                bar_index,
                partial: backtest.partial(),
            });
        }
    }
    backtest.finish().map_err(|error| RunFailure {
        error,
        bar_index: bars.len(),
        partial: backtest.partial(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strategy::compile;
    use approx::assert_relative_eq;
    use chrono::{Duration, NaiveDate};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                timestamp: t0() + Duration::minutes(i as i64),
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 1.0,
            })
            .collect()
    }

    fn config() -> BacktestConfig {
        BacktestConfig {
            initial_capital: 10_000.0,
            default_qty: 1.0,
            pyramiding: 0,
            commission_pct: 0.0,
        }
    }

    fn run_source(source: &str, closes: &[f64]) -> RunResult {
        let ir = compile(source).unwrap();
        let cfg = BacktestConfig {
            pyramiding: ir.settings.pyramiding,
            default_qty: ir.settings.default_qty,
            ..config()
        };
        run(&ir, &bars_from_closes(closes), cfg).unwrap()
    }

    #[test]
    fn config_resolution_order() {
        let mut settings = StrategySettings::default();
        assert_relative_eq!(BacktestConfig::from(&settings).commission_pct, DEFAULT_COMMISSION_PCT);
        settings.commission_pct = Some(0.05);
        assert_relative_eq!(BacktestConfig::from(&settings).commission_pct, 0.05);
        let overrides = ConfigOverrides {
            initial_capital: Some(500.0),
            commission_pct: Some(0.0),
        };
        let cfg = BacktestConfig::resolve(&settings, &overrides);
        assert_relative_eq!(cfg.commission_pct, 0.0);
        assert_relative_eq!(cfg.initial_capital, 500.0);
    }

    #[test]
    fn state_machine() {
        let ir = compile("strategy(\"S\")\n").unwrap();
        let mut bt = Backtest::new(&ir, config()).unwrap();
        assert_eq!(bt.state(), RunState::Idle);
        bt.step(&bars_from_closes(&[1.0])[0]).unwrap();
        assert_eq!(bt.state(), RunState::Running);
        let result = bt.finish().unwrap();
        assert_eq!(result.bars_processed, 1);
        assert_eq!(bt.state(), RunState::Finished);
        assert_eq!(bt.step(&bars_from_closes(&[1.0])[0]), Err(RuntimeError::RunFinished));
        assert_eq!(bt.finish(), Err(RuntimeError::RunFinished));
    }

    #[test]
    fn out_of_order_bar_is_rejected() {
        let ir = compile("strategy(\"S\")\n").unwrap();
        let mut bars = bars_from_closes(&[1.0, 2.0, 3.0]);
        bars.swap(1, 2);
        let failure = run(&ir, &bars, config()).unwrap_err();
        assert_eq!(failure.bar_index, 2);
        assert!(matches!(failure.error, RuntimeError::OutOfOrderBar { bar_index: 2, .. }));
        assert_eq!(failure.partial.bars_processed, 2);
    }

    #[test]
    fn non_finite_bar_is_rejected() {
        let ir = compile("strategy(\"S\")\n").unwrap();
        let bars = bars_from_closes(&[1.0, f64::NAN]);
        let failure = run(&ir, &bars, config()).unwrap_err();
        assert!(matches!(failure.error, RuntimeError::InvalidBar { bar_index: 1, .. }));
    }

    #[test]
    fn invalid_window_fails_before_first_bar() {
        let ir = compile("strategy(\"S\")\nx = ta.sma(close, 0)\n").unwrap();
        let failure = run(&ir, &bars_from_closes(&[1.0]), config()).unwrap_err();
        assert!(matches!(failure.error, RuntimeError::InvalidWindow { .. }));
        assert_eq!(failure.partial, RunResult::default());
    }

    #[test]
    fn division_by_zero_keeps_partial_ledger() {
        let source = "strategy(\"S\")\n\
                      if bar_index == 0\n    strategy.entry(\"L\", strategy.long)\n\
                      if bar_index == 1\n    strategy.close(\"L\")\n\
                      x = 1 / (close - 3)\n";
        let ir = compile(source).unwrap();
        let failure = run(&ir, &bars_from_closes(&[1.0, 2.0, 3.0, 4.0]), config()).unwrap_err();
        assert_eq!(failure.bar_index, 2);
        assert!(matches!(failure.error, RuntimeError::DivisionByZero { bar_index: 2 }));
        assert_eq!(failure.partial.trades.len(), 1);
        assert_relative_eq!(failure.partial.trades[0].profit_loss, 1.0);
        assert_eq!(failure.partial.equity_curve.len(), 2);
    }

    #[test]
    fn open_position_is_closed_at_end_of_data() {
        let result = run_source(
            "strategy(\"S\")\nif bar_index == 1\n    strategy.entry(\"L\", strategy.long, qty=2)\n",
            &[10.0, 11.0, 12.0, 15.0],
        );
        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::EndOfData);
        assert_eq!(trade.exit_time, t0() + Duration::minutes(3));
        assert_relative_eq!(trade.profit_loss, 8.0);
        assert_relative_eq!(result.equity_curve.last().unwrap().cumulative_pl, 8.0);
    }

    #[test]
    fn reversal_closes_and_reopens_on_same_bar() {
        let result = run_source(
            "strategy(\"S\")\n\
             if bar_index == 0\n    strategy.entry(\"L\", strategy.long)\n\
             if bar_index == 2\n    strategy.entry(\"S\", strategy.short)\n",
            &[10.0, 11.0, 13.0, 12.0],
        );
        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.trades[0].exit_reason, ExitReason::Reversal);
        assert_relative_eq!(result.trades[0].profit_loss, 3.0);
        assert_eq!(result.trades[1].direction, Direction::Short);
        assert_eq!(result.trades[1].entry_time, t0() + Duration::minutes(2));
        assert_relative_eq!(result.trades[1].profit_loss, 1.0);
    }

    #[test]
    fn second_direction_change_is_skipped() {
        let result = run_source(
            "strategy(\"S\")\n\
             if bar_index == 0\n    strategy.entry(\"L\", strategy.long)\n\
             if bar_index == 1\n    strategy.close(\"L\")\n    strategy.entry(\"S\", strategy.short)\n",
            &[10.0, 11.0, 12.0],
        );
        assert_eq!(result.skipped_orders, 1);
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].exit_reason, ExitReason::Signal);
    }

    #[test]
    fn pyramiding_limit() {
        let source = "strategy(\"S\", pyramiding=1)\nstrategy.entry(\"L\", strategy.long)\n";
        let result = run_source(source, &[10.0, 20.0, 30.0, 40.0]);
        assert_eq!(result.trades.len(), 1);
        // bar 0 opens, bar 1 adds, later entries are ignored
        assert_relative_eq!(result.trades[0].size, 2.0);
        assert_relative_eq!(result.trades[0].entry_price, 15.0);

        let flat = run_source("strategy(\"S\")\nstrategy.entry(\"L\", strategy.long)\n", &[10.0, 20.0]);
        assert_relative_eq!(flat.trades[0].size, 1.0);
    }

    #[test]
    fn partial_close_is_not_a_direction_change() {
        let result = run_source(
            "strategy(\"S\")\n\
             if bar_index == 0\n    strategy.entry(\"L\", strategy.long, qty=3)\n\
             if bar_index == 1\n    strategy.close(\"L\", qty=1)\n    strategy.close(\"L\")\n",
            &[10.0, 12.0, 14.0],
        );
        assert_eq!(result.trades.len(), 2);
        assert_relative_eq!(result.trades[0].size, 1.0);
        assert_relative_eq!(result.trades[1].size, 2.0);
        assert_eq!(result.skipped_orders, 0);
    }

    #[test]
    fn bracket_stop_fills_on_later_bar() {
        let ir = compile(
            "strategy(\"S\")\n\
             if bar_index == 0\n    strategy.entry(\"L\", strategy.long)\n\
             strategy.exit(\"X\", from_entry=\"L\", loss=5, profit=10)\n",
        )
        .unwrap();
        let mut bars = bars_from_closes(&[100.0, 101.0, 99.0, 98.0]);
        bars[2].low = 94.0;
        let result = run(&ir, &bars, config()).unwrap();
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].exit_reason, ExitReason::Stop);
        assert_relative_eq!(result.trades[0].exit_price, 95.0);
        assert_eq!(result.trades[0].exit_time, bars[2].timestamp);
    }

    #[test]
    fn bracket_never_fills_on_entry_bar() {
        let ir = compile(
            "strategy(\"S\")\n\
             if bar_index == 0\n    strategy.entry(\"L\", strategy.long)\n\
             strategy.exit(\"X\", stop=close - 1, limit=close + 1)\n",
        )
        .unwrap();
        let mut bars = bars_from_closes(&[100.0, 100.5]);
        bars[0].low = 50.0;
        bars[0].high = 150.0;
        let result = run(&ir, &bars, config()).unwrap();
        assert_eq!(result.trades[0].exit_reason, ExitReason::EndOfData);
    }

    #[test]
    fn var_slots_persist_and_plain_slots_reset() {
        let source = "strategy(\"S\")\n\
                      var count = 0\n\
                      count := count + 1\n\
                      if count == 3\n    strategy.entry(\"L\", strategy.long)\n";
        let result = run_source(source, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].entry_time, t0() + Duration::minutes(2));
    }

    #[test]
    fn position_size_reads_start_of_bar() {
        let source = "strategy(\"S\")\n\
                      if strategy.position_size == 0\n    strategy.entry(\"L\", strategy.long)\n\
                      if strategy.position_size > 0\n    strategy.close(\"L\")\n";
        let result = run_source(source, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.trades[0].exit_reason, ExitReason::Signal);
        assert_eq!(result.trades[1].exit_reason, ExitReason::Signal);
    }

    #[test]
    fn commission_reduces_pl() {
        let ir = compile(
            "strategy(\"S\")\nif bar_index == 0\n    strategy.entry(\"L\", strategy.long, qty=10)\n",
        )
        .unwrap();
        let cfg = BacktestConfig {
            commission_pct: 0.1,
            ..config()
        };
        let result = run(&ir, &bars_from_closes(&[100.0, 110.0]), cfg).unwrap();
        assert_relative_eq!(result.trades[0].commission, 2.1);
        assert_relative_eq!(result.trades[0].profit_loss, 97.9);
    }
}
