//! Summary statistics for a finished run.

use super::backtest::{EquityPoint, RunResult};

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub initial_capital: f64,
    pub final_equity: f64,
    pub total_pl: f64,
    /// Percent of initial capital.
    pub return_pct: f64,
    /// Fraction of trades with positive P&L.
    pub win_rate: f64,
    /// Largest peak-to-trough decline of cumulative P&L, in currency.
    pub max_drawdown: f64,
    /// `max_drawdown` relative to equity at the peak, in percent.
    pub max_drawdown_pct: f64,
    pub trade_count: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub trades_breakeven: usize,
    pub gross_profit: f64,
    /// Sum of losing trades, as a positive number.
    pub gross_loss: f64,
    pub profit_factor: f64,
    pub avg_trade: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    /// Mean holding time in hours.
    pub avg_trade_duration: f64,
    pub total_commission: f64,
    pub bars_processed: usize,
}

impl Summary {
    pub fn from_run(result: &RunResult, initial_capital: f64) -> Self {
        let trades = &result.trades;

        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut trades_breakeven = 0usize;
        let mut gross_profit = 0.0_f64;
        let mut gross_loss = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;
        let mut total_commission = 0.0_f64;
        let mut total_minutes = 0i64;

        for trade in trades {
            let pnl = trade.profit_loss;
            if pnl > 0.0 {
                trades_won += 1;
                gross_profit += pnl;
                largest_win = largest_win.max(pnl);
            } else if pnl < 0.0 {
                trades_lost += 1;
                gross_loss += pnl.abs();
                largest_loss = largest_loss.max(pnl.abs());
            } else {
                trades_breakeven += 1;
            }
            total_commission += trade.commission;
            total_minutes += (trade.exit_time - trade.entry_time).num_minutes();
        }

        let trade_count = trades.len();
        let total_pl = gross_profit - gross_loss;
        let final_equity = initial_capital + total_pl;

        let return_pct = if initial_capital > 0.0 {
            total_pl / initial_capital * 100.0
        } else {
            0.0
        };

        let win_rate = ratio(trades_won as f64, trade_count);
        let avg_trade = ratio(total_pl, trade_count);
        let avg_win = ratio(gross_profit, trades_won);
        let avg_loss = ratio(gross_loss, trades_lost);
        let avg_trade_duration = ratio(total_minutes as f64 / 60.0, trade_count);

        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_pct) = compute_drawdown(&result.equity_curve, initial_capital);

        Summary {
            initial_capital,
            final_equity,
            total_pl,
            return_pct,
            win_rate,
            max_drawdown,
            max_drawdown_pct,
            trade_count,
            trades_won,
            trades_lost,
            trades_breakeven,
            gross_profit,
            gross_loss,
            profit_factor,
            avg_trade,
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            avg_trade_duration,
            total_commission,
            bars_processed: result.bars_processed,
        }
    }
}

fn ratio(total: f64, count: usize) -> f64 {
    if count > 0 { total / count as f64 } else { 0.0 }
}

/// Single scan; the peak starts at zero P&L.
fn compute_drawdown(equity_curve: &[EquityPoint], initial_capital: f64) -> (f64, f64) {
    let mut peak = 0.0_f64;
    let mut max_dd = 0.0_f64;
    let mut max_dd_pct = 0.0_f64;

    for point in equity_curve {
        if point.cumulative_pl > peak {
            peak = point.cumulative_pl;
            continue;
        }
        let dd = peak - point.cumulative_pl;
        if dd > max_dd {
            max_dd = dd;
        }
        let peak_equity = initial_capital + peak;
        if peak_equity > 0.0 {
            max_dd_pct = max_dd_pct.max(dd / peak_equity * 100.0);
        }
    }

    (max_dd, max_dd_pct)
}
