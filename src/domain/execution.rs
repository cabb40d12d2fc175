//! Fill simulation.
//!
//! Opens, adds to, reduces and closes the single position of a run.
//! Commission is a percentage of notional charged on every leg; the entry
//! leg's commission is carried on the position and charged to the trade
//! that closes it (pro rata for partial closes).

use chrono::NaiveDateTime;

use crate::domain::position::{Bracket, Direction, ExitReason, Position, Trade};

/// commission = notional * pct / 100
pub fn calculate_commission(notional: f64, commission_pct: f64) -> f64 {
    notional.abs() * commission_pct / 100.0
}

/// Open a new position at `price`.
pub fn open_position(
    direction: Direction,
    entry_id: &str,
    price: f64,
    time: NaiveDateTime,
    size: f64,
    bar_index: usize,
    commission_pct: f64,
) -> Position {
    Position {
        direction,
        entry_id: entry_id.to_string(),
        entry_price: price,
        entry_time: time,
        size,
        entries: 1,
        bracket: Bracket::default(),
        open_commission: calculate_commission(price * size, commission_pct),
        opened_bar: bar_index,
    }
}

/// Pyramid into an existing position; the entry price becomes the
/// size-weighted average.
pub fn add_to_position(position: &mut Position, price: f64, size: f64, commission_pct: f64) {
    let total = position.size + size;
    position.entry_price = (position.entry_price * position.size + price * size) / total;
    position.size = total;
    position.entries += 1;
    position.open_commission += calculate_commission(price * size, commission_pct);
}

fn settle(
    position: &Position,
    size: f64,
    entry_commission: f64,
    price: f64,
    time: NaiveDateTime,
    reason: ExitReason,
    commission_pct: f64,
) -> Trade {
    let commission = entry_commission + calculate_commission(price * size, commission_pct);
    let gross = position.direction.sign() * (price - position.entry_price) * size;
    Trade {
        entry_id: position.entry_id.clone(),
        direction: position.direction,
        entry_time: position.entry_time,
        exit_time: time,
        entry_price: position.entry_price,
        exit_price: price,
        size,
        commission,
        profit_loss: gross - commission,
        exit_reason: reason,
    }
}

/// Close the whole position.
pub fn close_position(
    position: Position,
    price: f64,
    time: NaiveDateTime,
    reason: ExitReason,
    commission_pct: f64,
) -> Trade {
    settle(
        &position,
        position.size,
        position.open_commission,
        price,
        time,
        reason,
        commission_pct,
    )
}

/// Close `size` units of the position, leaving the rest open.
/// The caller guarantees `0 < size < position.size`.
pub fn reduce_position(
    position: &mut Position,
    size: f64,
    price: f64,
    time: NaiveDateTime,
    reason: ExitReason,
    commission_pct: f64,
) -> Trade {
    let share = position.open_commission * size / position.size;
    let trade = settle(position, size, share, price, time, reason, commission_pct);
    position.size -= size;
    position.open_commission -= share;
    trade
}
