//! Relative Strength Index (Wilder).
//!
//! Gains and losses of successive source changes are smoothed with RMA(n).
//! RSI = 100 - 100 / (1 + avg_gain / avg_loss); 100 when there were no
//! losses. Ready after n + 1 inputs.

use super::ema::Ema;
use crate::domain::price;

#[derive(Debug, Clone)]
pub struct Rsi {
    prev: Option<f64>,
    gain: Ema,
    loss: Ema,
}

impl Rsi {
    pub fn new(length: usize) -> Self {
        Self {
            prev: None,
            gain: Ema::rma(length),
            loss: Ema::rma(length),
        }
    }

    pub fn update(&mut self, source: Option<f64>) -> Option<f64> {
        let x = source.filter(|x| x.is_finite())?;
        let prev = self.prev.replace(x)?;
        let change = x - prev;
        let gain = self.gain.update(Some(change.max(0.0)));
        let loss = self.loss.update(Some((-change).max(0.0)));
        match (gain, loss) {
            (Some(_), Some(l)) if price::approx_eq(l, 0.0) => Some(100.0),
            (Some(g), Some(l)) => Some(100.0 - 100.0 / (1.0 + g / l)),
            _ => None,
        }
    }
}
