//! Average True Range: RMA(n) of the true range.
//!
//! The first bar has no previous close, so its true range is high - low.

use super::ema::Ema;
use crate::domain::ohlcv::Bar;

#[derive(Debug, Clone)]
pub struct Atr {
    prev_close: Option<f64>,
    rma: Ema,
}

impl Atr {
    pub fn new(length: usize) -> Self {
        Self {
            prev_close: None,
            rma: Ema::rma(length),
        }
    }

    pub fn update(&mut self, bar: &Bar) -> Option<f64> {
        let tr = match self.prev_close.replace(bar.close) {
            Some(prev_close) => bar.true_range(prev_close),
            None => bar.high - bar.low,
        };
        self.rma.update(Some(tr))
    }
}
