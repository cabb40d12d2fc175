//! Change and Rate of Change over n bars.
//!
//! change = x - x[n]; roc = 100 * (x - x[n]) / x[n], `na` when x[n] is 0.

use super::finite;
use super::window::Window;
use crate::domain::price;

/// The current input and the input n bars ago.
#[derive(Debug, Clone)]
struct Lookback {
    window: Window,
}

impl Lookback {
    fn new(length: usize) -> Self {
        Self {
            window: Window::new(length + 1),
        }
    }

    fn push(&mut self, source: Option<f64>) -> Option<(f64, f64)> {
        self.window.push(source.unwrap_or(f64::NAN));
        if !self.window.is_full() {
            return None;
        }
        let current = self.window.newest()?;
        let past = self.window.oldest()?;
        Some((current, past))
    }
}

#[derive(Debug, Clone)]
pub struct Change {
    lookback: Lookback,
}

impl Change {
    pub fn new(length: usize) -> Self {
        Self {
            lookback: Lookback::new(length),
        }
    }

    pub fn update(&mut self, source: Option<f64>) -> Option<f64> {
        let (current, past) = self.lookback.push(source)?;
        finite(current - past)
    }
}

#[derive(Debug, Clone)]
pub struct Roc {
    lookback: Lookback,
}

impl Roc {
    pub fn new(length: usize) -> Self {
        Self {
            lookback: Lookback::new(length),
        }
    }

    pub fn update(&mut self, source: Option<f64>) -> Option<f64> {
        let (current, past) = self.lookback.push(source)?;
        if price::approx_eq(past, 0.0) {
            return None;
        }
        finite(100.0 * (current - past) / past)
    }
}
