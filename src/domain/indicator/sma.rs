//! Simple Moving Average.
//!
//! Arithmetic mean of the last n inputs. Not ready until n inputs were seen.

use super::finite;
use super::window::Window;

#[derive(Debug, Clone)]
pub struct Sma {
    window: Window,
}

impl Sma {
    pub fn new(length: usize) -> Self {
        Self {
            window: Window::new(length),
        }
    }

    pub fn update(&mut self, source: Option<f64>) -> Option<f64> {
        self.window.push(source.unwrap_or(f64::NAN));
        if !self.window.is_full() {
            return None;
        }
        finite(self.window.mean())
    }
}
