//! Rolling population standard deviation.
//!
//! mean = SMA(n); sd = sqrt(sum((x - mean)^2) / n).

use super::finite;
use super::window::Window;

#[derive(Debug, Clone)]
pub struct Stdev {
    window: Window,
}

impl Stdev {
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
        let mean = self.window.mean();
        let variance = self
            .window
            .iter()
            .map(|x| (x - mean).powi(2))
            .sum::<f64>()
            / self.window.len() as f64;
        finite(variance.sqrt())
    }
}
