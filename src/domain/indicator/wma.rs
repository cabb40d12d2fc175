//! Weighted Moving Average.
//!
//! Linear weights: the newest input has weight n, the oldest weight 1.
//! WMA = sum(w_i * x_i) / (n(n+1)/2).

use super::finite;
use super::window::Window;

#[derive(Debug, Clone)]
pub struct Wma {
    window: Window,
}

impl Wma {
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
        let n = self.window.capacity() as f64;
        let weighted: f64 = self
            .window
            .iter()
            .enumerate()
            .map(|(i, x)| (i + 1) as f64 * x)
            .sum();
        finite(weighted / (n * (n + 1.0) / 2.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn wma_weights_newest_most() {
        let mut wma = Wma::new(3);
        assert_eq!(wma.update(Some(1.0)), None);
        assert_eq!(wma.update(Some(2.0)), None);
        // (1*1 + 2*2 + 3*3) / 6
        assert_relative_eq!(wma.update(Some(3.0)).unwrap(), 14.0 / 6.0);
        // (1*2 + 2*3 + 3*10) / 6
        assert_relative_eq!(wma.update(Some(10.0)).unwrap(), 38.0 / 6.0);
    }
}
