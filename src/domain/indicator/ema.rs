//! Exponential moving averages.
//!
//! `Ema::new(n)`: k = 2/(n+1). `Ema::rma(n)`: Wilder smoothing, k = 1/n.
//! Both seed with the SMA of the first n inputs, then
//! EMA[i] = x[i]*k + EMA[i-1]*(1-k). An `na` input yields `na` and leaves the
//! state untouched.

#[derive(Debug, Clone)]
pub struct Ema {
    length: usize,
    alpha: f64,
    seed_sum: f64,
    seen: usize,
    value: Option<f64>,
}

impl Ema {
    pub fn new(length: usize) -> Self {
        Self::with_alpha(length, 2.0 / (length as f64 + 1.0))
    }

    pub fn rma(length: usize) -> Self {
        Self::with_alpha(length, 1.0 / length as f64)
    }

    fn with_alpha(length: usize, alpha: f64) -> Self {
        Self {
            length,
            alpha,
            seed_sum: 0.0,
            seen: 0,
            value: None,
        }
    }

    pub fn update(&mut self, source: Option<f64>) -> Option<f64> {
        let x = source.filter(|x| x.is_finite())?;
        self.value = match self.value {
            Some(prev) => Some(x * self.alpha + prev * (1.0 - self.alpha)),
            None => {
                self.seed_sum += x;
                self.seen += 1;
                if self.seen < self.length {
                    None
                } else {
                    Some(self.seed_sum / self.length as f64)
                }
            }
        };
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn ema_warmup_and_seed() {
        let mut ema = Ema::new(3);
        assert_eq!(ema.update(Some(10.0)), None);
        assert_eq!(ema.update(Some(20.0)), None);
        assert_relative_eq!(ema.update(Some(30.0)).unwrap(), 20.0);
    }

    #[test]
    fn ema_recursive_step() {
        let mut ema = Ema::new(3);
        for x in [10.0, 20.0, 30.0] {
            ema.update(Some(x));
        }
        // k = 0.5: 40*0.5 + 20*0.5 = 30
        assert_relative_eq!(ema.update(Some(40.0)).unwrap(), 30.0);
    }

    #[test]
    fn rma_uses_one_over_n() {
        let mut rma = Ema::rma(2);
        rma.update(Some(2.0));
        assert_relative_eq!(rma.update(Some(4.0)).unwrap(), 3.0);
        // 0.5*5 + 0.5*3 = 4
        assert_relative_eq!(rma.update(Some(5.0)).unwrap(), 4.0);
    }

    #[test]
    fn na_input_is_skipped() {
        let mut ema = Ema::new(2);
        ema.update(Some(1.0));
        assert_eq!(ema.update(None), None);
        assert_relative_eq!(ema.update(Some(3.0)).unwrap(), 2.0);
    }
}
