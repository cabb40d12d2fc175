//! Crossover detection between two series.
//!
//! Over: prev a <= prev b and a > b. Under: prev a >= prev b and a < b.
//! Comparisons use the price tolerance. False whenever any of the four
//! values is `na`.

use crate::domain::price;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossKind {
    Over,
    Under,
    Either,
}

#[derive(Debug, Clone)]
pub struct Cross {
    kind: CrossKind,
    prev: Option<(Option<f64>, Option<f64>)>,
}

impl Cross {
    pub fn new(kind: CrossKind) -> Self {
        Self { kind, prev: None }
    }

    pub fn update(&mut self, a: Option<f64>, b: Option<f64>) -> bool {
        let prev = self.prev.replace((a, b));
        let (Some((Some(pa), Some(pb))), Some(a), Some(b)) = (prev, a, b) else {
            return false;
        };
        let over = price::le(pa, pb) && price::gt(a, b);
        let under = price::ge(pa, pb) && price::lt(a, b);
        match self.kind {
            CrossKind::Over => over,
            CrossKind::Under => under,
            CrossKind::Either => over || under,
        }
    }
}
