//! Rolling highest / lowest value over the last n inputs.

use super::window::Window;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtremumKind {
    Highest,
    Lowest,
}

#[derive(Debug, Clone)]
pub struct Extremum {
    kind: ExtremumKind,
    window: Window,
}

impl Extremum {
    pub fn new(kind: ExtremumKind, length: usize) -> Self {
        Self {
            kind,
            window: Window::new(length),
        }
    }

    pub fn update(&mut self, source: Option<f64>) -> Option<f64> {
        self.window.push(source.unwrap_or(f64::NAN));
        if !self.window.is_full() || self.window.iter().any(|x| !x.is_finite()) {
            return None;
        }
        let values = self.window.iter();
        let out = match self.kind {
            ExtremumKind::Highest => values.fold(f64::NEG_INFINITY, f64::max),
            ExtremumKind::Lowest => values.fold(f64::INFINITY, f64::min),
        };
        Some(out)
    }
}
