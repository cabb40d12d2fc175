//! Runtime values and expression evaluation.
//!
//! [`Value::Na`] is the missing / not-ready value. It propagates through
//! arithmetic and comparisons; `and`/`or` use three-valued logic so a known
//! `false` (resp. `true`) still decides the result.

use crate::domain::ast::{BinaryOperator, UnaryOperator};
use crate::domain::error::RuntimeError;
use crate::domain::indicator::IndicatorInstance;
use crate::domain::ir::{IrExpr, SeriesField, SlotId, SlotInfo};
use crate::domain::ohlcv::Bar;
use crate::domain::price;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Na,
}

impl Value {
    /// A number, or `Na` when `x` is NaN or infinite.
    pub fn number(x: f64) -> Self {
        if x.is_finite() {
            Value::Number(x)
        } else {
            Value::Na
        }
    }

    pub fn as_number(self) -> Option<f64> {
        match self {
            Value::Number(x) => Some(x),
            _ => None,
        }
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_na(self) -> bool {
        matches!(self, Value::Na)
    }

    /// Only `Bool(true)` takes a branch or fires an order.
    pub fn is_true(self) -> bool {
        matches!(self, Value::Bool(true))
    }
}

impl From<Option<f64>> for Value {
    fn from(value: Option<f64>) -> Self {
        value.map(Value::number).unwrap_or(Value::Na)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

/// Current values of the user variable slots.
#[derive(Debug, Clone)]
pub struct EvalContext {
    values: Vec<Value>,
    persistent: Vec<bool>,
    initialized: Vec<bool>,
}

impl EvalContext {
    pub fn new(slots: &[SlotInfo]) -> Self {
        Self {
            values: vec![Value::Na; slots.len()],
            persistent: slots.iter().map(|s| s.persistent).collect(),
            initialized: vec![false; slots.len()],
        }
    }

    /// Context for the next bar: `var` slots keep their value, every other
    /// slot starts as `Na`.
    pub fn next_bar(&self) -> Self {
        let values = self
            .values
            .iter()
            .zip(&self.persistent)
            .map(|(&v, &keep)| if keep { v } else { Value::Na })
            .collect();
        Self {
            values,
            persistent: self.persistent.clone(),
            initialized: self.initialized.clone(),
        }
    }

    pub fn get(&self, slot: SlotId) -> Value {
        self.values.get(slot.index()).copied().unwrap_or(Value::Na)
    }

    pub fn set(&mut self, slot: SlotId, value: Value) {
        if let Some(v) = self.values.get_mut(slot.index()) {
            *v = value;
        }
    }

    pub fn is_initialized(&self, slot: SlotId) -> bool {
        self.initialized.get(slot.index()).copied().unwrap_or(false)
    }

    pub fn mark_initialized(&mut self, slot: SlotId) {
        if let Some(flag) = self.initialized.get_mut(slot.index()) {
            *flag = true;
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Everything an expression can read on the current bar.
pub struct Frame<'a> {
    pub bar: &'a Bar,
    pub bar_index: usize,
    /// Signed size (long > 0, short < 0) at the start of the bar.
    pub position_size: f64,
    pub context: &'a EvalContext,
    pub indicators: &'a [IndicatorInstance],
}

impl Frame<'_> {
    fn series(&self, field: SeriesField) -> Value {
        let bar = self.bar;
        let x = match field {
            SeriesField::Open => bar.open,
            SeriesField::High => bar.high,
            SeriesField::Low => bar.low,
            SeriesField::Close => bar.close,
            SeriesField::Volume => bar.volume,
            SeriesField::Hl2 => bar.hl2(),
            SeriesField::Hlc3 => bar.hlc3(),
            SeriesField::Ohlc4 => bar.ohlc4(),
            SeriesField::BarIndex => self.bar_index as f64,
            SeriesField::PositionSize => self.position_size,
        };
        Value::number(x)
    }

    pub fn eval(&self, expr: &IrExpr) -> Result<Value, RuntimeError> {
        let value = match expr {
            IrExpr::Const(v) => *v,
            IrExpr::Series(field) => self.series(*field),
            IrExpr::Slot(slot) => self.context.get(*slot),
            IrExpr::Indicator(handle) => self
                .indicators
                .get(handle.index())
                .map(|i| i.current())
                .unwrap_or(Value::Na),
            IrExpr::Unary { op, operand } => {
                let v = self.eval(operand)?;
                match (op, v) {
                    (UnaryOperator::Neg, Value::Number(x)) => Value::Number(-x),
                    (UnaryOperator::Not, Value::Bool(b)) => Value::Bool(!b),
                    _ => Value::Na,
                }
            }
            IrExpr::Binary { op, left, right } => self.binary(*op, left, right)?,
            IrExpr::Math { func, arg } => match self.eval(arg)? {
                Value::Number(x) => Value::number(func.apply(x)),
                _ => Value::Na,
            },
            IrExpr::Max(a, b) | IrExpr::Min(a, b) => {
                match (self.eval(a)?.as_number(), self.eval(b)?.as_number()) {
                    (Some(x), Some(y)) if matches!(expr, IrExpr::Max(..)) => Value::Number(x.max(y)),
                    (Some(x), Some(y)) => Value::Number(x.min(y)),
                    _ => Value::Na,
                }
            }
            IrExpr::Nz { value, replacement } => match self.eval(value)? {
                Value::Na => self.eval(replacement)?,
                v => v,
            },
            IrExpr::IsNa(inner) => Value::Bool(self.eval(inner)?.is_na()),
        };
        Ok(value)
    }

    fn binary(
        &self,
        op: BinaryOperator,
        left: &IrExpr,
        right: &IrExpr,
    ) -> Result<Value, RuntimeError> {
        if op.is_logical() {
            return self.logical(op, left, right);
        }

        let l = self.eval(left)?;
        let r = self.eval(right)?;

        if op.is_arithmetic() {
            let (Some(a), Some(b)) = (l.as_number(), r.as_number()) else {
                return Ok(Value::Na);
            };
            let x = match op {
                BinaryOperator::Add => a + b,
                BinaryOperator::Sub => a - b,
                BinaryOperator::Mul => a * b,
                BinaryOperator::Div | BinaryOperator::Mod => {
                    if price::approx_eq(b, 0.0) {
                        return Err(RuntimeError::DivisionByZero {
                            bar_index: self.bar_index,
                        });
                    }
                    if op == BinaryOperator::Div { a / b } else { a % b }
                }
                _ => return Ok(Value::Na),
            };
            return Ok(Value::number(x));
        }

        let result = match (l, r) {
            (Value::Number(a), Value::Number(b)) => match op {
                BinaryOperator::Eq => price::approx_eq(a, b),
                BinaryOperator::NotEq => !price::approx_eq(a, b),
                BinaryOperator::Lt => price::lt(a, b),
                BinaryOperator::Le => price::le(a, b),
                BinaryOperator::Gt => price::gt(a, b),
                BinaryOperator::Ge => price::ge(a, b),
                _ => return Ok(Value::Na),
            },
            (Value::Bool(a), Value::Bool(b)) => match op {
                BinaryOperator::Eq => a == b,
                BinaryOperator::NotEq => a != b,
                _ => return Ok(Value::Na),
            },
            _ => return Ok(Value::Na),
        };
        Ok(Value::Bool(result))
    }

    fn logical(
        &self,
        op: BinaryOperator,
        left: &IrExpr,
        right: &IrExpr,
    ) -> Result<Value, RuntimeError> {
        // The deciding value short-circuits: `false and x`, `true or x`.
        let decisive = op == BinaryOperator::Or;
        let l = self.eval(left)?.as_bool();
        if l == Some(decisive) {
            return Ok(Value::Bool(decisive));
        }
        let r = self.eval(right)?.as_bool();
        let value = match (l, r) {
            (_, Some(b)) if b == decisive => Value::Bool(decisive),
            (Some(_), Some(_)) => Value::Bool(!decisive),
            _ => Value::Na,
        };
        Ok(value)
    }
}
