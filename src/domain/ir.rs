//! Executable strategy representation.
//!
//! The translator lowers a [`Script`](crate::domain::ast::Script) into a
//! [`StrategyIr`]: a flat instruction list over numbered slots, plus the table
//! of indicator call sites. The IR is immutable once built and can be shared
//! between concurrent runs.

use std::fmt;

use crate::domain::ast::{BinaryOperator, UnaryOperator};
use crate::domain::eval::Value;
use crate::domain::indicator::IndicatorSpec;
use crate::domain::position::Direction;
use crate::domain::strategy::StrategySettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Number,
    Bool,
    Text,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Number => f.write_str("number"),
            ValueType::Bool => f.write_str("bool"),
            ValueType::Text => f.write_str("string"),
        }
    }
}

/// Index into [`StrategyIr::indicators`]. Opaque outside the domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndicatorHandle(pub(crate) usize);

impl IndicatorHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Index into the evaluation context's value slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub(crate) usize);

impl SlotId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Values the interpreter supplies for the current bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesField {
    Open,
    High,
    Low,
    Close,
    Volume,
    Hl2,
    Hlc3,
    Ohlc4,
    BarIndex,
    /// Signed position size at the start of the bar.
    PositionSize,
}

impl SeriesField {
    pub fn from_name(name: &str) -> Option<Self> {
        let field = match name {
            "open" => SeriesField::Open,
            "high" => SeriesField::High,
            "low" => SeriesField::Low,
            "close" => SeriesField::Close,
            "volume" => SeriesField::Volume,
            "hl2" => SeriesField::Hl2,
            "hlc3" => SeriesField::Hlc3,
            "ohlc4" => SeriesField::Ohlc4,
            "bar_index" => SeriesField::BarIndex,
            "strategy.position_size" => SeriesField::PositionSize,
            _ => return None,
        };
        Some(field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathFn {
    Abs,
    Sqrt,
    Round,
    Floor,
    Ceil,
}

impl MathFn {
    pub fn apply(self, x: f64) -> f64 {
        match self {
            MathFn::Abs => x.abs(),
            MathFn::Sqrt => x.sqrt(),
            MathFn::Round => x.round(),
            MathFn::Floor => x.floor(),
            MathFn::Ceil => x.ceil(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IrExpr {
    Const(Value),
    Series(SeriesField),
    Slot(SlotId),
    /// Current output of an indicator; its `Update` has already run this bar.
    Indicator(IndicatorHandle),
    Unary {
        op: UnaryOperator,
        operand: Box<IrExpr>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<IrExpr>,
        right: Box<IrExpr>,
    },
    Math {
        func: MathFn,
        arg: Box<IrExpr>,
    },
    Max(Box<IrExpr>, Box<IrExpr>),
    Min(Box<IrExpr>, Box<IrExpr>),
    Nz {
        value: Box<IrExpr>,
        replacement: Box<IrExpr>,
    },
    IsNa(Box<IrExpr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Entry,
    Exit,
    Close,
    CloseAll,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderInstruction {
    pub kind: OrderKind,
    pub id: Option<String>,
    pub direction: Option<Direction>,
    pub from_entry: Option<String>,
    pub qty: Option<IrExpr>,
    pub stop: Option<IrExpr>,
    pub limit: Option<IrExpr>,
    /// Take-profit distance from the entry price.
    pub profit: Option<IrExpr>,
    /// Stop-loss distance from the entry price.
    pub loss: Option<IrExpr>,
    pub when: Option<IrExpr>,
    pub position: usize,
}

impl OrderInstruction {
    pub fn new(kind: OrderKind, position: usize) -> Self {
        Self {
            kind,
            id: None,
            direction: None,
            from_entry: None,
            qty: None,
            stop: None,
            limit: None,
            profit: None,
            loss: None,
            when: None,
            position,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Update {
        handle: IndicatorHandle,
        inputs: Vec<IrExpr>,
    },
    Assign {
        slot: SlotId,
        expr: IrExpr,
    },
    /// `var` initialiser: runs on the first bar only.
    InitOnce {
        slot: SlotId,
        expr: IrExpr,
    },
    If {
        condition: IrExpr,
        then_branch: Vec<Instruction>,
        else_branch: Vec<Instruction>,
    },
    Order(OrderInstruction),
}

/// A translation-time constant.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl ConstValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            ConstValue::Number(_) => ValueType::Number,
            ConstValue::Bool(_) => ValueType::Bool,
            ConstValue::Text(_) => ValueType::Text,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ConstValue::Number(x) => Some(*x),
            _ => None,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Number(x) => write!(f, "{x}"),
            ConstValue::Bool(b) => write!(f, "{b}"),
            ConstValue::Text(s) => write!(f, "\"{s}\""),
        }
    }
}

/// An `input(...)` call site and the value it resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct InputInfo {
    /// The variable the input was assigned to, else its title.
    pub name: String,
    pub title: Option<String>,
    pub default: ConstValue,
    pub value: ConstValue,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotInfo {
    pub name: String,
    pub value_type: ValueType,
    pub persistent: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyIr {
    pub settings: StrategySettings,
    pub instructions: Vec<Instruction>,
    pub indicators: Vec<IndicatorSpec>,
    pub slots: Vec<SlotInfo>,
    pub inputs: Vec<InputInfo>,
}

impl StrategyIr {
    pub fn indicator(&self, handle: IndicatorHandle) -> Option<&IndicatorSpec> {
        self.indicators.get(handle.0)
    }

    pub fn slot(&self, slot: SlotId) -> Option<&SlotInfo> {
        self.slots.get(slot.0)
    }

    /// Number of instructions, counting nested branches.
    pub fn instruction_count(&self) -> usize {
        fn count(instructions: &[Instruction]) -> usize {
            instructions
                .iter()
                .map(|i| match i {
                    Instruction::If {
                        then_branch,
                        else_branch,
                        ..
                    } => 1 + count(then_branch) + count(else_branch),
                    _ => 1,
                })
                .sum()
        }
        count(&self.instructions)
    }

    /// Number of order instructions, counting nested branches.
    pub fn order_count(&self) -> usize {
        fn count(instructions: &[Instruction]) -> usize {
            instructions
                .iter()
                .map(|i| match i {
                    Instruction::If {
                        then_branch,
                        else_branch,
                        ..
                    } => count(then_branch) + count(else_branch),
                    Instruction::Order(_) => 1,
                    _ => 0,
                })
                .sum()
        }
        count(&self.instructions)
    }
}
