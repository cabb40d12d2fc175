//! Built-in function table.
//!
//! Every callable name resolves once, at translation time, to a [`Builtin`]
//! carrying a typed parameter schema. Arguments are bound against the schema
//! positionally and by name before any lowering happens.

use crate::domain::ast::{Argument, Expr};
use crate::domain::error::SemanticError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Numeric series.
    Series,
    /// Boolean series.
    Condition,
    /// Window length; must be a translation-time integer.
    Length,
    /// Translation-time number or bool.
    Constant,
    /// Translation-time string.
    Text,
    /// `strategy.long` or `strategy.short`.
    Direction,
    /// Accepted and ignored.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Param {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<f64>,
}

const fn req(name: &'static str, kind: ParamKind) -> Param {
    Param {
        name,
        kind,
        required: true,
        default: None,
    }
}

const fn opt(name: &'static str, kind: ParamKind) -> Param {
    Param {
        name,
        kind,
        required: false,
        default: None,
    }
}

const fn with_default(name: &'static str, kind: ParamKind, default: f64) -> Param {
    Param {
        name,
        kind,
        required: false,
        default: Some(default),
    }
}

const SOURCE_LENGTH: &[Param] = &[req("source", ParamKind::Series), req("length", ParamKind::Length)];
const CHANGE: &[Param] = &[
    req("source", ParamKind::Series),
    with_default("length", ParamKind::Length, 1.0),
];
const ATR: &[Param] = &[req("length", ParamKind::Length)];
const CROSS: &[Param] = &[req("source1", ParamKind::Series), req("source2", ParamKind::Series)];
const UNARY_MATH: &[Param] = &[req("number", ParamKind::Series)];
const BINARY_MATH: &[Param] = &[req("number0", ParamKind::Series), req("number1", ParamKind::Series)];
const NZ: &[Param] = &[req("source", ParamKind::Series), opt("replacement", ParamKind::Series)];
const NA: &[Param] = &[req("x", ParamKind::Series)];
pub const INPUT: &[Param] = &[
    req("defval", ParamKind::Constant),
    opt("title", ParamKind::Text),
    opt("minval", ParamKind::Ignored),
    opt("maxval", ParamKind::Ignored),
    opt("step", ParamKind::Ignored),
    opt("tooltip", ParamKind::Ignored),
    opt("group", ParamKind::Ignored),
    opt("inline", ParamKind::Ignored),
];

pub const STRATEGY_HEADER: &[Param] = &[
    req("title", ParamKind::Text),
    opt("shorttitle", ParamKind::Ignored),
    opt("overlay", ParamKind::Ignored),
    opt("initial_capital", ParamKind::Constant),
    opt("default_qty_value", ParamKind::Constant),
    opt("default_qty_type", ParamKind::Ignored),
    opt("pyramiding", ParamKind::Constant),
    opt("commission_value", ParamKind::Constant),
    opt("commission_type", ParamKind::Ignored),
    opt("currency", ParamKind::Ignored),
    opt("process_orders_on_close", ParamKind::Ignored),
    opt("calc_on_every_tick", ParamKind::Ignored),
    opt("precision", ParamKind::Ignored),
    opt("max_bars_back", ParamKind::Ignored),
];

pub const ENTRY: &[Param] = &[
    req("id", ParamKind::Text),
    req("direction", ParamKind::Direction),
    opt("qty", ParamKind::Series),
    opt("when", ParamKind::Condition),
    opt("comment", ParamKind::Ignored),
];

pub const EXIT: &[Param] = &[
    req("id", ParamKind::Text),
    opt("from_entry", ParamKind::Text),
    opt("qty", ParamKind::Series),
    opt("stop", ParamKind::Series),
    opt("limit", ParamKind::Series),
    opt("profit", ParamKind::Series),
    opt("loss", ParamKind::Series),
    opt("when", ParamKind::Condition),
    opt("comment", ParamKind::Ignored),
];

pub const CLOSE: &[Param] = &[
    req("id", ParamKind::Text),
    opt("qty", ParamKind::Series),
    opt("when", ParamKind::Condition),
    opt("comment", ParamKind::Ignored),
];

pub const CLOSE_ALL: &[Param] = &[opt("when", ParamKind::Condition), opt("comment", ParamKind::Ignored)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Sma,
    Ema,
    Rma,
    Wma,
    Highest,
    Lowest,
    Stdev,
    Rsi,
    Atr,
    Change,
    Roc,
    Crossover,
    Crossunder,
    Cross,
    Abs,
    Sqrt,
    Round,
    Floor,
    Ceil,
    Max,
    Min,
    Nz,
    Na,
    Input,
    InputInt,
    InputFloat,
    InputBool,
    /// Chart output with no effect on a backtest.
    Cosmetic,
}

impl Builtin {
    /// Resolve a call name. `ta.` names also resolve without the prefix.
    pub fn resolve(name: &str) -> Option<Self> {
        let bare = name.strip_prefix("ta.").unwrap_or(name);
        let builtin = match bare {
            "sma" => Builtin::Sma,
            "ema" => Builtin::Ema,
            "rma" => Builtin::Rma,
            "wma" => Builtin::Wma,
            "highest" => Builtin::Highest,
            "lowest" => Builtin::Lowest,
            "stdev" => Builtin::Stdev,
            "rsi" => Builtin::Rsi,
            "atr" => Builtin::Atr,
            "change" => Builtin::Change,
            "roc" => Builtin::Roc,
            "crossover" => Builtin::Crossover,
            "crossunder" => Builtin::Crossunder,
            "cross" => Builtin::Cross,
            _ if bare.len() != name.len() => return None,
            "math.abs" | "abs" => Builtin::Abs,
            "math.sqrt" | "sqrt" => Builtin::Sqrt,
            "math.round" | "round" => Builtin::Round,
            "math.floor" | "floor" => Builtin::Floor,
            "math.ceil" | "ceil" => Builtin::Ceil,
            "math.max" | "max" => Builtin::Max,
            "math.min" | "min" => Builtin::Min,
            "nz" => Builtin::Nz,
            "na" => Builtin::Na,
            "input" => Builtin::Input,
            "input.int" => Builtin::InputInt,
            "input.float" => Builtin::InputFloat,
            "input.bool" => Builtin::InputBool,
            "plot" | "plotshape" | "plotchar" | "bgcolor" | "hline" | "fill" | "alertcondition" => {
                Builtin::Cosmetic
            }
            _ => return None,
        };
        Some(builtin)
    }

    /// Parameter schema. `None` means arguments are not inspected.
    pub fn params(self) -> Option<&'static [Param]> {
        let params = match self {
            Builtin::Sma
            | Builtin::Ema
            | Builtin::Rma
            | Builtin::Wma
            | Builtin::Highest
            | Builtin::Lowest
            | Builtin::Stdev
            | Builtin::Rsi
            | Builtin::Roc => SOURCE_LENGTH,
            Builtin::Change => CHANGE,
            Builtin::Atr => ATR,
            Builtin::Crossover | Builtin::Crossunder | Builtin::Cross => CROSS,
            Builtin::Abs | Builtin::Sqrt | Builtin::Round | Builtin::Floor | Builtin::Ceil => {
                UNARY_MATH
            }
            Builtin::Max | Builtin::Min => BINARY_MATH,
            Builtin::Nz => NZ,
            Builtin::Na => NA,
            Builtin::Input | Builtin::InputInt | Builtin::InputFloat | Builtin::InputBool => INPUT,
            Builtin::Cosmetic => return None,
        };
        Some(params)
    }

    pub fn is_input(self) -> bool {
        matches!(
            self,
            Builtin::Input | Builtin::InputInt | Builtin::InputFloat | Builtin::InputBool
        )
    }
}

/// Arguments matched to a schema, in schema order.
#[derive(Debug)]
pub struct BoundArgs<'s, 'a> {
    params: &'s [Param],
    values: Vec<Option<&'a Expr>>,
}

impl<'s, 'a> BoundArgs<'s, 'a> {
    pub fn get(&self, name: &str) -> Option<&'a Expr> {
        self.params
            .iter()
            .position(|p| p.name == name)
            .and_then(|i| self.values[i])
    }

    pub fn default_of(&self, name: &str) -> Option<f64> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.default)
    }

    /// Bound parameters with their kind, skipping ignored ones.
    pub fn iter(&self) -> impl Iterator<Item = (&'s Param, &'a Expr)> + '_ {
        self.params
            .iter()
            .zip(self.values.iter())
            .filter(|(p, _)| p.kind != ParamKind::Ignored)
            .filter_map(|(p, v)| v.map(|e| (p, e)))
    }
}

/// Bind call arguments to `params`.
///
/// Positional arguments fill parameters in order and may not follow a named
/// argument. Unknown, duplicate or missing required parameters are
/// `InvalidArgument` errors.
pub fn bind<'s, 'a>(
    function: &str,
    params: &'s [Param],
    args: &'a [Argument],
    position: usize,
) -> Result<BoundArgs<'s, 'a>, SemanticError> {
    let invalid = |reason: String, position: usize| SemanticError::InvalidArgument {
        function: function.to_string(),
        reason,
        position,
    };

    let mut values: Vec<Option<&'a Expr>> = vec![None; params.len()];
    let mut seen_named = false;
    let mut next_positional = 0;

    for arg in args {
        let at = arg.value.position();
        let index = match &arg.name {
            Some(name) => {
                seen_named = true;
                params
                    .iter()
                    .position(|p| p.name == name)
                    .ok_or_else(|| invalid(format!("unknown parameter '{name}'"), at))?
            }
            None => {
                if seen_named {
                    return Err(invalid(
                        "positional argument after named argument".to_string(),
                        at,
                    ));
                }
                if next_positional >= params.len() {
                    return Err(invalid(
                        format!("expected at most {} arguments", params.len()),
                        at,
                    ));
                }
                next_positional += 1;
                next_positional - 1
            }
        };
        if values[index].is_some() {
            return Err(invalid(
                format!("parameter '{}' given more than once", params[index].name),
                at,
            ));
        }
        values[index] = Some(&arg.value);
    }

    if let Some(missing) = params
        .iter()
        .zip(values.iter())
        .find(|(p, v)| p.required && v.is_none())
    {
        return Err(invalid(
            format!("missing required parameter '{}'", missing.0.name),
            position,
        ));
    }

    Ok(BoundArgs { params, values })
}
