//! Strategy settings and the compile pipeline.
//!
//! `compile` runs lexer, parser and translator over one source buffer and
//! returns the executable [`StrategyIr`].

use std::collections::HashMap;

use crate::domain::ast::Script;
use crate::domain::error::PineError;
use crate::domain::ir::StrategyIr;
use crate::domain::parser;
use crate::domain::translator;

pub const DEFAULT_INITIAL_CAPITAL: f64 = 10_000.0;

/// Values taken from the `strategy(...)` header.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategySettings {
    pub title: String,
    pub initial_capital: f64,
    /// Quantity used by entries without an explicit `qty`.
    pub default_qty: f64,
    /// Additional same-direction entries allowed on an open position.
    pub pyramiding: u32,
    /// Percent of notional per fill, when the header sets one.
    pub commission_pct: Option<f64>,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            title: String::new(),
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            default_qty: 1.0,
            pyramiding: 0,
            commission_pct: None,
        }
    }
}

/// Compile a strategy script.
pub fn compile(source: &str) -> Result<StrategyIr, PineError> {
    compile_with_inputs(source, &HashMap::new())
}

/// Compile with `input()` overrides.
pub fn compile_with_inputs(
    source: &str,
    overrides: &HashMap<String, f64>,
) -> Result<StrategyIr, PineError> {
    let script = parser::parse(source)?;
    Ok(translator::translate_with_inputs(&script, overrides)?)
}

/// Translate an already-parsed script. Used by sweeps, which parse once.
pub fn compile_script(
    script: &Script,
    overrides: &HashMap<String, f64>,
) -> Result<StrategyIr, PineError> {
    Ok(translator::translate_with_inputs(script, overrides)?)
}
