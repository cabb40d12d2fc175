//! Parameter sweeps over `input()` values.
//!
//! Each grid point re-translates the parsed script with its own overrides and
//! runs an independent backtest, so points execute in parallel on rayon's
//! pool. Results come back in grid order.

use std::collections::HashMap;
use std::str::FromStr;

use rayon::prelude::*;

use crate::domain::ast::Script;
use crate::domain::backtest::{self, BacktestConfig, ConfigOverrides, RunResult};
use crate::domain::error::PineError;
use crate::domain::metrics::Summary;
use crate::domain::ohlcv::Bar;
use crate::domain::strategy::compile_script;

/// One swept input and the values it takes.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepParam {
    pub name: String,
    pub values: Vec<f64>,
}

impl FromStr for SweepParam {
    type Err = String;

    /// `name=v1,v2,...`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, list) = s
            .split_once('=')
            .ok_or_else(|| format!("expected name=v1,v2,... but got '{s}'"))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("missing parameter name in '{s}'"));
        }
        let values = list
            .split(',')
            .map(|v| {
                v.trim()
                    .parse::<f64>()
                    .map_err(|_| format!("invalid value '{}' for {name}", v.trim()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: name.to_string(),
            values,
        })
    }
}

/// Cartesian product of swept inputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamGrid {
    pub params: Vec<SweepParam>,
}

impl ParamGrid {
    pub fn new(params: Vec<SweepParam>) -> Self {
        Self { params }
    }

    pub fn size(&self) -> usize {
        if self.params.is_empty() {
            return 0;
        }
        self.params.iter().map(|p| p.values.len()).product()
    }

    /// Every point, the last parameter varying fastest.
    pub fn points(&self) -> Vec<Vec<(String, f64)>> {
        if self.params.is_empty() {
            return Vec::new();
        }
        let mut points: Vec<Vec<(String, f64)>> = vec![Vec::new()];
        for param in &self.params {
            points = points
                .into_iter()
                .flat_map(|prefix| {
                    param.values.iter().map(move |&v| {
                        let mut point = prefix.clone();
                        point.push((param.name.clone(), v));
                        point
                    })
                })
                .collect();
        }
        points
    }
}

#[derive(Debug, Clone)]
pub struct SweepRun {
    pub result: RunResult,
    pub summary: Summary,
}

#[derive(Debug)]
pub struct SweepOutcome {
    pub inputs: Vec<(String, f64)>,
    pub run: Result<SweepRun, PineError>,
}

/// Sweep executor over one parsed script and bar series.
pub struct ParamSweep<'a> {
    script: &'a Script,
    bars: &'a [Bar],
    overrides: ConfigOverrides,
    parallel: bool,
}

impl<'a> ParamSweep<'a> {
    pub fn new(script: &'a Script, bars: &'a [Bar]) -> Self {
        Self {
            script,
            bars,
            overrides: ConfigOverrides::default(),
            parallel: true,
        }
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn run(&self, grid: &ParamGrid) -> Vec<SweepOutcome> {
        let points = grid.points();
        if self.parallel {
            points.into_par_iter().map(|p| self.run_point(p)).collect()
        } else {
            points.into_iter().map(|p| self.run_point(p)).collect()
        }
    }

    fn run_point(&self, inputs: Vec<(String, f64)>) -> SweepOutcome {
        let overrides: HashMap<String, f64> = inputs.iter().cloned().collect();
        let run = self.execute(&overrides);
        SweepOutcome { inputs, run }
    }

    fn execute(&self, inputs: &HashMap<String, f64>) -> Result<SweepRun, PineError> {
        let ir = compile_script(self.script, inputs)?;
        let config = BacktestConfig::resolve(&ir.settings, &self.overrides);
        let initial_capital = config.initial_capital;
        let result = backtest::run(&ir, self.bars, config).map_err(|f| PineError::Runtime(f.error))?;
        let summary = Summary::from_run(&result, initial_capital);
        Ok(SweepRun { result, summary })
    }
}
