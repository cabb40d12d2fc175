//! Core domain: the script compiler, indicator library and backtest
//! interpreter. Nothing here performs I/O.

pub mod ast;
pub mod backtest;
pub mod builtin;
pub mod config_validation;
pub mod error;
pub mod eval;
pub mod execution;
pub mod indicator;
pub mod ir;
pub mod lexer;
pub mod metrics;
pub mod ohlcv;
pub mod parser;
pub mod position;
pub mod price;
pub mod strategy;
pub mod sweep;
pub mod translator;
