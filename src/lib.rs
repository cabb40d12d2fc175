//! pinetrader: compile Pine-style strategy scripts and backtest them.
//!
//! Hexagonal architecture: the language pipeline and backtest interpreter in
//! [`domain`], port traits in [`ports`], concrete data, config and report
//! implementations in [`adapters`], and the command line in [`cli`].

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod ports;
