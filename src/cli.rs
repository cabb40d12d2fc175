//! CLI definition and dispatch.
//!
//! Each command loads the INI config, validates it, and drives the domain
//! pipeline through the configured adapters. Progress is logged with
//! `tracing`; result tables go to stderr.

use chrono::{NaiveDateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};

use crate::adapters::cached_adapter::CachedDataSource;
use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::ast::Script;
use crate::domain::backtest::{self, BacktestConfig, ConfigOverrides, RunResult};
use crate::domain::config_validation::{
    config_overrides, default_report_path, resolve_date_range, timeframe, validate_backtest_config,
    validate_data_config, DataSourceKind,
};
use crate::domain::error::{caret_context, PineError};
use crate::domain::ir::StrategyIr;
use crate::domain::metrics::Summary;
use crate::domain::ohlcv::{Bar, Timeframe};
use crate::domain::parser;
use crate::domain::strategy::compile_script;
use crate::domain::sweep::{ParamGrid, ParamSweep, SweepParam};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::{BarCache, DataPort};
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(
    name = "pinetrader",
    version,
    about = "Backtest Pine-style strategy scripts against historical bars"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by commands that run a strategy.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(short, long)]
    pub config: PathBuf,
    /// Strategy script; defaults to `[backtest] strategy_file`
    #[arg(short, long)]
    pub strategy: Option<PathBuf>,
    #[arg(long)]
    pub symbol: Option<String>,
    #[arg(long)]
    pub timeframe: Option<Timeframe>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest and write the trade report
    Backtest {
        #[command(flatten)]
        run: RunArgs,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Validate config and script without loading data
        #[arg(long)]
        dry_run: bool,
    },
    /// Compile a strategy script and print what it contains
    Validate {
        #[arg(short, long)]
        strategy: PathBuf,
    },
    /// Download bars from the remote source into the local store
    Fetch {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        timeframe: Option<Timeframe>,
    },
    /// Show the stored data range for a symbol
    Info {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        timeframe: Option<Timeframe>,
    },
    /// Run the strategy over a grid of input values
    Sweep {
        #[command(flatten)]
        run: RunArgs,
        /// `name=v1,v2,...`; repeat for a multi-dimensional grid
        #[arg(short, long = "param", required = true)]
        params: Vec<SweepParam>,
        /// Run grid points one at a time
        #[arg(long)]
        sequential: bool,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Backtest {
            run,
            output,
            dry_run,
        } => {
            if dry_run {
                run_dry_run(&run)
            } else {
                run_backtest(&run, output.as_deref())
            }
        }
        Command::Validate { strategy } => run_validate(&strategy),
        Command::Fetch {
            config,
            symbol,
            timeframe,
        } => run_fetch(&config, symbol.as_deref(), timeframe),
        Command::Info {
            config,
            symbol,
            timeframe,
        } => run_info(&config, symbol.as_deref(), timeframe),
        Command::Sweep {
            run,
            params,
            sequential,
        } => run_sweep(&run, params, sequential),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, PineError> {
    info!(path = %path.display(), "loading config");
    FileConfigAdapter::from_file(path)
}

/// A parsed and translated strategy script.
pub struct LoadedStrategy {
    pub path: PathBuf,
    pub source: String,
    pub script: Script,
    pub ir: StrategyIr,
}

/// Read and compile a script. Positioned errors are echoed with a caret
/// under the offending column before being returned.
pub fn load_strategy(path: &Path) -> Result<LoadedStrategy, PineError> {
    info!(path = %path.display(), "loading strategy");
    let source = fs::read_to_string(path)?;
    let compiled = parser::parse(&source).and_then(|script| {
        let ir = compile_script(&script, &HashMap::new())?;
        Ok((script, ir))
    });
    match compiled {
        Ok((script, ir)) => Ok(LoadedStrategy {
            path: path.to_path_buf(),
            source,
            script,
            ir,
        }),
        Err(e) => {
            if let Some(offset) = e.position() {
                eprintln!("{}:\n{}", path.display(), caret_context(&source, offset));
            }
            Err(e)
        }
    }
}

/// `--strategy` if given, else `[backtest] strategy_file`.
pub fn resolve_strategy_path(
    config: &dyn ConfigPort,
    cli_path: Option<&Path>,
) -> Result<PathBuf, PineError> {
    match cli_path {
        Some(p) => Ok(p.to_path_buf()),
        None => config
            .get_string("backtest", "strategy_file")
            .map(PathBuf::from)
            .ok_or_else(|| PineError::ConfigMissing {
                section: "backtest".into(),
                key: "strategy_file".into(),
            }),
    }
}

/// `--output`, else `[report] output`, else next to the strategy file.
pub fn resolve_output_path(
    config: &dyn ConfigPort,
    cli_path: Option<&Path>,
    strategy_path: &Path,
) -> PathBuf {
    cli_path
        .map(Path::to_path_buf)
        .or_else(|| config.get_string("report", "output").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(default_report_path(&strategy_path.display().to_string())))
}

/// Everything a run needs besides the strategy and the data source.
#[derive(Debug, Clone)]
pub struct BacktestJob {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub overrides: ConfigOverrides,
}

pub fn build_job(
    config: &dyn ConfigPort,
    symbol: Option<&str>,
    timeframe_override: Option<Timeframe>,
    now: NaiveDateTime,
) -> Result<BacktestJob, PineError> {
    let symbol = match symbol {
        Some(s) => s.to_string(),
        None => config
            .get_string("backtest", "symbol")
            .ok_or_else(|| PineError::ConfigMissing {
                section: "backtest".into(),
                key: "symbol".into(),
            })?,
    };
    let timeframe = match timeframe_override {
        Some(tf) => tf,
        None => timeframe(config)?,
    };
    let (start, end) = resolve_date_range(config, now)?;
    Ok(BacktestJob {
        symbol,
        timeframe,
        start,
        end,
        overrides: config_overrides(config)?,
    })
}

#[cfg_attr(all(feature = "sqlite", feature = "binance"), allow(dead_code))]
fn feature_disabled(feature: &str) -> PineError {
    PineError::ConfigInvalid {
        section: "data".into(),
        key: "source".into(),
        reason: format!("pinetrader was built without the `{feature}` feature"),
    }
}

fn open_csv(config: &dyn ConfigPort) -> Result<CsvAdapter, PineError> {
    let dir = config
        .get_string("data", "csv_dir")
        .ok_or_else(|| PineError::ConfigMissing {
            section: "data".into(),
            key: "csv_dir".into(),
        })?;
    Ok(CsvAdapter::new(PathBuf::from(dir)))
}

#[cfg(feature = "sqlite")]
fn open_sqlite(config: &dyn ConfigPort) -> Result<Box<dyn BarCache>, PineError> {
    use crate::adapters::sqlite_adapter::SqliteAdapter;
    Ok(Box::new(SqliteAdapter::from_config(config)?))
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_config: &dyn ConfigPort) -> Result<Box<dyn BarCache>, PineError> {
    Err(feature_disabled("sqlite"))
}

#[cfg(feature = "binance")]
fn open_remote(config: &dyn ConfigPort) -> Result<Box<dyn DataPort>, PineError> {
    use crate::adapters::binance_adapter::BinanceAdapter;
    Ok(Box::new(BinanceAdapter::from_config(config)?))
}

#[cfg(not(feature = "binance"))]
fn open_remote(_config: &dyn ConfigPort) -> Result<Box<dyn DataPort>, PineError> {
    Err(feature_disabled("binance"))
}

/// The local store for a source: the CSV directory or the SQLite database.
/// A pure remote source stores into whichever of the two is configured.
fn open_store(config: &dyn ConfigPort, kind: DataSourceKind) -> Result<Box<dyn BarCache>, PineError> {
    match kind {
        DataSourceKind::Csv => Ok(Box::new(open_csv(config)?)),
        DataSourceKind::Sqlite | DataSourceKind::Cached => open_sqlite(config),
        DataSourceKind::Binance => {
            if config.get_string("data", "sqlite_path").is_some() {
                open_sqlite(config)
            } else {
                Ok(Box::new(open_csv(config)?))
            }
        }
    }
}

/// Build the data source selected by `[data] source`.
pub fn open_data_source(config: &dyn ConfigPort) -> Result<Box<dyn DataPort>, PineError> {
    let kind = validate_data_config(config)?;
    info!(source = ?kind, "opening data source");
    match kind {
        DataSourceKind::Csv => Ok(Box::new(open_csv(config)?)),
        DataSourceKind::Sqlite => Ok(Box::new(open_sqlite(config)?)),
        DataSourceKind::Binance => open_remote(config),
        DataSourceKind::Cached => Ok(Box::new(CachedDataSource::new(
            open_sqlite(config)?,
            open_remote(config)?,
        ))),
    }
}

/// Fetch the job's bars; an empty window is a `NoData` error.
pub fn load_bars(data_port: &dyn DataPort, job: &BacktestJob) -> Result<Vec<Bar>, PineError> {
    info!(
        symbol = %job.symbol,
        timeframe = %job.timeframe,
        start = %job.start,
        end = %job.end,
        "fetching bars"
    );
    let bars = data_port.fetch_bars(&job.symbol, job.timeframe, job.start, job.end)?;
    if bars.is_empty() {
        return Err(PineError::NoData {
            symbol: job.symbol.clone(),
            timeframe: job.timeframe.to_string(),
        });
    }
    info!(bars = bars.len(), "bars loaded");
    Ok(bars)
}

/// Load data, run the backtest, print the summary and write the report.
pub fn run_backtest_pipeline(
    data_port: &dyn DataPort,
    strategy: &LoadedStrategy,
    job: &BacktestJob,
    report: &dyn ReportPort,
    output: &Path,
) -> Result<Summary, PineError> {
    let bars = load_bars(data_port, job)?;
    let config = BacktestConfig::resolve(&strategy.ir.settings, &job.overrides);
    let initial_capital = config.initial_capital;
    info!(
        capital = config.initial_capital,
        commission_pct = config.commission_pct,
        pyramiding = config.pyramiding,
        "running backtest"
    );

    let result = match backtest::run(&strategy.ir, &bars, config) {
        Ok(result) => result,
        Err(failure) => {
            warn!(bar = failure.bar_index, error = %failure.error, "backtest aborted");
            let partial = Summary::from_run(&failure.partial, initial_capital);
            eprintln!("\n=== Partial Results (aborted at bar {}) ===", failure.bar_index);
            print_summary(&strategy.ir.settings.title, &partial, &failure.partial);
            return Err(PineError::Runtime(failure.error));
        }
    };

    let summary = Summary::from_run(&result, initial_capital);
    eprintln!("\n=== Backtest Results ===");
    print_summary(&strategy.ir.settings.title, &summary, &result);

    let output_str = output.display().to_string();
    report.write(&result, &summary, &strategy.ir.settings, &output_str)?;
    eprintln!("\nReport written to: {output_str}");
    Ok(summary)
}

fn run_backtest(args: &RunArgs, output: Option<&Path>) -> Result<(), PineError> {
    let config = load_config(&args.config)?;
    validate_backtest_config(&config)?;
    let strategy_path = resolve_strategy_path(&config, args.strategy.as_deref())?;
    let strategy = load_strategy(&strategy_path)?;
    let job = build_job(
        &config,
        args.symbol.as_deref(),
        args.timeframe,
        Utc::now().naive_utc(),
    )?;
    let output = resolve_output_path(&config, output, &strategy_path);
    let data_port = open_data_source(&config)?;
    run_backtest_pipeline(
        data_port.as_ref(),
        &strategy,
        &job,
        &CsvReportAdapter::new(),
        &output,
    )?;
    Ok(())
}

pub fn run_dry_run(args: &RunArgs) -> Result<(), PineError> {
    let config = load_config(&args.config)?;
    validate_backtest_config(&config)?;
    let kind = validate_data_config(&config)?;
    let strategy_path = resolve_strategy_path(&config, args.strategy.as_deref())?;
    let strategy = load_strategy(&strategy_path)?;
    let job = build_job(
        &config,
        args.symbol.as_deref(),
        args.timeframe,
        Utc::now().naive_utc(),
    )?;
    eprintln!("Config validated successfully");

    print_strategy(&strategy.ir);
    let bt = BacktestConfig::resolve(&strategy.ir.settings, &job.overrides);
    eprintln!("\nRun:");
    eprintln!("  source:     {kind:?}");
    eprintln!("  symbol:     {}", job.symbol);
    eprintln!("  timeframe:  {}", job.timeframe);
    eprintln!("  window:     {} to {}", job.start, job.end);
    eprintln!("  capital:    {:.2}", bt.initial_capital);
    eprintln!("  commission: {}%", bt.commission_pct);

    eprintln!("\nDry run complete: configuration is valid");
    Ok(())
}

fn run_validate(strategy_path: &Path) -> Result<(), PineError> {
    let strategy = load_strategy(strategy_path)?;
    print_strategy(&strategy.ir);
    eprintln!("\nStrategy is valid");
    Ok(())
}

fn run_fetch(
    config_path: &Path,
    symbol: Option<&str>,
    timeframe: Option<Timeframe>,
) -> Result<(), PineError> {
    let config = load_config(config_path)?;
    validate_backtest_config(&config)?;
    let kind = validate_data_config(&config)?;
    let job = build_job(&config, symbol, timeframe, Utc::now().naive_utc())?;

    let cache = CachedDataSource::new(open_store(&config, kind)?, open_remote(&config)?);
    let written = cache.refresh(&job.symbol, job.timeframe, job.start, job.end)?;
    eprintln!(
        "Stored {written} bars for {} ({}) from {} to {}",
        job.symbol, job.timeframe, job.start, job.end
    );
    print_range(cache.data_range(&job.symbol, job.timeframe)?);
    Ok(())
}

fn run_info(
    config_path: &Path,
    symbol: Option<&str>,
    timeframe_override: Option<Timeframe>,
) -> Result<(), PineError> {
    let config = load_config(config_path)?;
    let data_port = open_data_source(&config)?;
    let symbol = match symbol {
        Some(s) => s.to_string(),
        None => config
            .get_string("backtest", "symbol")
            .ok_or_else(|| PineError::ConfigMissing {
                section: "backtest".into(),
                key: "symbol".into(),
            })?,
    };
    let timeframe = match timeframe_override {
        Some(tf) => tf,
        None => timeframe(&config)?,
    };

    eprintln!("{symbol} ({timeframe})");
    print_range(data_port.data_range(&symbol, timeframe)?);
    Ok(())
}

fn run_sweep(args: &RunArgs, params: Vec<SweepParam>, sequential: bool) -> Result<(), PineError> {
    let config = load_config(&args.config)?;
    validate_backtest_config(&config)?;
    let strategy_path = resolve_strategy_path(&config, args.strategy.as_deref())?;
    let strategy = load_strategy(&strategy_path)?;
    let job = build_job(
        &config,
        args.symbol.as_deref(),
        args.timeframe,
        Utc::now().naive_utc(),
    )?;

    for param in &params {
        let known = strategy
            .ir
            .inputs
            .iter()
            .any(|i| i.name == param.name || i.title.as_deref() == Some(param.name.as_str()));
        if !known {
            warn!(param = %param.name, "sweep parameter does not match any input()");
        }
    }

    let data_port = open_data_source(&config)?;
    let bars = load_bars(data_port.as_ref(), &job)?;
    let grid = ParamGrid::new(params);
    info!(points = grid.size(), parallel = !sequential, "running sweep");

    let outcomes = ParamSweep::new(&strategy.script, &bars)
        .with_overrides(job.overrides)
        .with_parallelism(!sequential)
        .run(&grid);

    eprintln!(
        "\n{:<32} {:>7} {:>12} {:>8} {:>12}",
        "inputs", "trades", "total_pl", "win%", "max_dd"
    );
    let mut best: Option<(f64, String)> = None;
    let mut first_error = None;
    let mut succeeded = 0usize;
    for outcome in outcomes {
        let label = outcome
            .inputs
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(" ");
        match outcome.run {
            Ok(run) => {
                succeeded += 1;
                let s = &run.summary;
                eprintln!(
                    "{:<32} {:>7} {:>12.2} {:>7.1}% {:>12.2}",
                    label,
                    s.trade_count,
                    s.total_pl,
                    s.win_rate * 100.0,
                    s.max_drawdown
                );
                if best.as_ref().is_none_or(|(pl, _)| s.total_pl > *pl) {
                    best = Some((s.total_pl, label));
                }
            }
            Err(e) => {
                eprintln!("{label:<32} error: {e}");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    if let Some((pl, label)) = best {
        eprintln!("\nBest: {label} (total P&L {pl:.2})");
    }
    match first_error {
        Some(e) if succeeded == 0 => Err(e),
        _ => Ok(()),
    }
}

fn print_strategy(ir: &StrategyIr) {
    let settings = &ir.settings;
    eprintln!("\nStrategy: {}", settings.title);
    eprintln!("  initial capital: {:.2}", settings.initial_capital);
    eprintln!("  default qty:     {}", settings.default_qty);
    eprintln!("  pyramiding:      {}", settings.pyramiding);
    match settings.commission_pct {
        Some(pct) => eprintln!("  commission:      {pct}%"),
        None => eprintln!("  commission:      default"),
    }
    eprintln!("  instructions:    {}", ir.instruction_count());
    eprintln!("  orders:          {}", ir.order_count());

    if !ir.indicators.is_empty() {
        eprintln!("\nIndicators:");
        for (i, spec) in ir.indicators.iter().enumerate() {
            eprintln!("  #{i} {spec}");
        }
    }
    if !ir.inputs.is_empty() {
        eprintln!("\nInputs:");
        for input in &ir.inputs {
            eprintln!("  {} = {} (default {})", input.name, input.value, input.default);
        }
    }
}

fn print_summary(title: &str, summary: &Summary, result: &RunResult) {
    eprintln!("Strategy:         {title}");
    eprintln!("Bars Processed:   {}", summary.bars_processed);
    eprintln!("Initial Capital:  {:.2}", summary.initial_capital);
    eprintln!("Final Equity:     {:.2}", summary.final_equity);
    eprintln!(
        "Total P&L:        {:.2} ({:.2}%)",
        summary.total_pl, summary.return_pct
    );
    eprintln!("Total Trades:     {}", summary.trade_count);
    eprintln!("Win Rate:         {:.1}%", summary.win_rate * 100.0);
    eprintln!("Profit Factor:    {:.2}", summary.profit_factor);
    eprintln!(
        "Max Drawdown:     -{:.2} ({:.1}%)",
        summary.max_drawdown, summary.max_drawdown_pct
    );
    eprintln!("Commission:       {:.2}", summary.total_commission);
    if result.skipped_orders > 0 {
        eprintln!("Skipped Orders:   {}", result.skipped_orders);
    }
}

fn print_range(range: Option<(NaiveDateTime, NaiveDateTime, usize)>) {
    match range {
        Some((first, last, count)) => {
            eprintln!("  first: {first}");
            eprintln!("  last:  {last}");
            eprintln!("  bars:  {count}");
        }
        None => eprintln!("  no stored data"),
    }
}
