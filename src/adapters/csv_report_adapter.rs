//! Delimited trade ledger report.
//!
//! One row per closed trade, a blank line, then a `metric,value` summary
//! block. Each run replaces the file.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::domain::backtest::RunResult;
use crate::domain::error::PineError;
use crate::domain::metrics::Summary;
use crate::domain::position::Trade;
use crate::domain::strategy::StrategySettings;
use crate::ports::report_port::ReportPort;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const TRADE_HEADER: [&str; 8] = [
    "entry_time",
    "exit_time",
    "direction",
    "entry_price",
    "exit_price",
    "size",
    "profit_loss",
    "exit_reason",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct CsvReportAdapter;

fn report_err(e: impl std::fmt::Display) -> PineError {
    PineError::Report {
        reason: e.to_string(),
    }
}

fn trade_record(trade: &Trade) -> [String; 8] {
    [
        trade.entry_time.format(DATETIME_FORMAT).to_string(),
        trade.exit_time.format(DATETIME_FORMAT).to_string(),
        trade.direction.as_str().to_string(),
        trade.entry_price.to_string(),
        trade.exit_price.to_string(),
        trade.size.to_string(),
        format!("{:.2}", trade.profit_loss),
        trade.exit_reason.as_str().to_string(),
    ]
}

/// The `metric,value` rows, in report order.
pub fn summary_rows(summary: &Summary, settings: &StrategySettings) -> Vec<(&'static str, String)> {
    let money = |v: f64| format!("{v:.2}");
    vec![
        ("strategy", settings.title.clone()),
        ("initial_capital", money(summary.initial_capital)),
        ("final_equity", money(summary.final_equity)),
        ("total_pl", money(summary.total_pl)),
        ("return_pct", money(summary.return_pct)),
        ("trade_count", summary.trade_count.to_string()),
        ("trades_won", summary.trades_won.to_string()),
        ("trades_lost", summary.trades_lost.to_string()),
        ("win_rate", format!("{:.4}", summary.win_rate)),
        ("max_drawdown", money(summary.max_drawdown)),
        ("max_drawdown_pct", money(summary.max_drawdown_pct)),
        ("gross_profit", money(summary.gross_profit)),
        ("gross_loss", money(summary.gross_loss)),
        ("profit_factor", format!("{:.4}", summary.profit_factor)),
        ("avg_trade", money(summary.avg_trade)),
        ("largest_win", money(summary.largest_win)),
        ("largest_loss", money(summary.largest_loss)),
        ("avg_trade_duration_hours", money(summary.avg_trade_duration)),
        ("total_commission", money(summary.total_commission)),
        ("bars_processed", summary.bars_processed.to_string()),
    ]
}

impl CsvReportAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Render the whole report in memory.
    pub fn render(
        &self,
        result: &RunResult,
        summary: &Summary,
        settings: &StrategySettings,
    ) -> Result<Vec<u8>, PineError> {
        let mut trades = csv::Writer::from_writer(Vec::new());
        trades.write_record(TRADE_HEADER).map_err(report_err)?;
        for trade in &result.trades {
            trades.write_record(trade_record(trade)).map_err(report_err)?;
        }
        let mut out = trades.into_inner().map_err(report_err)?;
        out.push(b'\n');

        let mut metrics = csv::Writer::from_writer(out);
        metrics.write_record(["metric", "value"]).map_err(report_err)?;
        for (name, value) in summary_rows(summary, settings) {
            metrics.write_record([name, value.as_str()]).map_err(report_err)?;
        }
        metrics.into_inner().map_err(report_err)
    }
}

impl ReportPort for CsvReportAdapter {
    fn write(
        &self,
        result: &RunResult,
        summary: &Summary,
        settings: &StrategySettings,
        output_path: &str,
    ) -> Result<(), PineError> {
        let bytes = self.render(result, summary, settings)?;
        let path = Path::new(output_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        info!(path = output_path, trades = result.trades.len(), "wrote report");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::{Direction, ExitReason};
    use chrono::{NaiveDate, NaiveDateTime};
    use tempfile::TempDir;

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 2, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn sample_result() -> RunResult {
        RunResult {
            trades: vec![Trade {
                entry_id: "L".into(),
                direction: Direction::Long,
                entry_time: at(1),
                exit_time: at(3),
                entry_price: 100.0,
                exit_price: 110.0,
                size: 2.0,
                commission: 0.0,
                profit_loss: 20.0,
                exit_reason: ExitReason::Signal,
            }],
            bars_processed: 4,
            ..RunResult::default()
        }
    }

    fn settings() -> StrategySettings {
        StrategySettings {
            title: "Demo".into(),
            ..StrategySettings::default()
        }
    }

    #[test]
    fn report_layout() {
        let result = sample_result();
        let summary = Summary::from_run(&result, 10_000.0);
        let bytes = CsvReportAdapter::new().render(&result, &summary, &settings()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "entry_time,exit_time,direction,entry_price,exit_price,size,profit_loss,exit_reason"
        );
        assert_eq!(
            lines[1],
            "2024-02-01 01:00:00,2024-02-01 03:00:00,long,100,110,2,20.00,signal"
        );
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], "metric,value");
        assert_eq!(lines[4], "strategy,Demo");
        assert!(lines.contains(&"total_pl,20.00"));
        assert!(lines.contains(&"trade_count,1"));
        assert!(lines.contains(&"final_equity,10020.00"));
    }

    #[test]
    fn empty_ledger_still_has_summary() {
        let result = RunResult::default();
        let summary = Summary::from_run(&result, 10_000.0);
        let bytes = CsvReportAdapter::new().render(&result, &summary, &settings()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("trade_count,0"));
        assert!(text.contains("total_pl,0.00"));
    }

    #[test]
    fn write_overwrites_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("report.csv");
        let path_str = path.to_str().unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "stale content that is longer than nothing\n".repeat(100)).unwrap();

        let result = sample_result();
        let summary = Summary::from_run(&result, 10_000.0);
        let adapter = CsvReportAdapter::new();
        adapter.write(&result, &summary, &settings(), path_str).unwrap();
        adapter.write(&result, &summary, &settings(), path_str).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(!text.contains("stale"));
        assert_eq!(text.matches("metric,value").count(), 1);
    }
}
