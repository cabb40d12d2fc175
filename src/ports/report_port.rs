//! Report generation port.

use crate::domain::backtest::RunResult;
use crate::domain::error::PineError;
use crate::domain::metrics::Summary;
use crate::domain::strategy::StrategySettings;

/// Port for writing backtest reports.
pub trait ReportPort {
    /// Write the report to `output_path`, replacing any existing file.
    fn write(
        &self,
        result: &RunResult,
        summary: &Summary,
        settings: &StrategySettings,
        output_path: &str,
    ) -> Result<(), PineError>;
}
