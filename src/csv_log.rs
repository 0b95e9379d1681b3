// =============================================================================
// Trade CSV Logger — append-only trade history
// =============================================================================

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::types::TradeRecord;

const HEADER: &str = "Timestamp,ID,Side,EntryPrice,ExitPrice,Size,Leverage,PnL,PnL%,Reason,Duration(min)";

/// Appends closed trades to a CSV file, writing the header once on first use.
pub struct TradeCsvLogger {
    path: PathBuf,
}

impl TradeCsvLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one closed trade as a CSV row, writing the header first if the
    /// file doesn't exist yet.
    pub fn append(&self, id: &str, record: &TradeRecord) -> Result<()> {
        let needs_header = !Path::new(&self.path).exists();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open trade CSV log at {}", self.path.display()))?;

        if needs_header {
            writeln!(file, "{HEADER}").context("failed to write CSV header")?;
        }

        let duration_min = (record.closed_at - record.opened_at) as f64 / 60_000.0;

        writeln!(
            file,
            "{},{},{:?},{},{},{},{},{},{},{},{:.2}",
            record.closed_at,
            id,
            record.side,
            record.entry_price,
            record.exit_price,
            record.size,
            record.leverage,
            record.pnl,
            record.pnl_pct,
            record.close_reason,
            duration_min,
        )
        .context("failed to write trade CSV row")?;

        info!(path = %self.path.display(), id, "trade appended to CSV log");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CloseReason, PositionSide};

    fn record() -> TradeRecord {
        TradeRecord {
            side: PositionSide::Long,
            entry_price: 100.0,
            exit_price: 110.0,
            size: 1.0,
            leverage: 5.0,
            opened_at: 0,
            closed_at: 600_000,
            pnl: 10.0,
            pnl_pct: 50.0,
            close_reason: CloseReason::TakeProfit,
        }
    }

    #[test]
    fn writes_header_once_then_appends() {
        let dir = std::env::temp_dir().join(format!("aurora-bot-csv-test-{}", uuid::Uuid::new_v4()));
        let logger = TradeCsvLogger::new(&dir);

        logger.append("trade-1", &record()).unwrap();
        logger.append("trade-2", &record()).unwrap();

        let contents = std::fs::read_to_string(&dir).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("trade-1"));
        assert!(lines[2].contains("trade-2"));

        std::fs::remove_file(&dir).ok();
    }
}
