// =============================================================================
// Warm State — durable position/bar-progress snapshot, atomic tmp+rename
// =============================================================================
//
// Mirrors `runtime_config.rs`'s persistence pattern exactly: write to a `.tmp`
// sibling, then rename, so a crash mid-write never corrupts the file the next
// start reads. A snapshot older than an hour is treated as stale and ignored
// rather than trusted, since the market has moved on by then.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::types::{Position, WarmState};

/// Snapshots older than this are discarded on load.
const MAX_AGE_MS: i64 = 60 * 60 * 1000;

/// Load warm state from `path`, discarding it if missing, unreadable, or
/// older than an hour. Per spec.md §7 item 7, a load failure is never fatal.
pub fn load(path: impl AsRef<Path>, now: i64) -> Option<WarmState> {
    let path = path.as_ref();

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "warm state not found or unreadable — starting cold");
            return None;
        }
    };

    let state: WarmState = match serde_json::from_str(&content) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "warm state malformed — starting cold");
            return None;
        }
    };

    if now - state.write_timestamp > MAX_AGE_MS {
        warn!(
            path = %path.display(),
            age_ms = now - state.write_timestamp,
            "warm state is stale (> 1h old) — starting cold"
        );
        return None;
    }

    info!(path = %path.display(), last_bar_close_time = state.last_bar_close_time, "warm state loaded");
    Some(state)
}

/// Persist `position`/`last_bar_close_time` atomically (write-temp + rename).
pub fn save(path: impl AsRef<Path>, position: Position, last_bar_close_time: i64, now: i64) -> Result<()> {
    let path = path.as_ref();

    let state = WarmState {
        position,
        last_bar_close_time,
        write_timestamp: now,
    };

    let content = serde_json::to_string_pretty(&state).context("failed to serialise warm state")?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &content)
        .with_context(|| format!("failed to write tmp warm state to {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename tmp warm state to {}", path.display()))?;

    info!(path = %path.display(), "warm state saved (atomic)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PositionSide;

    fn tmp_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("aurora-bot-warm-state-test-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn save_then_load_roundtrips() {
        let path = tmp_path();
        let pos = Position {
            side: PositionSide::Long,
            size: 1.5,
            entry_price: Some(100.0),
            opened_at: Some(0),
        };
        save(&path, pos, 5_000, 10_000).unwrap();

        let loaded = load(&path, 10_100).expect("should load fresh state");
        assert_eq!(loaded.position, pos);
        assert_eq!(loaded.last_bar_close_time, 5_000);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn stale_state_is_discarded() {
        let path = tmp_path();
        save(&path, Position::flat(), 0, 0).unwrap();

        let loaded = load(&path, MAX_AGE_MS + 1);
        assert!(loaded.is_none());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_returns_none() {
        let path = tmp_path();
        assert!(load(&path, 0).is_none());
    }
}
