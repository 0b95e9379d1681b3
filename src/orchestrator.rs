// =============================================================================
// Bot Orchestrator — wires the bar builder, a strategy engine, position
// state, order tracking, and trade stats into one serialized control loop
// =============================================================================
//
// Everything on the trading path runs through `run`'s single `mpsc` consumer
// loop: ticks, polled exchange snapshots, and shutdown all arrive as
// `InboundEvent`s and are handled one at a time, so there is never more than
// one in-flight bar-close or executor call for this instrument. Producers
// (the tick stream task, the snapshot poller task) are expected to hold the
// `mpsc::Sender` and push events in; this module owns only the consumer side.
// =============================================================================

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::BotConfig;
use crate::csv_log::TradeCsvLogger;
use crate::exchange::client::usdt_balance;
use crate::executor::{is_insufficient_balance_error, Executor};
use crate::market_data::BarBuilder;
use crate::position::{OrderTracker, PositionSnapshot, PositionStateManager, ReconcileOutcome};
use crate::strategy::{HybridEngine, TrendEngine};
use crate::trade_stats::TradeStats;
use crate::types::{
    BalanceInfo, CloseReason, ExecutionMode, Position, PositionSide, Signal, SignalReason,
    StrategyKind, SyntheticBar, Tick, TradeInstruction,
};
use crate::warm_state;

/// Bars suppressed at startup to let indicators stabilize.
const WARMUP_BARS: u64 = 10;
/// Minimum bars a position must be held before a flip is allowed.
const MIN_HOLD_BARS: u64 = 6;
/// Freeze duration after two consecutive reconciliation failures.
const FREEZE_DURATION_MS: i64 = 60_000;
/// Bound on the signal-dedup FIFO set.
const SIGNAL_DEDUP_CAPACITY: usize = 100;
/// Sliding window for the flip budget.
const FLIP_WINDOW_MS: i64 = 60 * 60 * 1000;
/// Unrealized-profit threshold at which the hybrid trailing stop arms.
const TRAILING_ACTIVATION_PCT: f64 = 0.5;
/// Retracement from the trailing extremum that triggers the trailing stop.
const TRAILING_STOP_PCT: f64 = 0.5;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_millis() as i64
}

/// Events the orchestrator consumes, from whatever producer tasks feed it.
pub enum InboundEvent {
    Tick(Tick),
    PositionSnapshot(PositionSnapshot),
    BalanceSnapshot(Vec<BalanceInfo>),
    Shutdown,
}

/// Public events the orchestrator broadcasts, replacing a heterogeneous
/// event-emitter with one typed enum per the redesign flag in spec.md §9.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    Signal(Signal),
    Position(Position),
    Log(String),
    Stop,
}

enum StrategyEngineKind {
    Trend(TrendEngine),
    Hybrid(HybridEngine),
}

impl StrategyEngineKind {
    fn on_bar_close(&mut self, bar: &SyntheticBar) -> Option<Signal> {
        match self {
            Self::Trend(e) => e.on_bar_close(bar),
            Self::Hybrid(e) => e.on_bar_close(bar),
        }
    }

    fn set_position_side(&mut self, side: PositionSide) {
        if let Self::Hybrid(e) = self {
            e.set_position_side(side);
        }
    }

    fn should_allow_trading(&self, threshold: f64) -> bool {
        match self {
            Self::Trend(_) => true,
            Self::Hybrid(e) => e.should_allow_trading(threshold),
        }
    }
}

pub struct Orchestrator {
    bar_builder: BarBuilder,
    engine: StrategyEngineKind,

    position: Position,
    position_state: PositionStateManager,
    order_tracker: OrderTracker,
    trade_stats: TradeStats,

    executor: Arc<dyn Executor>,
    csv_logger: TradeCsvLogger,
    warm_state_path: PathBuf,

    risk: crate::config::RiskEnvelope,
    dry_run: bool,
    usdt_balance: f64,

    bar_count: u64,
    last_bar_close_time: i64,
    position_opened_at: u64,
    trade_seq: u64,

    frozen: bool,
    freeze_until: i64,

    trailing_highest: Option<f64>,
    trailing_lowest: Option<f64>,
    flip_timestamps: VecDeque<i64>,
    seen_signals: VecDeque<String>,

    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl Orchestrator {
    pub fn new(
        cfg: &BotConfig,
        executor: Arc<dyn Executor>,
        warm_state_path: PathBuf,
        csv_path: PathBuf,
    ) -> Result<Self> {
        let engine = match cfg.strategy {
            StrategyKind::Trend => StrategyEngineKind::Trend(TrendEngine::new(cfg.trend.into())?),
            StrategyKind::Hybrid => StrategyEngineKind::Hybrid(HybridEngine::new(cfg.hybrid.into())?),
        };
        let bar_builder = BarBuilder::new(cfg.timeframe_ms)?;
        let (event_tx, _rx) = broadcast::channel(256);

        Ok(Self {
            bar_builder,
            engine,
            position: Position::flat(),
            position_state: PositionStateManager::new(now_ms()),
            order_tracker: OrderTracker::new(),
            trade_stats: TradeStats::new(),
            executor,
            csv_logger: TradeCsvLogger::new(csv_path),
            warm_state_path,
            risk: cfg.risk,
            dry_run: cfg.mode == ExecutionMode::DryRun,
            usdt_balance: 0.0,
            bar_count: 0,
            last_bar_close_time: 0,
            position_opened_at: 0,
            trade_seq: 0,
            frozen: false,
            freeze_until: 0,
            trailing_highest: None,
            trailing_lowest: None,
            flip_timestamps: VecDeque::new(),
            seen_signals: VecDeque::new(),
            event_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    pub fn position(&self) -> Position {
        self.position
    }

    /// Consume `rx` until `Shutdown`, serializing every tick, snapshot, and
    /// protective/signal decision through this single loop.
    pub async fn run(mut self, mut rx: mpsc::Receiver<InboundEvent>) -> Result<()> {
        let boot_now = now_ms();
        if let Some(state) = warm_state::load(&self.warm_state_path, boot_now) {
            self.position = state.position;
            self.last_bar_close_time = state.last_bar_close_time;
            if !self.position.is_flat() {
                self.engine.set_position_side(self.position.side);
            }
            info!(position = ?self.position, "resumed from warm state");
        }

        while let Some(event) = rx.recv().await {
            match event {
                InboundEvent::Tick(tick) => self.handle_tick(tick).await,
                InboundEvent::PositionSnapshot(snap) => self.handle_position_snapshot(snap).await,
                InboundEvent::BalanceSnapshot(balances) => self.handle_balance_snapshot(balances),
                InboundEvent::Shutdown => break,
            }
        }

        self.persist_warm_state(now_ms());
        let _ = self.event_tx.send(OrchestratorEvent::Stop);
        info!("orchestrator stopped");
        Ok(())
    }

    async fn handle_tick(&mut self, tick: Tick) {
        let outcome = self.bar_builder.push_tick(tick);
        if let Some(closed) = outcome.closed {
            self.run_protective_exits(&closed).await;
            self.handle_bar_close(closed).await;
        }
    }

    async fn handle_bar_close(&mut self, bar: SyntheticBar) {
        if bar.end_time <= self.last_bar_close_time {
            debug!(end_time = bar.end_time, last = self.last_bar_close_time, "stale bar ignored (monotonic gate)");
            return;
        }
        self.last_bar_close_time = bar.end_time;
        self.bar_count += 1;

        if self.bar_count <= WARMUP_BARS {
            info!(bar_count = self.bar_count, "warming up — signal evaluation suppressed");
            return;
        }

        let now = now_ms();
        if self.frozen {
            if now < self.freeze_until {
                debug!("trading frozen — bar skipped");
                return;
            }
            self.frozen = false;
            info!("freeze window elapsed — trading resumed");
        }

        if !self.position.is_flat() {
            if let StrategyEngineKind::Hybrid(engine) = &self.engine {
                if let Some(reason) = engine.check_exit(&bar) {
                    self.close_position(reason, Some(bar.close)).await;
                    // The exit detector reads history through the previous bar, so the
                    // engine still needs to advance on this bar. Any signal it produces
                    // here is discarded — the exit already took precedence.
                    let _ = self.engine.on_bar_close(&bar);
                    return;
                }
            }
        }

        let Some(signal) = self.engine.on_bar_close(&bar) else {
            return;
        };

        let key = format!("{:?}-{}", signal.side(), bar.end_time);
        if self.seen_signals.contains(&key) {
            debug!(key, "duplicate signal key — skipping");
            return;
        }
        self.seen_signals.push_back(key);
        while self.seen_signals.len() > SIGNAL_DEDUP_CAPACITY {
            self.seen_signals.pop_front();
        }

        let _ = self.event_tx.send(OrchestratorEvent::Signal(signal));
        self.apply_signal(signal, &bar).await;
    }

    async fn apply_signal(&mut self, signal: Signal, bar: &SyntheticBar) {
        if self.risk.require_trending_market && !self.engine.should_allow_trading(self.risk.adx_threshold) {
            debug!("regime gate blocked signal — market not trending");
            return;
        }

        let side = signal.side();
        if side == self.position.side {
            debug!(?side, "signal matches current side — ignored");
            return;
        }

        self.prune_flip_window(bar.end_time);
        if self.flip_timestamps.len() as u32 >= self.risk.max_flips_per_hour {
            warn!("flip budget exhausted");
            return;
        }

        let is_flip = !self.position.is_flat();
        if is_flip {
            let bars_held = self.bar_count.saturating_sub(self.position_opened_at);
            if bars_held < MIN_HOLD_BARS {
                info!(bars_held, "minimum hold not met — flip rejected");
                return;
            }
        }

        let size = self.compute_order_size();

        if is_flip {
            let reason = match self.position.side {
                PositionSide::Long => CloseReason::FlipShort,
                PositionSide::Short => CloseReason::FlipLong,
                PositionSide::Flat => unreachable!("is_flip implies a non-flat position"),
            };
            self.close_position(reason, Some(bar.close)).await;
        }

        self.enter_position(side, size, bar, signal.reason()).await;
    }

    fn compute_order_size(&self) -> f64 {
        match self.risk.position_size_pct {
            Some(pct) => {
                let raw = self.usdt_balance * pct / 100.0 * 0.7 * self.risk.max_leverage;
                raw.min(self.risk.max_position_size).clamp(5.0, 500.0)
            }
            None => self.risk.max_position_size,
        }
    }

    async fn enter_position(&mut self, side: PositionSide, size: f64, bar: &SyntheticBar, signal_reason: SignalReason) {
        let leverage = self.risk.max_leverage;
        let required_margin = size / leverage;

        if !self.dry_run && self.usdt_balance < required_margin {
            warn!(required_margin, usdt_balance = self.usdt_balance, "insufficient balance for entry — skipping");
            return;
        }

        let order = TradeInstruction {
            side,
            size,
            leverage,
            price: bar.close,
            signal_reason,
            timestamp: bar.end_time,
        };

        let fill_result = match side {
            PositionSide::Long => self.executor.enter_long(order).await,
            PositionSide::Short => self.executor.enter_short(order).await,
            PositionSide::Flat => return,
        };

        let order_id = match fill_result {
            Ok(id) => id,
            Err(e) => {
                if is_insufficient_balance_error(&e) {
                    warn!(error = %e, "insufficient balance reported by executor — skipping signal");
                } else {
                    warn!(error = %e, "executor entry failed — will retry on next signal");
                }
                return;
            }
        };

        let tracker_id = format!("order-{}", bar.end_time);
        self.order_tracker.track_order(tracker_id, side, size, bar.close, bar.end_time);
        self.position_state.mark_pending_order(true);

        self.position = Position {
            side,
            size,
            entry_price: Some(bar.close),
            opened_at: Some(bar.end_time),
        };
        self.position_opened_at = self.bar_count;
        self.trailing_highest = None;
        self.trailing_lowest = None;

        self.engine.set_position_side(side);

        self.trade_seq += 1;
        self.trade_stats.start_trade(side, bar.close, size, leverage, bar.end_time);
        self.flip_timestamps.push_back(bar.end_time);

        info!(order_id = %order_id, ?side, size, price = bar.close, "position entered");
        let _ = self.event_tx.send(OrchestratorEvent::Position(self.position));
        self.persist_warm_state(bar.end_time);
    }

    async fn close_position(&mut self, reason: CloseReason, price_meta: Option<f64>) {
        if self.position.is_flat() {
            return;
        }
        let exit_price = price_meta.or(self.position.entry_price).unwrap_or(0.0);
        let now = now_ms();

        if let Err(e) = self.executor.close_position(reason, exit_price).await {
            warn!(error = %e, %reason, "executor close_position call failed");
        }

        if let Some(record) = self.trade_stats.close_trade(exit_price, reason, now) {
            let id = format!("trade-{}", self.trade_seq);
            info!(id = %id, side = ?record.side, pnl = record.pnl, pnl_pct = record.pnl_pct, %reason, "trade closed");
            if let Err(e) = self.csv_logger.append(&id, &record) {
                warn!(error = %e, "failed to append trade to CSV log");
            }
        }

        self.engine.set_position_side(PositionSide::Flat);
        self.position_state.set_flat(now);
        self.order_tracker.clear_unconfirmed();
        self.trailing_highest = None;
        self.trailing_lowest = None;
        self.position = Position::flat();

        let _ = self.event_tx.send(OrchestratorEvent::Position(self.position));
        self.persist_warm_state(now);
    }

    /// Protective exits run on every closed bar, before signal evaluation,
    /// in the fixed order trailing -> emergency -> regular stop -> take-profit.
    async fn run_protective_exits(&mut self, bar: &SyntheticBar) {
        if self.position.is_flat() {
            return;
        }
        let Some(entry) = self.position.entry_price else {
            return;
        };

        match self.position.side {
            PositionSide::Long => {
                self.trailing_highest = Some(self.trailing_highest.map_or(bar.high, |h| h.max(bar.high)));
            }
            PositionSide::Short => {
                self.trailing_lowest = Some(self.trailing_lowest.map_or(bar.low, |l| l.min(bar.low)));
            }
            PositionSide::Flat => {}
        }

        let is_hybrid = matches!(self.engine, StrategyEngineKind::Hybrid(_));

        if is_hybrid {
            let unrealized_pct = match self.position.side {
                PositionSide::Long => (bar.close - entry) / entry * 100.0,
                PositionSide::Short => (entry - bar.close) / entry * 100.0,
                PositionSide::Flat => 0.0,
            };
            if unrealized_pct > TRAILING_ACTIVATION_PCT {
                let triggered = match self.position.side {
                    PositionSide::Long => {
                        let highest = self.trailing_highest.unwrap_or(bar.close);
                        bar.close <= highest * (1.0 - TRAILING_STOP_PCT / 100.0)
                    }
                    PositionSide::Short => {
                        let lowest = self.trailing_lowest.unwrap_or(bar.close);
                        bar.close >= lowest * (1.0 + TRAILING_STOP_PCT / 100.0)
                    }
                    PositionSide::Flat => false,
                };
                if triggered {
                    self.close_position(CloseReason::TrailingStop, Some(bar.close)).await;
                    return;
                }
            }
        }

        if is_hybrid || self.risk.use_stop_loss {
            let triggered = match self.position.side {
                PositionSide::Long => bar.close <= entry * (1.0 - self.risk.emergency_stop_loss_pct / 100.0),
                PositionSide::Short => bar.close >= entry * (1.0 + self.risk.emergency_stop_loss_pct / 100.0),
                PositionSide::Flat => false,
            };
            if triggered {
                self.close_position(CloseReason::EmergencyStop, Some(bar.close)).await;
                return;
            }
        }

        if self.risk.use_stop_loss && self.risk.stop_loss_pct > 0.0 {
            let triggered = match self.position.side {
                PositionSide::Long => bar.close <= entry * (1.0 - self.risk.stop_loss_pct / 100.0),
                PositionSide::Short => bar.close >= entry * (1.0 + self.risk.stop_loss_pct / 100.0),
                PositionSide::Flat => false,
            };
            if triggered {
                self.close_position(CloseReason::StopLoss, Some(bar.close)).await;
                return;
            }
        }

        if self.risk.take_profit_pct > 0.0 {
            let triggered = match self.position.side {
                PositionSide::Long => bar.close >= entry * (1.0 + self.risk.take_profit_pct / 100.0),
                PositionSide::Short => bar.close <= entry * (1.0 - self.risk.take_profit_pct / 100.0),
                PositionSide::Flat => false,
            };
            if triggered {
                self.close_position(CloseReason::TakeProfit, Some(bar.close)).await;
            }
        }
    }

    async fn handle_position_snapshot(&mut self, snap: PositionSnapshot) {
        let now = now_ms();
        let outcome = self.position_state.update_from_rest(&snap, now);

        match outcome {
            ReconcileOutcome::Reconciled => {
                let local = self.position_state.local();
                if local.side.is_flat() {
                    self.order_tracker.clear_unconfirmed();
                } else {
                    self.order_tracker.confirm_by_position_change(local.side, local.size, now);
                }
            }
            ReconcileOutcome::OverrideFlat => {
                self.position = Position::flat();
                self.order_tracker.clear_unconfirmed();
                self.engine.set_position_side(PositionSide::Flat);
                let _ = self.event_tx.send(OrchestratorEvent::Position(self.position));
            }
            ReconcileOutcome::OverrideOpened => {
                let local = self.position_state.local();
                self.position = Position {
                    side: local.side,
                    size: local.size,
                    entry_price: Some(local.avg_entry),
                    opened_at: Some(now),
                };
                self.position_opened_at = self.bar_count;
                self.engine.set_position_side(local.side);
                let _ = self.event_tx.send(OrchestratorEvent::Position(self.position));
            }
            ReconcileOutcome::Failed => {
                if self.position_state.freeze_eligible() {
                    self.frozen = true;
                    self.freeze_until = now + FREEZE_DURATION_MS;
                    self.position_state.reset_failures();
                    warn!("reconciliation failed twice in a row — freezing trading for 60s");
                }
            }
        }

        self.persist_warm_state(now);
    }

    /// Written only here, read only from the entry path — matches spec.md
    /// §5's "shared resources" note on `usdtBalance`.
    fn handle_balance_snapshot(&mut self, balances: Vec<BalanceInfo>) {
        self.usdt_balance = usdt_balance(&balances);
    }

    fn prune_flip_window(&mut self, now: i64) {
        while let Some(&ts) = self.flip_timestamps.front() {
            if now - ts > FLIP_WINDOW_MS {
                self.flip_timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn persist_warm_state(&self, now: i64) {
        if let Err(e) = warm_state::save(&self.warm_state_path, self.position, self.last_bar_close_time, now) {
            warn!(error = %e, "failed to persist warm state");
        }
    }
}
