//! The reconciliation pass: fetch, diff, heal.
//!
//! A pass fetches the exchange view (active orders plus recent history),
//! diffs it against the local ledger, then heals: unknown exchange orders
//! become local records, drifted records are patched, and orders the
//! exchange killed close their locals. Every write is conditional on the
//! status observed at read time; a lost race is a logged no-op and the next
//! pass converges. A pass that changes nothing performs zero writes.

use crate::config::Config;
use crate::db::{Repository, TradeFilter, TradePatch};
use crate::domain::{
    ExchangeExecution, ExchangeOrderStatus, TimeMs, TradeRecord, TradeStatus,
};
use crate::engine::{classify, find_match, MatchTolerances, ReconciliationReport, Severity};
use crate::gateway::ExchangeGateway;
use crate::orchestration::{PositionCloseDetector, ReconcileError};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// How far back a pass looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassMode {
    /// Regular pass confined to the configured lookback window on both
    /// sides: exchange executions outside the window are ignored and the
    /// local read is time-filtered to match. Stale history entries are left
    /// to a full catch-up pass instead of being re-created every interval.
    Scheduled,
    /// Emergency pass over the entire ledger and the full fetched history,
    /// for recovery after downtime.
    FullCatchup,
}

/// Counters from a completed pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassSummary {
    pub matched: usize,
    pub missing_from_local: usize,
    pub extra_in_local: usize,
    pub status_mismatches: usize,
    pub price_mismatches: usize,
    pub skipped_malformed: usize,
    pub created: u64,
    pub updated: u64,
    pub closed: u64,
    pub sell_closes: u64,
    pub balance_closes: u64,
    pub write_failures: u64,
}

enum Applied {
    Created,
    Updated,
    Closed,
    Unchanged,
}

pub struct Reconciler {
    gateway: Arc<dyn ExchangeGateway>,
    repo: Arc<Repository>,
    config: Config,
    detector: PositionCloseDetector,
}

impl Reconciler {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, repo: Arc<Repository>, config: Config) -> Self {
        let detector = PositionCloseDetector::new(
            Arc::clone(&gateway),
            Arc::clone(&repo),
            config.match_tolerances(),
            config.balance_epsilon,
            config.quote_assets.clone(),
        );
        Reconciler {
            gateway,
            repo,
            config,
            detector,
        }
    }

    /// Run one reconciliation pass.
    ///
    /// Only a failed exchange fetch or ledger read aborts the pass;
    /// individual record writes that fail are logged and skipped so one bad
    /// row cannot stall the rest of the ledger.
    pub async fn run_pass(&self, mode: PassMode) -> Result<PassSummary, ReconcileError> {
        let user = self.config.user();
        let tol = self.config.match_tolerances();

        let window_start = match mode {
            PassMode::Scheduled => Some(TimeMs::now().saturating_sub_ms(self.config.lookback_ms)),
            PassMode::FullCatchup => None,
        };

        let (active, history) = futures::future::try_join(
            self.gateway.get_active_orders(),
            self.gateway.get_order_history(self.config.history_limit),
        )
        .await?;
        let mut executions = merge_exchange_views(active, history);

        // The exchange view and the local read must cover the same window;
        // an execution the local read cannot see would be re-created on
        // every pass.
        if let Some(start) = window_start {
            executions.retain(|e| e.time >= start);
        }

        let locals = self
            .repo
            .query_trades(&user, &TradeFilter::created_between(window_start, None))
            .await?;

        let report = classify(&executions, &locals, &tol, self.config.price_epsilon);
        log_report(&report, mode);

        match self.repo.find_duplicate_external_order_ids(&user).await {
            Ok(duplicates) => {
                for (order_id, count) in duplicates {
                    warn!(
                        external_order_id = %order_id,
                        count,
                        "duplicate external order id in ledger; manual review required"
                    );
                }
            }
            Err(err) => warn!(error = %err, "duplicate order id audit failed"),
        }

        let mut summary = PassSummary {
            matched: report.matched,
            missing_from_local: report.missing_from_local.len(),
            extra_in_local: report.extra_in_local.len(),
            status_mismatches: report.status_mismatches.len(),
            price_mismatches: report.price_mismatches.len(),
            skipped_malformed: report.skipped_malformed,
            ..PassSummary::default()
        };

        // Unmatched locals drop out of the pool as executions claim them, so
        // one execution can never heal two records.
        let mut pool = locals;
        for execution in &executions {
            match self.apply_execution(execution, &mut pool, &tol).await {
                Ok(Applied::Created) => summary.created += 1,
                Ok(Applied::Updated) => summary.updated += 1,
                Ok(Applied::Closed) => summary.closed += 1,
                Ok(Applied::Unchanged) => {}
                Err(err) => {
                    summary.write_failures += 1;
                    error!(
                        external_order_id = %execution.external_order_id,
                        symbol = %execution.symbol,
                        error = %err,
                        "failed to heal record; skipping"
                    );
                }
            }
        }

        match self.detector.detect_sell_closes(&user, &executions).await {
            Ok(n) => summary.sell_closes = n,
            Err(err) => {
                summary.write_failures += 1;
                error!(error = %err, "sell-close detection failed");
            }
        }
        match self.detector.detect_zero_balance_closes(&user).await {
            Ok(n) => summary.balance_closes = n,
            Err(err) => {
                summary.write_failures += 1;
                error!(error = %err, "zero-balance close detection failed");
            }
        }

        info!(
            mode = ?mode,
            created = summary.created,
            updated = summary.updated,
            closed = summary.closed,
            sell_closes = summary.sell_closes,
            balance_closes = summary.balance_closes,
            write_failures = summary.write_failures,
            "reconciliation pass complete"
        );

        Ok(summary)
    }

    async fn apply_execution(
        &self,
        execution: &ExchangeExecution,
        pool: &mut Vec<TradeRecord>,
        tol: &MatchTolerances,
    ) -> Result<Applied, ReconcileError> {
        // Malformed entries are counted by the classifier; never heal from them.
        if execution.quantity <= Decimal::ZERO {
            return Ok(Applied::Unchanged);
        }

        let Some(idx) = find_match(execution, pool, tol) else {
            if execution.status.is_dead() {
                // Nothing local to close; the order died without a footprint.
                return Ok(Applied::Unchanged);
            }
            return self.create_from_execution(execution).await;
        };
        let local = pool.remove(idx);

        if execution.status.is_dead() {
            return self.close_dead_order(&local, execution).await;
        }

        let patch = build_heal_patch(&local, execution, self.config.price_epsilon);
        if patch.is_empty() {
            return Ok(Applied::Unchanged);
        }

        let applied = self
            .repo
            .update_trade_if_status(&local.id, &[local.status], &patch)
            .await?;
        if applied {
            info!(
                trade_id = %local.id,
                symbol = %local.symbol,
                external_order_id = %execution.external_order_id,
                status = ?patch.status,
                "healed ledger record from exchange state"
            );
            Ok(Applied::Updated)
        } else {
            warn!(
                trade_id = %local.id,
                "reconciliation conflict: record changed under us; deferring to next pass"
            );
            Ok(Applied::Unchanged)
        }
    }

    async fn create_from_execution(
        &self,
        execution: &ExchangeExecution,
    ) -> Result<Applied, ReconcileError> {
        let Some(status) = execution.status.to_local() else {
            return Ok(Applied::Unchanged);
        };

        let mut trade = TradeRecord::new(
            self.config.user(),
            execution.symbol.clone(),
            execution.side,
            execution.quantity,
            execution.price,
            Some(execution.external_order_id.clone()),
            status,
            execution.time,
        );
        if execution.status == ExchangeOrderStatus::Filled {
            trade.fill_price = Some(execution.price);
            trade.external_exec_id = execution.external_exec_id.clone();
        }

        self.repo.insert_trade(&trade).await?;
        info!(
            trade_id = %trade.id,
            symbol = %trade.symbol,
            external_order_id = %execution.external_order_id,
            status = %status,
            "created ledger record for untracked exchange order"
        );
        Ok(Applied::Created)
    }

    /// The exchange killed the order (cancelled, rejected, or deactivated);
    /// close the local regardless of its prior non-closed status.
    async fn close_dead_order(
        &self,
        local: &TradeRecord,
        execution: &ExchangeExecution,
    ) -> Result<Applied, ReconcileError> {
        if local.status == TradeStatus::Closed {
            return Ok(Applied::Unchanged);
        }

        let expected = [
            TradeStatus::Pending,
            TradeStatus::PartialFilled,
            TradeStatus::Filled,
            TradeStatus::Cancelled,
        ];
        let patch = TradePatch {
            status: Some(TradeStatus::Closed),
            ..TradePatch::default()
        };
        let applied = self
            .repo
            .update_trade_if_status(&local.id, &expected, &patch)
            .await?;
        if applied {
            info!(
                trade_id = %local.id,
                symbol = %local.symbol,
                exchange_status = %execution.status,
                "closed local record for dead exchange order"
            );
            Ok(Applied::Closed)
        } else {
            Ok(Applied::Unchanged)
        }
    }
}

/// Merge active orders and order history into one view, deduplicated by
/// external order id. The active list is fresher and wins on conflict.
fn merge_exchange_views(
    active: Vec<ExchangeExecution>,
    history: Vec<ExchangeExecution>,
) -> Vec<ExchangeExecution> {
    let mut by_order_id: HashMap<String, ExchangeExecution> = HashMap::new();
    for execution in history.into_iter().chain(active.into_iter()) {
        by_order_id.insert(execution.external_order_id.clone(), execution);
    }

    let mut merged: Vec<ExchangeExecution> = by_order_id.into_values().collect();
    merged.sort_by(|a, b| {
        a.time
            .cmp(&b.time)
            .then_with(|| a.external_order_id.cmp(&b.external_order_id))
    });
    merged
}

fn log_report(report: &ReconciliationReport, mode: PassMode) {
    info!(
        mode = ?mode,
        matched = report.matched,
        missing_from_local = report.missing_from_local.len(),
        extra_in_local = report.extra_in_local.len(),
        status_mismatches = report.status_mismatches.len(),
        price_mismatches = report.price_mismatches.len(),
        skipped_malformed = report.skipped_malformed,
        "reconciliation diff computed"
    );

    for rec in &report.recommendations {
        match rec.severity {
            Severity::Critical => error!("{}", rec.message),
            Severity::Warning => warn!("{}", rec.message),
            Severity::Info => info!("{}", rec.message),
        }
    }
}

/// Compute the minimal patch that brings `local` in line with the exchange.
/// An empty patch means the record already agrees and no write happens.
fn build_heal_patch(
    local: &TradeRecord,
    execution: &ExchangeExecution,
    price_epsilon: Decimal,
) -> TradePatch {
    let mut patch = TradePatch::default();

    if let Some(target) = execution.status.to_local() {
        if local.status != target && local.status.can_transition_to(target) {
            patch.status = Some(target);
        }
    }

    if execution.status == ExchangeOrderStatus::Filled {
        let fill_differs = match local.fill_price {
            None => true,
            Some(price) => (price - execution.price).abs() > price_epsilon,
        };
        if fill_differs {
            patch.fill_price = Some(execution.price);
        }
        if local.external_exec_id.is_none() && execution.external_exec_id.is_some() {
            patch.external_exec_id = execution.external_exec_id.clone();
        }
    }

    if local.quantity != execution.quantity {
        patch.quantity = Some(execution.quantity);
    }

    // A fuzzy match adopts the exchange id so the next pass matches exactly.
    if local.external_order_id.is_none() {
        patch.external_order_id = Some(execution.external_order_id.clone());
    }

    patch
}
