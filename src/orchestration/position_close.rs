//! Position-close detection.
//!
//! Two signals close a filled buy position: a matching sell execution on the
//! exchange (close with realized P&L) and a zero wallet balance for the base
//! asset (close with zero P&L; the proceeds left no trace we can price).
//! Both paths go through the conditional-write primitive, so a position that
//! already transitioned is left alone and the lost write is only logged.

use crate::db::{Repository, TradeFilter, TradePatch};
use crate::domain::{
    ExchangeExecution, ExchangeOrderStatus, Side, TradeRecord, TradeStatus, UserId,
};
use crate::engine::{qty_within_tolerance, MatchTolerances};
use crate::gateway::ExchangeGateway;
use crate::orchestration::ReconcileError;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct PositionCloseDetector {
    gateway: Arc<dyn ExchangeGateway>,
    repo: Arc<Repository>,
    tolerances: MatchTolerances,
    balance_epsilon: Decimal,
    quote_assets: Vec<String>,
}

impl PositionCloseDetector {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        repo: Arc<Repository>,
        tolerances: MatchTolerances,
        balance_epsilon: Decimal,
        quote_assets: Vec<String>,
    ) -> Self {
        PositionCloseDetector {
            gateway,
            repo,
            tolerances,
            balance_epsilon,
            quote_assets,
        }
    }

    /// Close filled buys that have a matching sell execution.
    ///
    /// A sell matches a buy when the symbol is identical, the quantity is
    /// within tolerance of the buy quantity, and the sell executed strictly
    /// after the buy was created. Each sell closes at most one buy: the one
    /// with the closest quantity, ties going to the most recently created.
    ///
    /// Returns the number of positions closed.
    pub async fn detect_sell_closes(
        &self,
        user: &UserId,
        executions: &[ExchangeExecution],
    ) -> Result<u64, ReconcileError> {
        let mut buys = self
            .repo
            .query_trades(
                user,
                &TradeFilter {
                    side: Some(Side::Buy),
                    statuses: Some(vec![TradeStatus::Filled]),
                    ..TradeFilter::default()
                },
            )
            .await?;

        let sells = executions.iter().filter(|e| {
            e.side == Side::Sell
                && e.status == ExchangeOrderStatus::Filled
                && e.quantity > Decimal::ZERO
        });

        let mut closed = 0u64;

        for sell in sells {
            let Some(idx) = best_buy_for(sell, &buys, &self.tolerances) else {
                continue;
            };
            let buy = buys.remove(idx);

            let pnl = (sell.price - buy.effective_price()) * buy.quantity;
            let patch = TradePatch {
                status: Some(TradeStatus::Closed),
                realized_pnl: Some(pnl),
                ..TradePatch::default()
            };

            let applied = self
                .repo
                .update_trade_if_status(&buy.id, &[TradeStatus::Filled], &patch)
                .await?;

            if applied {
                closed += 1;
                info!(
                    trade_id = %buy.id,
                    symbol = %buy.symbol,
                    sell_order_id = %sell.external_order_id,
                    realized_pnl = %pnl,
                    "closed position against sell execution"
                );
            } else {
                warn!(
                    trade_id = %buy.id,
                    symbol = %buy.symbol,
                    "reconciliation conflict: position transitioned before sell close landed"
                );
            }
        }

        Ok(closed)
    }

    /// Close buy positions whose base asset balance has dropped to zero.
    ///
    /// The asset evidently left the account through a path the ledger never
    /// saw, so the position is closed with a realized P&L of zero rather
    /// than left open forever. An absent balance entry counts as zero.
    ///
    /// Returns the number of positions closed.
    pub async fn detect_zero_balance_closes(&self, user: &UserId) -> Result<u64, ReconcileError> {
        let balances = self.gateway.get_account_balance().await?;
        let by_asset: HashMap<&str, Decimal> = balances
            .iter()
            .map(|b| (b.asset.as_str(), b.wallet_balance))
            .collect();

        let open_buys = self
            .repo
            .query_trades(
                user,
                &TradeFilter {
                    side: Some(Side::Buy),
                    statuses: Some(vec![TradeStatus::Filled, TradeStatus::PartialFilled]),
                    ..TradeFilter::default()
                },
            )
            .await?;

        let mut closed = 0u64;

        for buy in &open_buys {
            let Some(base) = buy.symbol.base_asset(&self.quote_assets) else {
                debug!(
                    trade_id = %buy.id,
                    symbol = %buy.symbol,
                    "no recognizable quote suffix; skipping balance check"
                );
                continue;
            };

            let balance = by_asset.get(base).copied().unwrap_or(Decimal::ZERO);
            if balance > self.balance_epsilon {
                continue;
            }

            let patch = TradePatch {
                status: Some(TradeStatus::Closed),
                realized_pnl: Some(Decimal::ZERO),
                ..TradePatch::default()
            };
            let applied = self
                .repo
                .update_trade_if_status(
                    &buy.id,
                    &[TradeStatus::Filled, TradeStatus::PartialFilled],
                    &patch,
                )
                .await?;

            if applied {
                closed += 1;
                info!(
                    trade_id = %buy.id,
                    symbol = %buy.symbol,
                    asset = base,
                    balance = %balance,
                    "closed position on zero base-asset balance"
                );
            } else {
                warn!(
                    trade_id = %buy.id,
                    symbol = %buy.symbol,
                    "reconciliation conflict: position transitioned before balance close landed"
                );
            }
        }

        Ok(closed)
    }
}

fn best_buy_for(
    sell: &ExchangeExecution,
    buys: &[TradeRecord],
    tol: &MatchTolerances,
) -> Option<usize> {
    let mut best: Option<(usize, Decimal)> = None;

    for (idx, buy) in buys.iter().enumerate() {
        if buy.symbol != sell.symbol {
            continue;
        }
        if sell.time.as_ms() <= buy.created_at.as_ms() {
            continue;
        }
        if !qty_within_tolerance(buy.quantity, sell.quantity, tol) {
            continue;
        }

        let diff = (buy.quantity - sell.quantity).abs();
        let better = match &best {
            None => true,
            Some((best_idx, best_diff)) => {
                diff < *best_diff
                    || (diff == *best_diff
                        && buy.created_at.as_ms() > buys[*best_idx].created_at.as_ms())
            }
        };
        if better {
            best = Some((idx, diff));
        }
    }

    best.map(|(idx, _)| idx)
}
