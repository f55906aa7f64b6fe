//! Discrepancy Classifier: partitions exchange state against the local ledger.

use crate::domain::{
    ExchangeExecution, ExchangeOrderStatus, Side, Symbol, TradeRecord, TradeStatus,
};
use crate::engine::matcher::{find_match, MatchTolerances};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;

/// Severity of a reconciliation recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// An operator-facing recommendation derived from the report counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    pub severity: Severity,
    pub message: String,
}

/// A matched record whose local status disagrees with the exchange view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusMismatch {
    pub trade_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub local_status: TradeStatus,
    pub expected_status: TradeStatus,
    pub external_order_id: String,
}

impl StatusMismatch {
    /// Buy records are never supposed to reach `closed` through ordinary
    /// status syncing; that path belongs to position-close detection. Seeing
    /// one here means an open position may have been treated as resolved.
    pub fn is_critical(&self) -> bool {
        self.side == Side::Buy && self.local_status == TradeStatus::Closed
    }
}

/// A matched record whose price disagrees with the exchange beyond epsilon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceMismatch {
    pub trade_id: String,
    pub symbol: Symbol,
    pub local_price: Decimal,
    pub exchange_price: Decimal,
}

/// Per-pass reconciliation report. Produced, consumed for logging and
/// auto-heal, then discarded; never persisted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationReport {
    pub matched: usize,
    pub missing_from_local: Vec<ExchangeExecution>,
    pub extra_in_local: Vec<TradeRecord>,
    pub status_mismatches: Vec<StatusMismatch>,
    pub price_mismatches: Vec<PriceMismatch>,
    pub skipped_malformed: usize,
    pub recommendations: Vec<Recommendation>,
}

impl ReconciliationReport {
    pub fn has_discrepancies(&self) -> bool {
        !self.missing_from_local.is_empty()
            || !self.extra_in_local.is_empty()
            || !self.status_mismatches.is_empty()
            || !self.price_mismatches.is_empty()
    }
}

/// Local status the exchange view implies for a matched record: executed
/// orders should be `filled`, anything else `pending`.
fn expected_local_status(status: ExchangeOrderStatus) -> TradeStatus {
    if status == ExchangeOrderStatus::Filled {
        TradeStatus::Filled
    } else {
        TradeStatus::Pending
    }
}

/// Classify the full exchange window against the full local window.
///
/// Executions claim local records greedily in execution order; once claimed,
/// a record leaves the candidate pool so one local row cannot absorb two
/// different fills. Unclaimed locals end up in `extra_in_local`.
pub fn classify(
    executions: &[ExchangeExecution],
    locals: &[TradeRecord],
    tol: &MatchTolerances,
    price_epsilon: Decimal,
) -> ReconciliationReport {
    let mut report = ReconciliationReport::default();
    let mut pool: Vec<TradeRecord> = locals.to_vec();

    for execution in executions {
        if execution.quantity <= Decimal::ZERO {
            warn!(
                symbol = %execution.symbol,
                external_order_id = %execution.external_order_id,
                "skipping malformed execution with non-positive quantity"
            );
            report.skipped_malformed += 1;
            continue;
        }

        let Some(idx) = find_match(execution, &pool, tol) else {
            report.missing_from_local.push(execution.clone());
            continue;
        };
        let local = pool.remove(idx);
        report.matched += 1;

        let expected = expected_local_status(execution.status);
        if local.status != expected {
            report.status_mismatches.push(StatusMismatch {
                trade_id: local.id.clone(),
                symbol: local.symbol.clone(),
                side: local.side,
                local_status: local.status,
                expected_status: expected,
                external_order_id: execution.external_order_id.clone(),
            });
        }

        let price_diff = (execution.price - local.effective_price()).abs();
        if price_diff > price_epsilon {
            report.price_mismatches.push(PriceMismatch {
                trade_id: local.id.clone(),
                symbol: local.symbol.clone(),
                local_price: local.effective_price(),
                exchange_price: execution.price,
            });
        }
    }

    report.extra_in_local = pool;
    report.recommendations = build_recommendations(&report);
    report
}

fn build_recommendations(report: &ReconciliationReport) -> Vec<Recommendation> {
    let mut out = Vec::new();

    if !report.missing_from_local.is_empty() {
        out.push(Recommendation {
            severity: Severity::Info,
            message: format!(
                "import {} exchange trades missing from the local ledger",
                report.missing_from_local.len()
            ),
        });
    }
    if !report.extra_in_local.is_empty() {
        out.push(Recommendation {
            severity: Severity::Warning,
            message: format!(
                "review {} orphaned local trades with no exchange counterpart",
                report.extra_in_local.len()
            ),
        });
    }

    let critical = report
        .status_mismatches
        .iter()
        .filter(|m| m.is_critical())
        .count();
    if critical > 0 {
        out.push(Recommendation {
            severity: Severity::Critical,
            message: format!(
                "{} closed buy records disagree with exchange state; \
                 open positions may have been incorrectly resolved",
                critical
            ),
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TimeMs, UserId};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn tolerances() -> MatchTolerances {
        MatchTolerances::new(dec("0.05"), dec("0.001"))
    }

    fn epsilon() -> Decimal {
        dec("0.01")
    }

    fn execution(order_id: &str, symbol: &str, qty: &str, price: &str) -> ExchangeExecution {
        ExchangeExecution {
            symbol: Symbol::new(symbol),
            side: Side::Buy,
            external_order_id: order_id.to_string(),
            external_exec_id: None,
            quantity: dec(qty),
            price: dec(price),
            time: TimeMs::new(2000),
            status: ExchangeOrderStatus::Filled,
        }
    }

    fn local(
        external_id: Option<&str>,
        symbol: &str,
        qty: &str,
        status: TradeStatus,
    ) -> TradeRecord {
        TradeRecord::new(
            UserId::new("acct-1"),
            Symbol::new(symbol),
            Side::Buy,
            dec(qty),
            dec("50000"),
            external_id.map(str::to_string),
            status,
            TimeMs::new(1000),
        )
    }

    #[test]
    fn test_zero_overlap_completeness() {
        let executions = vec![
            execution("X1", "BTCUSDT", "1", "50000"),
            execution("X2", "BTCUSDT", "2", "50000"),
            execution("X3", "BTCUSDT", "3", "50000"),
        ];
        let locals = vec![
            local(Some("L1"), "ETHUSDT", "10", TradeStatus::Filled),
            local(Some("L2"), "ETHUSDT", "20", TradeStatus::Filled),
        ];

        let report = classify(&executions, &locals, &tolerances(), epsilon());
        assert_eq!(report.matched, 0);
        assert_eq!(report.missing_from_local.len(), 3);
        assert_eq!(report.extra_in_local.len(), 2);
    }

    #[test]
    fn test_local_record_claimed_once() {
        // Two executions both fuzzily fit the single local record; only the
        // first (in execution order) may claim it.
        let executions = vec![
            execution("X1", "BTCUSDT", "1.0", "50000"),
            execution("X2", "BTCUSDT", "1.0", "50000"),
        ];
        let locals = vec![local(None, "BTCUSDT", "1.0", TradeStatus::Filled)];

        let report = classify(&executions, &locals, &tolerances(), epsilon());
        assert_eq!(report.matched, 1);
        assert_eq!(report.missing_from_local.len(), 1);
        assert_eq!(report.missing_from_local[0].external_order_id, "X2");
        assert!(report.extra_in_local.is_empty());
    }

    #[test]
    fn test_status_mismatch_detected() {
        let executions = vec![execution("X1", "BTCUSDT", "1.0", "50000")];
        let locals = vec![local(Some("X1"), "BTCUSDT", "1.0", TradeStatus::Pending)];

        let report = classify(&executions, &locals, &tolerances(), epsilon());
        assert_eq!(report.matched, 1);
        assert_eq!(report.status_mismatches.len(), 1);
        let mismatch = &report.status_mismatches[0];
        assert_eq!(mismatch.local_status, TradeStatus::Pending);
        assert_eq!(mismatch.expected_status, TradeStatus::Filled);
        assert!(!mismatch.is_critical());
    }

    #[test]
    fn test_closed_buy_mismatch_is_critical() {
        let executions = vec![execution("X1", "BTCUSDT", "1.0", "50000")];
        let locals = vec![local(Some("X1"), "BTCUSDT", "1.0", TradeStatus::Closed)];

        let report = classify(&executions, &locals, &tolerances(), epsilon());
        assert_eq!(report.status_mismatches.len(), 1);
        assert!(report.status_mismatches[0].is_critical());
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.severity == Severity::Critical));
    }

    #[test]
    fn test_price_mismatch_beyond_epsilon() {
        let executions = vec![execution("X1", "BTCUSDT", "1.0", "50000.02")];
        let mut trade = local(Some("X1"), "BTCUSDT", "1.0", TradeStatus::Filled);
        trade.fill_price = Some(dec("50000"));

        let report = classify(&executions, &[trade], &tolerances(), epsilon());
        assert_eq!(report.price_mismatches.len(), 1);
        assert_eq!(report.price_mismatches[0].exchange_price, dec("50000.02"));
    }

    #[test]
    fn test_price_within_epsilon_is_not_a_mismatch() {
        let executions = vec![execution("X1", "BTCUSDT", "1.0", "50000.01")];
        let mut trade = local(Some("X1"), "BTCUSDT", "1.0", TradeStatus::Filled);
        trade.fill_price = Some(dec("50000"));

        let report = classify(&executions, &[trade], &tolerances(), epsilon());
        assert!(report.price_mismatches.is_empty());
    }

    #[test]
    fn test_malformed_execution_skipped_not_missing() {
        let executions = vec![execution("X1", "BTCUSDT", "0", "50000")];
        let report = classify(&executions, &[], &tolerances(), epsilon());
        assert_eq!(report.skipped_malformed, 1);
        assert!(report.missing_from_local.is_empty());
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn test_recommendations_from_counts() {
        let executions = vec![execution("X1", "BTCUSDT", "1", "50000")];
        let locals = vec![local(Some("L1"), "ETHUSDT", "5", TradeStatus::Filled)];

        let report = classify(&executions, &locals, &tolerances(), epsilon());
        assert_eq!(report.recommendations.len(), 2);
        assert_eq!(report.recommendations[0].severity, Severity::Info);
        assert!(report.recommendations[0].message.contains("import 1"));
        assert_eq!(report.recommendations[1].severity, Severity::Warning);
        assert!(report.recommendations[1].message.contains("review 1"));
    }
}
