//! Order Matcher: maps one exchange execution to at most one local record.

use crate::domain::{ExchangeExecution, TradeRecord};
use rust_decimal::Decimal;

/// Quantity tolerances used by fuzzy matching.
///
/// A candidate qualifies if the quantity difference is within the relative
/// tolerance of the candidate's recorded quantity, or within the absolute
/// tolerance for the precise-quantity case. Both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchTolerances {
    /// Relative quantity tolerance (fraction, e.g. 0.05 for 5%).
    pub qty_relative: Decimal,
    /// Absolute quantity tolerance in units.
    pub qty_absolute: Decimal,
}

impl MatchTolerances {
    pub fn new(qty_relative: Decimal, qty_absolute: Decimal) -> Self {
        MatchTolerances {
            qty_relative,
            qty_absolute,
        }
    }
}

/// Whether `actual` is within tolerance of `reference`.
pub fn qty_within_tolerance(reference: Decimal, actual: Decimal, tol: &MatchTolerances) -> bool {
    let diff = (reference - actual).abs();
    diff <= reference * tol.qty_relative || diff <= tol.qty_absolute
}

/// Find the best local candidate for an exchange execution.
///
/// An exact external-order-id match is authoritative and skips all fuzzy
/// heuristics. Fuzzy matching considers only candidates with no stored
/// external id: same symbol (case-sensitive), same side, execution strictly
/// after the candidate's creation, and quantity within tolerance. Among
/// qualifiers the smallest absolute quantity difference wins; ties break to
/// the most recently created candidate.
///
/// Returns the index into `candidates`, or `None`. Executions with a
/// non-positive quantity never match; the exchange never reports a real fill
/// of zero units.
pub fn find_match(
    execution: &ExchangeExecution,
    candidates: &[TradeRecord],
    tol: &MatchTolerances,
) -> Option<usize> {
    if execution.quantity <= Decimal::ZERO {
        return None;
    }

    for (idx, candidate) in candidates.iter().enumerate() {
        if candidate.external_order_id.as_deref() == Some(execution.external_order_id.as_str()) {
            return Some(idx);
        }
    }

    let mut best: Option<(usize, Decimal)> = None;
    for (idx, candidate) in candidates.iter().enumerate() {
        if candidate.external_order_id.is_some() {
            continue;
        }
        if candidate.symbol != execution.symbol || candidate.side != execution.side {
            continue;
        }
        // Exchange fills never precede the local order they fulfil.
        if execution.time <= candidate.created_at {
            continue;
        }
        if !qty_within_tolerance(candidate.quantity, execution.quantity, tol) {
            continue;
        }

        let diff = (candidate.quantity - execution.quantity).abs();
        let better = match best {
            None => true,
            Some((best_idx, best_diff)) => {
                diff < best_diff
                    || (diff == best_diff
                        && candidate.created_at > candidates[best_idx].created_at)
            }
        };
        if better {
            best = Some((idx, diff));
        }
    }

    best.map(|(idx, _)| idx)
}
