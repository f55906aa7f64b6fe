//! Pure reconciliation logic: order matching and discrepancy classification.

pub mod classifier;
pub mod matcher;

pub use classifier::{
    classify, PriceMismatch, Recommendation, ReconciliationReport, Severity, StatusMismatch,
};
pub use matcher::{find_match, qty_within_tolerance, MatchTolerances};
