//! Reconciliation passes and position-close detection.

use crate::gateway::GatewayError;
use thiserror::Error;

pub mod position_close;
pub mod reconciler;

pub use position_close::PositionCloseDetector;
pub use reconciler::{PassMode, PassSummary, Reconciler};

/// Failures that abort a reconciliation pass.
///
/// Per-record write failures are logged and skipped inside the pass; only a
/// failed exchange fetch or a ledger read failure surfaces here.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("exchange fetch failed: {0}")]
    Gateway(#[from] GatewayError),
    #[error("ledger access failed: {0}")]
    Db(#[from] sqlx::Error),
}
