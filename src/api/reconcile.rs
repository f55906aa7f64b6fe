use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use super::AppState;
use crate::error::AppError;
use crate::orchestration::{PassMode, PassSummary};

#[derive(Debug, Deserialize)]
pub struct ReconcileQuery {
    /// "full" forces a pass over the entire ledger instead of the
    /// configured lookback window.
    pub mode: Option<String>,
}

pub async fn run_reconcile(
    Query(params): Query<ReconcileQuery>,
    State(state): State<AppState>,
) -> Result<Json<PassSummary>, AppError> {
    let mode = match params.mode.as_deref() {
        Some("full") => PassMode::FullCatchup,
        Some("") | None => PassMode::Scheduled,
        Some(other) => {
            return Err(AppError::BadRequest(format!(
                "Unknown reconcile mode: {}",
                other
            )))
        }
    };

    let summary = state.reconciler.run_pass(mode).await?;
    Ok(Json(summary))
}
