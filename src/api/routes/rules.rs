//! Rule endpoints of the rule node

use axum::Json;
use axum::extract::State;
use tracing::info;

use crate::api::state::RuleApiState;
use crate::api::types::{ReloadResponse, RulesResponse};

/// GET /api/v1/rules
pub async fn list_groups(State(state): State<RuleApiState>) -> Json<RulesResponse> {
    let groups = state
        .manager
        .groups()
        .iter()
        .map(|group| group.status())
        .collect();

    Json(RulesResponse {
        status: "success",
        groups,
    })
}

/// POST /-/reload
///
/// Answers once the reload is queued, not when it finished.
pub async fn reload(State(state): State<RuleApiState>) -> Json<ReloadResponse> {
    let queued = state.reload.trigger();
    info!(queued, "reload requested over HTTP");
    Json(ReloadResponse { queued })
}
