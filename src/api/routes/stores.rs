//! Store listing of the query node

use axum::Json;
use axum::extract::State;

use crate::api::state::QueryApiState;
use crate::api::types::StoresResponse;

/// GET /api/v1/stores
pub async fn list_stores(State(state): State<QueryApiState>) -> Json<StoresResponse> {
    let stores = state
        .stores
        .current()
        .iter()
        .map(|store| store.status())
        .collect();

    Json(StoresResponse {
        status: "success",
        stores,
    })
}
