//! API response types

use serde::{Deserialize, Serialize};

use crate::rules::GroupStatus;
use crate::store::StoreStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

/// Response of `GET /api/v1/stores`
#[derive(Debug, Clone, Serialize)]
pub struct StoresResponse {
    pub status: &'static str,
    pub stores: Vec<StoreStatus>,
}

/// Response of `GET /api/v1/rules`
#[derive(Debug, Clone, Serialize)]
pub struct RulesResponse {
    pub status: &'static str,
    pub groups: Vec<GroupStatus>,
}

/// Response of `POST /-/reload`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadResponse {
    /// `false` if a reload was already pending and absorbed this request
    pub queued: bool,
}
