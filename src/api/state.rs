//! Shared state passed to the API handlers

use std::sync::Arc;

use axum::extract::FromRef;
use prometheus::Registry;

use crate::rules::{Manager, ReloadHandle};
use crate::store::StoreSet;

/// State of the query node API
#[derive(Clone)]
pub struct QueryApiState {
    pub registry: Registry,
    pub stores: Arc<StoreSet>,
}

/// State of the rule node API
#[derive(Clone)]
pub struct RuleApiState {
    pub registry: Registry,
    pub manager: Arc<Manager>,
    pub reload: ReloadHandle,
}

impl FromRef<QueryApiState> for Registry {
    fn from_ref(state: &QueryApiState) -> Self {
        state.registry.clone()
    }
}

impl FromRef<RuleApiState> for Registry {
    fn from_ref(state: &RuleApiState) -> Self {
        state.registry.clone()
    }
}
