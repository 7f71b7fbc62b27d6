use super::AppState;
use crate::{
    core::{
        access::{Principal, Role, require_role},
        inventory::{self, InventoryFilter},
        notification::{self, DispatchSummary},
    },
    entities::{InventoryModel, NotificationModel, NotificationStatus},
    errors::Result,
};
use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    pub status: Option<NotificationStatus>,
    pub limit: Option<u64>,
}

pub async fn list_inventory(
    State(state): State<Arc<AppState>>,
    actor: Principal,
    query: std::result::Result<Query<InventoryFilter>, QueryRejection>,
) -> Result<Json<Vec<InventoryModel>>> {
    let Query(filter) = query?;
    Ok(Json(inventory::list_inventory(&state.db, &actor, filter).await?))
}

pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    actor: Principal,
    query: std::result::Result<Query<NotificationQuery>, QueryRejection>,
) -> Result<Json<Vec<NotificationModel>>> {
    let Query(query) = query?;
    Ok(Json(
        notification::list_notifications(&state.db, &actor, query.status, query.limit).await?,
    ))
}

/// Runs one retry pass over pending notifications.
pub async fn dispatch_notifications(
    State(state): State<Arc<AppState>>,
    actor: Principal,
) -> Result<Json<DispatchSummary>> {
    require_role(&actor, &[Role::Admin, Role::SuperAdmin])?;
    Ok(Json(
        notification::dispatch_pending_notifications(&state.db, &state.dispatcher).await?,
    ))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    state.db.ping().await?;
    Ok(Json(json!({ "status": "ok" })))
}
