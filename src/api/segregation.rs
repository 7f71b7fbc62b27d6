use super::AppState;
use crate::{
    core::{
        access::Principal,
        paging::Page,
        segregation::{
            self, SegregatedComponent, SegregationFilter, SegregationRequest, SegregationView,
        },
    },
    errors::Result,
};
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
};
use std::sync::Arc;

/// `POST /segregation/:collection_id`
pub async fn segregate(
    State(state): State<Arc<AppState>>,
    actor: Principal,
    path: std::result::Result<Path<i64>, PathRejection>,
    payload: std::result::Result<Json<SegregationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Vec<SegregatedComponent>>)> {
    let Path(collection_id) = path?;
    let Json(request) = payload?;
    let created =
        segregation::segregate_collection(&state.db, &actor, collection_id, request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    actor: Principal,
    query: std::result::Result<Query<SegregationFilter>, QueryRejection>,
) -> Result<Json<Page<SegregationView>>> {
    let Query(filter) = query?;
    Ok(Json(
        segregation::list_segregations(&state.db, &actor, filter, state.settings.listing).await?,
    ))
}

/// `GET /segregation/:segregation_id`
pub async fn get_one(
    State(state): State<Arc<AppState>>,
    actor: Principal,
    path: std::result::Result<Path<i64>, PathRejection>,
) -> Result<Json<SegregationView>> {
    let Path(segregation_id) = path?;
    Ok(Json(
        segregation::get_segregation(&state.db, &actor, segregation_id).await?,
    ))
}
