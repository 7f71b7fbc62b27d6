use super::AppState;
use crate::{
    core::{
        access::Principal,
        collection::{self, CollectionFilter, CollectionView, NewCollection},
        paging::Page,
    },
    entities::CollectionModel,
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

pub async fn create(
    State(state): State<Arc<AppState>>,
    actor: Principal,
    payload: std::result::Result<Json<NewCollection>, JsonRejection>,
) -> Result<(StatusCode, Json<CollectionModel>)> {
    let Json(new) = payload?;
    let created = collection::create_collection(&state.db, &actor, new).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    actor: Principal,
    query: std::result::Result<Query<CollectionFilter>, QueryRejection>,
) -> Result<Json<Page<CollectionView>>> {
    let Query(filter) = query?;
    Ok(Json(
        collection::list_collections(&state.db, &actor, filter, state.settings.listing).await?,
    ))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    actor: Principal,
    path: std::result::Result<Path<i64>, PathRejection>,
) -> Result<Json<CollectionView>> {
    let Path(id) = path?;
    Ok(Json(collection::get_collection(&state.db, &actor, id).await?))
}
