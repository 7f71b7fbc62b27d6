use super::AppState;
use crate::{
    core::{
        access::Principal,
        paging::Page,
        testing::{self, TestingFilter, TestingOutcome, TestingUpdate, TestingView},
    },
    errors::Result,
};
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
};
use std::sync::Arc;

/// `PATCH /testing/:collection_id`
pub async fn update(
    State(state): State<Arc<AppState>>,
    actor: Principal,
    path: std::result::Result<Path<i64>, PathRejection>,
    payload: std::result::Result<Json<TestingUpdate>, JsonRejection>,
) -> Result<Json<TestingOutcome>> {
    let Path(collection_id) = path?;
    let Json(update) = payload?;
    let outcome = testing::update_testing(
        &state.db,
        &state.dispatcher,
        state.settings.testing.overall_status_policy,
        &actor,
        collection_id,
        update,
    )
    .await?;
    Ok(Json(outcome))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    actor: Principal,
    query: std::result::Result<Query<TestingFilter>, QueryRejection>,
) -> Result<Json<Page<TestingView>>> {
    let Query(filter) = query?;
    Ok(Json(
        testing::list_testing(&state.db, &actor, filter, state.settings.listing).await?,
    ))
}

/// `GET /testing/:test_id`
pub async fn get_one(
    State(state): State<Arc<AppState>>,
    actor: Principal,
    path: std::result::Result<Path<i64>, PathRejection>,
) -> Result<Json<TestingView>> {
    let Path(test_id) = path?;
    Ok(Json(testing::get_testing(&state.db, &actor, test_id).await?))
}
