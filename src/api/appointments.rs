use super::AppState;
use crate::{
    core::{
        access::Principal,
        appointment::{self, AppointmentRequest, Schedule},
    },
    entities::{AppointmentModel, AppointmentStatus},
    errors::{Error, Result},
};
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    /// `"approve"` or `"reject"`
    pub action: Option<String>,
    #[serde(flatten)]
    pub schedule: Schedule,
    #[serde(alias = "reason")]
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CentreQuery {
    pub status: Option<AppointmentStatus>,
}

pub async fn request(
    State(state): State<Arc<AppState>>,
    actor: Principal,
    payload: std::result::Result<Json<AppointmentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AppointmentModel>)> {
    let Json(request) = payload?;
    let created =
        appointment::request_appointment(&state.db, &state.dispatcher, &actor, request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    actor: Principal,
    path: std::result::Result<Path<i64>, PathRejection>,
    payload: std::result::Result<Json<StatusChange>, JsonRejection>,
) -> Result<Json<AppointmentModel>> {
    let Path(id) = path?;
    let Json(change) = payload?;
    let updated = match change.action.as_deref().map(str::trim) {
        Some("approve") => {
            appointment::approve_appointment(
                &state.db,
                &state.dispatcher,
                &actor,
                id,
                change.schedule,
            )
            .await?
        }
        Some("reject") => {
            appointment::reject_appointment(
                &state.db,
                &state.dispatcher,
                &actor,
                id,
                change.rejection_reason,
            )
            .await?
        }
        _ => return Err(Error::validation("action must be approve|reject")),
    };
    Ok(Json(updated))
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    actor: Principal,
    path: std::result::Result<Path<i64>, PathRejection>,
) -> Result<Json<AppointmentModel>> {
    let Path(id) = path?;
    let cancelled =
        appointment::cancel_appointment(&state.db, &state.dispatcher, &actor, id).await?;
    Ok(Json(cancelled))
}

pub async fn list_mine(
    State(state): State<Arc<AppState>>,
    actor: Principal,
) -> Result<Json<Vec<AppointmentModel>>> {
    Ok(Json(appointment::list_my_appointments(&state.db, &actor).await?))
}

pub async fn list_for_centre(
    State(state): State<Arc<AppState>>,
    actor: Principal,
    query: std::result::Result<Query<CentreQuery>, QueryRejection>,
) -> Result<Json<Vec<AppointmentModel>>> {
    let Query(query) = query?;
    Ok(Json(
        appointment::list_centre_appointments(&state.db, &actor, query.status).await?,
    ))
}
