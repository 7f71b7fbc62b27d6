//! Appointment admission - donor requests and staff decisions.
//!
//! Lifecycle: `Pending -> Approved | Rejected | Cancelled`, `Approved -> Cancelled | Completed`.
//! Completion is driven by [`crate::core::collection::create_collection`]. Every transition
//! writes its notification intent in the same transaction and delivers it after commit.

use crate::{
    core::{
        access::{Principal, Role, can_manage_appointments, require_role},
        eligibility::{ensure_eligible, parse_calendar_date},
        notification::{self, Dispatcher, Linkage},
        sequence::{self, APPOINTMENT_TOKEN},
    },
    entities::{
        Appointment, AppointmentModel, AppointmentStatus, Centre, Donor, DonorModel, User,
        UserModel, appointment, donor,
    },
    errors::{Error, Result},
};
use chrono::{NaiveDate, Utc};
use sea_orm::{
    ConnectionTrait, DatabaseTransaction, QueryOrder, QuerySelect, Set, SqlErr,
    TransactionTrait, prelude::*, sea_query::OnConflict,
};
use serde::Deserialize;
use tracing::{info, instrument, warn};

/// Donors weighing this much or less may not donate.
pub const MIN_DONOR_WEIGHT_KG: f64 = 45.0;

/// Upper bound on rows returned by [`list_my_appointments`].
pub const MAX_OWN_APPOINTMENTS: u64 = 500;

/// Upper bound on rows returned by [`list_centre_appointments`].
pub const MAX_CENTRE_APPOINTMENTS: u64 = 1000;

/// A donor's appointment request as submitted
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentRequest {
    /// District the centre must belong to
    pub district_id: Option<i64>,
    /// Requested centre
    pub centre_id: Option<i64>,
    /// Requested date; eligibility is judged against "now" when absent
    pub appointment_date: Option<String>,
    /// Free-form time slot, e.g. `"10:30"`
    pub appointment_time: Option<String>,
    /// Weight in kg
    pub weight: Option<f64>,
    /// Self-declared medication
    #[serde(default)]
    pub under_medication: bool,
    /// Calendar date of the previous donation
    pub last_donation_date: Option<String>,
}

/// Optional rescheduling applied when staff approve a request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Schedule {
    /// Replacement appointment date
    pub scheduled_date: Option<String>,
    /// Replacement time slot
    pub scheduled_time: Option<String>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Maps a unique violation on the active-slot index to [`Error::DuplicateAppointment`].
fn map_slot_conflict(err: DbErr, date: Option<NaiveDate>) -> Error {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => Error::DuplicateAppointment {
            date: date.map_or_else(String::new, |d| d.to_string()),
        },
        _ => Error::Database(err),
    }
}

async fn find_locked(txn: &DatabaseTransaction, appointment_id: i64) -> Result<AppointmentModel> {
    Appointment::find_by_id(appointment_id)
        .lock_exclusive()
        .one(txn)
        .await?
        .ok_or_else(|| Error::not_found("Appointment", appointment_id))
}

async fn find_user<C: ConnectionTrait>(conn: &C, user_id: i64) -> Result<Option<UserModel>> {
    Ok(User::find_by_id(user_id).one(conn).await?)
}

/// Validates and stores a donor's appointment request.
///
/// Checks run in order: required fields, weight, date parsing, the 90-day rule, the
/// centre/district pairing, and finally the one-active-appointment-per-date rule. The
/// last one is enforced by a unique index, so concurrent duplicates fail at insert.
/// The confirmation email is best-effort.
#[instrument(skip(db, dispatcher, request), fields(user_id = actor.subject_id))]
pub async fn request_appointment(
    db: &DatabaseConnection,
    dispatcher: &Dispatcher,
    actor: &Principal,
    request: AppointmentRequest,
) -> Result<AppointmentModel> {
    let (Some(district_id), Some(centre_id)) = (request.district_id, request.centre_id) else {
        return Err(Error::validation("district_id and centre_id are required"));
    };

    if let Some(weight) = request.weight {
        if !weight.is_finite() || weight <= MIN_DONOR_WEIGHT_KG {
            return Err(Error::validation(format!(
                "Weight must be greater than {MIN_DONOR_WEIGHT_KG} kg"
            )));
        }
    }

    let Some(last_donation_raw) = non_blank(request.last_donation_date.as_deref()) else {
        return Err(Error::validation("last_donation_date is required"));
    };
    let candidate_raw = non_blank(request.appointment_date.as_deref());

    let last_donation_date = parse_calendar_date("last_donation_date", last_donation_raw)?;
    let appointment_date = candidate_raw
        .map(|raw| parse_calendar_date("appointment_date", raw))
        .transpose()?;

    let now = Utc::now();
    ensure_eligible(candidate_raw, last_donation_raw, now)?;

    let centre = Centre::find_by_id(centre_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::UnknownCentre {
            centre_id,
            reason: "centre does not exist".to_string(),
        })?;
    if centre.district_id != district_id {
        return Err(Error::UnknownCentre {
            centre_id,
            reason: format!("centre is not in district {district_id}"),
        });
    }

    if let Some(date) = appointment_date {
        let existing = Appointment::find()
            .filter(appointment::Column::UserId.eq(actor.subject_id))
            .filter(appointment::Column::AppointmentDate.eq(date))
            .filter(appointment::Column::Status.is_in(AppointmentStatus::ACTIVE))
            .one(db)
            .await?;
        if existing.is_some() {
            return Err(Error::DuplicateAppointment {
                date: date.to_string(),
            });
        }
    }

    let created = appointment::ActiveModel {
        user_id: Set(actor.subject_id),
        district_id: Set(district_id),
        centre_id: Set(centre_id),
        appointment_date: Set(appointment_date),
        appointment_time: Set(non_blank(request.appointment_time.as_deref()).map(str::to_string)),
        weight: Set(request.weight),
        under_medication: Set(request.under_medication),
        last_donation_date: Set(last_donation_date),
        status: Set(AppointmentStatus::Pending),
        active_slot: Set(appointment_date),
        token_no: Set(None),
        rejection_reason: Set(None),
        approved_by: Set(None),
        approved_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(|e| map_slot_conflict(e, appointment_date))?;

    info!(appointment_id = created.id, centre_id, "Appointment requested");

    let user = find_user(db, actor.subject_id).await.unwrap_or_else(|e| {
        warn!("Could not load user profile for confirmation email: {e}");
        None
    });
    let (name, recipient) = contact_for(user.as_ref(), Some(actor));
    dispatcher
        .notify_best_effort(
            db,
            notification::appointment_requested(name.as_deref(), &created),
            Linkage {
                user_id: Some(created.user_id),
                appointment_id: Some(created.id),
                ..Linkage::default()
            },
            recipient,
        )
        .await;

    Ok(created)
}

/// Display name and email for the appointment's owner, preferring the stored profile.
fn contact_for(
    user: Option<&UserModel>,
    actor: Option<&Principal>,
) -> (Option<String>, Option<String>) {
    let name = user
        .and_then(|u| u.name.clone())
        .or_else(|| actor.and_then(|a| a.name.clone()));
    let email = user
        .and_then(|u| u.email.clone())
        .or_else(|| actor.and_then(|a| a.email.clone()));
    (name, email)
}

/// Creates the donor record for `user_id` from its profile, or moves an existing
/// donor to `centre_id`.
async fn upsert_donor(
    txn: &DatabaseTransaction,
    user_id: i64,
    user: Option<&UserModel>,
    centre_id: i64,
) -> Result<DonorModel> {
    let now = Utc::now();
    let candidate = donor::ActiveModel {
        user_id: Set(Some(user_id)),
        donor_name: Set(user.and_then(|u| u.name.clone())),
        email: Set(user.and_then(|u| u.email.clone())),
        mobile_no: Set(user.and_then(|u| u.phone.clone())),
        age: Set(user.and_then(|u| u.age)),
        gender: Set(user.and_then(|u| u.gender.clone())),
        address: Set(user.and_then(|u| u.address.clone())),
        state_id: Set(user.and_then(|u| u.state_id)),
        district_id: Set(user.and_then(|u| u.district_id)),
        centre_id: Set(Some(centre_id)),
        blood_group_id: Set(None),
        next_eligible_date: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    Donor::insert(candidate)
        .on_conflict(
            OnConflict::column(donor::Column::UserId)
                .update_columns([donor::Column::CentreId, donor::Column::UpdatedAt])
                .to_owned(),
        )
        .exec_without_returning(txn)
        .await?;

    Donor::find()
        .filter(donor::Column::UserId.eq(user_id))
        .one(txn)
        .await?
        .ok_or_else(|| Error::not_found("Donor", format!("user {user_id}")))
}

/// Approves a pending appointment, assigning the next queue token.
///
/// In one transaction: lock the appointment, draw the token, apply the optional new
/// schedule, create or re-home the donor record, and write the approval intent.
#[instrument(skip(db, dispatcher, schedule), fields(admin_id = actor.subject_id))]
pub async fn approve_appointment(
    db: &DatabaseConnection,
    dispatcher: &Dispatcher,
    actor: &Principal,
    appointment_id: i64,
    schedule: Schedule,
) -> Result<AppointmentModel> {
    require_role(actor, &[Role::Admin, Role::SuperAdmin])?;

    let scheduled_date = non_blank(schedule.scheduled_date.as_deref())
        .map(|raw| parse_calendar_date("scheduled_date", raw))
        .transpose()?;
    let scheduled_time = non_blank(schedule.scheduled_time.as_deref()).map(str::to_string);

    let txn = db.begin().await?;

    let current = find_locked(&txn, appointment_id).await?;
    if !can_manage_appointments(actor, current.centre_id) {
        return Err(Error::forbidden("not authorized for this centre"));
    }
    if current.status != AppointmentStatus::Pending {
        return Err(Error::InvalidTransition {
            action: "approve",
            status: current.status.to_string(),
        });
    }

    let token = sequence::next_value(&txn, APPOINTMENT_TOKEN).await?;
    let date = scheduled_date.or(current.appointment_date);
    let now = Utc::now();
    let user_id = current.user_id;
    let centre_id = current.centre_id;

    let mut active: appointment::ActiveModel = current.into();
    active.status = Set(AppointmentStatus::Approved);
    active.token_no = Set(Some(token));
    active.appointment_date = Set(date);
    active.active_slot = Set(date);
    if scheduled_time.is_some() {
        active.appointment_time = Set(scheduled_time);
    }
    active.approved_by = Set(Some(actor.subject_id));
    active.approved_at = Set(Some(now));
    active.updated_at = Set(now);
    let approved = active
        .update(&txn)
        .await
        .map_err(|e| map_slot_conflict(e, date))?;

    let user = find_user(&txn, user_id).await?;
    let donor = upsert_donor(&txn, user_id, user.as_ref(), centre_id).await?;

    let (name, recipient) = contact_for(user.as_ref(), None);
    let pending = dispatcher
        .record_intent(
            &txn,
            notification::appointment_approved(name.as_deref(), &approved),
            Linkage {
                user_id: Some(user_id),
                donor_id: Some(donor.id),
                appointment_id: Some(approved.id),
                ..Linkage::default()
            },
            recipient.or_else(|| donor.email.clone()),
        )
        .await?;

    txn.commit().await?;

    info!(
        appointment_id,
        token_no = token,
        donor_id = donor.id,
        "Appointment approved"
    );
    dispatcher.deliver_best_effort(db, pending).await;

    Ok(approved)
}

/// Rejects a pending appointment with an optional reason.
#[instrument(skip(db, dispatcher, reason), fields(admin_id = actor.subject_id))]
pub async fn reject_appointment(
    db: &DatabaseConnection,
    dispatcher: &Dispatcher,
    actor: &Principal,
    appointment_id: i64,
    reason: Option<String>,
) -> Result<AppointmentModel> {
    require_role(actor, &[Role::Admin, Role::SuperAdmin])?;

    let txn = db.begin().await?;

    let current = find_locked(&txn, appointment_id).await?;
    if !can_manage_appointments(actor, current.centre_id) {
        return Err(Error::forbidden("not authorized for this centre"));
    }
    if current.status != AppointmentStatus::Pending {
        return Err(Error::InvalidTransition {
            action: "reject",
            status: current.status.to_string(),
        });
    }

    let now = Utc::now();
    let user_id = current.user_id;
    let mut active: appointment::ActiveModel = current.into();
    active.status = Set(AppointmentStatus::Rejected);
    active.active_slot = Set(None);
    active.rejection_reason = Set(reason.filter(|r| !r.trim().is_empty()));
    active.approved_by = Set(Some(actor.subject_id));
    active.approved_at = Set(Some(now));
    active.updated_at = Set(now);
    let rejected = active.update(&txn).await?;

    let user = find_user(&txn, user_id).await?;
    let (name, recipient) = contact_for(user.as_ref(), None);
    let pending = dispatcher
        .record_intent(
            &txn,
            notification::appointment_rejected(name.as_deref(), &rejected),
            Linkage {
                user_id: Some(user_id),
                appointment_id: Some(rejected.id),
                ..Linkage::default()
            },
            recipient,
        )
        .await?;

    txn.commit().await?;

    info!(appointment_id, "Appointment rejected");
    dispatcher.deliver_best_effort(db, pending).await;

    Ok(rejected)
}

/// Cancels an appointment on behalf of its owner. Only Pending and Approved are cancellable.
#[instrument(skip(db, dispatcher), fields(user_id = actor.subject_id))]
pub async fn cancel_appointment(
    db: &DatabaseConnection,
    dispatcher: &Dispatcher,
    actor: &Principal,
    appointment_id: i64,
) -> Result<AppointmentModel> {
    let txn = db.begin().await?;

    let current = find_locked(&txn, appointment_id).await?;
    if current.user_id != actor.subject_id {
        return Err(Error::forbidden("only the owner may cancel an appointment"));
    }
    if !current.status.is_active() {
        return Err(Error::InvalidTransition {
            action: "cancel",
            status: current.status.to_string(),
        });
    }

    let now = Utc::now();
    let mut active: appointment::ActiveModel = current.into();
    active.status = Set(AppointmentStatus::Cancelled);
    active.active_slot = Set(None);
    active.updated_at = Set(now);
    let cancelled = active.update(&txn).await?;

    let user = find_user(&txn, actor.subject_id).await?;
    let (name, recipient) = contact_for(user.as_ref(), Some(actor));
    let pending = dispatcher
        .record_intent(
            &txn,
            notification::appointment_cancelled(name.as_deref(), &cancelled),
            Linkage {
                user_id: Some(cancelled.user_id),
                appointment_id: Some(cancelled.id),
                ..Linkage::default()
            },
            recipient,
        )
        .await?;

    txn.commit().await?;

    info!(appointment_id, "Appointment cancelled");
    dispatcher.deliver_best_effort(db, pending).await;

    Ok(cancelled)
}

/// The caller's own appointments, newest first.
pub async fn list_my_appointments(
    db: &DatabaseConnection,
    actor: &Principal,
) -> Result<Vec<AppointmentModel>> {
    Ok(Appointment::find()
        .filter(appointment::Column::UserId.eq(actor.subject_id))
        .order_by_desc(appointment::Column::CreatedAt)
        .order_by_desc(appointment::Column::Id)
        .limit(MAX_OWN_APPOINTMENTS)
        .all(db)
        .await?)
}

/// Appointments an administrator may act on: their own centre, or every centre for `SuperAdmin`.
pub async fn list_centre_appointments(
    db: &DatabaseConnection,
    actor: &Principal,
    status: Option<AppointmentStatus>,
) -> Result<Vec<AppointmentModel>> {
    require_role(actor, &[Role::Admin, Role::SuperAdmin])?;

    let mut query = Appointment::find();
    if actor.role == Role::Admin {
        let centre_id = actor
            .centre_id
            .ok_or_else(|| Error::forbidden("no centre assigned"))?;
        query = query.filter(appointment::Column::CentreId.eq(centre_id));
    }
    if let Some(status) = status {
        query = query.filter(appointment::Column::Status.eq(status));
    }

    Ok(query
        .order_by_desc(appointment::Column::CreatedAt)
        .order_by_desc(appointment::Column::Id)
        .limit(MAX_CENTRE_APPOINTMENTS)
        .all(db)
        .await?)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{
        entities::{Notification, NotificationKind, NotificationStatus},
        test_utils::{
            RecordingNotifier, create_test_centre, create_test_user, days_ago, setup_test_db,
            test_dispatcher,
        },
    };
    use sea_orm::{DatabaseBackend, MockDatabase};
    use std::sync::Arc;

    fn request_for(centre_id: i64, last_donation_days_ago: u64) -> AppointmentRequest {
        AppointmentRequest {
            district_id: Some(1),
            centre_id: Some(centre_id),
            appointment_date: None,
            appointment_time: None,
            weight: Some(50.0),
            under_medication: false,
            last_donation_date: Some(days_ago(last_donation_days_ago).to_string()),
        }
    }

    fn dated(mut request: AppointmentRequest, date: &str) -> AppointmentRequest {
        request.appointment_date = Some(date.to_string());
        request
    }

    #[tokio::test]
    async fn test_request_then_approve_assigns_token_and_donor() -> Result<()> {
        let db = setup_test_db().await?;
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = test_dispatcher(notifier.clone());
        let user = create_test_user(&db, "Asha", Some("asha@test")).await?;
        let centre = create_test_centre(&db, "City Centre", 1).await?;
        let donor_actor = Principal::new(user.id, Role::Donor, None);

        let created =
            request_appointment(&db, &dispatcher, &donor_actor, request_for(centre.id, 95))
                .await?;
        assert_eq!(created.status, AppointmentStatus::Pending);
        assert!(created.token_no.is_none());

        let admin = Principal::new(100, Role::Admin, Some(centre.id));
        let approved =
            approve_appointment(&db, &dispatcher, &admin, created.id, Schedule::default()).await?;
        assert_eq!(approved.status, AppointmentStatus::Approved);
        assert_eq!(approved.token_no, Some(1));
        assert_eq!(approved.approved_by, Some(100));

        let donor = Donor::find()
            .filter(donor::Column::UserId.eq(user.id))
            .one(&db)
            .await?
            .unwrap();
        assert_eq!(donor.donor_name.as_deref(), Some("Asha"));
        assert_eq!(donor.email.as_deref(), Some("asha@test"));
        assert_eq!(donor.centre_id, Some(centre.id));

        let kinds: Vec<NotificationKind> = Notification::find()
            .all(&db)
            .await?
            .into_iter()
            .map(|n| n.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                NotificationKind::AppointmentRequested,
                NotificationKind::AppointmentApproved
            ]
        );
        assert_eq!(notifier.sent().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_tokens_are_strictly_increasing() -> Result<()> {
        let db = setup_test_db().await?;
        let dispatcher = test_dispatcher(Arc::new(RecordingNotifier::default()));
        let centre = create_test_centre(&db, "City Centre", 1).await?;
        let admin = Principal::new(100, Role::SuperAdmin, None);

        let mut tokens = Vec::new();
        for name in ["A", "B", "C"] {
            let user = create_test_user(&db, name, None).await?;
            let actor = Principal::new(user.id, Role::Donor, None);
            let created =
                request_appointment(&db, &dispatcher, &actor, request_for(centre.id, 120)).await?;
            let approved =
                approve_appointment(&db, &dispatcher, &admin, created.id, Schedule::default())
                    .await?;
            tokens.push(approved.token_no.unwrap());
        }
        assert_eq!(tokens, vec![1, 2, 3]);
        Ok(())
    }

    #[tokio::test]
    async fn test_recent_donation_is_rejected_without_row() -> Result<()> {
        let db = setup_test_db().await?;
        let dispatcher = test_dispatcher(Arc::new(RecordingNotifier::default()));
        let user = create_test_user(&db, "Asha", None).await?;
        let centre = create_test_centre(&db, "City Centre", 1).await?;
        let actor = Principal::new(user.id, Role::Donor, None);

        let result = request_appointment(&db, &dispatcher, &actor, request_for(centre.id, 10)).await;
        assert!(matches!(result, Err(Error::EligibilityViolation { .. })));
        assert_eq!(Appointment::find().count(&db).await?, 0);
        assert_eq!(Notification::find().count(&db).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_validation_fails_before_touching_database() {
        // A mock with no queued results errors on any query
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        let dispatcher = test_dispatcher(Arc::new(RecordingNotifier::default()));
        let actor = Principal::new(1, Role::Donor, None);

        let mut light = request_for(1, 120);
        light.weight = Some(45.0);
        assert!(matches!(
            request_appointment(&db, &dispatcher, &actor, light).await,
            Err(Error::Validation { .. })
        ));

        let mut missing = request_for(1, 120);
        missing.last_donation_date = None;
        assert!(matches!(
            request_appointment(&db, &dispatcher, &actor, missing).await,
            Err(Error::Validation { .. })
        ));

        let mut garbled = request_for(1, 120);
        garbled.last_donation_date = Some("yesterday".to_string());
        assert!(matches!(
            request_appointment(&db, &dispatcher, &actor, garbled).await,
            Err(Error::InvalidDate { field: "last_donation_date", .. })
        ));

        let mut no_centre = request_for(1, 120);
        no_centre.centre_id = None;
        assert!(matches!(
            request_appointment(&db, &dispatcher, &actor, no_centre).await,
            Err(Error::Validation { .. })
        ));

        assert!(db.into_transaction_log().is_empty());
    }

    #[tokio::test]
    async fn test_centre_must_exist_in_district() -> Result<()> {
        let db = setup_test_db().await?;
        let dispatcher = test_dispatcher(Arc::new(RecordingNotifier::default()));
        let user = create_test_user(&db, "Asha", None).await?;
        let centre = create_test_centre(&db, "Far Centre", 2).await?;
        let actor = Principal::new(user.id, Role::Donor, None);

        let wrong_district =
            request_appointment(&db, &dispatcher, &actor, request_for(centre.id, 120)).await;
        assert!(matches!(wrong_district, Err(Error::UnknownCentre { .. })));

        let missing = request_appointment(&db, &dispatcher, &actor, request_for(999, 120)).await;
        assert!(matches!(missing, Err(Error::UnknownCentre { centre_id: 999, .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_active_appointment_is_conflict() -> Result<()> {
        let db = setup_test_db().await?;
        let dispatcher = test_dispatcher(Arc::new(RecordingNotifier::default()));
        let user = create_test_user(&db, "Asha", None).await?;
        let centre = create_test_centre(&db, "City Centre", 1).await?;
        let actor = Principal::new(user.id, Role::Donor, None);
        let date = days_ago(0).to_string();

        let first =
            request_appointment(&db, &dispatcher, &actor, dated(request_for(centre.id, 120), &date))
                .await?;
        let second =
            request_appointment(&db, &dispatcher, &actor, dated(request_for(centre.id, 120), &date))
                .await;
        assert!(matches!(second, Err(Error::DuplicateAppointment { .. })));

        // A cancelled appointment frees the slot
        cancel_appointment(&db, &dispatcher, &actor, first.id).await?;
        let third =
            request_appointment(&db, &dispatcher, &actor, dated(request_for(centre.id, 120), &date))
                .await?;
        assert_eq!(third.status, AppointmentStatus::Pending);
        Ok(())
    }

    #[tokio::test]
    async fn test_active_slot_index_blocks_racing_insert() -> Result<()> {
        let db = setup_test_db().await?;
        let date = days_ago(0);
        let now = Utc::now();
        let row = || appointment::ActiveModel {
            user_id: Set(7),
            district_id: Set(1),
            centre_id: Set(1),
            appointment_date: Set(Some(date)),
            appointment_time: Set(None),
            weight: Set(None),
            under_medication: Set(false),
            last_donation_date: Set(days_ago(200)),
            status: Set(AppointmentStatus::Pending),
            active_slot: Set(Some(date)),
            token_no: Set(None),
            rejection_reason: Set(None),
            approved_by: Set(None),
            approved_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        create_test_centre(&db, "City Centre", 1).await?;

        row().insert(&db).await?;
        let err = row().insert(&db).await.unwrap_err();
        assert!(matches!(
            map_slot_conflict(err, Some(date)),
            Error::DuplicateAppointment { .. }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_admin_of_other_centre_is_forbidden() -> Result<()> {
        let db = setup_test_db().await?;
        let dispatcher = test_dispatcher(Arc::new(RecordingNotifier::default()));
        let user = create_test_user(&db, "Asha", None).await?;
        let centre = create_test_centre(&db, "City Centre", 1).await?;
        let actor = Principal::new(user.id, Role::Donor, None);
        let created =
            request_appointment(&db, &dispatcher, &actor, request_for(centre.id, 120)).await?;

        let outsider = Principal::new(100, Role::Admin, Some(centre.id + 1));
        assert!(matches!(
            approve_appointment(&db, &dispatcher, &outsider, created.id, Schedule::default())
                .await,
            Err(Error::Forbidden { .. })
        ));
        assert!(matches!(
            reject_appointment(&db, &dispatcher, &outsider, created.id, None).await,
            Err(Error::Forbidden { .. })
        ));
        let lab = Principal::new(100, Role::LabStaff, Some(centre.id));
        assert!(matches!(
            approve_appointment(&db, &dispatcher, &lab, created.id, Schedule::default()).await,
            Err(Error::Forbidden { .. })
        ));

        let admin = Principal::new(100, Role::Admin, Some(centre.id));
        assert!(matches!(
            approve_appointment(&db, &dispatcher, &admin, 999, Schedule::default()).await,
            Err(Error::NotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_reject_records_reason_and_is_terminal() -> Result<()> {
        let db = setup_test_db().await?;
        let dispatcher = test_dispatcher(Arc::new(RecordingNotifier::default()));
        let user = create_test_user(&db, "Asha", Some("asha@test")).await?;
        let centre = create_test_centre(&db, "City Centre", 1).await?;
        let actor = Principal::new(user.id, Role::Donor, None);
        let admin = Principal::new(100, Role::Admin, Some(centre.id));

        let created =
            request_appointment(&db, &dispatcher, &actor, request_for(centre.id, 120)).await?;
        let rejected = reject_appointment(
            &db,
            &dispatcher,
            &admin,
            created.id,
            Some("Camp is full".to_string()),
        )
        .await?;
        assert_eq!(rejected.status, AppointmentStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("Camp is full"));
        assert!(rejected.token_no.is_none());

        assert!(matches!(
            approve_appointment(&db, &dispatcher, &admin, created.id, Schedule::default()).await,
            Err(Error::InvalidTransition { action: "approve", .. })
        ));
        assert!(matches!(
            cancel_appointment(&db, &dispatcher, &actor, created.id).await,
            Err(Error::InvalidTransition { action: "cancel", .. })
        ));

        let notice = Notification::find()
            .filter(crate::entities::NotificationColumn::Kind.eq(NotificationKind::AppointmentRejected))
            .one(&db)
            .await?
            .unwrap();
        assert!(notice.body.contains("Camp is full"));
        assert_eq!(notice.status, NotificationStatus::Sent);
        Ok(())
    }

    #[tokio::test]
    async fn test_only_owner_may_cancel() -> Result<()> {
        let db = setup_test_db().await?;
        let dispatcher = test_dispatcher(Arc::new(RecordingNotifier::default()));
        let owner = create_test_user(&db, "Asha", None).await?;
        let other = create_test_user(&db, "Ravi", None).await?;
        let centre = create_test_centre(&db, "City Centre", 1).await?;
        let owner_actor = Principal::new(owner.id, Role::Donor, None);
        let created =
            request_appointment(&db, &dispatcher, &owner_actor, request_for(centre.id, 120))
                .await?;

        let intruder = Principal::new(other.id, Role::Donor, None);
        assert!(matches!(
            cancel_appointment(&db, &dispatcher, &intruder, created.id).await,
            Err(Error::Forbidden { .. })
        ));

        let cancelled = cancel_appointment(&db, &dispatcher, &owner_actor, created.id).await?;
        assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
        assert!(cancelled.active_slot.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_approve_with_new_schedule_moves_slot() -> Result<()> {
        let db = setup_test_db().await?;
        let dispatcher = test_dispatcher(Arc::new(RecordingNotifier::default()));
        let user = create_test_user(&db, "Asha", None).await?;
        let centre = create_test_centre(&db, "City Centre", 1).await?;
        let actor = Principal::new(user.id, Role::Donor, None);
        let admin = Principal::new(100, Role::SuperAdmin, None);

        let created = request_appointment(
            &db,
            &dispatcher,
            &actor,
            dated(request_for(centre.id, 120), &days_ago(0).to_string()),
        )
        .await?;
        let schedule = Schedule {
            scheduled_date: Some("2099-01-15".to_string()),
            scheduled_time: Some("10:30".to_string()),
        };
        let approved = approve_appointment(&db, &dispatcher, &admin, created.id, schedule).await?;
        let expected = NaiveDate::from_ymd_opt(2099, 1, 15);
        assert_eq!(approved.appointment_date, expected);
        assert_eq!(approved.active_slot, expected);
        assert_eq!(approved.appointment_time.as_deref(), Some("10:30"));
        Ok(())
    }

    #[tokio::test]
    async fn test_listings_are_scoped() -> Result<()> {
        let db = setup_test_db().await?;
        let dispatcher = test_dispatcher(Arc::new(RecordingNotifier::default()));
        let user = create_test_user(&db, "Asha", None).await?;
        let north = create_test_centre(&db, "North", 1).await?;
        let south = create_test_centre(&db, "South", 1).await?;
        let actor = Principal::new(user.id, Role::Donor, None);

        request_appointment(&db, &dispatcher, &actor, request_for(north.id, 120)).await?;
        request_appointment(
            &db,
            &dispatcher,
            &actor,
            dated(request_for(south.id, 120), "2099-02-01"),
        )
        .await?;

        assert_eq!(list_my_appointments(&db, &actor).await?.len(), 2);

        let north_admin = Principal::new(100, Role::Admin, Some(north.id));
        let rows = list_centre_appointments(&db, &north_admin, None).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].centre_id, north.id);

        let superadmin = Principal::new(101, Role::SuperAdmin, None);
        assert_eq!(
            list_centre_appointments(&db, &superadmin, Some(AppointmentStatus::Pending))
                .await?
                .len(),
            2
        );
        assert!(
            list_centre_appointments(&db, &superadmin, Some(AppointmentStatus::Approved))
                .await?
                .is_empty()
        );
        assert!(list_centre_appointments(&db, &actor, None).await.is_err());
        Ok(())
    }
}
