//! Collection recording - one physical blood draw per row.
//!
//! A collection is written in one transaction together with its checks: the donor is
//! locked, the centre must exist, and a camp (if any) must belong to that centre. Any
//! failure rolls the whole operation back. Recording a draw also completes the donor's
//! most recent Approved appointment at the same centre.

use crate::{
    config::settings::ListingSettings,
    core::{
        access::{Principal, Role, effective_centre_filter, require_centre_access, require_role},
        eligibility::parse_instant,
        paging::{DateRange, Page, PageRequest},
    },
    entities::{
        Appointment, AppointmentStatus, Camp, Centre, Collection, CollectionModel, Donor,
        OverallStatus, TestRecord, TestRecordModel, appointment, collection, test_record,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{
    DatabaseTransaction, PaginatorTrait, QueryOrder, QuerySelect, Set, TransactionTrait,
    prelude::*,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// Roles allowed to record a collection
pub const COLLECTION_ROLES: [Role; 4] = [Role::Organizer, Role::LabStaff, Role::Admin, Role::SuperAdmin];

/// A collection as submitted by centre staff
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCollection {
    /// Donor the blood was drawn from
    pub donor_id: Option<i64>,
    /// Centre recording the draw
    pub centre_id: Option<i64>,
    /// Camp of that centre, if drawn at one
    pub camp_id: Option<i64>,
    /// Bag size label, e.g. `"450ml"`
    pub bag_size: Option<String>,
    /// Collected volume in ml
    pub collected_amount: Option<i32>,
    /// Bag lot number
    pub lot_number: Option<String>,
    /// Defaults to now
    pub collection_date: Option<String>,
    /// Adverse reaction notes
    pub donor_reaction: Option<String>,
}

/// Filters accepted by [`list_collections`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectionFilter {
    /// Ignored for centre-scoped roles
    pub centre_id: Option<i64>,
    /// Only collections from this camp
    pub camp_id: Option<i64>,
    /// Status of the joined test record
    pub overall_status: Option<OverallStatus>,
    /// Inclusive lower bound on the collection date
    pub from: Option<String>,
    /// Inclusive upper bound on the collection date
    pub to: Option<String>,
    /// 1-based page number
    pub page: Option<u64>,
    /// Rows per page
    pub limit: Option<u64>,
}

/// A collection joined with the summary of its test record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionView {
    /// The collection row
    #[serde(flatten)]
    pub collection: CollectionModel,
    /// Joined test record id
    pub test_id: Option<i64>,
    /// Joined test record status
    pub overall_status: Option<OverallStatus>,
    /// When the joined record was tested
    pub tested_at: Option<DateTimeUtc>,
}

impl From<(CollectionModel, Option<TestRecordModel>)> for CollectionView {
    fn from((collection, test): (CollectionModel, Option<TestRecordModel>)) -> Self {
        Self {
            collection,
            test_id: test.as_ref().map(|t| t.id),
            overall_status: test.as_ref().map(|t| t.overall_status),
            tested_at: test.map(|t| t.tested_at),
        }
    }
}

fn require_text(value: Option<String>, field: &str) -> Result<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::validation(format!("{field} is required")))
}

/// Records a physical collection.
///
/// Centre-scoped roles may only record at their own centre. The donor is row-locked for
/// the duration of the transaction.
#[instrument(skip(db, new), fields(actor_id = actor.subject_id))]
pub async fn create_collection(
    db: &DatabaseConnection,
    actor: &Principal,
    new: NewCollection,
) -> Result<CollectionModel> {
    require_role(actor, &COLLECTION_ROLES)?;

    let (Some(donor_id), Some(centre_id)) = (new.donor_id, new.centre_id) else {
        return Err(Error::validation(
            "donor_id, centre_id, bag_size and collected_amount required",
        ));
    };
    let bag_size = require_text(new.bag_size, "bag_size")?;
    let collected_amount = match new.collected_amount {
        Some(amount) if amount > 0 => amount,
        Some(amount) => {
            return Err(Error::validation(format!(
                "collected_amount must be positive, got {amount}"
            )));
        }
        None => return Err(Error::validation("collected_amount is required")),
    };
    let collection_date = match new.collection_date.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => parse_instant("collection_date", raw)?.and_utc(),
        _ => Utc::now(),
    };

    require_centre_access(actor, centre_id)?;

    let txn = db.begin().await?;

    let donor = Donor::find_by_id(donor_id)
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("Donor", donor_id))?;

    if Centre::find_by_id(centre_id).one(&txn).await?.is_none() {
        return Err(Error::UnknownCentre {
            centre_id,
            reason: "centre does not exist".to_string(),
        });
    }

    if let Some(camp_id) = new.camp_id {
        let camp = Camp::find_by_id(camp_id)
            .one(&txn)
            .await?
            .ok_or_else(|| Error::InvalidCamp {
                camp_id,
                reason: "camp does not exist".to_string(),
            })?;
        if camp.centre_id != centre_id {
            return Err(Error::InvalidCamp {
                camp_id,
                reason: "Camp does not belong to the provided centre".to_string(),
            });
        }
    }

    let created = collection::ActiveModel {
        donor_id: Set(donor_id),
        centre_id: Set(centre_id),
        camp_id: Set(new.camp_id),
        bag_size: Set(bag_size),
        collected_amount: Set(collected_amount),
        lot_number: Set(new.lot_number.filter(|v| !v.trim().is_empty())),
        collection_date: Set(collection_date),
        donor_reaction: Set(new.donor_reaction.filter(|v| !v.trim().is_empty())),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    if let Some(user_id) = donor.user_id {
        complete_latest_appointment(&txn, user_id, centre_id).await?;
    }

    txn.commit().await?;

    info!(
        collection_id = created.id,
        donor_id, centre_id, "Collection recorded"
    );
    Ok(created)
}

/// Marks the user's most recent Approved appointment at `centre_id` as Completed.
async fn complete_latest_appointment(
    txn: &DatabaseTransaction,
    user_id: i64,
    centre_id: i64,
) -> Result<()> {
    let latest = Appointment::find()
        .filter(appointment::Column::UserId.eq(user_id))
        .filter(appointment::Column::CentreId.eq(centre_id))
        .filter(appointment::Column::Status.eq(AppointmentStatus::Approved))
        .order_by_desc(appointment::Column::AppointmentDate)
        .order_by_desc(appointment::Column::Id)
        .lock_exclusive()
        .one(txn)
        .await?;

    if let Some(approved) = latest {
        let appointment_id = approved.id;
        let mut active: appointment::ActiveModel = approved.into();
        active.status = Set(AppointmentStatus::Completed);
        active.active_slot = Set(None);
        active.updated_at = Set(Utc::now());
        active.update(txn).await?;
        info!(appointment_id, "Appointment completed by collection");
    }
    Ok(())
}

/// Lists collections with their test summary, newest first.
///
/// Centre-scoped roles are always filtered to their own centre, whatever they asked for.
pub async fn list_collections(
    db: &DatabaseConnection,
    actor: &Principal,
    filter: CollectionFilter,
    listing: ListingSettings,
) -> Result<Page<CollectionView>> {
    require_role(actor, &COLLECTION_ROLES)?;

    let range = DateRange::parse(filter.from.as_deref(), filter.to.as_deref())?;
    let request = PageRequest::resolve(filter.page, filter.limit, listing)?;

    let mut query = Collection::find().find_also_related(TestRecord);
    if let Some(centre_id) = effective_centre_filter(actor, filter.centre_id) {
        query = query.filter(collection::Column::CentreId.eq(centre_id));
    }
    if let Some(camp_id) = filter.camp_id {
        query = query.filter(collection::Column::CampId.eq(camp_id));
    }
    if let Some(status) = filter.overall_status {
        query = query.filter(test_record::Column::OverallStatus.eq(status));
    }
    if let Some(start) = range.start {
        query = query.filter(collection::Column::CollectionDate.gte(start));
    }
    if let Some(end) = range.end {
        query = query.filter(collection::Column::CollectionDate.lt(end));
    }

    let paginator = query
        .order_by_desc(collection::Column::CollectionDate)
        .order_by_desc(collection::Column::Id)
        .paginate(db, request.limit);
    let total = paginator.num_items().await?;
    let rows = paginator.fetch_page(request.index()).await?;

    Ok(Page::new(
        request,
        total,
        rows.into_iter().map(CollectionView::from).collect(),
    ))
}

/// Fetches one collection with its test summary.
pub async fn get_collection(
    db: &DatabaseConnection,
    actor: &Principal,
    collection_id: i64,
) -> Result<CollectionView> {
    require_role(actor, &COLLECTION_ROLES)?;

    let (found, test) = Collection::find_by_id(collection_id)
        .find_also_related(TestRecord)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Collection", collection_id))?;

    require_centre_access(actor, found.centre_id)?;
    Ok(CollectionView::from((found, test)))
}
