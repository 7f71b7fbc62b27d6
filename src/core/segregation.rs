//! Blood segregation - splitting a passed collection into components.
//!
//! Only collections whose test record is `Passed` can be segregated. The collected
//! volume is divided by each component's share; the share of components not requested
//! goes to Platelets when requested, otherwise to the last component requested. Each
//! component gets one inventory unit and an expiry date from its shelf life, and the
//! whole-blood unit credited when the collection passed is taken back out of stock.

use crate::{
    config::settings::ListingSettings,
    core::{
        access::{Principal, effective_centre_filter, require_centre_access, require_role},
        collection::COLLECTION_ROLES,
        inventory::{WHOLE_BLOOD, credit_unit, debit_unit},
        paging::{Page, PageRequest},
    },
    entities::{
        BloodComponent, Collection, CollectionModel, Donor, DonorModel, InventoryModel,
        OverallStatus, Segregation, SegregationModel, SegregationStatus, TestRecord, donor,
        segregation, test_record,
    },
    errors::{Error, Result},
};
use chrono::{Days, Utc};
use sea_orm::{
    PaginatorTrait, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait, prelude::*,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, instrument};

/// Components requested for a segregation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SegregationRequest {
    /// Component names; unknown names are ignored. Absent or empty means all three.
    pub components: Option<Vec<String>>,
}

impl SegregationRequest {
    /// Known components in request order, without repeats.
    fn resolve(&self) -> Result<Vec<BloodComponent>> {
        let Some(names) = self.components.as_ref().filter(|n| !n.is_empty()) else {
            return Ok(BloodComponent::ALL.to_vec());
        };
        let mut picked = Vec::new();
        for component in names.iter().filter_map(|n| BloodComponent::from_name(n.trim())) {
            if !picked.contains(&component) {
                picked.push(component);
            }
        }
        if picked.is_empty() {
            return Err(Error::validation(
                "components must name at least one of RBC, Plasma, Platelets",
            ));
        }
        Ok(picked)
    }
}

/// Splits `collected_ml` across `components`, rounding each volume half up.
///
/// The share left over by components not requested is added to Platelets when
/// requested, otherwise to the last requested component.
#[must_use]
pub fn split_volume(
    collected_ml: i32,
    components: &[BloodComponent],
) -> Vec<(BloodComponent, i32)> {
    let assigned: i64 = components.iter().map(|c| c.volume_permille()).sum();
    let leftover = 1000 - assigned;
    let taker = if components.contains(&BloodComponent::Platelets) {
        Some(BloodComponent::Platelets)
    } else {
        components.last().copied()
    };

    components
        .iter()
        .map(|&component| {
            let mut permille = component.volume_permille();
            if Some(component) == taker {
                permille += leftover;
            }
            let volume = (i64::from(collected_ml) * permille + 500) / 1000;
            (component, i32::try_from(volume.max(0)).unwrap_or(i32::MAX))
        })
        .collect()
}

/// A segregated component with the inventory bucket it was credited to
#[derive(Debug, Clone, Serialize)]
pub struct SegregatedComponent {
    /// The stored segregation row
    #[serde(flatten)]
    pub segregation: SegregationModel,
    /// Bucket state after the credit
    pub inventory: InventoryModel,
}

fn map_component_conflict(err: DbErr, collection_id: i64) -> Error {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => Error::AlreadySegregated {
            collection_id,
            components: "requested components".to_string(),
        },
        _ => Error::Database(err),
    }
}

/// Segregates a passed collection into components and credits inventory for each.
#[instrument(skip(db, request), fields(actor_id = actor.subject_id))]
pub async fn segregate_collection(
    db: &DatabaseConnection,
    actor: &Principal,
    collection_id: i64,
    request: SegregationRequest,
) -> Result<Vec<SegregatedComponent>> {
    require_role(actor, &COLLECTION_ROLES)?;
    let components = request.resolve()?;

    let txn = db.begin().await?;

    let found = Collection::find_by_id(collection_id)
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("Collection", collection_id))?;
    require_centre_access(actor, found.centre_id)?;

    let test = TestRecord::find()
        .filter(test_record::Column::CollectionId.eq(collection_id))
        .one(&txn)
        .await?;
    match test.as_ref().map(|t| t.overall_status) {
        Some(OverallStatus::Passed) => {}
        other => {
            return Err(Error::InvalidTransition {
                action: "segregate",
                status: other.map_or_else(|| "Untested".to_string(), |s| format!("{s:?}")),
            });
        }
    }

    if found.collected_amount <= 0 {
        return Err(Error::validation(format!(
            "Collection {collection_id} has no collected volume"
        )));
    }

    let existing: Vec<BloodComponent> = Segregation::find()
        .filter(segregation::Column::CollectionId.eq(collection_id))
        .filter(segregation::Column::Component.is_in(components.clone()))
        .all(&txn)
        .await?
        .into_iter()
        .map(|s| s.component)
        .collect();
    if !existing.is_empty() {
        return Err(Error::AlreadySegregated {
            collection_id,
            components: existing
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        });
    }

    let blood_group_id = match test.and_then(|t| t.blood_group_id) {
        Some(group) => Some(group),
        None => Donor::find_by_id(found.donor_id)
            .one(&txn)
            .await?
            .and_then(|d| d.blood_group_id),
    }
    .ok_or_else(|| {
        Error::validation(format!("Blood group unknown for collection {collection_id}"))
    })?;

    let now = Utc::now();
    let today = now.date_naive();
    let mut created = Vec::with_capacity(components.len());
    for (component, volume_ml) in split_volume(found.collected_amount, &components) {
        let expiry_date = today
            .checked_add_days(Days::new(component.shelf_life_days()))
            .unwrap_or(today);
        let row = segregation::ActiveModel {
            collection_id: Set(collection_id),
            component: Set(component),
            volume_ml: Set(volume_ml),
            units: Set(1),
            expiry_date: Set(expiry_date),
            status: Set(SegregationStatus::Available),
            centre_id: Set(found.centre_id),
            segregated_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| map_component_conflict(e, collection_id))?;

        let inventory =
            credit_unit(&txn, found.centre_id, blood_group_id, component.as_str()).await?;
        created.push(SegregatedComponent {
            segregation: row,
            inventory,
        });
    }

    let consumed = debit_unit(&txn, found.centre_id, blood_group_id, WHOLE_BLOOD).await?;
    if !consumed {
        debug!(collection_id, "No whole-blood unit in stock to consume");
    }

    txn.commit().await?;

    info!(
        collection_id,
        components = created.len(),
        "Collection segregated"
    );
    Ok(created)
}

/// Filters accepted by [`list_segregations`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SegregationFilter {
    /// Ignored for centre-scoped roles
    pub centre_id: Option<i64>,
    /// Only this source collection
    pub collection_id: Option<i64>,
    /// Only this component
    pub component: Option<BloodComponent>,
    /// 1-based page number
    pub page: Option<u64>,
    /// Rows per page
    pub limit: Option<u64>,
}

/// A segregated component with its donor's contact details
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegregationView {
    /// The stored segregation row
    #[serde(flatten)]
    pub segregation: SegregationModel,
    /// Donor of the source collection
    pub donor_id: Option<i64>,
    /// That donor's name
    pub donor_name: Option<String>,
    /// That donor's email
    pub donor_email: Option<String>,
}

async fn with_donors(
    db: &DatabaseConnection,
    rows: Vec<(SegregationModel, Option<CollectionModel>)>,
) -> Result<Vec<SegregationView>> {
    let donor_ids: Vec<i64> = rows
        .iter()
        .filter_map(|(_, c)| c.as_ref().map(|c| c.donor_id))
        .collect();
    let donors: HashMap<i64, DonorModel> = if donor_ids.is_empty() {
        HashMap::new()
    } else {
        Donor::find()
            .filter(donor::Column::Id.is_in(donor_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|d| (d.id, d))
            .collect()
    };

    Ok(rows
        .into_iter()
        .map(|(segregation, collection)| {
            let donor_id = collection.map(|c| c.donor_id);
            let donor = donor_id.and_then(|id| donors.get(&id));
            SegregationView {
                segregation,
                donor_id,
                donor_name: donor.and_then(|d| d.donor_name.clone()),
                donor_email: donor.and_then(|d| d.email.clone()),
            }
        })
        .collect())
}

/// Lists segregated components, newest first. Centre-scoped roles see their own centre.
pub async fn list_segregations(
    db: &DatabaseConnection,
    actor: &Principal,
    filter: SegregationFilter,
    listing: ListingSettings,
) -> Result<Page<SegregationView>> {
    require_role(actor, &COLLECTION_ROLES)?;
    let request = PageRequest::resolve(filter.page, filter.limit, listing)?;

    let mut query = Segregation::find().find_also_related(Collection);
    if let Some(centre_id) = effective_centre_filter(actor, filter.centre_id) {
        query = query.filter(segregation::Column::CentreId.eq(centre_id));
    }
    if let Some(collection_id) = filter.collection_id {
        query = query.filter(segregation::Column::CollectionId.eq(collection_id));
    }
    if let Some(component) = filter.component {
        query = query.filter(segregation::Column::Component.eq(component));
    }

    let paginator = query
        .order_by_desc(segregation::Column::SegregatedAt)
        .order_by_desc(segregation::Column::Id)
        .paginate(db, request.limit);
    let total = paginator.num_items().await?;
    let rows = paginator.fetch_page(request.index()).await?;

    Ok(Page::new(request, total, with_donors(db, rows).await?))
}

/// Fetches one segregated component by id.
pub async fn get_segregation(
    db: &DatabaseConnection,
    actor: &Principal,
    segregation_id: i64,
) -> Result<SegregationView> {
    require_role(actor, &COLLECTION_ROLES)?;

    let row = Segregation::find_by_id(segregation_id)
        .find_also_related(Collection)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Segregation", segregation_id))?;
    require_centre_access(actor, row.0.centre_id)?;

    with_donors(db, vec![row])
        .await?
        .pop()
        .ok_or_else(|| Error::not_found("Segregation", segregation_id))
}
