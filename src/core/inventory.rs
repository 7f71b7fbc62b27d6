//! Inventory buckets per centre, blood group and component.

use crate::{
    core::access::{Principal, effective_centre_filter},
    entities::{Inventory, InventoryModel, inventory},
    errors::{Error, Result},
};
use sea_orm::{
    DatabaseTransaction, QueryOrder, QuerySelect, Set,
    prelude::*,
    sea_query::{Expr, OnConflict},
};
use serde::Deserialize;
use tracing::debug;

/// Component credited for every passed whole-blood donation.
pub const WHOLE_BLOOD: &str = "WholeBlood";

/// Upper bound on rows returned by [`list_inventory`].
pub const MAX_INVENTORY_LIST: u64 = 500;

/// Adds one unit to the `(centre_id, blood_group_id, component)` bucket, creating it at zero first.
///
/// Runs on the caller's transaction so the credit commits with the transition that earned it.
pub async fn credit_unit(
    txn: &DatabaseTransaction,
    centre_id: i64,
    blood_group_id: i64,
    component: &str,
) -> Result<InventoryModel> {
    let now = chrono::Utc::now();

    let seed = inventory::ActiveModel {
        centre_id: Set(centre_id),
        blood_group_id: Set(blood_group_id),
        component: Set(component.to_string()),
        units_available: Set(0),
        last_updated: Set(now),
        ..Default::default()
    };
    Inventory::insert(seed)
        .on_conflict(
            OnConflict::columns([
                inventory::Column::CentreId,
                inventory::Column::BloodGroupId,
                inventory::Column::Component,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(txn)
        .await?;

    Inventory::update_many()
        .col_expr(
            inventory::Column::UnitsAvailable,
            Expr::col(inventory::Column::UnitsAvailable).add(1),
        )
        .col_expr(inventory::Column::LastUpdated, Expr::value(now))
        .filter(inventory::Column::CentreId.eq(centre_id))
        .filter(inventory::Column::BloodGroupId.eq(blood_group_id))
        .filter(inventory::Column::Component.eq(component))
        .exec(txn)
        .await?;

    let bucket = Inventory::find()
        .filter(inventory::Column::CentreId.eq(centre_id))
        .filter(inventory::Column::BloodGroupId.eq(blood_group_id))
        .filter(inventory::Column::Component.eq(component))
        .one(txn)
        .await?
        .ok_or_else(|| Error::not_found("Inventory", format!("{centre_id}/{blood_group_id}")))?;

    debug!(
        centre_id,
        blood_group_id,
        component,
        units = bucket.units_available,
        "Credited inventory unit"
    );
    Ok(bucket)
}

/// Takes one unit out of a bucket if it holds any. Returns whether a unit was taken.
pub async fn debit_unit(
    txn: &DatabaseTransaction,
    centre_id: i64,
    blood_group_id: i64,
    component: &str,
) -> Result<bool> {
    let result = Inventory::update_many()
        .col_expr(
            inventory::Column::UnitsAvailable,
            Expr::col(inventory::Column::UnitsAvailable).sub(1),
        )
        .col_expr(inventory::Column::LastUpdated, Expr::value(chrono::Utc::now()))
        .filter(inventory::Column::CentreId.eq(centre_id))
        .filter(inventory::Column::BloodGroupId.eq(blood_group_id))
        .filter(inventory::Column::Component.eq(component))
        .filter(inventory::Column::UnitsAvailable.gt(0))
        .exec(txn)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Filters accepted by [`list_inventory`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InventoryFilter {
    /// Ignored for centre-scoped roles
    pub centre_id: Option<i64>,
    /// Only this blood group
    pub blood_group_id: Option<i64>,
    /// Only this component
    pub component: Option<String>,
    /// Capped at [`MAX_INVENTORY_LIST`]
    pub limit: Option<u64>,
}

/// Lists inventory buckets visible to `actor`. Centre-scoped roles only see their own centre.
pub async fn list_inventory(
    db: &DatabaseConnection,
    actor: &Principal,
    filter: InventoryFilter,
) -> Result<Vec<InventoryModel>> {
    if !actor.role.is_staff() {
        return Err(Error::forbidden("inventory is visible to centre staff only"));
    }

    let mut query = Inventory::find();
    if let Some(centre_id) = effective_centre_filter(actor, filter.centre_id) {
        query = query.filter(inventory::Column::CentreId.eq(centre_id));
    }
    if let Some(blood_group_id) = filter.blood_group_id {
        query = query.filter(inventory::Column::BloodGroupId.eq(blood_group_id));
    }
    if let Some(component) = filter.component {
        query = query.filter(inventory::Column::Component.eq(component));
    }

    let limit = filter
        .limit
        .unwrap_or(MAX_INVENTORY_LIST)
        .clamp(1, MAX_INVENTORY_LIST);

    Ok(query
        .order_by_asc(inventory::Column::CentreId)
        .order_by_asc(inventory::Column::BloodGroupId)
        .order_by_asc(inventory::Column::Component)
        .limit(limit)
        .all(db)
        .await?)
}
