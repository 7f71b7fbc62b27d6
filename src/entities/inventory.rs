//! Inventory entity - units available per centre, blood group and component.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Inventory bucket; `(centre_id, blood_group_id, component)` is unique
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "blood_inventory")]
pub struct Model {
    /// Unique identifier for the bucket
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owning centre
    pub centre_id: i64,
    /// Blood group of the units
    pub blood_group_id: i64,
    /// Component name, e.g. `"WholeBlood"`
    pub component: String,
    /// Units on the shelf
    pub units_available: i32,
    /// Last credit or debit
    pub last_updated: DateTimeUtc,
}

/// Inventory buckets carry plain ids and define no relations
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
