//! Centre entity - a physical collection/storage facility.
//!
//! Centres are the unit of staff authorization; every appointment, collection
//! and inventory bucket is scoped to one.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Blood centre reference data
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "centres")]
pub struct Model {
    /// Unique identifier for the centre
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Display name
    pub name: String,
    /// District the centre is located in
    pub district_id: i64,
}

/// One centre has many camps
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Camps run by the centre
    #[sea_orm(has_many = "super::camp::Entity")]
    Camps,
}

impl Related<super::camp::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Camps.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
