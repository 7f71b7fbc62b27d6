//! Camp entity - a time-boxed collection drive run by exactly one centre.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Donation camp
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "camps")]
pub struct Model {
    /// Unique identifier for the camp
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owning centre; collections recorded at this camp must use the same centre
    pub centre_id: i64,
    /// Display name
    pub name: String,
    /// Day the drive runs
    pub camp_date: Option<Date>,
}

/// Relations of a camp
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each camp belongs to one centre
    #[sea_orm(
        belongs_to = "super::centre::Entity",
        from = "Column::CentreId",
        to = "super::centre::Column::Id"
    )]
    Centre,
}

impl Related<super::centre::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Centre.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
