//! Donor entity - the long-lived identity behind every collection.
//!
//! A donor row is created from the user's profile when their first appointment is
//! approved. The testing workflow advances `next_eligible_date` when a donation passes.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Donor database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "donors")]
pub struct Model {
    /// Unique identifier for the donor
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Linked account, if the donor registered online; at most one donor per account
    #[sea_orm(unique)]
    pub user_id: Option<i64>,
    /// Full name
    pub donor_name: Option<String>,
    /// Contact email
    pub email: Option<String>,
    /// Contact phone
    pub mobile_no: Option<String>,
    /// Age in years
    pub age: Option<i32>,
    /// Gender as stated
    pub gender: Option<String>,
    /// Postal address
    pub address: Option<String>,
    /// Home state
    pub state_id: Option<i64>,
    /// Home district
    pub district_id: Option<i64>,
    /// Home centre, reassigned on every approval
    pub centre_id: Option<i64>,
    /// Known blood group, used when a test record carries none
    pub blood_group_id: Option<i64>,
    /// Earliest date this donor may donate again
    pub next_eligible_date: Option<Date>,
    /// When the donor was registered
    pub created_at: DateTimeUtc,
    /// Last change to the row
    pub updated_at: DateTimeUtc,
}

/// One donor has many collections
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Collections drawn from the donor
    #[sea_orm(has_many = "super::collection::Entity")]
    Collections,
}

impl Related<super::collection::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Collections.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
