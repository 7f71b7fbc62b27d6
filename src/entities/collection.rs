//! Collection entity - one physical blood draw from one donor.
//!
//! Rows are immutable after insert; lab results live in the one-to-one
//! `blood_testing` row (see [`super::test_record`]).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Blood collection database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "blood_collection")]
pub struct Model {
    /// Unique identifier for the collection
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Donor the blood was drawn from
    pub donor_id: i64,
    /// Centre that recorded the draw
    pub centre_id: i64,
    /// Camp the draw happened at; its centre always equals `centre_id`
    pub camp_id: Option<i64>,
    /// Bag size label, e.g. `"450ml"`
    pub bag_size: String,
    /// Collected volume in ml
    pub collected_amount: i32,
    /// Bag lot number
    pub lot_number: Option<String>,
    /// When the blood was drawn
    pub collection_date: DateTimeUtc,
    /// Adverse reaction notes
    pub donor_reaction: Option<String>,
    /// When the row was recorded
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Collection and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each collection belongs to one donor
    #[sea_orm(
        belongs_to = "super::donor::Entity",
        from = "Column::DonorId",
        to = "super::donor::Column::Id"
    )]
    Donor,
    /// Each collection is recorded at one centre
    #[sea_orm(
        belongs_to = "super::centre::Entity",
        from = "Column::CentreId",
        to = "super::centre::Column::Id"
    )]
    Centre,
    /// Optionally at one camp of that centre
    #[sea_orm(
        belongs_to = "super::camp::Entity",
        from = "Column::CampId",
        to = "super::camp::Column::Id"
    )]
    Camp,
    /// At most one test record
    #[sea_orm(has_one = "super::test_record::Entity")]
    TestRecord,
    /// Components split off after a passed test
    #[sea_orm(has_many = "super::segregation::Entity")]
    Segregation,
}

impl Related<super::donor::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Donor.def()
    }
}

impl Related<super::centre::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Centre.def()
    }
}

impl Related<super::camp::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Camp.def()
    }
}

impl Related<super::test_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TestRecord.def()
    }
}

impl Related<super::segregation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Segregation.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
