//! Test record entity - lab screening results for one collection.
//!
//! Five pathogen sub-results are reported independently (possibly across several
//! calls); `overall_status` is derived from them by `core::testing` and, once
//! terminal, never changes again.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Result of a single pathogen screen
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum ScreeningResult {
    /// Not yet reported
    #[sea_orm(string_value = "Pending")]
    #[serde(alias = "pending")]
    Pending,
    /// Screen came back clear
    #[sea_orm(string_value = "Non-reactive")]
    #[serde(
        rename = "Non-reactive",
        alias = "non-reactive",
        alias = "NonReactive",
        alias = "Non-Reactive"
    )]
    NonReactive,
    /// Screen came back positive
    #[sea_orm(string_value = "Reactive")]
    #[serde(alias = "reactive")]
    Reactive,
}

impl ScreeningResult {
    /// Whether the lab has reported a result for this screen
    #[must_use]
    pub const fn is_resolved(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Aggregate verdict over the five screens
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum OverallStatus {
    /// Not yet decided
    #[sea_orm(string_value = "Pending")]
    Pending,
    /// Cleared for use
    #[sea_orm(string_value = "Passed")]
    Passed,
    /// At least one screen positive
    #[sea_orm(string_value = "Reactive")]
    Reactive,
}

impl OverallStatus {
    /// Passed and Reactive are terminal; downstream effects fire on entering one.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Blood testing database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "blood_testing")]
pub struct Model {
    /// Unique identifier for the test record
    #[sea_orm(primary_key)]
    pub id: i64,
    /// The tested collection (one test record per collection)
    #[sea_orm(unique)]
    pub collection_id: i64,
    /// Blood group found by the lab
    pub blood_group_id: Option<i64>,
    /// HIV screen
    pub hiv: ScreeningResult,
    /// Hepatitis B surface antigen screen
    pub hbsag: ScreeningResult,
    /// Hepatitis C screen
    pub hcv: ScreeningResult,
    /// Syphilis screen
    pub syphilis: ScreeningResult,
    /// Malaria screen
    pub malaria: ScreeningResult,
    /// Aggregate verdict; frozen once terminal
    pub overall_status: OverallStatus,
    /// When the lab reported
    pub tested_at: DateTimeUtc,
}

/// Each test record belongs to one collection
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// The tested collection
    #[sea_orm(
        belongs_to = "super::collection::Entity",
        from = "Column::CollectionId",
        to = "super::collection::Column::Id"
    )]
    Collection,
}

impl Related<super::collection::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Collection.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
