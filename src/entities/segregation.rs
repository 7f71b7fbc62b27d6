//! Segregation entity - one blood component split from a passed collection.
//!
//! A collection is segregated at most once per component; a unique index on
//! `(collection_id, component)` backs the duplicate check in `core::segregation`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Blood components a whole-blood collection can be split into
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum BloodComponent {
    /// Red blood cells
    #[sea_orm(string_value = "RBC")]
    #[serde(rename = "RBC")]
    Rbc,
    /// Plasma
    #[sea_orm(string_value = "Plasma")]
    Plasma,
    /// Platelets
    #[sea_orm(string_value = "Platelets")]
    Platelets,
}

impl BloodComponent {
    /// Every component, in the order they are split off
    pub const ALL: [Self; 3] = [Self::Rbc, Self::Plasma, Self::Platelets];

    /// Name as stored in `blood_segregation` and `blood_inventory`
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rbc => "RBC",
            Self::Plasma => "Plasma",
            Self::Platelets => "Platelets",
        }
    }

    /// Looks a component up by its stored name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }

    /// Share of the collected volume, in parts per thousand
    #[must_use]
    pub const fn volume_permille(self) -> i64 {
        match self {
            Self::Rbc | Self::Plasma => 450,
            Self::Platelets => 100,
        }
    }

    /// Days the component keeps after segregation
    #[must_use]
    pub const fn shelf_life_days(self) -> u64 {
        match self {
            Self::Rbc => 35,
            Self::Plasma => 365,
            Self::Platelets => 5,
        }
    }
}

/// Availability of a segregated component
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum SegregationStatus {
    /// On the shelf
    #[sea_orm(string_value = "Available")]
    Available,
}

/// Blood segregation database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "blood_segregation")]
pub struct Model {
    /// Unique identifier for the segregated component
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Source collection
    pub collection_id: i64,
    /// Component split off
    pub component: BloodComponent,
    /// Volume of this component in ml
    pub volume_ml: i32,
    /// Inventory units credited for this component
    pub units: i32,
    /// Last usable day
    pub expiry_date: Date,
    /// Availability
    pub status: SegregationStatus,
    /// Centre of the source collection
    pub centre_id: i64,
    /// When the split was recorded
    pub segregated_at: DateTimeUtc,
    /// Last change to the row
    pub updated_at: DateTimeUtc,
}

/// Each segregated component comes from one collection
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Source collection
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
