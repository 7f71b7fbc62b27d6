//! Sequence entity - named monotonic counters.
//! Used for the appointment queue token; each counter is one row keyed by name.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Named counter row
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sequences")]
pub struct Model {
    /// Counter name (e.g. `"appointment_token"`)
    #[sea_orm(primary_key, auto_increment = false)]
    pub name: String,
    /// Last value handed out
    pub value: i64,
    /// When the counter last advanced
    pub updated_at: DateTimeUtc,
}

/// `Sequence` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
