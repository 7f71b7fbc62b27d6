//! User entity - authenticated accounts owned by the identity service.
//!
//! The workflow only reads these rows: to resolve a recipient email and to copy
//! profile fields into a donor record when an appointment is approved.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// User account profile
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    /// Unique identifier for the user
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Display name
    pub name: Option<String>,
    /// Contact email
    pub email: Option<String>,
    /// Contact phone
    pub phone: Option<String>,
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
}

/// Users are read-only here and define no relations
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
