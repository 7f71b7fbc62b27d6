//! Appointment entity - a donor's request for a donation slot.
//!
//! Status moves `Pending -> Approved | Rejected | Cancelled` and
//! `Approved -> Cancelled | Completed`. `active_slot` mirrors `appointment_date`
//! while the appointment is Pending or Approved and is cleared otherwise; a unique
//! index on `(user_id, active_slot)` enforces one active appointment per user per date.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle status of an appointment
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum AppointmentStatus {
    /// Awaiting staff review
    #[sea_orm(string_value = "Pending")]
    Pending,
    /// Accepted and holding a token
    #[sea_orm(string_value = "Approved")]
    Approved,
    /// Declined by staff
    #[sea_orm(string_value = "Rejected")]
    Rejected,
    /// Withdrawn by the donor
    #[sea_orm(string_value = "Cancelled")]
    Cancelled,
    /// Fulfilled by a recorded collection
    #[sea_orm(string_value = "Completed")]
    Completed,
}

impl AppointmentStatus {
    /// Statuses that occupy the user's slot for the appointment date.
    pub const ACTIVE: [Self; 2] = [Self::Pending, Self::Approved];

    /// Whether this status holds the user's slot for its date
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }

    /// Display name as stored in the database
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::Cancelled => "Cancelled",
            Self::Completed => "Completed",
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Appointment database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "appointments")]
pub struct Model {
    /// Unique identifier for the appointment
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owning user; staff never change this
    pub user_id: i64,
    /// District of the centre
    pub district_id: i64,
    /// Centre the donor will visit
    pub centre_id: i64,
    /// Requested (or, after approval, scheduled) date
    pub appointment_date: Option<Date>,
    /// Free-form time slot
    pub appointment_time: Option<String>,
    /// Donor weight in kg at request time
    pub weight: Option<f64>,
    /// Self-declared medication
    pub under_medication: bool,
    /// Previous donation, as declared
    pub last_donation_date: Date,
    /// Lifecycle status
    pub status: AppointmentStatus,
    /// Copy of `appointment_date` while the status is active, `None` otherwise
    #[serde(skip)]
    pub active_slot: Option<Date>,
    /// Queue token, assigned on approval
    pub token_no: Option<i64>,
    /// Reason given on rejection
    pub rejection_reason: Option<String>,
    /// Staff member who approved or rejected the request
    pub approved_by: Option<i64>,
    /// When the request was approved or rejected
    pub approved_at: Option<DateTimeUtc>,
    /// When the request was made
    pub created_at: DateTimeUtc,
    /// Last change to the row
    pub updated_at: DateTimeUtc,
}

/// Each appointment targets one centre
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Centre the appointment is booked at
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
