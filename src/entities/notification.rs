//! Notification entity - durable record of an attempted outbound message.
//!
//! The row is written as `Pending` before delivery is attempted. A delivery claims it
//! by moving it to `Sending`, then flips it to `Sent` or `Failed`, so a crash between
//! the steps never loses the fact that a message was owed and two deliveries never
//! send the same row.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Delivery status of a notification
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum NotificationStatus {
    /// Owed, not yet claimed by a delivery
    #[sea_orm(string_value = "Pending")]
    Pending,
    /// Claimed by a delivery attempt in progress
    #[sea_orm(string_value = "Sending")]
    Sending,
    /// Accepted by the transport
    #[sea_orm(string_value = "Sent")]
    Sent,
    /// Rejected by the transport, or no recipient could be resolved
    #[sea_orm(string_value = "Failed")]
    Failed,
}

/// What triggered the notification
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum NotificationKind {
    /// Donor requested an appointment
    #[sea_orm(string_value = "AppointmentRequested")]
    AppointmentRequested,
    /// Appointment approved with a token
    #[sea_orm(string_value = "AppointmentApproved")]
    AppointmentApproved,
    /// Appointment rejected by the centre
    #[sea_orm(string_value = "AppointmentRejected")]
    AppointmentRejected,
    /// Donor cancelled the appointment
    #[sea_orm(string_value = "AppointmentCancelled")]
    AppointmentCancelled,
    /// Donation passed screening; carries the certificate
    #[sea_orm(string_value = "TestPassed")]
    TestPassed,
    /// Donation screened reactive; advisory
    #[sea_orm(string_value = "TestReactive")]
    TestReactive,
}

/// Notification database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notifications")]
pub struct Model {
    /// Unique identifier for the notification
    #[sea_orm(primary_key)]
    pub id: i64,
    /// What triggered the message
    pub kind: NotificationKind,
    /// Linked user account
    pub user_id: Option<i64>,
    /// Linked donor
    pub donor_id: Option<i64>,
    /// Linked camp
    pub camp_id: Option<i64>,
    /// Linked appointment
    pub appointment_id: Option<i64>,
    /// Linked collection
    pub collection_id: Option<i64>,
    /// One-line summary for admin listings
    pub message: String,
    /// Email subject line
    pub subject: String,
    /// Plain-text body as sent
    #[sea_orm(column_type = "Text")]
    pub body: String,
    /// `None` defers delivery to the retry pass
    pub recipient_email: Option<String>,
    /// Delivery status
    pub status: NotificationStatus,
    /// Always `"Email"`
    pub channel: String,
    /// When the intent was recorded
    pub created_at: DateTimeUtc,
    /// When the transport accepted the message
    pub sent_at: Option<DateTimeUtc>,
}

/// Notifications carry plain ids and define no relations
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
