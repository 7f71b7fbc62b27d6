//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the tables one donation flows through, plus the
//! read-only collaborator tables (users, centres, camps) the workflow consults.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod appointment;
pub mod camp;
pub mod centre;
pub mod collection;
pub mod donor;
pub mod inventory;
pub mod notification;
pub mod segregation;
pub mod sequence;
pub mod test_record;
pub mod user;

// Re-export specific types to avoid conflicts
pub use appointment::{
    AppointmentStatus, Column as AppointmentColumn, Entity as Appointment,
    Model as AppointmentModel,
};
pub use camp::{Column as CampColumn, Entity as Camp, Model as CampModel};
pub use centre::{Column as CentreColumn, Entity as Centre, Model as CentreModel};
pub use collection::{Column as CollectionColumn, Entity as Collection, Model as CollectionModel};
pub use donor::{Column as DonorColumn, Entity as Donor, Model as DonorModel};
pub use inventory::{Column as InventoryColumn, Entity as Inventory, Model as InventoryModel};
pub use notification::{
    Column as NotificationColumn, Entity as Notification, Model as NotificationModel,
    NotificationKind, NotificationStatus,
};
pub use segregation::{
    BloodComponent, Column as SegregationColumn, Entity as Segregation,
    Model as SegregationModel, SegregationStatus,
};
pub use sequence::{Column as SequenceColumn, Entity as Sequence, Model as SequenceModel};
pub use test_record::{
    Column as TestRecordColumn, Entity as TestRecord, Model as TestRecordModel, OverallStatus,
    ScreeningResult,
};
pub use user::{Column as UserColumn, Entity as User, Model as UserModel};
