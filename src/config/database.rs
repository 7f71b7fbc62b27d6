//! Database configuration module for the donation workflow.
//!
//! This module handles database connections and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the schema always matches the Rust structs. The composite unique indexes that the
//! workflow relies on for its invariants are created here as well.

use crate::entities::{
    Appointment, AppointmentColumn, Camp, Centre, Collection, Donor, Inventory, InventoryColumn,
    Notification, Segregation, SegregationColumn, Sequence, TestRecord, User,
};
use crate::errors::Result;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema,
    sea_query::{Index, IndexCreateStatement},
};
use tracing::{debug, info};

const DEFAULT_DATABASE_URL: &str = "sqlite://data/donation_workflow.sqlite?mode=rwc";

/// Gets the database URL from environment variable or returns default `SQLite` path.
///
/// This function looks for `DATABASE_URL` in the environment and falls back to
/// a default local `SQLite` file if not found.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the database named by `DATABASE_URL`.
///
/// Falls back to a default local `SQLite` file if no environment variable is set.
pub async fn create_connection() -> Result<DatabaseConnection> {
    connect(&get_database_url()).await
}

/// Connects to `database_url`.
///
/// `SQLite` pools are held at exactly one connection. `SQLite` has no row locks and
/// deferred transactions only take the write lock at their first write, so two pooled
/// connections locking the same row would fail with `SQLITE_BUSY` instead of queueing.
/// With one connection, transactions queue on the pool and run one after another.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection> {
    info!("Connecting to database");
    let mut options = ConnectOptions::new(database_url);
    options.sqlx_logging(false);
    if database_url.starts_with("sqlite:") {
        options.max_connections(1).min_connections(1);
    }
    Database::connect(options).await.map_err(Into::into)
}

/// Creates all workflow tables and indexes if they do not exist yet.
///
/// Tables come from the entity definitions. Composite unique indexes are added on top:
/// one active appointment per `(user_id, active_slot)`, one inventory bucket per
/// `(centre_id, blood_group_id, component)` and one segregation per `(collection_id, component)`.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    // Referenced tables first so foreign keys resolve on backends that check at creation
    create_table(db, &schema, User).await?;
    create_table(db, &schema, Centre).await?;
    create_table(db, &schema, Camp).await?;
    create_table(db, &schema, Donor).await?;
    create_table(db, &schema, Appointment).await?;
    create_table(db, &schema, Collection).await?;
    create_table(db, &schema, TestRecord).await?;
    create_table(db, &schema, Notification).await?;
    create_table(db, &schema, Inventory).await?;
    create_table(db, &schema, Segregation).await?;
    create_table(db, &schema, Sequence).await?;

    let indexes: [IndexCreateStatement; 3] = [
        Index::create()
            .name("ux_appointments_active_slot")
            .table(Appointment)
            .col(AppointmentColumn::UserId)
            .col(AppointmentColumn::ActiveSlot)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("ux_blood_inventory_bucket")
            .table(Inventory)
            .col(InventoryColumn::CentreId)
            .col(InventoryColumn::BloodGroupId)
            .col(InventoryColumn::Component)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("ux_blood_segregation_component")
            .table(Segregation)
            .col(SegregationColumn::CollectionId)
            .col(SegregationColumn::Component)
            .unique()
            .if_not_exists()
            .to_owned(),
    ];
    for index in &indexes {
        db.execute(builder.build(index)).await?;
    }

    info!("Database schema is up to date");
    Ok(())
}

async fn create_table<E>(db: &DatabaseConnection, schema: &Schema, entity: E) -> Result<()>
where
    E: EntityTrait,
{
    let builder = db.get_database_backend();
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    debug!("Ensuring table {}", entity.table_name());
    db.execute(builder.build(&statement)).await?;
    Ok(())
}
