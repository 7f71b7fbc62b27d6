//! Shared test utilities for the donation workflow.
//!
//! This module provides common helper functions for setting up test databases,
//! creating test rows with sensible defaults, and observing outbound messages.

use crate::{
    config::database,
    core::{access::Principal, notification::Dispatcher},
    entities::{
        AppointmentModel, AppointmentStatus, CampModel, CentreModel, CollectionModel, DonorModel,
        UserModel, appointment, camp, centre, collection, donor, user,
    },
    errors::{Error, Result},
    notify::{CertificateFacts, CertificateRenderer, Email, Notifier, TextCertificateRenderer},
};
use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};

/// Secret used to sign bearer tokens in HTTP tests.
pub const TEST_JWT_SECRET: &str = "test-secret";

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
///
/// Uses the production connection settings, so the pool holds a single connection.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = database::connect("sqlite::memory:").await?;
    database::create_tables(&db).await?;
    Ok(db)
}

/// A file-backed `SQLite` database under the system temp directory, deleted on drop.
pub struct FileTestDb {
    /// Connection built with the production settings
    pub db: DatabaseConnection,
    path: PathBuf,
}

impl FileTestDb {
    /// Creates a fresh database file with all tables initialized.
    pub async fn create() -> Result<Self> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let path = std::env::temp_dir().join(format!(
            "donation-workflow-{}-{nanos}.sqlite",
            std::process::id()
        ));
        let db = database::connect(&format!("sqlite://{}?mode=rwc", path.display())).await?;
        database::create_tables(&db).await?;
        Ok(Self { db, path })
    }
}

impl Drop for FileTestDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// The calendar date `days` days before today (UTC).
pub fn days_ago(days: u64) -> NaiveDate {
    let today = Utc::now().date_naive();
    today.checked_sub_days(Days::new(days)).unwrap_or(today)
}

/// Creates a user account.
///
/// # Defaults
/// * `phone`: `"9000000000"`
/// * `age`: 30
/// * `state_id` / `district_id`: 1
pub async fn create_test_user(
    db: &DatabaseConnection,
    name: &str,
    email: Option<&str>,
) -> Result<UserModel> {
    Ok(user::ActiveModel {
        name: Set(Some(name.to_string())),
        email: Set(email.map(str::to_string)),
        phone: Set(Some("9000000000".to_string())),
        age: Set(Some(30)),
        gender: Set(Some("F".to_string())),
        address: Set(Some("1 Test Street".to_string())),
        state_id: Set(Some(1)),
        district_id: Set(Some(1)),
        ..Default::default()
    }
    .insert(db)
    .await?)
}

/// Creates a centre in `district_id`.
pub async fn create_test_centre(
    db: &DatabaseConnection,
    name: &str,
    district_id: i64,
) -> Result<CentreModel> {
    Ok(centre::ActiveModel {
        name: Set(name.to_string()),
        district_id: Set(district_id),
        ..Default::default()
    }
    .insert(db)
    .await?)
}

/// Creates a camp run by `centre_id`.
pub async fn create_test_camp(
    db: &DatabaseConnection,
    centre_id: i64,
    name: &str,
) -> Result<CampModel> {
    Ok(camp::ActiveModel {
        centre_id: Set(centre_id),
        name: Set(name.to_string()),
        camp_date: Set(Some(days_ago(0))),
        ..Default::default()
    }
    .insert(db)
    .await?)
}

/// Creates a donor with sensible defaults.
///
/// # Defaults
/// * `email`: `"donor@test"`
/// * `blood_group_id`: 3
pub async fn create_test_donor(
    db: &DatabaseConnection,
    user_id: Option<i64>,
    centre_id: i64,
) -> Result<DonorModel> {
    create_custom_donor(db, user_id, centre_id, Some("donor@test"), Some(3)).await
}

/// Creates a donor with custom contact and blood group.
pub async fn create_custom_donor(
    db: &DatabaseConnection,
    user_id: Option<i64>,
    centre_id: i64,
    email: Option<&str>,
    blood_group_id: Option<i64>,
) -> Result<DonorModel> {
    let now = Utc::now();
    Ok(donor::ActiveModel {
        user_id: Set(user_id),
        donor_name: Set(Some("Test Donor".to_string())),
        email: Set(email.map(str::to_string)),
        centre_id: Set(Some(centre_id)),
        blood_group_id: Set(blood_group_id),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?)
}

/// Inserts an Approved appointment for today, bypassing the admission checks.
pub async fn create_approved_appointment(
    db: &DatabaseConnection,
    user_id: i64,
    centre_id: i64,
) -> Result<AppointmentModel> {
    let now = Utc::now();
    let date = days_ago(0);
    Ok(appointment::ActiveModel {
        user_id: Set(user_id),
        district_id: Set(1),
        centre_id: Set(centre_id),
        appointment_date: Set(Some(date)),
        appointment_time: Set(Some("10:00".to_string())),
        weight: Set(Some(60.0)),
        under_medication: Set(false),
        last_donation_date: Set(days_ago(200)),
        status: Set(AppointmentStatus::Approved),
        active_slot: Set(Some(date)),
        token_no: Set(Some(1)),
        rejection_reason: Set(None),
        approved_by: Set(Some(1)),
        approved_at: Set(Some(now)),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?)
}

/// Creates a 450ml collection at `centre_id`, collected now.
pub async fn create_test_collection(
    db: &DatabaseConnection,
    donor_id: i64,
    centre_id: i64,
) -> Result<CollectionModel> {
    let now = Utc::now();
    Ok(collection::ActiveModel {
        donor_id: Set(donor_id),
        centre_id: Set(centre_id),
        camp_id: Set(None),
        bag_size: Set("450ml".to_string()),
        collected_amount: Set(450),
        lot_number: Set(None),
        collection_date: Set(now),
        donor_reaction: Set(None),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?)
}

/// Notifier that records every message and reports success.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Email>>,
}

impl RecordingNotifier {
    /// Messages delivered so far, in order.
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, email: &Email) -> bool {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(email.clone());
        }
        true
    }
}

/// Renderer that always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingRenderer;

impl CertificateRenderer for FailingRenderer {
    fn render(&self, _facts: &CertificateFacts<'_>) -> Result<Vec<u8>> {
        Err(Error::Config {
            message: "renderer unavailable".to_string(),
        })
    }
}

/// Dispatcher over `notifier` with the text certificate and a test portal URL.
pub fn test_dispatcher(notifier: Arc<dyn Notifier>) -> Dispatcher {
    Dispatcher::new(
        notifier,
        Arc::new(TextCertificateRenderer),
        "https://portal.test",
    )
}

/// Signs a bearer token for `principal` with [`TEST_JWT_SECRET`].
pub fn mint_token(principal: &Principal) -> Result<String> {
    crate::api::auth::issue_token(principal, TEST_JWT_SECRET, 3600)
}
