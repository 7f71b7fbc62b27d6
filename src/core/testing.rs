//! Lab testing state machine.
//!
//! A test record holds five pathogen screens and an overall status
//! (`Pending -> Passed | Reactive`). Lab results may arrive over several calls; each
//! call merges the screens it supplies into the stored record. The first call that
//! moves the overall status to a terminal value fires the downstream effects exactly
//! once:
//!
//! - **Passed**: the donor's `next_eligible_date` advances to the test date plus 90 days,
//!   one whole-blood unit is credited to the centre's inventory, and a certificate email
//!   is owed.
//! - **Reactive**: an advisory email naming the reactive screens is owed.
//!
//! The collection row lock (`FOR UPDATE` on Postgres, the single pooled connection on
//! `SQLite`) serializes concurrent submissions for one collection, so a second submission
//! always sees the first one's committed result and cannot fire the effects again. Donor, inventory and notification-intent writes share the transaction;
//! certificate rendering and delivery happen only after commit.

use crate::{
    config::settings::{ListingSettings, OverallStatusPolicy},
    core::{
        access::{Principal, Role, effective_centre_filter, require_centre_access, require_role},
        collection::COLLECTION_ROLES,
        eligibility::{next_eligible_date, parse_instant},
        inventory::{WHOLE_BLOOD, credit_unit},
        notification::{self, Dispatcher, Linkage, PendingDelivery},
        paging::{DateRange, Page, PageRequest},
    },
    entities::{
        Collection, CollectionModel, Donor, DonorModel, NotificationStatus, OverallStatus,
        ScreeningResult, TestRecord, TestRecordModel, User, collection, donor, test_record,
    },
    errors::{Error, Result},
    notify::{Attachment, CertificateFacts},
};
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    DatabaseTransaction, PaginatorTrait, QueryOrder, QuerySelect, Set, TransactionTrait,
    TryIntoModel, prelude::*,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

/// Roles allowed to submit lab results
pub const TESTING_ROLES: [Role; 3] = [Role::LabStaff, Role::Admin, Role::SuperAdmin];

/// Lab results as submitted; absent fields keep their stored value
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestingUpdate {
    /// Blood group found by the lab
    pub blood_group_id: Option<i64>,
    /// HIV screen
    pub hiv: Option<ScreeningResult>,
    /// Hepatitis B surface antigen screen
    pub hbsag: Option<ScreeningResult>,
    /// Hepatitis C screen
    pub hcv: Option<ScreeningResult>,
    /// Syphilis screen
    pub syphilis: Option<ScreeningResult>,
    /// Malaria screen
    pub malaria: Option<ScreeningResult>,
    /// Defaults to the stored value, or now for a new record
    pub tested_at: Option<String>,
}

impl TestingUpdate {
    /// Screens supplied in this call, by display name
    fn supplied(&self) -> [(&'static str, Option<ScreeningResult>); 5] {
        [
            ("HIV", self.hiv),
            ("HBSAG", self.hbsag),
            ("HCV", self.hcv),
            ("SYPHILIS", self.syphilis),
            ("MALARIA", self.malaria),
        ]
    }
}

/// The five screens of one test record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScreeningPanel {
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
}

impl Default for ScreeningPanel {
    fn default() -> Self {
        Self {
            hiv: ScreeningResult::Pending,
            hbsag: ScreeningResult::Pending,
            hcv: ScreeningResult::Pending,
            syphilis: ScreeningResult::Pending,
            malaria: ScreeningResult::Pending,
        }
    }
}

impl ScreeningPanel {
    fn of(record: &TestRecordModel) -> Self {
        Self {
            hiv: record.hiv,
            hbsag: record.hbsag,
            hcv: record.hcv,
            syphilis: record.syphilis,
            malaria: record.malaria,
        }
    }

    /// Overlays the screens supplied in `update`.
    #[must_use]
    pub fn merged_with(self, update: &TestingUpdate) -> Self {
        Self {
            hiv: update.hiv.unwrap_or(self.hiv),
            hbsag: update.hbsag.unwrap_or(self.hbsag),
            hcv: update.hcv.unwrap_or(self.hcv),
            syphilis: update.syphilis.unwrap_or(self.syphilis),
            malaria: update.malaria.unwrap_or(self.malaria),
        }
    }

    fn named(self) -> [(&'static str, ScreeningResult); 5] {
        [
            ("HIV", self.hiv),
            ("HBSAG", self.hbsag),
            ("HCV", self.hcv),
            ("SYPHILIS", self.syphilis),
            ("MALARIA", self.malaria),
        ]
    }

    /// Names of the reactive screens, upper-cased
    #[must_use]
    pub fn reactive_tests(self) -> Vec<&'static str> {
        self.named()
            .into_iter()
            .filter(|(_, result)| *result == ScreeningResult::Reactive)
            .map(|(name, _)| name)
            .collect()
    }

    /// Whether every screen has a result
    #[must_use]
    pub fn is_complete(self) -> bool {
        self.named().iter().all(|(_, result)| result.is_resolved())
    }
}

/// Derives the overall status of a non-terminal record.
///
/// - `Eager` looks only at the screens supplied in this call: any Reactive gives
///   Reactive, anything else (including supplying none) gives Passed.
/// - `Strict` looks at the merged record: any Reactive gives Reactive, all five
///   resolved gives Passed, otherwise the record stays Pending.
#[must_use]
pub fn compute_overall_status(
    policy: OverallStatusPolicy,
    update: &TestingUpdate,
    merged: ScreeningPanel,
) -> OverallStatus {
    match policy {
        OverallStatusPolicy::Eager => {
            let any_reactive = update
                .supplied()
                .iter()
                .any(|(_, result)| *result == Some(ScreeningResult::Reactive));
            if any_reactive {
                OverallStatus::Reactive
            } else {
                OverallStatus::Passed
            }
        }
        OverallStatusPolicy::Strict => {
            if !merged.reactive_tests().is_empty() {
                OverallStatus::Reactive
            } else if merged.is_complete() {
                OverallStatus::Passed
            } else {
                OverallStatus::Pending
            }
        }
    }
}

/// Reactive screens reported for the status decision under `policy`.
fn reactive_for(
    policy: OverallStatusPolicy,
    update: &TestingUpdate,
    merged: ScreeningPanel,
) -> Vec<String> {
    match policy {
        OverallStatusPolicy::Eager => update
            .supplied()
            .into_iter()
            .filter(|(_, result)| *result == Some(ScreeningResult::Reactive))
            .map(|(name, _)| name.to_string())
            .collect(),
        OverallStatusPolicy::Strict => merged
            .reactive_tests()
            .into_iter()
            .map(str::to_string)
            .collect(),
    }
}

/// Result of one lab submission
#[derive(Debug, Clone, Serialize)]
pub struct TestingOutcome {
    /// Status after this call
    pub overall_status: OverallStatus,
    /// Whether this call moved the record into a terminal status
    pub transitioned: bool,
    /// Set when this call passed the donation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_eligible_date: Option<NaiveDate>,
    /// Reactive screens behind a Reactive status
    pub reactive_tests: Vec<String>,
    /// Stored record after the merge
    #[serde(skip)]
    pub test_record: TestRecordModel,
    /// Outcome of the delivery attempt, when a notification was owed
    #[serde(skip)]
    pub notification_status: Option<NotificationStatus>,
}

/// Effects owed after commit
struct AfterCommit {
    pending: PendingDelivery,
    donor: Option<DonorModel>,
    collection: CollectionModel,
}

/// Records lab results for a collection and fires the terminal-transition effects once.
#[instrument(skip(db, dispatcher, update), fields(actor_id = actor.subject_id))]
pub async fn update_testing(
    db: &DatabaseConnection,
    dispatcher: &Dispatcher,
    policy: OverallStatusPolicy,
    actor: &Principal,
    collection_id: i64,
    update: TestingUpdate,
) -> Result<TestingOutcome> {
    require_role(actor, &TESTING_ROLES)?;

    let supplied_tested_at: Option<DateTime<Utc>> = match update.tested_at.as_deref() {
        Some(raw) if !raw.trim().is_empty() => Some(parse_instant("tested_at", raw)?.and_utc()),
        _ => None,
    };

    let txn = db.begin().await?;

    let found = Collection::find_by_id(collection_id)
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("Collection", collection_id))?;
    require_centre_access(actor, found.centre_id)?;

    let existing = TestRecord::find()
        .filter(test_record::Column::CollectionId.eq(collection_id))
        .lock_exclusive()
        .one(&txn)
        .await?;

    let previous_status = existing
        .as_ref()
        .map_or(OverallStatus::Pending, |r| r.overall_status);
    let merged = existing
        .as_ref()
        .map_or_else(ScreeningPanel::default, ScreeningPanel::of)
        .merged_with(&update);

    let (overall_status, transitioned) = if previous_status.is_terminal() {
        (previous_status, false)
    } else {
        let computed = compute_overall_status(policy, &update, merged);
        (computed, computed.is_terminal())
    };

    let tested_at = supplied_tested_at
        .or_else(|| existing.as_ref().map(|r| r.tested_at))
        .unwrap_or_else(Utc::now);
    let blood_group_id = update
        .blood_group_id
        .or_else(|| existing.as_ref().and_then(|r| r.blood_group_id));

    let mut row: test_record::ActiveModel = match existing {
        Some(record) => record.into(),
        None => test_record::ActiveModel {
            collection_id: Set(collection_id),
            ..Default::default()
        },
    };
    row.blood_group_id = Set(blood_group_id);
    row.hiv = Set(merged.hiv);
    row.hbsag = Set(merged.hbsag);
    row.hcv = Set(merged.hcv);
    row.syphilis = Set(merged.syphilis);
    row.malaria = Set(merged.malaria);
    row.overall_status = Set(overall_status);
    row.tested_at = Set(tested_at);
    let record = row.save(&txn).await?.try_into_model()?;

    let reactive_tests = match (overall_status, transitioned) {
        (OverallStatus::Reactive, true) => reactive_for(policy, &update, merged),
        (OverallStatus::Reactive, false) => merged
            .reactive_tests()
            .into_iter()
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    let mut next_date = None;
    let mut after_commit = None;
    if transitioned {
        let (pending, donor, next) = apply_transition(
            &txn,
            dispatcher,
            &found,
            &record,
            overall_status,
            &reactive_tests,
        )
        .await?;
        next_date = next;
        after_commit = Some(AfterCommit {
            pending,
            donor,
            collection: found,
        });
    }

    txn.commit().await?;

    info!(
        collection_id,
        ?overall_status,
        transitioned,
        "Testing updated"
    );

    let mut notification_status = None;
    if let Some(AfterCommit {
        mut pending,
        donor,
        collection,
    }) = after_commit
    {
        if overall_status == OverallStatus::Passed {
            if let Some(donor) = donor.as_ref() {
                if let Some(attachment) =
                    render_certificate(dispatcher, donor, &collection, &record, next_date)
                {
                    pending.attachments.push(attachment);
                }
            }
        }
        notification_status = dispatcher.deliver_best_effort(db, pending).await;
    }

    Ok(TestingOutcome {
        overall_status,
        transitioned,
        next_eligible_date: next_date,
        reactive_tests,
        test_record: record,
        notification_status,
    })
}

/// Applies the in-transaction effects of entering a terminal status.
async fn apply_transition(
    txn: &DatabaseTransaction,
    dispatcher: &Dispatcher,
    found: &CollectionModel,
    record: &TestRecordModel,
    overall_status: OverallStatus,
    reactive_tests: &[String],
) -> Result<(PendingDelivery, Option<DonorModel>, Option<NaiveDate>)> {
    let mut donor = Donor::find_by_id(found.donor_id).one(txn).await?;
    if donor.is_none() {
        warn!(donor_id = found.donor_id, "Donor missing for tested collection");
    }

    let tested_on = record.tested_at.date_naive();
    let mut next_date = None;

    if overall_status == OverallStatus::Passed {
        let next = next_eligible_date(tested_on);
        next_date = Some(next);

        if let Some(current) = donor.take() {
            let known_group = current.blood_group_id;
            let mut active: donor::ActiveModel = current.into();
            active.next_eligible_date = Set(Some(next));
            if known_group.is_none() && record.blood_group_id.is_some() {
                active.blood_group_id = Set(record.blood_group_id);
            }
            active.updated_at = Set(Utc::now());
            donor = Some(active.update(txn).await?);
        }

        let group = record
            .blood_group_id
            .or_else(|| donor.as_ref().and_then(|d| d.blood_group_id));
        match group {
            Some(blood_group_id) => {
                credit_unit(txn, found.centre_id, blood_group_id, WHOLE_BLOOD).await?;
            }
            None => warn!(
                collection_id = found.id,
                "Blood group unknown, inventory not credited"
            ),
        }
    }

    let name = donor.as_ref().and_then(|d| d.donor_name.clone());
    let message = if overall_status == OverallStatus::Passed {
        notification::test_passed(
            name.as_deref(),
            dispatcher.portal_url(),
            found.donor_id,
            found.id,
            tested_on,
        )
    } else {
        let names: Vec<&str> = reactive_tests.iter().map(String::as_str).collect();
        notification::test_reactive(name.as_deref(), found.id, tested_on, &names)
    };

    let recipient = match donor.as_ref() {
        Some(d) => match d.email.clone().filter(|e| !e.trim().is_empty()) {
            Some(email) => Some(email),
            None => match d.user_id {
                Some(user_id) => User::find_by_id(user_id)
                    .one(txn)
                    .await?
                    .and_then(|u| u.email),
                None => None,
            },
        },
        None => None,
    };

    let pending = dispatcher
        .record_intent(
            txn,
            message,
            Linkage {
                user_id: donor.as_ref().and_then(|d| d.user_id),
                donor_id: donor.as_ref().map(|d| d.id),
                camp_id: found.camp_id,
                appointment_id: None,
                collection_id: Some(found.id),
            },
            recipient,
        )
        .await?;

    Ok((pending, donor, next_date))
}

/// Renders the certificate; a failure only costs the attachment.
fn render_certificate(
    dispatcher: &Dispatcher,
    donor: &DonorModel,
    collection: &CollectionModel,
    record: &TestRecordModel,
    next_eligible_date: Option<NaiveDate>,
) -> Option<Attachment> {
    let renderer = dispatcher.renderer();
    let facts = CertificateFacts {
        donor,
        collection,
        test_record: record,
        overall_status: record.overall_status,
        next_eligible_date,
    };
    match renderer.render(&facts) {
        Ok(content) => Some(Attachment {
            filename: format!(
                "certificate_{}.{}",
                collection.id,
                renderer.file_extension()
            ),
            content_type: renderer.content_type().to_string(),
            content,
        }),
        Err(e) => {
            error!(
                collection_id = collection.id,
                "Certificate rendering failed, sending without attachment: {e}"
            );
            None
        }
    }
}

/// Filters accepted by [`list_testing`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestingFilter {
    /// Ignored for centre-scoped roles
    pub centre_id: Option<i64>,
    /// Only records for this camp
    pub camp_id: Option<i64>,
    /// Only records with this status
    pub overall_status: Option<OverallStatus>,
    /// Inclusive lower bound on `tested_at`
    pub from: Option<String>,
    /// Inclusive upper bound on `tested_at`
    pub to: Option<String>,
    /// 1-based page number
    pub page: Option<u64>,
    /// Rows per page
    pub limit: Option<u64>,
}

/// A test record with the collection fields used for scoping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestingView {
    /// The test record row
    #[serde(flatten)]
    pub test: TestRecordModel,
    /// Donor of the tested collection
    pub donor_id: Option<i64>,
    /// Centre of the tested collection
    pub centre_id: Option<i64>,
    /// Camp of the tested collection
    pub camp_id: Option<i64>,
}

impl From<(TestRecordModel, Option<CollectionModel>)> for TestingView {
    fn from((test, collection): (TestRecordModel, Option<CollectionModel>)) -> Self {
        Self {
            test,
            donor_id: collection.as_ref().map(|c| c.donor_id),
            centre_id: collection.as_ref().map(|c| c.centre_id),
            camp_id: collection.and_then(|c| c.camp_id),
        }
    }
}

/// Lists test records, newest test first. Scoping matches `list_collections`.
pub async fn list_testing(
    db: &DatabaseConnection,
    actor: &Principal,
    filter: TestingFilter,
    listing: ListingSettings,
) -> Result<Page<TestingView>> {
    require_role(actor, &COLLECTION_ROLES)?;

    let range = DateRange::parse(filter.from.as_deref(), filter.to.as_deref())?;
    let request = PageRequest::resolve(filter.page, filter.limit, listing)?;

    let mut query = TestRecord::find().find_also_related(Collection);
    if let Some(centre_id) = effective_centre_filter(actor, filter.centre_id) {
        query = query.filter(collection::Column::CentreId.eq(centre_id));
    }
    if let Some(camp_id) = filter.camp_id {
        query = query.filter(collection::Column::CampId.eq(camp_id));
    }
    if let Some(status) = filter.overall_status {
        query = query.filter(test_record::Column::OverallStatus.eq(status));
    }
    if let Some(start) = range.start {
        query = query.filter(test_record::Column::TestedAt.gte(start));
    }
    if let Some(end) = range.end {
        query = query.filter(test_record::Column::TestedAt.lt(end));
    }

    let paginator = query
        .order_by_desc(test_record::Column::TestedAt)
        .order_by_desc(test_record::Column::Id)
        .paginate(db, request.limit);
    let total = paginator.num_items().await?;
    let rows = paginator.fetch_page(request.index()).await?;

    Ok(Page::new(
        request,
        total,
        rows.into_iter().map(TestingView::from).collect(),
    ))
}

/// Fetches one test record by id.
pub async fn get_testing(
    db: &DatabaseConnection,
    actor: &Principal,
    test_id: i64,
) -> Result<TestingView> {
    require_role(actor, &COLLECTION_ROLES)?;

    let view = TestRecord::find_by_id(test_id)
        .find_also_related(Collection)
        .one(db)
        .await?
        .map(TestingView::from)
        .ok_or_else(|| Error::not_found("Test record", test_id))?;

    if let Some(centre_id) = view.centre_id {
        require_centre_access(actor, centre_id)?;
    }
    Ok(view)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{
        entities::{Inventory, Notification, NotificationKind},
        notify::{DisabledNotifier, Notifier},
        test_utils::{
            FailingRenderer, FileTestDb, RecordingNotifier, create_custom_donor,
            create_test_centre, create_test_collection, create_test_user, setup_test_db,
            test_dispatcher,
        },
    };
    use std::sync::Arc;

    const NR: ScreeningResult = ScreeningResult::NonReactive;

    fn all_clear(tested_at: &str) -> TestingUpdate {
        TestingUpdate {
            blood_group_id: Some(3),
            hiv: Some(NR),
            hbsag: Some(NR),
            hcv: Some(NR),
            syphilis: Some(NR),
            malaria: Some(NR),
            tested_at: Some(tested_at.to_string()),
        }
    }

    struct Fixture {
        db: DatabaseConnection,
        centre_id: i64,
        donor_id: i64,
        collection_id: i64,
    }

    async fn fixture(email: Option<&str>) -> Result<Fixture> {
        let db = setup_test_db().await?;
        let user = create_test_user(&db, "Asha", None).await?;
        let centre = create_test_centre(&db, "City Centre", 1).await?;
        let donor = create_custom_donor(&db, Some(user.id), centre.id, email, None).await?;
        let collection = create_test_collection(&db, donor.id, centre.id).await?;
        Ok(Fixture {
            db,
            centre_id: centre.id,
            donor_id: donor.id,
            collection_id: collection.id,
        })
    }

    fn lab(centre_id: i64) -> Principal {
        Principal::new(50, Role::LabStaff, Some(centre_id))
    }

    #[test]
    fn test_eager_policy_uses_only_supplied_screens() {
        let only_hiv = TestingUpdate {
            hiv: Some(NR),
            ..TestingUpdate::default()
        };
        let merged = ScreeningPanel::default().merged_with(&only_hiv);
        assert_eq!(
            compute_overall_status(OverallStatusPolicy::Eager, &only_hiv, merged),
            OverallStatus::Passed
        );
        assert_eq!(
            compute_overall_status(OverallStatusPolicy::Strict, &only_hiv, merged),
            OverallStatus::Pending
        );

        // A stored Reactive is invisible to the eager policy when not resubmitted
        let stored = ScreeningPanel {
            malaria: ScreeningResult::Reactive,
            ..ScreeningPanel::default()
        }
        .merged_with(&only_hiv);
        assert_eq!(
            compute_overall_status(OverallStatusPolicy::Eager, &only_hiv, stored),
            OverallStatus::Passed
        );
        assert_eq!(
            compute_overall_status(OverallStatusPolicy::Strict, &only_hiv, stored),
            OverallStatus::Reactive
        );
    }

    #[test]
    fn test_any_reactive_screen_is_reactive() {
        for index in 0..5 {
            let mut update = all_clear("2025-03-01");
            let slot = match index {
                0 => &mut update.hiv,
                1 => &mut update.hbsag,
                2 => &mut update.hcv,
                3 => &mut update.syphilis,
                _ => &mut update.malaria,
            };
            *slot = Some(ScreeningResult::Reactive);
            let merged = ScreeningPanel::default().merged_with(&update);
            for policy in [OverallStatusPolicy::Eager, OverallStatusPolicy::Strict] {
                assert_eq!(
                    compute_overall_status(policy, &update, merged),
                    OverallStatus::Reactive
                );
            }
        }
    }

    #[tokio::test]
    async fn test_passed_transition_fires_effects() -> Result<()> {
        let f = fixture(Some("asha@test")).await?;
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = test_dispatcher(notifier.clone());

        let outcome = update_testing(
            &f.db,
            &dispatcher,
            OverallStatusPolicy::Eager,
            &lab(f.centre_id),
            f.collection_id,
            all_clear("2025-03-01"),
        )
        .await?;

        assert_eq!(outcome.overall_status, OverallStatus::Passed);
        assert!(outcome.transitioned);
        assert!(outcome.reactive_tests.is_empty());
        let expected_next = NaiveDate::from_ymd_opt(2025, 5, 30);
        assert_eq!(outcome.next_eligible_date, expected_next);
        assert_eq!(outcome.notification_status, Some(NotificationStatus::Sent));

        let donor = Donor::find_by_id(f.donor_id).one(&f.db).await?.unwrap();
        assert_eq!(donor.next_eligible_date, expected_next);
        assert_eq!(donor.blood_group_id, Some(3));

        let buckets = Inventory::find().all(&f.db).await?;
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].units_available, 1);
        assert_eq!(buckets[0].blood_group_id, 3);
        assert_eq!(buckets[0].component, WHOLE_BLOOD);

        let rows = Notification::find().all(&f.db).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, NotificationKind::TestPassed);
        assert_eq!(rows[0].status, NotificationStatus::Sent);
        assert_eq!(rows[0].collection_id, Some(f.collection_id));

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].attachments.len(), 1);
        assert_eq!(
            sent[0].attachments[0].filename,
            format!("certificate_{}.txt", f.collection_id)
        );
        assert!(
            sent[0]
                .text_body
                .contains(&format!("/donor/donations/{}", f.donor_id))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_reactive_transition_lists_tests_and_keeps_eligibility() -> Result<()> {
        let f = fixture(Some("asha@test")).await?;
        let dispatcher = test_dispatcher(Arc::new(RecordingNotifier::default()));

        let mut update = all_clear("2025-03-01");
        update.hbsag = Some(ScreeningResult::Reactive);
        let outcome = update_testing(
            &f.db,
            &dispatcher,
            OverallStatusPolicy::Eager,
            &lab(f.centre_id),
            f.collection_id,
            update,
        )
        .await?;

        assert_eq!(outcome.overall_status, OverallStatus::Reactive);
        assert_eq!(outcome.reactive_tests, vec!["HBSAG".to_string()]);
        assert!(outcome.next_eligible_date.is_none());

        let donor = Donor::find_by_id(f.donor_id).one(&f.db).await?.unwrap();
        assert!(donor.next_eligible_date.is_none());
        assert_eq!(Inventory::find().count(&f.db).await?, 0);

        let rows = Notification::find().all(&f.db).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, NotificationKind::TestReactive);
        assert!(rows[0].body.contains("HBSAG"));
        Ok(())
    }

    #[tokio::test]
    async fn test_terminal_status_is_frozen() -> Result<()> {
        let f = fixture(Some("asha@test")).await?;
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = test_dispatcher(notifier.clone());
        let actor = lab(f.centre_id);

        update_testing(
            &f.db,
            &dispatcher,
            OverallStatusPolicy::Eager,
            &actor,
            f.collection_id,
            all_clear("2025-03-01"),
        )
        .await?;

        let late_reactive = TestingUpdate {
            malaria: Some(ScreeningResult::Reactive),
            tested_at: Some("2025-04-01".to_string()),
            ..TestingUpdate::default()
        };
        let outcome = update_testing(
            &f.db,
            &dispatcher,
            OverallStatusPolicy::Eager,
            &actor,
            f.collection_id,
            late_reactive,
        )
        .await?;

        assert_eq!(outcome.overall_status, OverallStatus::Passed);
        assert!(!outcome.transitioned);
        assert!(outcome.next_eligible_date.is_none());
        assert_eq!(outcome.test_record.malaria, ScreeningResult::Reactive);

        let donor = Donor::find_by_id(f.donor_id).one(&f.db).await?.unwrap();
        assert_eq!(donor.next_eligible_date, NaiveDate::from_ymd_opt(2025, 5, 30));
        assert_eq!(Notification::find().count(&f.db).await?, 1);
        assert_eq!(Inventory::find().one(&f.db).await?.unwrap().units_available, 1);
        assert_eq!(notifier.sent().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_submissions_fire_effects_once() -> Result<()> {
        let f = fixture(Some("asha@test")).await?;
        let dispatcher = test_dispatcher(Arc::new(RecordingNotifier::default()));
        let actor = lab(f.centre_id);

        let (first, second) = tokio::join!(
            update_testing(
                &f.db,
                &dispatcher,
                OverallStatusPolicy::Eager,
                &actor,
                f.collection_id,
                all_clear("2025-03-01"),
            ),
            update_testing(
                &f.db,
                &dispatcher,
                OverallStatusPolicy::Eager,
                &actor,
                f.collection_id,
                all_clear("2025-03-10"),
            )
        );
        let (first, second) = (first?, second?);

        assert_eq!(
            [first.transitioned, second.transitioned]
                .iter()
                .filter(|t| **t)
                .count(),
            1
        );
        let winner = if first.transitioned { &first } else { &second };

        assert_eq!(TestRecord::find().count(&f.db).await?, 1);
        assert_eq!(Notification::find().count(&f.db).await?, 1);
        assert_eq!(Inventory::find().one(&f.db).await?.unwrap().units_available, 1);
        let donor = Donor::find_by_id(f.donor_id).one(&f.db).await?.unwrap();
        assert_eq!(donor.next_eligible_date, winner.next_eligible_date);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_submissions_queue_on_file_database() -> Result<()> {
        let file = FileTestDb::create().await?;
        let db = &file.db;
        let user = create_test_user(db, "Asha", None).await?;
        let centre = create_test_centre(db, "City Centre", 1).await?;
        let donor =
            create_custom_donor(db, Some(user.id), centre.id, Some("asha@test"), None).await?;
        let dispatcher = test_dispatcher(Arc::new(RecordingNotifier::default()));
        let actor = lab(centre.id);

        for _ in 0..10 {
            let collection = create_test_collection(db, donor.id, centre.id).await?;
            let (first, second) = tokio::join!(
                update_testing(
                    db,
                    &dispatcher,
                    OverallStatusPolicy::Strict,
                    &actor,
                    collection.id,
                    TestingUpdate {
                        blood_group_id: Some(3),
                        hiv: Some(NR),
                        hbsag: Some(NR),
                        hcv: Some(NR),
                        ..TestingUpdate::default()
                    },
                ),
                update_testing(
                    db,
                    &dispatcher,
                    OverallStatusPolicy::Strict,
                    &actor,
                    collection.id,
                    TestingUpdate {
                        syphilis: Some(NR),
                        malaria: Some(NR),
                        ..TestingUpdate::default()
                    },
                )
            );
            let (first, second) = (first?, second?);

            // Whichever ran second saw the merged panel and passed it
            assert!(first.transitioned ^ second.transitioned);
            let last = if first.transitioned { &first } else { &second };
            assert_eq!(last.overall_status, OverallStatus::Passed);
            assert!(ScreeningPanel::of(&last.test_record).is_complete());
        }

        assert_eq!(TestRecord::find().count(db).await?, 10);
        assert_eq!(Notification::find().count(db).await?, 10);
        assert_eq!(Inventory::find().one(db).await?.unwrap().units_available, 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_strict_policy_waits_for_all_screens() -> Result<()> {
        let f = fixture(Some("asha@test")).await?;
        let dispatcher = test_dispatcher(Arc::new(RecordingNotifier::default()));
        let actor = lab(f.centre_id);

        let first_half = TestingUpdate {
            blood_group_id: Some(2),
            hiv: Some(NR),
            hbsag: Some(NR),
            ..TestingUpdate::default()
        };
        let outcome = update_testing(
            &f.db,
            &dispatcher,
            OverallStatusPolicy::Strict,
            &actor,
            f.collection_id,
            first_half,
        )
        .await?;
        assert_eq!(outcome.overall_status, OverallStatus::Pending);
        assert!(!outcome.transitioned);
        assert_eq!(outcome.test_record.hcv, ScreeningResult::Pending);
        assert_eq!(Notification::find().count(&f.db).await?, 0);

        let second_half = TestingUpdate {
            hcv: Some(NR),
            syphilis: Some(NR),
            malaria: Some(NR),
            ..TestingUpdate::default()
        };
        let outcome = update_testing(
            &f.db,
            &dispatcher,
            OverallStatusPolicy::Strict,
            &actor,
            f.collection_id,
            second_half,
        )
        .await?;
        assert_eq!(outcome.overall_status, OverallStatus::Passed);
        assert!(outcome.transitioned);
        assert_eq!(outcome.test_record.blood_group_id, Some(2));
        assert_eq!(outcome.test_record.hiv, NR);
        assert_eq!(Inventory::find().one(&f.db).await?.unwrap().blood_group_id, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_eager_policy_passes_partial_submission() -> Result<()> {
        let f = fixture(None).await?;
        let dispatcher = test_dispatcher(Arc::new(RecordingNotifier::default()));

        let only_hiv = TestingUpdate {
            hiv: Some(NR),
            ..TestingUpdate::default()
        };
        let outcome = update_testing(
            &f.db,
            &dispatcher,
            OverallStatusPolicy::Eager,
            &lab(f.centre_id),
            f.collection_id,
            only_hiv,
        )
        .await?;
        assert_eq!(outcome.overall_status, OverallStatus::Passed);
        assert!(outcome.transitioned);
        assert_eq!(outcome.test_record.hbsag, ScreeningResult::Pending);
        // No blood group known anywhere, so nothing is credited
        assert_eq!(Inventory::find().count(&f.db).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_send_and_missing_recipient_are_recorded() -> Result<()> {
        let f = fixture(Some("asha@test")).await?;
        let failing = test_dispatcher(Arc::new(DisabledNotifier));
        let outcome = update_testing(
            &f.db,
            &failing,
            OverallStatusPolicy::Eager,
            &lab(f.centre_id),
            f.collection_id,
            all_clear("2025-03-01"),
        )
        .await?;
        assert_eq!(outcome.overall_status, OverallStatus::Passed);
        assert_eq!(outcome.notification_status, Some(NotificationStatus::Failed));
        let row = Notification::find().one(&f.db).await?.unwrap();
        assert_eq!(row.status, NotificationStatus::Failed);

        let g = fixture(None).await?;
        let dispatcher = test_dispatcher(Arc::new(RecordingNotifier::default()));
        let outcome = update_testing(
            &g.db,
            &dispatcher,
            OverallStatusPolicy::Eager,
            &lab(g.centre_id),
            g.collection_id,
            all_clear("2025-03-01"),
        )
        .await?;
        assert_eq!(outcome.notification_status, Some(NotificationStatus::Pending));
        let row = Notification::find().one(&g.db).await?.unwrap();
        assert_eq!(row.status, NotificationStatus::Pending);
        assert!(row.recipient_email.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_renderer_failure_sends_without_attachment() -> Result<()> {
        let f = fixture(Some("asha@test")).await?;
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = Dispatcher::new(
            notifier.clone() as Arc<dyn Notifier>,
            Arc::new(FailingRenderer),
            "https://portal.test",
        );

        let outcome = update_testing(
            &f.db,
            &dispatcher,
            OverallStatusPolicy::Eager,
            &lab(f.centre_id),
            f.collection_id,
            all_clear("2025-03-01"),
        )
        .await?;
        assert_eq!(outcome.notification_status, Some(NotificationStatus::Sent));
        assert!(notifier.sent()[0].attachments.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_scope_and_lookup_errors() -> Result<()> {
        let f = fixture(None).await?;
        let dispatcher = test_dispatcher(Arc::new(RecordingNotifier::default()));

        let outsider = lab(f.centre_id + 1);
        assert!(matches!(
            update_testing(
                &f.db,
                &dispatcher,
                OverallStatusPolicy::Eager,
                &outsider,
                f.collection_id,
                all_clear("2025-03-01"),
            )
            .await,
            Err(Error::Forbidden { .. })
        ));

        let organizer = Principal::new(60, Role::Organizer, Some(f.centre_id));
        assert!(matches!(
            update_testing(
                &f.db,
                &dispatcher,
                OverallStatusPolicy::Eager,
                &organizer,
                f.collection_id,
                all_clear("2025-03-01"),
            )
            .await,
            Err(Error::Forbidden { .. })
        ));

        assert!(matches!(
            update_testing(
                &f.db,
                &dispatcher,
                OverallStatusPolicy::Eager,
                &lab(f.centre_id),
                999,
                all_clear("2025-03-01"),
            )
            .await,
            Err(Error::NotFound { .. })
        ));
        assert_eq!(TestRecord::find().count(&f.db).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_and_get_testing() -> Result<()> {
        let f = fixture(None).await?;
        let dispatcher = test_dispatcher(Arc::new(RecordingNotifier::default()));
        let actor = lab(f.centre_id);
        let outcome = update_testing(
            &f.db,
            &dispatcher,
            OverallStatusPolicy::Eager,
            &actor,
            f.collection_id,
            all_clear("2025-03-01"),
        )
        .await?;

        let listing = ListingSettings::default();
        let page = list_testing(&f.db, &actor, TestingFilter::default(), listing).await?;
        assert_eq!(page.meta.total, 1);
        assert_eq!(page.data[0].centre_id, Some(f.centre_id));

        let march = TestingFilter {
            from: Some("2025-03-01".to_string()),
            to: Some("2025-03-01".to_string()),
            overall_status: Some(OverallStatus::Passed),
            ..TestingFilter::default()
        };
        assert_eq!(list_testing(&f.db, &actor, march, listing).await?.meta.total, 1);

        let april = TestingFilter {
            from: Some("2025-04-01".to_string()),
            ..TestingFilter::default()
        };
        assert_eq!(list_testing(&f.db, &actor, april, listing).await?.meta.total, 0);

        let view = get_testing(&f.db, &actor, outcome.test_record.id).await?;
        assert_eq!(view.test.collection_id, f.collection_id);

        let outsider = lab(f.centre_id + 1);
        assert!(matches!(
            get_testing(&f.db, &outsider, outcome.test_record.id).await,
            Err(Error::Forbidden { .. })
        ));
        let other_page = list_testing(&f.db, &outsider, TestingFilter::default(), listing).await?;
        assert_eq!(other_page.meta.total, 0);
        Ok(())
    }
}
