//! Notification bookkeeping - durable intent rows plus best-effort delivery.
//!
//! Every outbound message is written as a `Pending` row first (usually inside the
//! transaction of the state change that owes it) and delivered only after that
//! transaction commits. A delivery claims the row with a conditional `Pending -> Sending`
//! update before sending and then flips it to `Sent` or `Failed`; a delivery that loses
//! the claim sends nothing. A row whose recipient cannot be resolved stays `Pending`
//! until [`dispatch_pending_notifications`] runs.

use crate::{
    config::settings::NotificationSettings,
    core::access::{Principal, Role, require_role},
    entities::{
        AppointmentModel, Notification, NotificationKind, NotificationModel, NotificationStatus,
        User, notification,
    },
    errors::Result,
    notify::{
        Attachment, CertificateRenderer, Email, Notifier, TextCertificateRenderer,
        notifier_from_settings,
    },
};
use chrono::NaiveDate;
use sea_orm::{QueryOrder, QuerySelect, Set, prelude::*, sea_query::Expr};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Channel recorded on every notification row.
pub const EMAIL_CHANNEL: &str = "Email";

/// Upper bound on rows returned by [`list_notifications`].
pub const MAX_NOTIFICATION_LIST: u64 = 500;

/// Rendered content of one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// What triggered the message
    pub kind: NotificationKind,
    /// One-line summary stored for admin listings
    pub summary: String,
    /// Email subject line
    pub subject: String,
    /// Plain-text body, also stored on the row
    pub text_body: String,
    /// HTML alternative of `text_body`
    pub html_body: String,
}

/// Records a notification row is linked to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Linkage {
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
}

/// A committed intent row waiting for its delivery attempt
#[derive(Debug, Clone)]
pub struct PendingDelivery {
    /// The committed intent row
    pub notification: NotificationModel,
    /// HTML body, which is not stored
    pub html_body: String,
    /// Attachments, which are not stored
    pub attachments: Vec<Attachment>,
}

/// Counts from one retry pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    /// Rows delivered
    pub sent: u64,
    /// Rows the transport rejected or without any recipient
    pub failed: u64,
    /// Rows claimed by another delivery before this pass reached them
    pub skipped: u64,
}

/// Owns the outbound collaborators and the two-phase write around them.
#[derive(Clone)]
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    renderer: Arc<dyn CertificateRenderer>,
    portal_url: String,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("portal_url", &self.portal_url)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher from explicit collaborators.
    pub fn new(
        notifier: Arc<dyn Notifier>,
        renderer: Arc<dyn CertificateRenderer>,
        portal_url: impl Into<String>,
    ) -> Self {
        Self {
            notifier,
            renderer,
            portal_url: portal_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Creates a dispatcher with the configured transport and the text certificate.
    #[must_use]
    pub fn from_settings(settings: &NotificationSettings) -> Self {
        Self::new(
            notifier_from_settings(settings),
            Arc::new(TextCertificateRenderer),
            settings.portal_url.clone(),
        )
    }

    /// Base URL of the donor portal, without a trailing slash
    #[must_use]
    pub fn portal_url(&self) -> &str {
        &self.portal_url
    }

    /// The certificate renderer used for passed donations
    #[must_use]
    pub fn renderer(&self) -> &dyn CertificateRenderer {
        self.renderer.as_ref()
    }

    /// Writes the durable `Pending` row for `message` on `conn`.
    ///
    /// Pass the open transaction of the triggering state change so the intent commits
    /// or rolls back together with it.
    pub async fn record_intent<C: ConnectionTrait>(
        &self,
        conn: &C,
        message: Message,
        linkage: Linkage,
        recipient_email: Option<String>,
    ) -> Result<PendingDelivery> {
        let row = notification::ActiveModel {
            kind: Set(message.kind),
            user_id: Set(linkage.user_id),
            donor_id: Set(linkage.donor_id),
            camp_id: Set(linkage.camp_id),
            appointment_id: Set(linkage.appointment_id),
            collection_id: Set(linkage.collection_id),
            message: Set(message.summary),
            subject: Set(message.subject),
            body: Set(message.text_body),
            recipient_email: Set(recipient_email.filter(|email| !email.trim().is_empty())),
            status: Set(NotificationStatus::Pending),
            channel: Set(EMAIL_CHANNEL.to_string()),
            created_at: Set(chrono::Utc::now()),
            sent_at: Set(None),
            ..Default::default()
        }
        .insert(conn)
        .await?;

        debug!(notification_id = row.id, kind = ?row.kind, "Recorded notification intent");

        Ok(PendingDelivery {
            notification: row,
            html_body: message.html_body,
            attachments: Vec::new(),
        })
    }

    /// Attempts delivery of a committed intent and records the outcome.
    ///
    /// Must be called after the transaction that wrote the intent has committed.
    /// Returns the final status; `Pending` means no recipient was known and `Sending`
    /// means another delivery had already claimed the row, so nothing was sent.
    pub async fn deliver(
        &self,
        db: &DatabaseConnection,
        pending: PendingDelivery,
    ) -> Result<NotificationStatus> {
        let row = pending.notification;
        let Some(to) = row.recipient_email.clone() else {
            warn!(
                notification_id = row.id,
                "No recipient email, notification left Pending"
            );
            return Ok(NotificationStatus::Pending);
        };

        let claimed = transition(
            db,
            row.id,
            NotificationStatus::Pending,
            NotificationStatus::Sending,
        )
        .await?;
        if !claimed {
            debug!(notification_id = row.id, "Notification claimed elsewhere, skipping");
            return Ok(NotificationStatus::Sending);
        }

        let email = Email {
            to,
            subject: row.subject.clone(),
            text_body: row.body.clone(),
            html_body: pending.html_body,
            attachments: pending.attachments,
        };

        let status = if self.notifier.send(&email).await {
            NotificationStatus::Sent
        } else {
            error!(
                notification_id = row.id,
                to = %email.to,
                "Failed to send notification"
            );
            NotificationStatus::Failed
        };

        transition(db, row.id, NotificationStatus::Sending, status).await?;
        Ok(status)
    }

    /// Records an intent on `db` and delivers it immediately.
    ///
    /// For messages not tied to a transaction. Errors are logged and swallowed: the
    /// state change that owes the message has already been persisted.
    pub async fn notify_best_effort(
        &self,
        db: &DatabaseConnection,
        message: Message,
        linkage: Linkage,
        recipient_email: Option<String>,
    ) -> Option<NotificationStatus> {
        let kind = message.kind;
        let result = async {
            let pending = self
                .record_intent(db, message, linkage, recipient_email)
                .await?;
            self.deliver(db, pending).await
        }
        .await;

        match result {
            Ok(status) => Some(status),
            Err(e) => {
                error!(?kind, "Notification bookkeeping failed: {e}");
                None
            }
        }
    }

    /// Delivers a committed intent, logging instead of propagating any failure.
    pub async fn deliver_best_effort(
        &self,
        db: &DatabaseConnection,
        pending: PendingDelivery,
    ) -> Option<NotificationStatus> {
        let notification_id = pending.notification.id;
        match self.deliver(db, pending).await {
            Ok(status) => Some(status),
            Err(e) => {
                error!(notification_id, "Failed to record delivery outcome: {e}");
                None
            }
        }
    }
}

/// Moves a row from `from` to `to` if it is still in `from`. Returns whether it moved.
async fn transition(
    db: &DatabaseConnection,
    notification_id: i64,
    from: NotificationStatus,
    to: NotificationStatus,
) -> Result<bool> {
    let sent_at = (to == NotificationStatus::Sent).then(chrono::Utc::now);

    let result = Notification::update_many()
        .col_expr(notification::Column::Status, Expr::value(to))
        .col_expr(notification::Column::SentAt, Expr::value(sent_at))
        .filter(notification::Column::Id.eq(notification_id))
        .filter(notification::Column::Status.eq(from))
        .exec(db)
        .await?;

    Ok(result.rows_affected > 0)
}

/// Lists notifications newest first, optionally filtered by status. Admin and `SuperAdmin` only.
pub async fn list_notifications(
    db: &DatabaseConnection,
    actor: &Principal,
    status: Option<NotificationStatus>,
    limit: Option<u64>,
) -> Result<Vec<NotificationModel>> {
    require_role(actor, &[Role::Admin, Role::SuperAdmin])?;

    let limit = limit
        .unwrap_or(MAX_NOTIFICATION_LIST)
        .clamp(1, MAX_NOTIFICATION_LIST);

    let mut query = Notification::find();
    if let Some(status) = status {
        query = query.filter(notification::Column::Status.eq(status));
    }

    Ok(query
        .order_by_desc(notification::Column::CreatedAt)
        .order_by_desc(notification::Column::Id)
        .limit(limit)
        .all(db)
        .await?)
}

/// One retry pass over every `Pending` notification.
///
/// The recipient is the stored address, else the linked user's email. Rows without
/// any resolvable recipient are marked `Failed` so the pass terminates.
#[instrument(skip(db, dispatcher))]
pub async fn dispatch_pending_notifications(
    db: &DatabaseConnection,
    dispatcher: &Dispatcher,
) -> Result<DispatchSummary> {
    let pending = Notification::find()
        .filter(notification::Column::Status.eq(NotificationStatus::Pending))
        .order_by_asc(notification::Column::Id)
        .all(db)
        .await?;

    let mut summary = DispatchSummary::default();

    for row in pending {
        let recipient = match row.recipient_email.clone() {
            Some(email) => Some(email),
            None => match row.user_id {
                Some(user_id) => User::find_by_id(user_id)
                    .one(db)
                    .await?
                    .and_then(|user| user.email)
                    .filter(|email| !email.trim().is_empty()),
                None => None,
            },
        };

        let Some(recipient) = recipient else {
            let marked = transition(
                db,
                row.id,
                NotificationStatus::Pending,
                NotificationStatus::Failed,
            )
            .await?;
            if marked {
                warn!(notification_id = row.id, "No recipient resolvable, marking Failed");
                summary.failed += 1;
            } else {
                summary.skipped += 1;
            }
            continue;
        };

        if row.recipient_email.is_none() {
            Notification::update_many()
                .col_expr(
                    notification::Column::RecipientEmail,
                    Expr::value(Some(recipient.clone())),
                )
                .filter(notification::Column::Id.eq(row.id))
                .filter(notification::Column::Status.eq(NotificationStatus::Pending))
                .exec(db)
                .await?;
        }

        let html_body = html_from_text(&row.body);
        let mut row = row;
        row.recipient_email = Some(recipient);
        let pending = PendingDelivery {
            notification: row,
            html_body,
            attachments: Vec::new(),
        };

        match dispatcher.deliver(db, pending).await? {
            NotificationStatus::Sent => summary.sent += 1,
            NotificationStatus::Failed | NotificationStatus::Pending => summary.failed += 1,
            NotificationStatus::Sending => summary.skipped += 1,
        }
    }

    info!(
        sent = summary.sent,
        failed = summary.failed,
        skipped = summary.skipped,
        "Notification dispatch pass finished"
    );
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Message templates
// ---------------------------------------------------------------------------

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Minimal HTML rendition of a stored plain-text body, used by the retry pass.
#[must_use]
pub fn html_from_text(text: &str) -> String {
    let paragraphs: Vec<String> = text
        .split("\n\n")
        .map(|para| format!("<p>{}</p>", escape_html(para).replace('\n', "<br/>")))
        .collect();
    format!("<!doctype html><html><body>{}</body></html>", paragraphs.join(""))
}

fn greeting_name(name: Option<&str>) -> &str {
    name.map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or("Donor")
}

fn describe_slot(appointment: &AppointmentModel) -> String {
    let date = appointment
        .appointment_date
        .map_or_else(|| "a date to be confirmed".to_string(), |d| d.to_string());
    match appointment.appointment_time.as_deref() {
        Some(time) if !time.trim().is_empty() => format!("{date} at {time}"),
        _ => date,
    }
}

/// Confirmation that a request was received.
#[must_use]
pub fn appointment_requested(name: Option<&str>, appointment: &AppointmentModel) -> Message {
    let name = greeting_name(name);
    let slot = describe_slot(appointment);
    Message {
        kind: NotificationKind::AppointmentRequested,
        summary: format!("Appointment requested ({})", appointment.id),
        subject: "Life Link - Appointment request received".to_string(),
        text_body: format!(
            "Hello {name},\n\nWe received your blood donation appointment request for {slot}.\n\nThe centre will review it shortly; you will receive another email once it is approved."
        ),
        html_body: format!(
            "<!doctype html><html><body><h2>Appointment Request Received</h2><p>Hello {},</p><p>We received your blood donation appointment request for <b>{}</b>.</p><p>The centre will review it shortly; you will receive another email once it is approved.</p></body></html>",
            escape_html(name),
            escape_html(&slot)
        ),
    }
}

/// Approval with the assigned queue token.
#[must_use]
pub fn appointment_approved(name: Option<&str>, appointment: &AppointmentModel) -> Message {
    let name = greeting_name(name);
    let slot = describe_slot(appointment);
    let token = appointment
        .token_no
        .map_or_else(|| "-".to_string(), |t| t.to_string());
    Message {
        kind: NotificationKind::AppointmentApproved,
        summary: format!("Appointment approved ({})", appointment.id),
        subject: "Your Blood Donation Appointment is Confirmed".to_string(),
        text_body: format!(
            "Hello {name},\n\nYour blood donation appointment has been approved for {slot}.\nYour token number is {token}. Please show it at the registration desk.\n\nThank you for helping save lives."
        ),
        html_body: format!(
            "<!doctype html><html><body><h2>Appointment Confirmed</h2><p>Hello {},</p><p>Your blood donation appointment has been approved for <b>{}</b>.</p><p>Your token number is <b>{}</b>. Please show it at the registration desk.</p><p>Thank you for helping save lives.</p></body></html>",
            escape_html(name),
            escape_html(&slot),
            token
        ),
    }
}

/// Rejection, with the staff-supplied reason if any.
#[must_use]
pub fn appointment_rejected(name: Option<&str>, appointment: &AppointmentModel) -> Message {
    let name = greeting_name(name);
    let slot = describe_slot(appointment);
    let reason = appointment
        .rejection_reason
        .as_deref()
        .filter(|r| !r.trim().is_empty())
        .unwrap_or("No reason was given");
    Message {
        kind: NotificationKind::AppointmentRejected,
        summary: format!("Appointment rejected ({})", appointment.id),
        subject: "Life Link - Appointment request declined".to_string(),
        text_body: format!(
            "Hello {name},\n\nYour appointment request for {slot} could not be approved.\nReason: {reason}\n\nYou are welcome to request another slot."
        ),
        html_body: format!(
            "<!doctype html><html><body><h2>Appointment Declined</h2><p>Hello {},</p><p>Your appointment request for <b>{}</b> could not be approved.</p><p>Reason: {}</p><p>You are welcome to request another slot.</p></body></html>",
            escape_html(name),
            escape_html(&slot),
            escape_html(reason)
        ),
    }
}

/// Acknowledgement of a donor-initiated cancellation.
#[must_use]
pub fn appointment_cancelled(name: Option<&str>, appointment: &AppointmentModel) -> Message {
    let name = greeting_name(name);
    let slot = describe_slot(appointment);
    Message {
        kind: NotificationKind::AppointmentCancelled,
        summary: format!("Appointment cancelled ({})", appointment.id),
        subject: "Life Link - Appointment cancelled".to_string(),
        text_body: format!(
            "Hello {name},\n\nYour blood donation appointment for {slot} has been cancelled."
        ),
        html_body: format!(
            "<!doctype html><html><body><h2>Appointment Cancelled</h2><p>Hello {},</p><p>Your blood donation appointment for <b>{}</b> has been cancelled.</p></body></html>",
            escape_html(name),
            escape_html(&slot)
        ),
    }
}

/// Passed screening, linking the donor portal.
#[must_use]
pub fn test_passed(
    name: Option<&str>,
    portal_url: &str,
    donor_id: i64,
    collection_id: i64,
    tested_on: NaiveDate,
) -> Message {
    let name = greeting_name(name);
    let donations_url = format!("{portal_url}/donor/donations/{donor_id}");
    let certificate_url = format!("{donations_url}/certificate/{collection_id}");
    Message {
        kind: NotificationKind::TestPassed,
        summary: format!("Donation passed (collection {collection_id})"),
        subject: "Life Link - Donation Test Passed".to_string(),
        text_body: format!(
            "Hello {name},\n\nYour donation (ID: {collection_id}) tested on {tested_on} and passed all screening tests.\n\nYou can view your donations and download your donation certificate from your donor portal:\n{donations_url}\n\nThank you for your donation."
        ),
        html_body: format!(
            "<!doctype html><html><body><h2>Donation Test Passed</h2><p>Hello {},</p><p>Your donation (ID: <b>{collection_id}</b>) tested on <b>{tested_on}</b> and passed all screening tests.</p><p><a href=\"{}\">View donations</a> | <a href=\"{}\">Download certificate</a></p></body></html>",
            escape_html(name),
            escape_html(&donations_url),
            escape_html(&certificate_url)
        ),
    }
}

/// Reactive screening advisory naming each reactive test.
#[must_use]
pub fn test_reactive(
    name: Option<&str>,
    collection_id: i64,
    tested_on: NaiveDate,
    reactive_tests: &[&str],
) -> Message {
    let name = greeting_name(name);
    let list = reactive_tests.join(", ");
    let items: String = reactive_tests
        .iter()
        .map(|test| format!("<li>{}</li>", escape_html(test)))
        .collect();
    Message {
        kind: NotificationKind::TestReactive,
        summary: format!("Donation reactive (collection {collection_id})"),
        subject: "Life Link - Important: Your donation test result".to_string(),
        text_body: format!(
            "Hello {name},\n\nOne or more screening tests for your donation (ID: {collection_id}) on {tested_on} returned reactive: {list}.\n\nPlease consult your healthcare provider for confirmatory testing."
        ),
        html_body: format!(
            "<!doctype html><html><body><h2>Donation Test - Action Required</h2><p>Hello {},</p><p>One or more screening tests for your donation (ID: <b>{collection_id}</b>) on <b>{tested_on}</b> returned reactive:</p><ul>{items}</ul><p>Please consult your healthcare provider for confirmatory testing.</p></body></html>",
            escape_html(name)
        ),
    }
}
