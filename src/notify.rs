//! Outbound collaborators: message delivery and certificate rendering.
//!
//! The workflow only depends on the [`Notifier`] and [`CertificateRenderer`] traits.
//! Mail transport configuration and PDF layout live outside this crate; the
//! implementations here are the development transport and a plain-text certificate.

use crate::{
    config::settings::{NotificationSettings, Transport},
    entities::{CollectionModel, DonorModel, OverallStatus, TestRecordModel},
    errors::{Error, Result},
};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::{fmt::Write as _, sync::Arc};
use tracing::{info, warn};

/// A file attached to an outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name shown to the recipient
    pub filename: String,
    /// MIME type
    pub content_type: String,
    /// Raw file bytes
    pub content: Vec<u8>,
}

/// One outbound email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub text_body: String,
    /// HTML body
    pub html_body: String,
    /// Files attached to the message
    pub attachments: Vec<Attachment>,
}

/// Delivers outbound messages.
///
/// Ordinary delivery problems (authentication, network, rejected recipient) are reported
/// by returning `false`; implementations must not panic on them. The caller records the
/// outcome on the notification row.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Attempts delivery and reports whether it succeeded.
    async fn send(&self, email: &Email) -> bool;
}

/// Development transport: writes the message to the log and reports success.
#[derive(Debug, Clone)]
pub struct LogNotifier {
    sender: String,
}

impl LogNotifier {
    /// Creates a log transport that stamps messages with `sender`.
    #[must_use]
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, email: &Email) -> bool {
        info!(
            from = %self.sender,
            to = %email.to,
            subject = %email.subject,
            attachments = email.attachments.len(),
            "Email delivered to log transport"
        );
        true
    }
}

/// Transport used when outbound mail is switched off; every delivery fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn send(&self, email: &Email) -> bool {
        warn!(to = %email.to, "Outbound mail is disabled, not sending {:?}", email.subject);
        false
    }
}

/// Builds the notifier selected in the settings.
#[must_use]
pub fn notifier_from_settings(settings: &NotificationSettings) -> Arc<dyn Notifier> {
    match settings.transport {
        Transport::Log => Arc::new(LogNotifier::new(settings.sender.clone())),
        Transport::Disabled => Arc::new(DisabledNotifier),
    }
}

/// Facts printed on a donation certificate
#[derive(Debug, Clone, Copy)]
pub struct CertificateFacts<'a> {
    /// Certified donor
    pub donor: &'a DonorModel,
    /// Certified collection
    pub collection: &'a CollectionModel,
    /// Its test record
    pub test_record: &'a TestRecordModel,
    /// Verdict printed on the certificate
    pub overall_status: OverallStatus,
    /// Earliest next donation, for passed donations
    pub next_eligible_date: Option<NaiveDate>,
}

/// Renders a donation certificate. Rendering must be free of side effects.
pub trait CertificateRenderer: Send + Sync {
    /// Renders the certificate bytes.
    ///
    /// # Errors
    /// Any error is treated as "no certificate"; the notification is sent without it.
    fn render(&self, facts: &CertificateFacts<'_>) -> Result<Vec<u8>>;

    /// MIME type of the rendered bytes
    fn content_type(&self) -> &'static str {
        "application/pdf"
    }

    /// File extension used for the attachment name
    fn file_extension(&self) -> &'static str {
        "pdf"
    }
}

/// Plain-text certificate
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCertificateRenderer;

impl CertificateRenderer for TextCertificateRenderer {
    fn render(&self, facts: &CertificateFacts<'_>) -> Result<Vec<u8>> {
        let mut out = String::new();
        let donor_name = facts.donor.donor_name.as_deref().unwrap_or("Donor");
        let status = match facts.overall_status {
            OverallStatus::Passed => "Passed",
            OverallStatus::Reactive => "Reactive",
            OverallStatus::Pending => "Pending",
        };

        writeln!(out, "CERTIFICATE OF BLOOD DONATION")
            .and_then(|()| writeln!(out))
            .and_then(|()| writeln!(out, "Donor:          {donor_name}"))
            .and_then(|()| writeln!(out, "Donation ID:    {}", facts.collection.id))
            .and_then(|()| {
                writeln!(
                    out,
                    "Collected on:   {}",
                    facts.collection.collection_date.format("%Y-%m-%d")
                )
            })
            .and_then(|()| writeln!(out, "Volume:         {} ml", facts.collection.collected_amount))
            .and_then(|()| {
                writeln!(
                    out,
                    "Tested on:      {}",
                    facts.test_record.tested_at.format("%Y-%m-%d")
                )
            })
            .and_then(|()| writeln!(out, "Screening:      {status}"))
            .map_err(|e| Error::Config {
                message: format!("Failed to render certificate: {e}"),
            })?;

        if let Some(next) = facts.next_eligible_date {
            writeln!(out, "Next eligible:  {next}").map_err(|e| Error::Config {
                message: format!("Failed to render certificate: {e}"),
            })?;
        }

        Ok(out.into_bytes())
    }

    fn content_type(&self) -> &'static str {
        "text/plain"
    }

    fn file_extension(&self) -> &'static str {
        "txt"
    }
}
