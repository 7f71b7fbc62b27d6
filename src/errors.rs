//! Unified error types for the donation workflow.
//!
//! Every core operation returns [`Result`]. The HTTP layer maps each variant onto
//! a status code (see `api::error`), so variants are grouped by the status they produce.

use thiserror::Error;

/// Errors raised by the donation workflow.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or out-of-range input
    #[error("{message}")]
    Validation {
        /// Human readable description of the rejected input
        message: String,
    },

    /// A date field that does not parse to a calendar date
    #[error("Invalid date for {field}: {value:?}")]
    InvalidDate {
        /// Name of the offending field
        field: &'static str,
        /// Raw value as supplied
        value: String,
    },

    /// The minimum inter-donation interval is not satisfied
    #[error("At least {required_days} days must have passed since last donation ({elapsed_days} elapsed)")]
    EligibilityViolation {
        /// Whole days between the last donation and the candidate date
        elapsed_days: i64,
        /// Minimum required interval
        required_days: i64,
    },

    /// Centre does not exist or does not belong to the requested district
    #[error("Invalid centre {centre_id}: {reason}")]
    UnknownCentre {
        /// Requested centre
        centre_id: i64,
        /// Why the centre was rejected
        reason: String,
    },

    /// Camp does not exist or belongs to another centre
    #[error("Invalid camp {camp_id}: {reason}")]
    InvalidCamp {
        /// Requested camp
        camp_id: i64,
        /// Why the camp was rejected
        reason: String,
    },

    /// A state transition that the lifecycle does not allow
    #[error("Cannot {action} a record with status {status}")]
    InvalidTransition {
        /// Attempted action (e.g. `"cancel"`)
        action: &'static str,
        /// Current status of the record
        status: String,
    },

    /// Missing or invalid credentials
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Why the credentials were rejected
        message: String,
    },

    /// Authenticated, but outside the caller's role or centre scope
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Which scope check failed
        message: String,
    },

    /// Referenced record does not exist
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of record (e.g. `"Appointment"`)
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// An active appointment already exists for the same user and date
    #[error("You already have an appointment on {date}")]
    DuplicateAppointment {
        /// The contested appointment date
        date: String,
    },

    /// Some requested components were already split off this collection
    #[error("Collection {collection_id} already segregated for {components}")]
    AlreadySegregated {
        /// The segregated collection
        collection_id: i64,
        /// Comma-separated component names already on record
        components: String,
    },

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {message}")]
    Config {
        /// Details of the configuration problem
        message: String,
    },

    /// Database failure
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// I/O failure (socket binding, config file access)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a [`Error::Validation`] with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a [`Error::Forbidden`] with the given message.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Shorthand for a [`Error::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
