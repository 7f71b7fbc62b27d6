//! Core layer - framework-agnostic donation workflow operations
//!
//! Every operation takes a database connection and the authenticated [`access::Principal`]
//! and returns the crate [`Result`](crate::errors::Result). The HTTP layer and the
//! command-line entry points are thin wrappers around these functions.

/// Role predicates and centre scoping
pub mod access;
/// Appointment admission, approval, rejection, and cancellation
pub mod appointment;
/// Recording blood collections
pub mod collection;
/// The 90-day donation interval rule
pub mod eligibility;
/// Per-centre blood unit counts
pub mod inventory;
/// Durable notification intents, delivery, and message templates
pub mod notification;
/// Page requests and date-range filters for list operations
pub mod paging;
/// Splitting passed collections into blood components
pub mod segregation;
/// Monotonic named counters (appointment tokens)
pub mod sequence;
/// The screening state machine
pub mod testing;
