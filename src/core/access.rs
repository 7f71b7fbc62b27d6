//! Role-based authorization.
//!
//! Callers arrive as an already-authenticated [`Principal`]. Access is decided by
//! plain predicates over the principal's role and assigned centre; every workflow
//! operation evaluates the predicate it needs before touching any row.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};

/// Role carried by an authenticated principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Member of the public booking their own appointments
    Donor,
    /// Camp/centre organiser, scoped to one centre
    Organizer,
    /// Lab technician, scoped to one centre
    LabStaff,
    /// Centre administrator
    Admin,
    /// Unscoped administrator
    SuperAdmin,
}

impl Role {
    /// Roles whose data access is pinned to their own centre.
    #[must_use]
    pub const fn is_centre_scoped(self) -> bool {
        matches!(self, Self::Organizer | Self::LabStaff)
    }

    /// Whether the role belongs to centre staff (anything but a donor).
    #[must_use]
    pub const fn is_staff(self) -> bool {
        !matches!(self, Self::Donor)
    }
}

/// The authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// User id for donors, admin id for staff
    pub subject_id: i64,
    /// Role granted by the token
    pub role: Role,
    /// Assigned centre for staff roles
    pub centre_id: Option<i64>,
    /// Contact email, if known
    pub email: Option<String>,
    /// Display name, if known
    pub name: Option<String>,
}

impl Principal {
    /// Shorthand used by tests and fixtures.
    #[must_use]
    pub const fn new(subject_id: i64, role: Role, centre_id: Option<i64>) -> Self {
        Self {
            subject_id,
            role,
            centre_id,
            email: None,
            name: None,
        }
    }

    fn is_assigned_to(&self, centre_id: i64) -> bool {
        self.centre_id == Some(centre_id)
    }
}

/// Whether `actor` may read or write collection/testing/inventory data of `centre_id`.
///
/// Admin and `SuperAdmin` are unscoped; Organizer and `LabStaff` only see their own centre.
#[must_use]
pub fn can_access_centre(actor: &Principal, centre_id: i64) -> bool {
    match actor.role {
        Role::Admin | Role::SuperAdmin => true,
        Role::Organizer | Role::LabStaff => actor.is_assigned_to(centre_id),
        Role::Donor => false,
    }
}

/// Whether `actor` may approve or reject appointments booked at `centre_id`.
///
/// Unlike [`can_access_centre`], a plain Admin is pinned to their own centre here.
#[must_use]
pub fn can_manage_appointments(actor: &Principal, centre_id: i64) -> bool {
    match actor.role {
        Role::SuperAdmin => true,
        Role::Admin => actor.is_assigned_to(centre_id),
        Role::Organizer | Role::LabStaff | Role::Donor => false,
    }
}

/// Fails with [`Error::Forbidden`] unless the actor holds one of `allowed`.
pub fn require_role(actor: &Principal, allowed: &[Role]) -> Result<()> {
    if allowed.contains(&actor.role) {
        Ok(())
    } else {
        Err(Error::forbidden(format!(
            "role {:?} may not perform this action",
            actor.role
        )))
    }
}

/// Fails with [`Error::Forbidden`] unless [`can_access_centre`] holds.
pub fn require_centre_access(actor: &Principal, centre_id: i64) -> Result<()> {
    if can_access_centre(actor, centre_id) {
        Ok(())
    } else {
        Err(Error::forbidden("not authorized for this centre"))
    }
}

/// The centre filter a listing must use: scoped roles are forced to their own centre
/// regardless of what they asked for.
#[must_use]
pub fn effective_centre_filter(actor: &Principal, requested: Option<i64>) -> Option<i64> {
    if actor.role.is_centre_scoped() {
        // A scoped role without an assigned centre sees nothing rather than everything
        Some(actor.centre_id.unwrap_or(-1))
    } else {
        requested
    }
}
