//! Named monotonic counters.
//!
//! Each counter is one row in `sequences`. Drawing a value is a single atomic
//! `UPDATE sequences SET value = value + 1 WHERE name = ?` followed by a read-back on
//! the caller's transaction: concurrent draws serialize on the row lock and a
//! rolled-back draw is never observed by anyone.

use crate::{
    entities::{Sequence, sequence},
    errors::{Error, Result},
};
use sea_orm::{
    DatabaseTransaction, Set,
    prelude::*,
    sea_query::{Expr, OnConflict},
};

/// Counter used for appointment queue tokens.
pub const APPOINTMENT_TOKEN: &str = "appointment_token";

/// Advances the named counter and returns the new value (the first draw returns 1).
///
/// The increment and the read-back run on the caller's transaction, under the same row lock.
pub async fn next_value(txn: &DatabaseTransaction, name: &str) -> Result<i64> {
    let now = chrono::Utc::now();

    // Make sure the counter row exists; a concurrent creator wins silently
    let seed = sequence::ActiveModel {
        name: Set(name.to_string()),
        value: Set(0),
        updated_at: Set(now),
    };
    Sequence::insert(seed)
        .on_conflict(
            OnConflict::column(sequence::Column::Name)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(txn)
        .await?;

    // Perform atomic update: value = value + 1
    Sequence::update_many()
        .col_expr(
            sequence::Column::Value,
            Expr::col(sequence::Column::Value).add(1),
        )
        .col_expr(sequence::Column::UpdatedAt, Expr::value(now))
        .filter(sequence::Column::Name.eq(name))
        .exec(txn)
        .await?;

    Sequence::find_by_id(name.to_string())
        .one(txn)
        .await?
        .map(|counter| counter.value)
        .ok_or_else(|| Error::not_found("Sequence", name))
}
