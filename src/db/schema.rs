//! Schema setup for the appointment store.
//!
//! The applied schema revision lives in SQLite's `user_version` header field.
//! Each revision's SQL is embedded at compile time and applied in its own
//! transaction together with the version bump, so a failed upgrade leaves the
//! file at the previous revision.

use rusqlite::Connection;

use super::DbError;

/// Schema revisions in order; revision `n` is `REVISIONS[n - 1]`.
const REVISIONS: &[&str] = &[include_str!("schema/001_baseline.sql")];

fn latest() -> i64 {
    REVISIONS.len() as i64
}

fn user_version(conn: &Connection) -> Result<i64, DbError> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Bring the database up to the latest revision.
///
/// Returns how many revisions were applied. A file written by a newer build
/// is refused rather than reinterpreted.
pub fn ensure_schema(conn: &mut Connection) -> Result<usize, DbError> {
    let found = user_version(conn)?;
    if found > latest() {
        return Err(DbError::SchemaTooNew {
            found,
            supported: latest(),
        });
    }

    let mut applied = 0;
    for (index, sql) in REVISIONS.iter().enumerate().skip(found.max(0) as usize) {
        let revision = index as i64 + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", revision)?;
        tx.commit()?;

        log::info!("Appointment store schema at revision {}", revision);
        applied += 1;
    }
    Ok(applied)
}
