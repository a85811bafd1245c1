//! Session store queries.
//!
//! The relay resolves an opaque session token to the principal that owns it.
//! Expiry is evaluated by the caller so the clock stays injectable.

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

/// A row from the `sessions` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub token: String,
    pub user_id: String,
    /// Unix timestamp (seconds) at which the session stops being valid.
    pub expires_at: i64,
}

impl SessionRecord {
    /// A session is expired when its recorded expiry is at or before `now`.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// A row from the `users` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
}

/// Errors raised by session store queries.
#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("session store query failed: {0}")]
    Query(#[from] rusqlite::Error),
}

/// Looks up a session by its opaque token.
///
/// Returns `Ok(None)` when no session carries the token.
pub fn find_session(
    conn: &Connection,
    token: &str,
) -> Result<Option<SessionRecord>, SessionStoreError> {
    let record = conn
        .query_row(
            "SELECT token, user_id, expires_at FROM sessions WHERE token = ?1",
            [token],
            |row| {
                Ok(SessionRecord {
                    token: row.get(0)?,
                    user_id: row.get(1)?,
                    expires_at: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

/// Looks up the user a session refers to.
pub fn find_user(conn: &Connection, user_id: &str) -> Result<Option<UserRecord>, SessionStoreError> {
    let record = conn
        .query_row(
            "SELECT id, email, role FROM users WHERE id = ?1",
            [user_id],
            |row| {
                Ok(UserRecord {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    role: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

/// Inserts or replaces a user. Used by seeding tools and tests.
pub fn upsert_user(
    conn: &Connection,
    id: &str,
    email: Option<&str>,
    role: Option<&str>,
) -> Result<(), SessionStoreError> {
    conn.execute(
        "INSERT INTO users (id, email, role) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET email = excluded.email, role = excluded.role",
        params![id, email, role],
    )?;
    Ok(())
}

/// Inserts a session. Used by seeding tools and tests.
pub fn insert_session(
    conn: &Connection,
    token: &str,
    user_id: &str,
    expires_at: i64,
) -> Result<(), SessionStoreError> {
    conn.execute(
        "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
        params![token, user_id, expires_at],
    )?;
    Ok(())
}
