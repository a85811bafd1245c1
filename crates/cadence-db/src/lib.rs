//! Session store for the Cadence relay.
//!
//! Provides SQLite connection pooling (via `r2d2`), embedded SQL migrations
//! for the `users` and `sessions` tables, and the lookups the session
//! authenticator performs before a WebSocket upgrade is accepted.
//!
//! The relay treats the store as read-only. Migrations and the insert helpers
//! exist so a standalone deployment (and the test suite) can bootstrap the
//! schema; in a shared deployment the account subsystem owns the writes.

mod migrations;
mod pool;
mod sessions;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
pub use sessions::{
    find_session, find_user, insert_session, upsert_user, SessionRecord, SessionStoreError,
    UserRecord,
};
