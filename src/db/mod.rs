mod schema;
pub mod activity;
pub mod content;
pub mod identity;
pub mod members;
pub mod orgs;
pub mod progress;
pub mod projects;
pub mod scope;
pub mod sync;

use rusqlite::Connection;
use std::path::Path;

use crate::error::Result;
use crate::ids;

pub use schema::{MIGRATIONS, SCHEMA, SYNCED_TABLES};

pub use activity::{ActivityComment, ActivityLogEntry, ActivityMetadata, ProjectNotification};
pub use content::{Folder, MediaFilter, MediaItem, MediaType, Note};
pub use identity::User;
pub use members::{ProjectMember, ProjectRole};
pub use orgs::{MemberStatus, OrgRole, Organization, OrganizationMember};
pub use progress::ProjectProgress;
pub use projects::{
    PhaseStatus, Project, ProjectPhase, ProjectPublicProfile, ProjectStatus, Visibility,
};

/// Row origin marker for tables reconciled against remote snapshots.
/// Local creations have no remote counterpart yet and are never pruned.
pub const ORIGIN_LOCAL: &str = "local";
pub const ORIGIN_REMOTE: &str = "remote";

/// Handle over the embedded store plus the active user scope.
///
/// One logical session per value: the caller sets the scope once after
/// sign-in and issues calls sequentially (single-writer model). There is no
/// global state; dropping the Database ends the session.
pub struct Database {
    pub(crate) conn: Connection,
    pub(crate) scope: Option<String>,
}

impl Database {
    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self { conn, scope: None })
    }

    /// Create all tables and indexes, apply additive column migrations, and
    /// run one-time backfills. Safe to call on every startup.
    pub fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        self.conn.execute(schema::META_TABLE, [])?;
        self.run_migrations();
        self.backfill_origin()?;
        Ok(())
    }

    fn run_migrations(&self) {
        for migration in MIGRATIONS {
            // Re-running an additive migration yields "duplicate column
            // name"; that is the expected steady state.
            let _ = self.conn.execute(migration, []);
        }
    }

    /// Classify rows created before the origin column existed: canonical
    /// UUID ids came from the remote backend, anything else was generated
    /// locally. Runs once, then latches via schema_meta.
    fn backfill_origin(&self) -> Result<()> {
        if self.meta_get("origin_backfill_done")?.is_some() {
            return Ok(());
        }
        for (table, pk) in SYNCED_TABLES {
            let mut stmt = self
                .conn
                .prepare(&format!("SELECT {pk} FROM {table} WHERE origin = 'local'"))?;
            let ids: Vec<String> = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .filter_map(|r| r.ok())
                .collect();
            for id in ids.iter().filter(|id| ids::is_uuid_shaped(id)) {
                self.conn.execute(
                    &format!("UPDATE {table} SET origin = 'remote' WHERE {pk} = ?"),
                    [id],
                )?;
            }
        }
        self.meta_set("origin_backfill_done", "1")?;
        Ok(())
    }

    fn meta_get(&self, key: &str) -> Result<Option<String>> {
        let result = self.conn.query_row(
            "SELECT value FROM schema_meta WHERE key = ?",
            [key],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn meta_set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO schema_meta (key, value) VALUES (?, ?) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::Database;
    use tempfile::TempDir;

    /// Fresh migrated database in a temp directory. Keep the TempDir alive
    /// for the duration of the test.
    pub(crate) fn open() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("sitelog.db")).unwrap();
        db.migrate().unwrap();
        (dir, db)
    }

    /// Database with a signed-in user scope already set up.
    pub(crate) fn open_scoped(user: &str) -> (TempDir, Database) {
        let (dir, mut db) = open();
        db.create_user_with_id(user, &format!("{user}@example.com"), user)
            .unwrap();
        db.set_active_user_scope(Some(user)).unwrap();
        (dir, db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_is_idempotent() {
        let (_dir, db) = testutil::open();
        db.migrate().unwrap();
        db.migrate().unwrap();
    }

    #[test]
    fn test_origin_backfill_latches() {
        let (_dir, db) = testutil::open();
        // A canonical-shaped row inserted after the latch keeps its tag.
        db.conn
            .execute(
                "INSERT INTO projects (id, name, owner_user_id, created_at, updated_at, origin) \
                 VALUES ('5f0c7d6e-1f9f-4f8e-9a1b-2c3d4e5f6a7b', 'p', 'u', 0, 0, 'local')",
                [],
            )
            .unwrap();
        db.migrate().unwrap();
        let origin: String = db
            .conn
            .query_row(
                "SELECT origin FROM projects WHERE id = '5f0c7d6e-1f9f-4f8e-9a1b-2c3d4e5f6a7b'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(origin, "local");
    }
}
