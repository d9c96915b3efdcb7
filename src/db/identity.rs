//! User identity: creation, auth-identity deduplication, and merging.
//!
//! The store tolerates duplicate user rows appearing (races between sign-in
//! paths, snapshot imports) and repairs them: creation attaches to an
//! existing row when the auth identity is already known, and a periodic
//! dedup pass collapses any remaining duplicates via `merge_users`.

use rusqlite::{params, Row};
use tracing::{info, warn};

use super::Database;
use crate::error::{Result, StoreError};
use crate::ids;

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub auth_user_id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub auth_provider: Option<String>,
    pub provider_id: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: i64,
    pub last_login_at: Option<i64>,
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        auth_user_id: row.get(1)?,
        email: row.get(2)?,
        name: row.get(3)?,
        auth_provider: row.get(4)?,
        provider_id: row.get(5)?,
        avatar_url: row.get(6)?,
        created_at: row.get(7)?,
        last_login_at: row.get(8)?,
    })
}

const USER_COLS: &str = "id, auth_user_id, email, name, auth_provider, provider_id, \
                         avatar_url, created_at, last_login_at";

impl Database {
    pub fn create_user(&self, email: &str, name: &str) -> Result<User> {
        self.create_user_with_id(&ids::new_id(), email, name)
    }

    /// Create a user with a caller-chosen id. Used at bootstrap, before any
    /// scope exists.
    pub fn create_user_with_id(&self, id: &str, email: &str, name: &str) -> Result<User> {
        let email = ids::normalize_email(email)
            .ok_or_else(|| StoreError::validation("email must not be empty"))?;
        let now = ids::now_ms();
        self.conn.execute(
            "INSERT INTO users (id, email, name, created_at, last_login_at) \
             VALUES (?, ?, ?, ?, ?)",
            params![id, email, name, now, now],
        )?;
        self.get_user(id)?
            .ok_or(StoreError::NotFoundForUser("user"))
    }

    /// Find the user for an auth identity, or create one.
    ///
    /// At most one user may exist per external-auth id and per
    /// (provider, provider id) pair; on a hit the existing row is returned
    /// with its last-login bumped and any empty profile fields filled in.
    pub fn find_or_create_user_by_identity(
        &self,
        auth_user_id: Option<&str>,
        provider: Option<(&str, &str)>,
        email: &str,
        name: &str,
    ) -> Result<User> {
        let now = ids::now_ms();
        let existing = match ids::non_blank(auth_user_id) {
            Some(auth_id) => self.get_user_by_auth_id(&auth_id)?,
            None => None,
        };
        let existing = match (existing, provider) {
            (Some(u), _) => Some(u),
            (None, Some((prov, prov_id))) => self.get_user_by_provider(prov, prov_id)?,
            (None, None) => None,
        };

        if let Some(user) = existing {
            self.conn.execute(
                "UPDATE users SET last_login_at = ?1, \
                 email = COALESCE(NULLIF(email, ''), ?2), \
                 name = COALESCE(NULLIF(name, ''), ?3), \
                 auth_user_id = COALESCE(auth_user_id, ?4) \
                 WHERE id = ?5",
                params![now, ids::normalize_email(email), name, auth_user_id, user.id],
            )?;
            return self
                .get_user(&user.id)?
                .ok_or(StoreError::NotFoundForUser("user"));
        }

        let id = ids::new_id();
        let (prov, prov_id) = match provider {
            Some((p, pid)) => (Some(p), Some(pid)),
            None => (None, None),
        };
        self.conn.execute(
            "INSERT INTO users (id, auth_user_id, email, name, auth_provider, provider_id, \
             created_at, last_login_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                id,
                ids::non_blank(auth_user_id),
                ids::normalize_email(email),
                name,
                prov,
                prov_id,
                now,
                now
            ],
        )?;
        self.get_user(&id)?
            .ok_or(StoreError::NotFoundForUser("user"))
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let result = self.conn.query_row(
            &format!("SELECT {USER_COLS} FROM users WHERE id = ?"),
            [id],
            user_from_row,
        );
        match result {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_user_by_auth_id(&self, auth_user_id: &str) -> Result<Option<User>> {
        let result = self.conn.query_row(
            &format!(
                "SELECT {USER_COLS} FROM users WHERE auth_user_id = ? \
                 ORDER BY COALESCE(last_login_at, created_at) DESC LIMIT 1"
            ),
            [auth_user_id],
            user_from_row,
        );
        match result {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn get_user_by_provider(&self, provider: &str, provider_id: &str) -> Result<Option<User>> {
        let result = self.conn.query_row(
            &format!(
                "SELECT {USER_COLS} FROM users WHERE auth_provider = ? AND provider_id = ? \
                 ORDER BY COALESCE(last_login_at, created_at) DESC LIMIT 1"
            ),
            params![provider, provider_id],
            user_from_row,
        );
        match result {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn update_user(
        &self,
        id: &str,
        name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<User> {
        self.conn.execute(
            "UPDATE users SET name = COALESCE(?1, name), avatar_url = COALESCE(?2, avatar_url) \
             WHERE id = ?3",
            params![ids::non_blank(name), ids::non_blank(avatar_url), id],
        )?;
        self.get_user(id)?
            .ok_or(StoreError::NotFoundForUser("user"))
    }

    /// Repoint every foreign key referencing `source` to `target`, then
    /// delete `source`. Runs as a single transaction; a failure anywhere
    /// leaves the store untouched.
    pub fn merge_users(&self, source_id: &str, target_id: &str) -> Result<()> {
        if source_id == target_id {
            return Ok(());
        }
        if self.get_user(target_id)?.is_none() {
            return Err(StoreError::NotFoundForUser("user"));
        }
        let tx = self.conn.unchecked_transaction()?;

        // Membership edges first: drop source rows that would duplicate a
        // non-removed (org, user) / (project, user) pair the target already
        // holds. The target's row wins.
        tx.execute(
            "DELETE FROM organization_members WHERE user_id = ?1 AND status != 'removed' \
             AND organization_id IN (SELECT organization_id FROM organization_members \
                                     WHERE user_id = ?2 AND status != 'removed')",
            params![source_id, target_id],
        )?;
        tx.execute(
            "DELETE FROM project_members WHERE user_id = ?1 AND status != 'removed' \
             AND project_id IN (SELECT project_id FROM project_members \
                                WHERE user_id = ?2 AND status != 'removed')",
            params![source_id, target_id],
        )?;

        for (table, column) in [
            ("projects", "owner_user_id"),
            ("organizations", "owner_user_id"),
            ("media_items", "created_by"),
            ("notes", "author_id"),
            ("activity_log", "actor_id"),
            ("activity_comments", "author_id"),
            ("project_notifications", "recipient_user_id"),
            ("organization_members", "user_id"),
            ("organization_members", "invited_by"),
            ("project_members", "user_id"),
            ("project_members", "invited_by"),
        ] {
            tx.execute(
                &format!("UPDATE {table} SET {column} = ?1 WHERE {column} = ?2"),
                params![target_id, source_id],
            )?;
        }

        tx.execute("DELETE FROM users WHERE id = ?", [source_id])?;
        tx.commit()?;
        info!(source = %source_id, target = %target_id, "merged duplicate users");
        Ok(())
    }

    /// Collapse duplicate users sharing an auth identity. The most recently
    /// active row in each group becomes canonical. Returns the number of
    /// rows merged away.
    pub fn deduplicate_users_by_identity(&self) -> Result<usize> {
        let mut merged = 0usize;
        for key_expr in [
            "auth_user_id",
            "auth_provider || ':' || provider_id",
        ] {
            // Group key alongside the id; rows arrive most-recent-first
            // within each group, so the first row per key is canonical.
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {key_expr}, id FROM users WHERE {key_expr} IS NOT NULL AND {key_expr} != '' \
                 ORDER BY {key_expr}, COALESCE(last_login_at, created_at) DESC, id"
            ))?;
            let rows: Vec<(String, String)> = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .filter_map(|r| r.ok())
                .collect();
            drop(stmt);

            let mut canonical: Option<(String, String)> = None;
            for (key, id) in rows {
                match &canonical {
                    Some((ck, cid)) if *ck == key => {
                        if let Err(e) = self.merge_users(&id, cid) {
                            warn!(source = %id, target = %cid, error = %e, "dedup merge failed");
                        } else {
                            merged += 1;
                        }
                    }
                    _ => canonical = Some((key, id)),
                }
            }
        }
        if merged > 0 {
            info!(merged, "user deduplication pass complete");
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil;
    use rusqlite::params;

    #[test]
    fn test_find_or_create_attaches_to_existing_auth_identity() {
        let (_dir, db) = testutil::open();
        let first = db
            .find_or_create_user_by_identity(Some("auth-1"), None, "a@example.com", "A")
            .unwrap();
        let second = db
            .find_or_create_user_by_identity(Some("auth-1"), None, "a@example.com", "A")
            .unwrap();
        assert_eq!(first.id, second.id);
        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_merge_users_repoints_every_reference() {
        let (_dir, db) = testutil::open_scoped("alice");
        let project = db.create_project("Tower", None, None, None).unwrap();
        db.create_user_with_id("alice2", "alice2@example.com", "Alice Dup")
            .unwrap();
        db.conn
            .execute(
                "UPDATE activity_log SET actor_id = 'alice2' WHERE project_id = ?",
                [&project.id],
            )
            .unwrap();
        db.conn
            .execute(
                "INSERT INTO project_notifications \
                 (id, project_id, recipient_user_id, is_read, created_at) \
                 VALUES ('n1', ?, 'alice2', 0, 0)",
                [&project.id],
            )
            .unwrap();

        db.merge_users("alice2", "alice").unwrap();

        assert!(db.get_user("alice2").unwrap().is_none());
        for (table, column) in [
            ("activity_log", "actor_id"),
            ("project_notifications", "recipient_user_id"),
        ] {
            let stragglers: i64 = db
                .conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM {table} WHERE {column} = 'alice2'"),
                    [],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(stragglers, 0, "{table}.{column} still references source");
        }
    }

    #[test]
    fn test_merge_drops_duplicate_membership_edges() {
        let (_dir, db) = testutil::open_scoped("alice");
        let project = db.create_project("Tower", None, None, None).unwrap();
        db.create_user_with_id("dup", "dup@example.com", "Dup")
            .unwrap();
        // Source holds a second active membership on the same project.
        db.conn
            .execute(
                "INSERT INTO project_members \
                 (id, project_id, user_id, role, status, created_at, updated_at) \
                 VALUES ('pm-dup', ?, 'dup', 'worker', 'active', 0, 0)",
                [&project.id],
            )
            .unwrap();

        db.merge_users("dup", "alice").unwrap();

        let active: i64 = db
            .conn
            .query_row(
                "SELECT COUNT(*) FROM project_members \
                 WHERE project_id = ? AND user_id = 'alice' AND status != 'removed'",
                [&project.id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(active, 1);
    }

    #[test]
    fn test_dedup_collapses_shared_auth_id_to_most_recent() {
        let (_dir, db) = testutil::open();
        db.conn
            .execute(
                "INSERT INTO users (id, auth_user_id, email, created_at, last_login_at) VALUES \
                 ('old', 'auth-9', 'x@example.com', 100, 100), \
                 ('new', 'auth-9', 'x@example.com', 200, 5000)",
                [],
            )
            .unwrap();
        db.conn
            .execute(
                "INSERT INTO projects (id, name, owner_user_id, created_at, updated_at) \
                 VALUES ('p1', 'P', 'old', 0, 0)",
                params![],
            )
            .unwrap();

        let merged = db.deduplicate_users_by_identity().unwrap();
        assert_eq!(merged, 1);

        let remaining: Vec<String> = {
            let mut stmt = db.conn.prepare("SELECT id FROM users").unwrap();
            stmt.query_map([], |r| r.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };
        assert_eq!(remaining, vec!["new".to_string()]);

        let owner: String = db
            .conn
            .query_row("SELECT owner_user_id FROM projects WHERE id = 'p1'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(owner, "new");
    }
}
