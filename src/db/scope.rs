//! Access scope resolution.
//!
//! Every read/write entry point resolves the active user scope first and
//! evaluates the owner-or-active-member predicate against it. A row that
//! fails the predicate is reported as not found, identical to a row that
//! does not exist.

use rusqlite::params;
use tracing::debug;

use super::Database;
use crate::error::{Result, StoreError};
use crate::ids;

impl Database {
    /// Set (or clear) the active user for this session.
    ///
    /// On first activation, ownerless rows left over from the
    /// pre-multi-tenant era are claimed by the new scope. Adoption only ever
    /// fills empty owner fields, so it is idempotent and never steals a row.
    pub fn set_active_user_scope(&mut self, user_id: Option<&str>) -> Result<()> {
        match ids::non_blank(user_id) {
            Some(id) => {
                self.adopt_legacy_rows(&id)?;
                debug!(user = %id, "active user scope set");
                self.scope = Some(id);
            }
            None => {
                debug!("active user scope cleared");
                self.scope = None;
            }
        }
        Ok(())
    }

    pub fn active_user_scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// The active scope, or `NoActiveScope`. Never silently defaulted.
    pub(crate) fn require_scope(&self) -> Result<String> {
        self.scope.clone().ok_or(StoreError::NoActiveScope)
    }

    /// Owner-or-active-member predicate for a project row.
    pub(crate) fn user_can_access_project(&self, project_id: &str, user_id: &str) -> Result<bool> {
        let found = self.conn.query_row(
            "SELECT 1 FROM projects p WHERE p.id = ?1 AND (p.owner_user_id = ?2 \
             OR EXISTS (SELECT 1 FROM project_members m \
                        WHERE m.project_id = p.id AND m.user_id = ?2 AND m.status = 'active'))",
            params![project_id, user_id],
            |_| Ok(()),
        );
        match found {
            Ok(()) => Ok(true),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Owner-or-active-member predicate for an organization row.
    pub(crate) fn user_can_access_organization(
        &self,
        organization_id: &str,
        user_id: &str,
    ) -> Result<bool> {
        let found = self.conn.query_row(
            "SELECT 1 FROM organizations o WHERE o.id = ?1 AND (o.owner_user_id = ?2 \
             OR EXISTS (SELECT 1 FROM organization_members m \
                        WHERE m.organization_id = o.id AND m.user_id = ?2 AND m.status = 'active'))",
            params![organization_id, user_id],
            |_| Ok(()),
        );
        match found {
            Ok(()) => Ok(true),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve the scope and check project access in one step. Returns the
    /// scope id on success; inaccessible and absent rows are the same error.
    pub(crate) fn assert_project_access(&self, project_id: &str) -> Result<String> {
        let scope = self.require_scope()?;
        if self.user_can_access_project(project_id, &scope)? {
            Ok(scope)
        } else {
            Err(StoreError::NotFoundForUser("project"))
        }
    }

    pub(crate) fn assert_organization_access(&self, organization_id: &str) -> Result<String> {
        let scope = self.require_scope()?;
        if self.user_can_access_organization(organization_id, &scope)? {
            Ok(scope)
        } else {
            Err(StoreError::NotFoundForUser("organization"))
        }
    }

    /// Access check reached through a child row (media, note, phase, ...).
    /// Denials report under the child's label so the caller cannot tell a
    /// foreign row from one that does not exist.
    pub(crate) fn assert_child_project_access(
        &self,
        project_id: &str,
        entity: &'static str,
    ) -> Result<String> {
        self.assert_project_access(project_id).map_err(|e| match e {
            StoreError::NotFoundForUser(_) => StoreError::NotFoundForUser(entity),
            other => other,
        })
    }

    pub(crate) fn assert_child_organization_access(
        &self,
        organization_id: &str,
        entity: &'static str,
    ) -> Result<String> {
        self.assert_organization_access(organization_id)
            .map_err(|e| match e {
                StoreError::NotFoundForUser(_) => StoreError::NotFoundForUser(entity),
                other => other,
            })
    }

    fn adopt_legacy_rows(&self, user_id: &str) -> Result<()> {
        let mut claimed = 0usize;
        for (table, owner_col) in [
            ("projects", "owner_user_id"),
            ("organizations", "owner_user_id"),
            ("media_items", "created_by"),
            ("notes", "author_id"),
        ] {
            claimed += self.conn.execute(
                &format!(
                    "UPDATE {table} SET {owner_col} = ?1 \
                     WHERE {owner_col} IS NULL OR {owner_col} = ''"
                ),
                params![user_id],
            )?;
        }
        if claimed > 0 {
            debug!(user = %user_id, rows = claimed, "adopted legacy ownerless rows");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil;
    use crate::error::StoreError;

    #[test]
    fn test_operations_require_scope() {
        let (_dir, db) = testutil::open();
        let err = db.get_projects(None).unwrap_err();
        assert!(matches!(err, StoreError::NoActiveScope));
    }

    #[test]
    fn test_legacy_adoption_claims_only_ownerless_rows() {
        let (_dir, mut db) = testutil::open();
        db.conn
            .execute(
                "INSERT INTO projects (id, name, owner_user_id, created_at, updated_at) \
                 VALUES ('legacy-1', 'Old', NULL, 0, 0), ('owned-1', 'Theirs', 'other', 0, 0)",
                [],
            )
            .unwrap();
        db.create_user_with_id("alice", "alice@example.com", "Alice")
            .unwrap();
        db.set_active_user_scope(Some("alice")).unwrap();

        let owner: String = db
            .conn
            .query_row(
                "SELECT owner_user_id FROM projects WHERE id = 'legacy-1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(owner, "alice");

        // Re-activation must not reassign; neither must it touch owned rows.
        db.set_active_user_scope(Some("alice")).unwrap();
        let other: String = db
            .conn
            .query_row(
                "SELECT owner_user_id FROM projects WHERE id = 'owned-1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(other, "other");
    }

    #[test]
    fn test_access_isolation_between_scopes() {
        let (_dir, mut db) = testutil::open_scoped("alice");
        let project = db.create_project("Tower", None, None, None).unwrap();

        db.create_user_with_id("bob", "bob@example.com", "Bob")
            .unwrap();
        db.set_active_user_scope(Some("bob")).unwrap();

        assert!(db.get_projects(None).unwrap().is_empty());
        let err = db.get_project_by_id(&project.id).unwrap_err();
        assert!(matches!(err, StoreError::NotFoundForUser(_)));
    }
}
