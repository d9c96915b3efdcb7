//! Per-project membership edges.
//!
//! Mirrors the organization rules with project vocabulary: a manager plays
//! the admin part and may not touch owner or manager rows, and the last
//! active owner is immovable.

use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::activity::{actions, ActivityMetadata};
use super::orgs::MemberStatus;
use super::Database;
use crate::error::{Result, StoreError};
use crate::ids;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectRole {
    Owner,
    Manager,
    Worker,
    Client,
}

impl ProjectRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectRole::Owner => "owner",
            ProjectRole::Manager => "manager",
            ProjectRole::Worker => "worker",
            ProjectRole::Client => "client",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(ProjectRole::Owner),
            "manager" => Some(ProjectRole::Manager),
            "worker" => Some(ProjectRole::Worker),
            "client" => Some(ProjectRole::Client),
            _ => None,
        }
    }

    fn is_privileged(&self) -> bool {
        matches!(self, ProjectRole::Owner | ProjectRole::Manager)
    }
}

#[derive(Debug, Clone)]
pub struct ProjectMember {
    pub id: String,
    pub project_id: String,
    pub user_id: Option<String>,
    pub invited_email: Option<String>,
    pub role: ProjectRole,
    pub status: MemberStatus,
    pub invited_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub accepted_at: Option<i64>,
}

const MEMBER_COLS: &str = "id, project_id, user_id, invited_email, role, status, invited_by, \
                           created_at, updated_at, accepted_at";

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<ProjectMember> {
    let role: String = row.get(4)?;
    let status: String = row.get(5)?;
    Ok(ProjectMember {
        id: row.get(0)?,
        project_id: row.get(1)?,
        user_id: row.get(2)?,
        invited_email: row.get(3)?,
        role: ProjectRole::from_str(&role).unwrap_or(ProjectRole::Worker),
        status: MemberStatus::from_str(&status).unwrap_or(MemberStatus::Invited),
        invited_by: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        accepted_at: row.get(9)?,
    })
}

impl Database {
    /// Attach an existing user directly as an active member. Idempotent for
    /// a user who already holds a non-removed membership.
    pub fn add_project_member(
        &self,
        project_id: &str,
        user_id: &str,
        role: ProjectRole,
    ) -> Result<ProjectMember> {
        let scope = self.assert_project_access(project_id)?;
        self.check_project_member_grant(project_id, &scope, role)?;
        if self.get_user(user_id)?.is_none() {
            return Err(StoreError::NotFoundForUser("user"));
        }

        let existing = self.conn.query_row(
            &format!(
                "SELECT {MEMBER_COLS} FROM project_members \
                 WHERE project_id = ? AND user_id = ? AND status != 'removed'"
            ),
            params![project_id, user_id],
            member_from_row,
        );
        match existing {
            Ok(member) => return Ok(member),
            Err(rusqlite::Error::QueryReturnedNoRows) => {}
            Err(e) => return Err(e.into()),
        }

        let id = ids::new_id();
        let now = ids::now_ms();
        self.conn.execute(
            "INSERT INTO project_members (id, project_id, user_id, role, status, invited_by, \
             created_at, updated_at, accepted_at, origin) \
             VALUES (?, ?, ?, ?, 'active', ?, ?, ?, ?, 'local')",
            params![id, project_id, user_id, role.as_str(), scope, now, now, now],
        )?;
        self.touch_project(project_id)?;
        self.log_activity(
            project_id,
            actions::MEMBER_ADDED,
            Some(&id),
            Some(ActivityMetadata::Member {
                member_id: id.clone(),
                user_id: Some(user_id.to_string()),
                role: role.as_str().to_string(),
            }),
        );
        self.get_project_member_row(&id)
    }

    pub fn invite_project_member(
        &self,
        project_id: &str,
        email: &str,
        role: ProjectRole,
    ) -> Result<ProjectMember> {
        let scope = self.assert_project_access(project_id)?;
        self.check_project_member_grant(project_id, &scope, role)?;
        let email = ids::normalize_email(email)
            .ok_or_else(|| StoreError::validation("invite email must not be empty"))?;

        let existing = self.conn.query_row(
            &format!(
                "SELECT {MEMBER_COLS} FROM project_members \
                 WHERE project_id = ? AND status != 'removed' AND invited_email = ?"
            ),
            params![project_id, email],
            member_from_row,
        );
        match existing {
            Ok(member) => return Ok(member),
            Err(rusqlite::Error::QueryReturnedNoRows) => {}
            Err(e) => return Err(e.into()),
        }

        let id = ids::new_id();
        let now = ids::now_ms();
        self.conn.execute(
            "INSERT INTO project_members (id, project_id, invited_email, role, status, \
             invited_by, created_at, updated_at, origin) \
             VALUES (?, ?, ?, ?, 'invited', ?, ?, ?, 'local')",
            params![id, project_id, email, role.as_str(), scope, now, now],
        )?;
        self.get_project_member_row(&id)
    }

    pub fn accept_project_invite(&self, project_id: &str) -> Result<ProjectMember> {
        let scope = self.require_scope()?;
        let user = self
            .get_user(&scope)?
            .ok_or(StoreError::NotFoundForUser("user"))?;
        let email = user
            .email
            .as_deref()
            .and_then(ids::normalize_email)
            .ok_or_else(|| StoreError::validation("active user has no email on record"))?;

        let invite = self.conn.query_row(
            &format!(
                "SELECT {MEMBER_COLS} FROM project_members \
                 WHERE project_id = ? AND status = 'invited' AND invited_email = ?"
            ),
            params![project_id, email],
            member_from_row,
        );
        let invite = match invite {
            Ok(invite) => invite,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(StoreError::NotFoundForUser("invite"))
            }
            Err(e) => return Err(e.into()),
        };

        let existing = self.conn.query_row(
            &format!(
                "SELECT {MEMBER_COLS} FROM project_members \
                 WHERE project_id = ? AND user_id = ? AND status != 'removed'"
            ),
            params![project_id, scope],
            member_from_row,
        );
        match existing {
            Ok(member) => {
                self.conn.execute(
                    "UPDATE project_members SET status = 'removed', updated_at = ? WHERE id = ?",
                    params![ids::now_ms(), invite.id],
                )?;
                return Ok(member);
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => {}
            Err(e) => return Err(e.into()),
        }

        let now = ids::now_ms();
        self.conn.execute(
            "UPDATE project_members SET user_id = ?, invited_email = NULL, status = 'active', \
             accepted_at = ?, updated_at = ? WHERE id = ?",
            params![scope, now, now, invite.id],
        )?;
        self.touch_project(project_id)?;
        self.log_activity(
            project_id,
            actions::MEMBER_ADDED,
            Some(&invite.id),
            Some(ActivityMetadata::Member {
                member_id: invite.id.clone(),
                user_id: Some(scope),
                role: invite.role.as_str().to_string(),
            }),
        );
        self.get_project_member_row(&invite.id)
    }

    pub fn get_project_members(&self, project_id: &str) -> Result<Vec<ProjectMember>> {
        self.assert_project_access(project_id)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MEMBER_COLS} FROM project_members \
             WHERE project_id = ? AND status != 'removed' ORDER BY created_at"
        ))?;
        let members = stmt
            .query_map([project_id], member_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(members)
    }

    pub fn set_project_member_role_by_id(
        &self,
        member_id: &str,
        role: ProjectRole,
    ) -> Result<ProjectMember> {
        let member = self.get_project_member_row(member_id)?;
        let scope = self.assert_child_project_access(&member.project_id, "project member")?;
        self.check_project_member_authority(&member, &scope, role.is_privileged())?;

        if member.role == ProjectRole::Owner
            && member.status == MemberStatus::Active
            && role != ProjectRole::Owner
            && self.count_active_project_owners(&member.project_id)? <= 1
        {
            return Err(StoreError::invariant(
                "Cannot remove the last active owner",
            ));
        }
        self.conn.execute(
            "UPDATE project_members SET role = ?, updated_at = ? WHERE id = ?",
            params![role.as_str(), ids::now_ms(), member_id],
        )?;
        self.get_project_member_row(member_id)
    }

    pub fn remove_project_member_by_id(&self, member_id: &str) -> Result<()> {
        let member = self.get_project_member_row(member_id)?;
        let scope = self.assert_child_project_access(&member.project_id, "project member")?;
        self.check_project_member_authority(&member, &scope, false)?;

        if member.role == ProjectRole::Owner
            && member.status == MemberStatus::Active
            && self.count_active_project_owners(&member.project_id)? <= 1
        {
            return Err(StoreError::invariant(
                "Cannot remove the last active owner",
            ));
        }
        self.conn.execute(
            "UPDATE project_members SET status = 'removed', updated_at = ? WHERE id = ?",
            params![ids::now_ms(), member_id],
        )?;
        self.touch_project(&member.project_id)?;
        self.log_activity(
            &member.project_id,
            actions::MEMBER_REMOVED,
            Some(member_id),
            Some(ActivityMetadata::Member {
                member_id: member_id.to_string(),
                user_id: member.user_id.clone(),
                role: member.role.as_str().to_string(),
            }),
        );
        Ok(())
    }

    pub(crate) fn project_role_of(
        &self,
        project_id: &str,
        user_id: &str,
    ) -> Result<Option<ProjectRole>> {
        let record_owner: std::result::Result<String, _> = self.conn.query_row(
            "SELECT id FROM projects WHERE id = ? AND owner_user_id = ?",
            params![project_id, user_id],
            |row| row.get(0),
        );
        match record_owner {
            Ok(_) => return Ok(Some(ProjectRole::Owner)),
            Err(rusqlite::Error::QueryReturnedNoRows) => {}
            Err(e) => return Err(e.into()),
        }
        let role: std::result::Result<String, _> = self.conn.query_row(
            "SELECT role FROM project_members \
             WHERE project_id = ? AND user_id = ? AND status = 'active'",
            params![project_id, user_id],
            |row| row.get(0),
        );
        match role {
            Ok(role) => Ok(ProjectRole::from_str(&role)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn check_project_member_grant(
        &self,
        project_id: &str,
        actor_id: &str,
        role: ProjectRole,
    ) -> Result<()> {
        match self.project_role_of(project_id, actor_id)? {
            Some(ProjectRole::Owner) => Ok(()),
            Some(ProjectRole::Manager) if !role.is_privileged() => Ok(()),
            Some(ProjectRole::Manager) => Err(StoreError::invariant(
                "Only an owner can grant the owner or manager role",
            )),
            _ => Err(StoreError::invariant(
                "Only an owner or manager can manage members",
            )),
        }
    }

    fn check_project_member_authority(
        &self,
        target: &ProjectMember,
        actor_id: &str,
        granting_privileged: bool,
    ) -> Result<()> {
        match self.project_role_of(&target.project_id, actor_id)? {
            Some(ProjectRole::Owner) => Ok(()),
            Some(ProjectRole::Manager) => {
                if target.role.is_privileged() || granting_privileged {
                    Err(StoreError::invariant(
                        "Only an owner can modify owner or manager members",
                    ))
                } else {
                    Ok(())
                }
            }
            _ => Err(StoreError::invariant(
                "Only an owner or manager can manage members",
            )),
        }
    }

    fn count_active_project_owners(&self, project_id: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM project_members \
             WHERE project_id = ? AND role = 'owner' AND status = 'active'",
            [project_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub(crate) fn get_project_member_row(&self, id: &str) -> Result<ProjectMember> {
        let result = self.conn.query_row(
            &format!("SELECT {MEMBER_COLS} FROM project_members WHERE id = ?"),
            [id],
            member_from_row,
        );
        match result {
            Ok(member) => Ok(member),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                Err(StoreError::NotFoundForUser("project member"))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil;
    use super::*;

    #[test]
    fn test_last_owner_protection_and_handoff() {
        let (_dir, db) = testutil::open_scoped("alice");
        let project = db.create_project("Tower", None, None, None).unwrap();
        let owner = db.get_project_members(&project.id).unwrap()[0].clone();

        let err = db.remove_project_member_by_id(&owner.id).unwrap_err();
        assert!(matches!(err, StoreError::InvariantViolation(_)));
        let err = db
            .set_project_member_role_by_id(&owner.id, ProjectRole::Worker)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvariantViolation(_)));

        // With a second active owner in place the first may step down.
        db.create_user_with_id("bob", "bob@example.com", "Bob")
            .unwrap();
        db.add_project_member(&project.id, "bob", ProjectRole::Owner)
            .unwrap();
        db.remove_project_member_by_id(&owner.id).unwrap();
        assert_eq!(db.get_project_members(&project.id).unwrap().len(), 1);
    }

    #[test]
    fn test_add_member_is_idempotent() {
        let (_dir, db) = testutil::open_scoped("alice");
        let project = db.create_project("Tower", None, None, None).unwrap();
        db.create_user_with_id("bob", "bob@example.com", "Bob")
            .unwrap();
        let first = db
            .add_project_member(&project.id, "bob", ProjectRole::Worker)
            .unwrap();
        let second = db
            .add_project_member(&project.id, "bob", ProjectRole::Worker)
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn test_manager_cannot_touch_privileged_members() {
        let (_dir, mut db) = testutil::open_scoped("alice");
        let project = db.create_project("Tower", None, None, None).unwrap();
        let owner = db.get_project_members(&project.id).unwrap()[0].clone();
        db.create_user_with_id("mia", "mia@example.com", "Mia")
            .unwrap();
        db.add_project_member(&project.id, "mia", ProjectRole::Manager)
            .unwrap();

        db.set_active_user_scope(Some("mia")).unwrap();
        let err = db
            .set_project_member_role_by_id(&owner.id, ProjectRole::Worker)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvariantViolation(_)));
    }
}
